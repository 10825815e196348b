//! EMV tag identifiers and the static tag dictionary
//!
//! The dictionary is only used for human-readable output. A tag missing from
//! it is reported as "Unknown" and never causes a decode failure.

use crate::tlv::Tag;

// Templates
pub const FCI_TEMPLATE: Tag = Tag::new(0x6F);
pub const FCI_PROPRIETARY_TEMPLATE: Tag = Tag::new(0xA5);
pub const FCI_ISSUER_DISCRETIONARY_DATA: Tag = Tag::new(0xBF0C);
pub const DIRECTORY_ENTRY: Tag = Tag::new(0x61);
pub const RECORD_TEMPLATE: Tag = Tag::new(0x70);
pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_1: Tag = Tag::new(0x80);
pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_2: Tag = Tag::new(0x77);
pub const COMMAND_TEMPLATE: Tag = Tag::new(0x83);

// Application selection
pub const APPLICATION_IDENTIFIER: Tag = Tag::new(0x4F);
pub const APPLICATION_LABEL: Tag = Tag::new(0x50);
pub const DF_NAME: Tag = Tag::new(0x84);
pub const APPLICATION_PRIORITY_INDICATOR: Tag = Tag::new(0x87);
pub const APPLICATION_PREFERRED_NAME: Tag = Tag::new(0x9F12);
pub const LANGUAGE_PREFERENCE: Tag = Tag::new(0x5F2D);
pub const KERNEL_IDENTIFIER: Tag = Tag::new(0x9F2A);
pub const PDOL: Tag = Tag::new(0x9F38);
pub const FORM_FACTOR_INDICATOR: Tag = Tag::new(0x9F6E);

// Processing options
pub const AIP: Tag = Tag::new(0x82);
pub const AFL: Tag = Tag::new(0x94);

// Card data
pub const APPLICATION_PAN: Tag = Tag::new(0x5A);
pub const APPLICATION_PAN_SEQUENCE_NUMBER: Tag = Tag::new(0x5F34);
pub const APPLICATION_EXPIRATION_DATE: Tag = Tag::new(0x5F24);
pub const APPLICATION_EFFECTIVE_DATE: Tag = Tag::new(0x5F25);
pub const APPLICATION_USAGE_CONTROL: Tag = Tag::new(0x9F07);
pub const APPLICATION_VERSION_NUMBER: Tag = Tag::new(0x9F08);
pub const CARDHOLDER_NAME: Tag = Tag::new(0x5F20);
pub const ISSUER_COUNTRY_CODE: Tag = Tag::new(0x5F28);
pub const TRACK_2_EQUIVALENT_DATA: Tag = Tag::new(0x57);
pub const CDOL1: Tag = Tag::new(0x8C);
pub const CDOL2: Tag = Tag::new(0x8D);
pub const CVM_LIST: Tag = Tag::new(0x8E);
pub const CA_PUBLIC_KEY_INDEX: Tag = Tag::new(0x8F);
pub const PAYMENT_ACCOUNT_REFERENCE: Tag = Tag::new(0xDF8101);
pub const CARD_TRANSACTION_QUALIFIERS: Tag = Tag::new(0x9F6C);

// Terminal data
pub const AMOUNT_AUTHORISED: Tag = Tag::new(0x9F02);
pub const AMOUNT_OTHER: Tag = Tag::new(0x9F03);
pub const TERMINAL_COUNTRY_CODE: Tag = Tag::new(0x9F1A);
pub const TERMINAL_VERIFICATION_RESULTS: Tag = Tag::new(0x95);
pub const TRANSACTION_CURRENCY_CODE: Tag = Tag::new(0x5F2A);
pub const TRANSACTION_DATE: Tag = Tag::new(0x9A);
pub const TRANSACTION_TYPE: Tag = Tag::new(0x9C);
pub const UNPREDICTABLE_NUMBER: Tag = Tag::new(0x9F37);
pub const TERMINAL_TYPE: Tag = Tag::new(0x9F35);
pub const TERMINAL_CAPABILITIES: Tag = Tag::new(0x9F33);
pub const TERMINAL_TRANSACTION_QUALIFIERS: Tag = Tag::new(0x9F66);
pub const CVM_RESULTS: Tag = Tag::new(0x9F34);

// Cryptogram
pub const CRYPTOGRAM_INFORMATION_DATA: Tag = Tag::new(0x9F27);
pub const APPLICATION_CRYPTOGRAM: Tag = Tag::new(0x9F26);
pub const APPLICATION_TRANSACTION_COUNTER: Tag = Tag::new(0x9F36);
pub const ISSUER_APPLICATION_DATA: Tag = Tag::new(0x9F10);
pub const SIGNED_DYNAMIC_APPLICATION_DATA: Tag = Tag::new(0x9F4B);

// Card risk management and mag-stripe mode
pub const PIN_TRY_COUNTER: Tag = Tag::new(0x9F17);
pub const CVC3_TRACK1: Tag = Tag::new(0x9F60);
pub const CVC3_TRACK2: Tag = Tag::new(0x9F61);

/// Dictionary entry for a known tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub name: &'static str,
    pub constructed: bool,
}

const fn info(name: &'static str, constructed: bool) -> TagInfo {
    TagInfo { name, constructed }
}

/// Every tag in the dictionary, in ascending tag order
const TABLE: &[(u32, TagInfo)] = &[
    (0x4F, info("Application Identifier (AID)", false)),
    (0x50, info("Application Label", false)),
    (0x56, info("Track 1 Data", false)),
    (0x57, info("Track 2 Equivalent Data", false)),
    (0x5A, info("Application PAN", false)),
    (0x61, info("Application Template", true)),
    (0x6F, info("File Control Information (FCI) Template", true)),
    (0x70, info("Record Template", true)),
    (0x77, info("Response Message Template Format 2", true)),
    (0x80, info("Response Message Template Format 1", false)),
    (0x82, info("Application Interchange Profile", false)),
    (0x83, info("Command Template", false)),
    (0x84, info("Dedicated File (DF) Name", false)),
    (0x87, info("Application Priority Indicator", false)),
    (0x8C, info("CDOL1", false)),
    (0x8D, info("CDOL2", false)),
    (0x8E, info("CVM List", false)),
    (0x8F, info("CA Public Key Index", false)),
    (0x90, info("Issuer Public Key Certificate", false)),
    (0x92, info("Issuer Public Key Remainder", false)),
    (0x93, info("Signed Static Application Data", false)),
    (0x94, info("Application File Locator", false)),
    (0x95, info("Terminal Verification Results", false)),
    (0x9A, info("Transaction Date", false)),
    (0x9C, info("Transaction Type", false)),
    (0xA5, info("FCI Proprietary Template", true)),
    (0x5F20, info("Cardholder Name", false)),
    (0x5F24, info("Application Expiration Date", false)),
    (0x5F25, info("Application Effective Date", false)),
    (0x5F28, info("Issuer Country Code", false)),
    (0x5F2A, info("Transaction Currency Code", false)),
    (0x5F2D, info("Language Preference", false)),
    (0x5F34, info("Application PAN Sequence Number", false)),
    (0x9F02, info("Amount, Authorised", false)),
    (0x9F03, info("Amount, Other", false)),
    (0x9F07, info("Application Usage Control", false)),
    (0x9F08, info("Application Version Number (Card)", false)),
    (0x9F10, info("Issuer Application Data", false)),
    (0x9F12, info("Application Preferred Name", false)),
    (0x9F17, info("PIN Try Counter", false)),
    (0x9F1A, info("Terminal Country Code", false)),
    (0x9F26, info("Application Cryptogram", false)),
    (0x9F27, info("Cryptogram Information Data", false)),
    (0x9F2A, info("Kernel Identifier", false)),
    (0x9F32, info("Issuer Public Key Exponent", false)),
    (0x9F33, info("Terminal Capabilities", false)),
    (0x9F34, info("CVM Results", false)),
    (0x9F35, info("Terminal Type", false)),
    (0x9F36, info("Application Transaction Counter", false)),
    (0x9F37, info("Unpredictable Number", false)),
    (0x9F38, info("PDOL", false)),
    (0x9F42, info("Application Currency Code", false)),
    (0x9F46, info("ICC Public Key Certificate", false)),
    (0x9F47, info("ICC Public Key Exponent", false)),
    (0x9F4A, info("Static Data Authentication Tag List", false)),
    (0x9F4B, info("Signed Dynamic Application Data", false)),
    (0x9F60, info("CVC3 (Track 1)", false)),
    (0x9F61, info("CVC3 (Track 2)", false)),
    (0x9F66, info("Terminal Transaction Qualifiers", false)),
    (0x9F6B, info("Track 2 Data", false)),
    (0x9F6C, info("Card Transaction Qualifiers", false)),
    (0x9F6E, info("Form Factor Indicator", false)),
    (0xBF0C, info("FCI Issuer Discretionary Data", true)),
    (0xDF8101, info("Payment Account Reference", false)),
];

/// Look up a tag in the dictionary
pub fn lookup(tag: Tag) -> Option<TagInfo> {
    TABLE
        .binary_search_by_key(&tag.value(), |(value, _)| *value)
        .ok()
        .map(|index| TABLE[index].1)
}

/// All known tags, for listing
pub fn known() -> impl Iterator<Item = (Tag, TagInfo)> {
    TABLE.iter().map(|(value, info)| (Tag::new(*value), *info))
}

/// Look up a tag given as hex text, e.g. `"9F6E"`
pub fn lookup_hex(tag: &str) -> Option<TagInfo> {
    Tag::from_hex(tag).ok().and_then(lookup)
}

/// Get a human-readable name for a tag
pub fn tag_name(tag: Tag) -> &'static str {
    lookup(tag).map_or("Unknown", |info| info.name)
}
