//! Card and terminal profiles
//!
//! A profile is plain data: the tag values, records and behaviour an emulator
//! answers with. Preset profiles are chosen through the closed
//! [`CardKind`] / [`TerminalKind`] enums.

use std::fmt;
use std::str::FromStr;

use emv_common::{tags, DolEntry, Tag, TagMap, TagStore};
use hex_literal::hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{AflEntry, CryptogramType, InterfaceType, ResponseFormat};
use crate::kernel::KernelId;

/// Known EMV Application Identifiers (AIDs)
pub mod aids {
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x25, 0x01];
    pub const JCB: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x65, 0x10, 0x10];
    pub const DISCOVER: &[u8] = &[0xA0, 0x00, 0x00, 0x01, 0x52, 0x30, 0x10];
    pub const UNIONPAY: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x33, 0x01, 0x01, 0x01];

    pub const ALL: [&[u8]; 6] = [VISA, MASTERCARD, AMEX, JCB, DISCOVER, UNIONPAY];
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {what} '{name}', expected one of: {expected}")]
pub struct UnknownKind {
    what: &'static str,
    name: String,
    expected: String,
}

/// How the card answers GENERATE AC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardDecision {
    /// Return whatever the terminal asked for
    Approve,
    /// Go online unless a decline was asked for
    Online,
    /// Always AAC
    Decline,
    /// CID with the reserved `11` top bits
    Undefined,
}

impl CardDecision {
    /// Cryptogram Information Data returned for a request of `requested`
    pub const fn cid(self, requested: CryptogramType) -> u8 {
        match (self, requested) {
            (Self::Approve, requested) => requested.reference_control(),
            (Self::Online, CryptogramType::Aac) | (Self::Decline, _) => 0x00,
            (Self::Online, _) => 0x80,
            (Self::Undefined, _) => 0xC0,
        }
    }
}

/// One record file entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sfi: u8,
    pub number: u8,
    /// Counted in the AFL's offline data authentication records
    pub oda: bool,
    /// Listed in the AFL but answers `6A83` when read
    pub readable: bool,
    pub data: TagMap,
}

impl Record {
    pub fn new(sfi: u8, number: u8, data: TagMap) -> Self {
        Self {
            sfi,
            number,
            oda: false,
            readable: true,
            data,
        }
    }

    pub fn oda(mut self) -> Self {
        self.oda = true;
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.readable = false;
        self
    }
}

/// Everything a [`CardEmulator`](crate::emulator::CardEmulator) answers with
#[derive(Debug, Clone)]
pub struct CardProfile {
    pub name: String,
    pub interface: InterfaceType,
    pub aid: Vec<u8>,
    pub label: String,
    pub priority: u8,
    /// Kernel advertised in the directory and FCI (9F2A)
    pub kernel: Option<KernelId>,
    /// FCI proprietary objects besides label and priority
    pub fci: TagMap,
    pub aip: Vec<u8>,
    pub gpo_format: ResponseFormat,
    /// Extra objects of a Format 2 GPO response
    pub gpo_data: TagMap,
    pub records: Vec<Record>,
    pub gen_ac_format: ResponseFormat,
    pub decision: CardDecision,
    /// Issuer Application Data returned with the cryptogram
    pub issuer_application_data: Option<Vec<u8>>,
    pub atc: u16,
    pub pin: Option<String>,
    pub pin_tries: u8,
    /// Simulated answer delay
    pub latency_ms: u64,
}

impl CardProfile {
    pub fn preset(kind: CardKind) -> Self {
        match kind {
            CardKind::VisaContactless => visa_contactless(),
            CardKind::VisaContact => visa_contact(),
            CardKind::MastercardContactless => mastercard_contactless(),
            CardKind::AmexContactless => amex_contactless(),
            CardKind::DiscoverContactless => discover_contactless(),
            CardKind::CommonKernel => common_kernel(),
            CardKind::MobileWallet => mobile_wallet(),
            CardKind::NonCompliantWearable => non_compliant_wearable(),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_decision(mut self, decision: CardDecision) -> Self {
        self.decision = decision;
        self
    }

    pub fn pdol(&self) -> Option<&[u8]> {
        self.fci.get(tags::PDOL)
    }

    pub fn pdol_entries(&self) -> Option<Vec<DolEntry>> {
        self.pdol().and_then(|pdol| emv_common::parse_dol(pdol).ok())
    }

    /// CDOL1 (`first`) or CDOL2 from the records
    pub fn cdol_entries(&self, first: bool) -> Option<Vec<DolEntry>> {
        let tag = if first { tags::CDOL1 } else { tags::CDOL2 };
        self.find(tag)
            .and_then(|cdol| emv_common::parse_dol(cdol).ok())
    }

    pub fn record(&self, sfi: u8, number: u8) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.sfi == sfi && r.number == number)
    }

    /// Value of `tag` anywhere in the profile
    pub fn find(&self, tag: Tag) -> Option<&[u8]> {
        self.fci
            .get(tag)
            .or_else(|| self.gpo_data.get(tag))
            .or_else(|| self.records.iter().find_map(|r| r.data.get(tag)))
    }

    /// AFL built from the records: one entry per SFI, in SFI order
    pub fn afl(&self) -> Vec<AflEntry> {
        let mut sfis: Vec<u8> = self.records.iter().map(|r| r.sfi).collect();
        sfis.sort_unstable();
        sfis.dedup();

        sfis.into_iter()
            .filter_map(|sfi| {
                let records: Vec<&Record> = self.records.iter().filter(|r| r.sfi == sfi).collect();
                Some(AflEntry {
                    sfi,
                    first_record: records.iter().map(|r| r.number).min()?,
                    last_record: records.iter().map(|r| r.number).max()?,
                    oda_records: records.iter().filter(|r| r.oda).count() as u8,
                })
            })
            .collect()
    }

    pub fn afl_bytes(&self) -> Vec<u8> {
        self.afl().iter().flat_map(AflEntry::to_bytes).collect()
    }
}

/// Terminal configuration consumed by the
/// [`TerminalEmulator`](crate::emulator::TerminalEmulator)
#[derive(Debug, Clone)]
pub struct TerminalProfile {
    pub name: String,
    pub interfaces: Vec<InterfaceType>,
    /// Contactless kernels the terminal can activate
    pub kernels: Vec<KernelId>,
    pub aids: Vec<Vec<u8>>,
    pub terminal_type: u8,
    pub capabilities: Vec<u8>,
    pub transaction_qualifiers: Vec<u8>,
    pub tvr: Vec<u8>,
    /// Always asks for ARQC
    pub online_only: bool,
}

impl TerminalProfile {
    pub fn preset(kind: TerminalKind) -> Self {
        let all_aids = || aids::ALL.iter().map(|aid| aid.to_vec()).collect::<Vec<_>>();
        let contactless = vec![InterfaceType::Contactless, InterfaceType::MobileHce];
        let base = Self {
            name: String::new(),
            interfaces: contactless,
            kernels: Vec::new(),
            aids: Vec::new(),
            terminal_type: 0x22,
            capabilities: hex!("E0F8C8").to_vec(),
            transaction_qualifiers: hex!("36004000").to_vec(),
            tvr: vec![0x00; 5],
            online_only: true,
        };

        match kind {
            TerminalKind::LegacyVisa => Self {
                name: "Legacy Visa reader (C3)".into(),
                kernels: vec![KernelId::C3],
                aids: vec![aids::VISA.to_vec()],
                ..base
            },
            TerminalKind::LegacyMastercard => Self {
                name: "Legacy Mastercard reader (C2)".into(),
                kernels: vec![KernelId::C2],
                aids: vec![aids::MASTERCARD.to_vec()],
                ..base
            },
            TerminalKind::LegacyDiscover => Self {
                name: "Legacy Discover reader (C6)".into(),
                kernels: vec![KernelId::C6],
                aids: vec![aids::DISCOVER.to_vec()],
                ..base
            },
            TerminalKind::MultiNetwork => Self {
                name: "Multi-network reader (C2-C7)".into(),
                kernels: vec![
                    KernelId::C2,
                    KernelId::C3,
                    KernelId::C4,
                    KernelId::C5,
                    KernelId::C6,
                    KernelId::C7,
                ],
                aids: all_aids(),
                ..base
            },
            TerminalKind::CommonKernel => Self {
                name: "Common kernel reader (C2-C8)".into(),
                kernels: vec![
                    KernelId::C2,
                    KernelId::C3,
                    KernelId::C4,
                    KernelId::C5,
                    KernelId::C6,
                    KernelId::C7,
                    KernelId::C8,
                ],
                aids: all_aids(),
                ..base
            },
            TerminalKind::ContactEmv => Self {
                name: "Contact EMV terminal".into(),
                interfaces: vec![InterfaceType::Contact],
                aids: all_aids(),
                capabilities: hex!("E0F0C8").to_vec(),
                online_only: false,
                ..base
            },
            TerminalKind::MisconfiguredKiosk => Self {
                name: "Unattended kiosk with short TVR".into(),
                terminal_type: 0x25,
                kernels: vec![KernelId::C2, KernelId::C3, KernelId::C6],
                aids: vec![
                    aids::VISA.to_vec(),
                    aids::MASTERCARD.to_vec(),
                    aids::DISCOVER.to_vec(),
                ],
                tvr: vec![0x00; 4],
                ..base
            },
        }
    }

    pub fn supports_interface(&self, interface: InterfaceType) -> bool {
        self.interfaces.contains(&interface)
    }

    pub fn supports_kernel(&self, kernel: KernelId) -> bool {
        self.kernels.contains(&kernel)
    }

    /// A card AID is supported when it starts with one of the terminal AIDs
    pub fn supports_aid(&self, aid: &[u8]) -> bool {
        self.aids.iter().any(|known| aid.starts_with(known))
    }
}

macro_rules! kind_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($what:literal) {
            $($variant:ident => $slug:literal, $description:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $slug)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn all() -> Vec<Self> {
                Self::ALL.to_vec()
            }

            pub const fn slug(self) -> &'static str {
                match self {
                    $($name::$variant => $slug,)+
                }
            }

            pub const fn description(self) -> &'static str {
                match self {
                    $($name::$variant => $description,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.slug())
            }
        }

        impl FromStr for $name {
            type Err = UnknownKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|kind| kind.slug().eq_ignore_ascii_case(s))
                    .ok_or_else(|| UnknownKind {
                        what: $what,
                        name: s.to_string(),
                        expected: Self::ALL
                            .iter()
                            .map(|kind| kind.slug())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            }
        }
    };
}

kind_enum! {
    /// Preset card profiles
    pub enum CardKind ("card kind") {
        VisaContactless => "visa_contactless", "Visa qVSDC contactless card";
        VisaContact => "visa_contact", "Visa contact chip card with offline PIN";
        MastercardContactless => "mastercard_contactless", "Mastercard contactless card";
        AmexContactless => "amex_contactless", "American Express contactless card, Format 1 responses";
        DiscoverContactless => "discover_contactless", "Discover D-PAS contactless card";
        CommonKernel => "common_kernel", "Discover card advertising the C8 common kernel, with PAR";
        MobileWallet => "mobile_wallet", "Visa token on a phone (HCE), with FFI and PAR";
        NonCompliantWearable => "non_compliant_wearable", "Wearable with bad FFI, short PAR, broken Track 2 and a missing record";
    }
}

kind_enum! {
    /// Preset terminal profiles
    pub enum TerminalKind ("terminal kind") {
        LegacyVisa => "legacy_visa", "Contactless reader with the Visa kernel only";
        LegacyMastercard => "legacy_mastercard", "Contactless reader with the Mastercard kernel only";
        LegacyDiscover => "legacy_discover", "Contactless reader with the Discover kernel only";
        MultiNetwork => "multi_network", "Contactless reader with kernels C2 to C7";
        CommonKernel => "common_kernel", "Contactless reader with kernels C2 to C8";
        ContactEmv => "contact_emv", "Contact terminal accepting every network";
        MisconfiguredKiosk => "misconfigured_kiosk", "Unattended reader sending a 4-byte TVR";
    }
}

// ---- preset card data ----

const CDOL1: [u8; 21] = hex!("9F02069F03069F1A0295055F2A029A039C019F3704");
const CDOL2: [u8; 23] = hex!("8A029F02069F03069F1A0295055F2A029A039C019F3704");
const QVSDC_PDOL: [u8; 12] = hex!("9F66049F02069F37045F2A02");

fn card(
    name: &str,
    interface: InterfaceType,
    aid: &[u8],
    label: &str,
    fci: TagMap,
    records: Vec<Record>,
) -> CardProfile {
    CardProfile {
        name: name.to_string(),
        interface,
        aid: aid.to_vec(),
        label: label.to_string(),
        priority: 0x01,
        kernel: None,
        fci,
        aip: hex!("1980").to_vec(),
        gpo_format: ResponseFormat::Format2,
        gpo_data: TagMap::new(),
        records,
        gen_ac_format: ResponseFormat::Format2,
        decision: CardDecision::Online,
        issuer_application_data: Some(hex!("06010A03A00000").to_vec()),
        atc: 0x0010,
        pin: None,
        pin_tries: 3,
        latency_ms: 0,
    }
}

fn cardholder(
    track2: &[u8],
    pan: &[u8],
    name: &[u8],
) -> TagMap {
    TagMap::new()
        .with(tags::TRACK_2_EQUIVALENT_DATA, track2)
        .with(tags::APPLICATION_PAN, pan)
        .with(tags::CARDHOLDER_NAME, name)
}

fn risk_management() -> TagMap {
    TagMap::new()
        .with(tags::APPLICATION_EXPIRATION_DATE, hex!("271231"))
        .with(tags::APPLICATION_EFFECTIVE_DATE, hex!("220101"))
        .with(tags::ISSUER_COUNTRY_CODE, hex!("0840"))
        .with(tags::APPLICATION_PAN_SEQUENCE_NUMBER, hex!("01"))
        .with(tags::APPLICATION_USAGE_CONTROL, hex!("FF00"))
        .with(tags::CDOL1, CDOL1)
        .with(tags::CDOL2, CDOL2)
}

fn visa_contactless() -> CardProfile {
    let fci = TagMap::new()
        .with(tags::PDOL, QVSDC_PDOL)
        .with(tags::LANGUAGE_PREFERENCE, b"en");
    let records = vec![
        Record::new(
            1,
            1,
            cardholder(
                &hex!("4761739001010010D27122011234567F"),
                &hex!("4761739001010010"),
                b"CARDHOLDER/VISA",
            ),
        ),
        Record::new(2, 1, risk_management()).oda(),
    ];
    let mut profile = card(
        "Visa contactless",
        InterfaceType::Contactless,
        aids::VISA,
        "VISA CREDIT",
        fci,
        records,
    );
    profile.aip = hex!("2000").to_vec();
    profile.gpo_data = TagMap::new().with(tags::CARD_TRANSACTION_QUALIFIERS, hex!("8000"));
    profile
}

fn visa_contact() -> CardProfile {
    let fci = TagMap::new().with(tags::LANGUAGE_PREFERENCE, b"en");
    let records = vec![
        Record::new(
            1,
            1,
            cardholder(
                &hex!("4761739001010119D27122011234567F"),
                &hex!("4761739001010119"),
                b"CARDHOLDER/VISA",
            ),
        ),
        Record::new(
            1,
            2,
            TagMap::new().with(tags::CVM_LIST, hex!("000000000000000001031E031F00")),
        ),
        Record::new(2, 1, risk_management()).oda(),
    ];
    let mut profile = card(
        "Visa contact",
        InterfaceType::Contact,
        aids::VISA,
        "VISA DEBIT",
        fci,
        records,
    );
    profile.aip = hex!("5C00").to_vec();
    profile.gpo_format = ResponseFormat::Format1;
    profile.gen_ac_format = ResponseFormat::Format1;
    profile.decision = CardDecision::Approve;
    profile.pin = Some("1234".into());
    profile
}

fn mastercard_contactless() -> CardProfile {
    let records = vec![
        Record::new(
            1,
            1,
            cardholder(
                &hex!("5413330089010434D27122010123456F"),
                &hex!("5413330089010434"),
                b"CARDHOLDER/MC",
            ),
        ),
        Record::new(2, 1, risk_management()).oda(),
        Record::new(
            2,
            2,
            TagMap::new().with(tags::CVM_LIST, hex!("000000000000000042031E031F03")),
        ),
    ];
    card(
        "Mastercard contactless",
        InterfaceType::Contactless,
        aids::MASTERCARD,
        "MASTERCARD",
        TagMap::new(),
        records,
    )
}

fn amex_contactless() -> CardProfile {
    let fci = TagMap::new().with(tags::PDOL, hex!("9F3501"));
    let records = vec![
        Record::new(
            1,
            1,
            cardholder(
                &hex!("374245001751006D2712201150123F"),
                &hex!("374245001751006F"),
                b"CARDHOLDER/AMEX",
            ),
        ),
        Record::new(1, 2, risk_management()),
    ];
    let mut profile = card(
        "American Express contactless",
        InterfaceType::Contactless,
        aids::AMEX,
        "AMERICAN EXPRESS",
        fci,
        records,
    );
    profile.gpo_format = ResponseFormat::Format1;
    profile.gen_ac_format = ResponseFormat::Format1;
    profile.decision = CardDecision::Approve;
    profile
}

fn discover_contactless() -> CardProfile {
    let fci = TagMap::new().with(tags::PDOL, QVSDC_PDOL);
    let mut data = cardholder(
        &hex!("6011000990139424D27122011234567F"),
        &hex!("6011000990139424"),
        b"CARDHOLDER/DISCOVER",
    );
    data.merge(&risk_management());
    card(
        "Discover contactless",
        InterfaceType::Contactless,
        aids::DISCOVER,
        "DISCOVER",
        fci,
        vec![Record::new(1, 1, data).oda()],
    )
}

fn common_kernel() -> CardProfile {
    let fci = TagMap::new()
        .with(tags::PDOL, QVSDC_PDOL)
        .with(tags::KERNEL_IDENTIFIER, hex!("08"))
        .with(tags::FORM_FACTOR_INDICATOR, hex!("20003000"));
    let mut data = cardholder(
        &hex!("6011000990139432D27122011234567F"),
        &hex!("6011000990139432"),
        b"CARDHOLDER/C8",
    );
    data.set(
        tags::PAYMENT_ACCOUNT_REFERENCE,
        b"V0020013855019990000000000EMV".to_vec(),
    );
    let mut profile = card(
        "Common kernel (C8) card",
        InterfaceType::Contactless,
        aids::DISCOVER,
        "DISCOVER C8",
        fci,
        vec![Record::new(1, 1, data), Record::new(2, 1, risk_management()).oda()],
    );
    profile.kernel = Some(KernelId::C8);
    profile
}

fn mobile_wallet() -> CardProfile {
    let fci = TagMap::new()
        .with(tags::PDOL, QVSDC_PDOL)
        .with(tags::FORM_FACTOR_INDICATOR, hex!("21013000"));
    let mut data = cardholder(
        &hex!("4895370012345678D27122011234567F"),
        &hex!("4895370012345678"),
        b"VISA TOKEN",
    );
    data.set(
        tags::PAYMENT_ACCOUNT_REFERENCE,
        b"V0010013822071300000000000EMV".to_vec(),
    );
    let mut profile = card(
        "Mobile wallet (HCE)",
        InterfaceType::MobileHce,
        aids::VISA,
        "VISA",
        fci,
        vec![Record::new(1, 1, data), Record::new(2, 1, risk_management())],
    );
    profile.aip = hex!("2040").to_vec();
    profile.gpo_data = TagMap::new().with(tags::CARD_TRANSACTION_QUALIFIERS, hex!("8080"));
    profile
}

fn non_compliant_wearable() -> CardProfile {
    let fci = TagMap::new()
        .with(tags::KERNEL_IDENTIFIER, hex!("02"))
        .with(tags::FORM_FACTOR_INDICATOR, hex!("20070000"));
    let mut data = cardholder(
        &hex!("5413330089010434D2512201D00123456F"),
        &hex!("5413330089010434"),
        b"WEARABLE",
    );
    data.set(tags::PAYMENT_ACCOUNT_REFERENCE, b"V00100138220713000EM".to_vec());
    let records = vec![
        Record::new(1, 1, data),
        Record::new(1, 2, TagMap::new()).unreadable(),
        Record::new(2, 1, risk_management()),
    ];
    let mut profile = card(
        "Non-compliant wearable",
        InterfaceType::Contactless,
        aids::MASTERCARD,
        "MC WEAR",
        fci,
        records,
    );
    profile.kernel = Some(KernelId::C2);
    profile
}
