//! APDU (Application Protocol Data Unit) command and response model
//!
//! Short-form ISO 7816-4 commands only: Lc and Le are one byte each, and an
//! Le byte of `00` stands for 256.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while framing or parsing APDUs
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApduError {
    #[error("command APDU too short: expected at least 4 bytes, got {0}")]
    CommandTooShort(usize),

    #[error("response APDU too short: expected at least 2 bytes, got {0}")]
    ResponseTooShort(usize),

    #[error("command body of {0} bytes does not match any short APDU case")]
    InvalidBodyLength(usize),

    #[error("command data of {0} bytes exceeds the short APDU limit of 255")]
    DataTooLong(usize),

    #[error("expected length {0} outside 1..=256")]
    InvalidExpectedLength(u16),

    #[error("tag {0} cannot be addressed by GET DATA")]
    UnsupportedTag(String),
}

/// ISO 7816-4 command case, derived from the presence of data and Le
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApduCase {
    /// No data, no Le
    Case1,
    /// No data, Le present
    Case2,
    /// Data, no Le
    Case3,
    /// Data and Le
    Case4,
}

impl ApduCase {
    pub const fn number(self) -> u8 {
        match self {
            Self::Case1 => 1,
            Self::Case2 => 2,
            Self::Case3 => 3,
            Self::Case4 => 4,
        }
    }
}

/// Two-byte status word returned by the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const SUCCESS: Self = Self(0x9000);
    pub const WARNING_NO_CHANGE: Self = Self(0x6200);
    pub const WARNING_SELECTED_FILE_INVALIDATED: Self = Self(0x6283);
    pub const WARNING_AUTH_FAILED: Self = Self(0x6300);
    pub const WRONG_LENGTH: Self = Self(0x6700);
    pub const COMMAND_NOT_ALLOWED: Self = Self(0x6900);
    pub const SECURITY_STATUS_NOT_SATISFIED: Self = Self(0x6982);
    pub const AUTH_METHOD_BLOCKED: Self = Self(0x6983);
    pub const REFERENCE_DATA_NOT_USABLE: Self = Self(0x6984);
    pub const CONDITIONS_NOT_SATISFIED: Self = Self(0x6985);
    pub const WRONG_DATA: Self = Self(0x6A80);
    pub const FUNCTION_NOT_SUPPORTED: Self = Self(0x6A81);
    pub const FILE_NOT_FOUND: Self = Self(0x6A82);
    pub const RECORD_NOT_FOUND: Self = Self(0x6A83);
    pub const INCORRECT_P1_P2: Self = Self(0x6A86);
    pub const REFERENCED_DATA_NOT_FOUND: Self = Self(0x6A88);
    pub const WRONG_P1_P2: Self = Self(0x6B00);
    pub const INS_NOT_SUPPORTED: Self = Self(0x6D00);
    pub const CLA_NOT_SUPPORTED: Self = Self(0x6E00);
    pub const UNKNOWN_ERROR: Self = Self(0x6F00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self(((sw1 as u16) << 8) | sw2 as u16)
    }

    /// `61XX`: `count` more bytes available (1..=256, 256 encoded as `00`)
    pub const fn more_data(count: u16) -> Self {
        Self(0x6100 | (count & 0xFF))
    }

    /// `63CX`: verification failed, `retries` attempts left
    pub const fn counter_warning(retries: u8) -> Self {
        Self(0x63C0 | (retries & 0x0F) as u16)
    }

    pub const fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn sw2(self) -> u8 {
        self.0 as u8
    }

    /// `9000`, or the proprietary success range `91XX`
    pub const fn is_success(self) -> bool {
        self.0 == 0x9000 || (self.0 >= 0x9100 && self.0 <= 0x91FF)
    }

    pub const fn has_more_data(self) -> bool {
        self.sw1() == 0x61
    }

    /// Bytes announced by a `61XX` status (`6100` means 256)
    pub const fn bytes_available(self) -> Option<usize> {
        if !self.has_more_data() {
            return None;
        }
        match self.sw2() {
            0 => Some(256),
            n => Some(n as usize),
        }
    }

    /// Short explanation of the status word
    pub fn description(self) -> String {
        let text = match self.0 {
            0x9000 => "Success",
            0x9100..=0x91FF => "Success (proprietary)",
            0x6200 => "Warning: state of non-volatile memory unchanged",
            0x6283 => "Warning: selected file invalidated",
            0x6300 => "Warning: authentication failed",
            0x63C0..=0x63CF => return format!("Verification failed, {} tries left", self.0 & 0x0F),
            0x6100..=0x61FF => {
                return format!("{} bytes still available", self.bytes_available().unwrap_or(0))
            }
            0x6700 => "Wrong length",
            0x6C00..=0x6CFF => return format!("Wrong Le, exact length is {}", self.sw2()),
            0x6900 => "Command not allowed",
            0x6982 => "Security status not satisfied",
            0x6983 => "Authentication method blocked",
            0x6984 => "Reference data not usable",
            0x6985 => "Conditions of use not satisfied",
            0x6A80 => "Incorrect parameters in the data field",
            0x6A81 => "Function not supported",
            0x6A82 => "File or application not found",
            0x6A83 => "Record not found",
            0x6A86 => "Incorrect parameters P1-P2",
            0x6A88 => "Referenced data not found",
            0x6B00 => "Wrong parameters P1-P2",
            0x6D00 => "Instruction not supported",
            0x6E00 => "Class not supported",
            0x6F00 => "No precise diagnosis",
            _ => "Unknown status",
        };
        text.to_string()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    pub fn new(data: Vec<u8>, sw: StatusWord) -> Self {
        Self {
            data,
            sw1: sw.sw1(),
            sw2: sw.sw2(),
        }
    }

    /// `9000` with data
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, StatusWord::SUCCESS)
    }

    /// Status word only
    pub fn error(sw: StatusWord) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Split raw bytes into data and the trailing SW1 SW2
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ApduError> {
        if bytes.len() < 2 {
            return Err(ApduError::ResponseTooShort(bytes.len()));
        }
        let split = bytes.len() - 2;
        Ok(Self {
            data: bytes[..split].to_vec(),
            sw1: bytes[split],
            sw2: bytes[split + 1],
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.push(self.sw1);
        out.push(self.sw2);
        out
    }

    pub fn status_word(&self) -> StatusWord {
        StatusWord::new(self.sw1, self.sw2)
    }

    pub fn is_success(&self) -> bool {
        self.status_word().is_success()
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        self.status_word().to_string()
    }
}

/// APDU command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    data: Option<Vec<u8>>,
    le: Option<u16>,
}

impl ApduCommand {
    /// Create a new case 1 command
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Set command data; empty data is the same as none
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.set_data(data);
        self
    }

    /// Set expected response length, 1..=256
    pub fn le(mut self, le: u16) -> Self {
        self.le = Some(le);
        self
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = if data.is_empty() { None } else { Some(data) };
    }

    pub fn set_le(&mut self, le: Option<u16>) {
        self.le = le;
    }

    pub fn command_data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn expected_length(&self) -> Option<u16> {
        self.le
    }

    pub fn case(&self) -> ApduCase {
        match (self.data.is_some(), self.le.is_some()) {
            (false, false) => ApduCase::Case1,
            (false, true) => ApduCase::Case2,
            (true, false) => ApduCase::Case3,
            (true, true) => ApduCase::Case4,
        }
    }

    /// Build the APDU command bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ApduError> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if let Some(data) = &self.data {
            if data.len() > 255 {
                return Err(ApduError::DataTooLong(data.len()));
            }
            apdu.push(data.len() as u8);
            apdu.extend_from_slice(data);
        }

        if let Some(le) = self.le {
            apdu.push(encode_le(le)?);
        }

        Ok(apdu)
    }

    /// Parse a short-form command
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ApduError> {
        if bytes.len() < 4 {
            return Err(ApduError::CommandTooShort(bytes.len()));
        }
        let mut command = Self::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[4..];

        match body.len() {
            0 => {}
            1 => command.le = Some(decode_le(body[0])),
            n => {
                let lc = usize::from(body[0]);
                if lc == 0 {
                    return Err(ApduError::InvalidBodyLength(n));
                }
                if n == 1 + lc {
                    command.data = Some(body[1..].to_vec());
                } else if n == 2 + lc {
                    command.data = Some(body[1..1 + lc].to_vec());
                    command.le = Some(decode_le(body[1 + lc]));
                } else {
                    return Err(ApduError::InvalidBodyLength(n));
                }
            }
        }

        Ok(command)
    }

    /// Short label for logs, e.g. `GENERATE AC`
    pub fn name(&self) -> &'static str {
        match (self.cla & 0xF0, self.ins) {
            (_, 0xA4) => "SELECT",
            (0x80, 0xA8) => "GET PROCESSING OPTIONS",
            (_, 0xB2) => "READ RECORD",
            (0x80, 0xCA) => "GET DATA",
            (0x80, 0xAE) => "GENERATE AC",
            (_, 0x20) => "VERIFY",
            (_, 0x84) => "GET CHALLENGE",
            (_, 0x88) => "INTERNAL AUTHENTICATE",
            (_, 0x82) => "EXTERNAL AUTHENTICATE",
            (0x80, 0x2A) => "COMPUTE CRYPTOGRAPHIC CHECKSUM",
            (0x80, 0xEA) => "EXCHANGE RELAY RESISTANCE DATA",
            (_, 0xC0) => "GET RESPONSE",
            _ => "UNKNOWN",
        }
    }
}

fn encode_le(le: u16) -> Result<u8, ApduError> {
    match le {
        256 => Ok(0x00),
        1..=255 => Ok(le as u8),
        _ => Err(ApduError::InvalidExpectedLength(le)),
    }
}

fn decode_le(byte: u8) -> u16 {
    if byte == 0 {
        256
    } else {
        u16::from(byte)
    }
}

/// Instruction bytes
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const GET_PROCESSING_OPTIONS: u8 = 0xA8;
    pub const READ_RECORD: u8 = 0xB2;
    pub const GET_DATA: u8 = 0xCA;
    pub const GENERATE_AC: u8 = 0xAE;
    pub const VERIFY: u8 = 0x20;
    pub const GET_CHALLENGE: u8 = 0x84;
    pub const INTERNAL_AUTHENTICATE: u8 = 0x88;
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    pub const COMPUTE_CRYPTOGRAPHIC_CHECKSUM: u8 = 0x2A;
    pub const EXCHANGE_RELAY_RESISTANCE_DATA: u8 = 0xEA;
    pub const GET_RESPONSE: u8 = 0xC0;
}

/// Common EMV APDU commands
pub mod commands {
    use emv_common::tags;
    use emv_common::tlv::{encode_primitive, Tag};

    use super::{ins, ApduCommand, ApduError};
    use crate::CryptogramType;

    /// Directory name of the contactless Proximity Payment System Environment
    pub const PPSE: &[u8] = b"2PAY.SYS.DDF01";

    /// Directory name of the contact Payment System Environment
    pub const PSE: &[u8] = b"1PAY.SYS.DDF01";

    /// Which occurrence of a partially matching name SELECT returns
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SelectOccurrence {
        First,
        Next,
    }

    /// VERIFY reference data qualifier
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PinFormat {
        Plaintext,
        Enciphered,
    }

    /// SELECT command (by name/AID)
    pub fn select(name: &[u8], occurrence: SelectOccurrence) -> ApduCommand {
        let p2 = match occurrence {
            SelectOccurrence::First => 0x00,
            SelectOccurrence::Next => 0x02,
        };
        ApduCommand::new(0x00, ins::SELECT, 0x04, p2)
            .data(name.to_vec())
            .le(256)
    }

    pub fn select_ppse() -> ApduCommand {
        select(PPSE, SelectOccurrence::First)
    }

    pub fn select_pse() -> ApduCommand {
        select(PSE, SelectOccurrence::First)
    }

    /// GET PROCESSING OPTIONS with raw PDOL data, wrapped in tag 83
    pub fn get_processing_options(pdol_data: &[u8]) -> Result<ApduCommand, ApduError> {
        let template = encode_primitive(tags::COMMAND_TEMPLATE, pdol_data)
            .map_err(|_| ApduError::DataTooLong(pdol_data.len()))?;
        Ok(get_processing_options_template(template))
    }

    /// GET PROCESSING OPTIONS with an already wrapped command template
    pub fn get_processing_options_template(template: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x80, ins::GET_PROCESSING_OPTIONS, 0x00, 0x00)
            .data(template)
            .le(256)
    }

    /// READ RECORD command
    pub fn read_record(record_number: u8, sfi: u8) -> ApduCommand {
        let p2 = (sfi << 3) | 0x04;
        ApduCommand::new(0x00, ins::READ_RECORD, record_number, p2).le(256)
    }

    /// GET DATA command - request specific data object from card
    pub fn get_data(tag: Tag) -> Result<ApduCommand, ApduError> {
        let (p1, p2) = match tag.bytes().as_slice() {
            [b] => (0x00, *b),
            [b1, b2] => (*b1, *b2),
            _ => return Err(ApduError::UnsupportedTag(tag.to_hex())),
        };
        Ok(ApduCommand::new(0x80, ins::GET_DATA, p1, p2).le(256))
    }

    /// GENERATE AC requesting `cryptogram`, optionally with CDA
    pub fn generate_ac(cryptogram: CryptogramType, cda: bool, cdol_data: Vec<u8>) -> ApduCommand {
        let mut p1 = cryptogram.reference_control();
        if cda {
            p1 |= 0x10;
        }
        ApduCommand::new(0x80, ins::GENERATE_AC, p1, 0x00)
            .data(cdol_data)
            .le(256)
    }

    /// VERIFY with a PIN block
    pub fn verify(pin_block: Vec<u8>, format: PinFormat) -> ApduCommand {
        let p2 = match format {
            PinFormat::Plaintext => 0x80,
            PinFormat::Enciphered => 0x88,
        };
        ApduCommand::new(0x00, ins::VERIFY, 0x00, p2).data(pin_block)
    }

    pub fn get_challenge() -> ApduCommand {
        ApduCommand::new(0x00, ins::GET_CHALLENGE, 0x00, 0x00).le(256)
    }

    /// INTERNAL AUTHENTICATE command (for DDA)
    pub fn internal_authenticate(ddol_data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x00, ins::INTERNAL_AUTHENTICATE, 0x00, 0x00)
            .data(ddol_data)
            .le(256)
    }

    pub fn external_authenticate(issuer_authentication_data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x00, ins::EXTERNAL_AUTHENTICATE, 0x00, 0x00)
            .data(issuer_authentication_data)
    }

    /// Mag-stripe mode checksum (UDOL data)
    pub fn compute_cryptographic_checksum(udol_data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x80, ins::COMPUTE_CRYPTOGRAPHIC_CHECKSUM, 0x8E, 0x80)
            .data(udol_data)
            .le(256)
    }

    /// Relay resistance protocol, carrying the terminal entropy
    pub fn exchange_relay_resistance_data(terminal_entropy: [u8; 4]) -> ApduCommand {
        ApduCommand::new(0x80, ins::EXCHANGE_RELAY_RESISTANCE_DATA, 0x00, 0x00)
            .data(terminal_entropy.to_vec())
            .le(256)
    }

    pub fn get_response(length: u16) -> ApduCommand {
        ApduCommand::new(0x00, ins::GET_RESPONSE, 0x00, 0x00).le(length)
    }
}

#[cfg(test)]
mod tests {
    use super::commands::*;
    use super::*;
    use crate::CryptogramType;
    use emv_common::tags;
    use emv_common::tlv::Tag;

    #[test]
    fn test_status_word_classification() {
        assert!(StatusWord(0x9000).is_success());
        assert!(StatusWord(0x9100).is_success());
        assert!(StatusWord(0x91FF).is_success());
        assert!(!StatusWord(0x6A82).is_success());
        assert!(!StatusWord(0x9200).is_success());
        assert!(StatusWord(0x6105).has_more_data());
        assert_eq!(StatusWord(0x6105).bytes_available(), Some(5));
        assert_eq!(StatusWord(0x6100).bytes_available(), Some(256));
        assert_eq!(StatusWord(0x9000).bytes_available(), None);
    }

    #[test]
    fn test_more_data_status() {
        for count in [1u16, 5, 255, 256] {
            assert_eq!(StatusWord::more_data(count).bytes_available(), Some(usize::from(count)));
        }
    }

    #[test]
    fn test_response_parsing() {
        let resp = ApduResponse::from_bytes(&[0x90, 0x00]).unwrap();
        assert!(resp.data.is_empty());
        assert!(resp.is_success());

        let resp = ApduResponse::from_bytes(&[0x01, 0x02, 0x6A, 0x83]).unwrap();
        assert_eq!(resp.data, vec![0x01, 0x02]);
        assert_eq!(resp.status_word(), StatusWord::RECORD_NOT_FOUND);
        assert_eq!(resp.status_string(), "6A83");

        assert_eq!(ApduResponse::from_bytes(&[0x90]), Err(ApduError::ResponseTooShort(1)));
    }

    #[test]
    fn test_case_derivation_and_reparse() {
        let header = ApduCommand::new(0x00, 0xB2, 0x01, 0x0C);
        let variants = [
            (header.clone(), ApduCase::Case1),
            (header.clone().le(256), ApduCase::Case2),
            (header.clone().data(vec![0x01, 0x02]), ApduCase::Case3),
            (header.clone().data(vec![0x01, 0x02]).le(16), ApduCase::Case4),
        ];
        for (command, case) in variants {
            assert_eq!(command.case(), case);
            let bytes = command.to_bytes().unwrap();
            assert_eq!(ApduCommand::from_bytes(&bytes).unwrap(), command);
        }
    }

    #[test]
    fn test_case_follows_mutation() {
        let mut command = ApduCommand::new(0x00, 0x84, 0x00, 0x00);
        assert_eq!(command.case().number(), 1);
        command.set_le(Some(8));
        command.set_data(vec![0xAA]);
        assert_eq!(command.case().number(), 4);
        command.set_data(Vec::new());
        assert_eq!(command.case().number(), 2);
    }

    #[test]
    fn test_le_zero_means_256() {
        let command = ApduCommand::from_bytes(&[0x00, 0x84, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(command.expected_length(), Some(256));
        assert_eq!(command.to_bytes().unwrap(), vec![0x00, 0x84, 0x00, 0x00, 0x00]);
        assert_eq!(
            ApduCommand::new(0, 0x84, 0, 0).le(300).to_bytes(),
            Err(ApduError::InvalidExpectedLength(300))
        );
    }

    #[test]
    fn test_malformed_commands() {
        assert_eq!(ApduCommand::from_bytes(&[0x00, 0xA4]), Err(ApduError::CommandTooShort(2)));
        assert_eq!(
            ApduCommand::from_bytes(&[0x00, 0xA4, 0x04, 0x00, 0x05, 0x01]),
            Err(ApduError::InvalidBodyLength(2))
        );
        assert_eq!(
            ApduCommand::new(0, 0xA4, 4, 0).data(vec![0; 256]).to_bytes(),
            Err(ApduError::DataTooLong(256))
        );
    }

    #[test]
    fn test_select_ppse_bytes() {
        let bytes = select_ppse().to_bytes().unwrap();
        assert_eq!(
            hex::encode_upper(bytes),
            "00A404000E325041592E5359532E444446303100"
        );
        let bytes = select_pse().to_bytes().unwrap();
        assert_eq!(&bytes[5..19], hex::decode("315041592E5359532E4444463031").unwrap().as_slice());
    }

    #[test]
    fn test_select_next_occurrence() {
        let command = select(&[0xA0, 0x00, 0x00, 0x00, 0x03], SelectOccurrence::Next);
        assert_eq!(command.p2, 0x02);
    }

    #[test]
    fn test_gpo_wraps_in_command_template() {
        let bytes = get_processing_options(&[]).unwrap().to_bytes().unwrap();
        assert_eq!(hex::encode_upper(bytes), "80A8000002830000");
        let bytes = get_processing_options(&[0x11, 0x22]).unwrap().to_bytes().unwrap();
        assert_eq!(hex::encode_upper(bytes), "80A80000048302112200");
    }

    #[test]
    fn test_read_record_packs_sfi() {
        let command = read_record(1, 1);
        assert_eq!(command.to_bytes().unwrap(), vec![0x00, 0xB2, 0x01, 0x0C, 0x00]);
        assert_eq!(read_record(3, 2).p2, 0x14);
    }

    #[test]
    fn test_get_data_splits_tag() {
        let atc = get_data(tags::APPLICATION_TRANSACTION_COUNTER).unwrap();
        assert_eq!((atc.p1, atc.p2), (0x9F, 0x36));
        let single = get_data(Tag::new(0x5A)).unwrap();
        assert_eq!((single.p1, single.p2), (0x00, 0x5A));
        assert!(get_data(tags::PAYMENT_ACCOUNT_REFERENCE).is_err());
    }

    #[test]
    fn test_generate_ac_reference_control() {
        assert_eq!(generate_ac(CryptogramType::Aac, false, vec![1]).p1, 0x00);
        assert_eq!(generate_ac(CryptogramType::Tc, false, vec![1]).p1, 0x40);
        assert_eq!(generate_ac(CryptogramType::Arqc, false, vec![1]).p1, 0x80);
        assert_eq!(generate_ac(CryptogramType::Arqc, true, vec![1]).p1, 0x90);
        assert_eq!(generate_ac(CryptogramType::Arqc, false, vec![1]).name(), "GENERATE AC");
    }

    #[test]
    fn test_other_commands() {
        assert_eq!(
            verify(vec![0x24, 0x12, 0x34, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF], PinFormat::Plaintext)
                .to_bytes()
                .unwrap()[..5],
            [0x00, 0x20, 0x00, 0x80, 0x08]
        );
        assert_eq!(get_challenge().to_bytes().unwrap(), vec![0x00, 0x84, 0x00, 0x00, 0x00]);
        assert_eq!(external_authenticate(vec![0; 10]).case(), ApduCase::Case3);
        assert_eq!(internal_authenticate(vec![0; 4]).case(), ApduCase::Case4);
        let cccc = compute_cryptographic_checksum(vec![0; 4]);
        assert_eq!((cccc.cla, cccc.ins, cccc.p1, cccc.p2), (0x80, 0x2A, 0x8E, 0x80));
        let rrp = exchange_relay_resistance_data([1, 2, 3, 4]);
        assert_eq!(rrp.to_bytes().unwrap(), vec![0x80, 0xEA, 0x00, 0x00, 0x04, 1, 2, 3, 4, 0x00]);
    }
}
