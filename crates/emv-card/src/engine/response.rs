//! Card response parsers
//!
//! Each response format gets its own pure function. GPO and GENERATE AC
//! answers come as Format 1 (tag 80, positional bytes) or Format 2 (tag 77,
//! nested TLV); both parsers end in the same structure.

use std::fmt;

use emv_common::tags;
use emv_common::tlv::{decode, find_in, TlvNode};
use serde::Serialize;

use super::{EngineError, Step};
use crate::kernel::KernelId;

/// Cryptogram requested from or returned by GENERATE AC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CryptogramType {
    /// Application Authentication Cryptogram (decline)
    Aac,
    /// Transaction Certificate (offline approval)
    Tc,
    /// Authorisation Request Cryptogram (go online)
    Arqc,
}

impl CryptogramType {
    /// Classify the top two bits of a Cryptogram Information Data byte.
    /// `C0` is reserved and yields `None`.
    pub const fn from_cid(cid: u8) -> Option<Self> {
        match cid & 0xC0 {
            0x00 => Some(Self::Aac),
            0x40 => Some(Self::Tc),
            0x80 => Some(Self::Arqc),
            _ => None,
        }
    }

    /// GENERATE AC P1 reference control bits
    pub const fn reference_control(self) -> u8 {
        match self {
            Self::Aac => 0x00,
            Self::Tc => 0x40,
            Self::Arqc => 0x80,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Aac => "AAC",
            Self::Tc => "TC",
            Self::Arqc => "ARQC",
        }
    }

    pub const fn outcome(self) -> &'static str {
        match self {
            Self::Aac => "Declined offline",
            Self::Tc => "Approved offline",
            Self::Arqc => "Online authorisation requested",
        }
    }
}

impl fmt::Display for CryptogramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which response template a GPO or GENERATE AC answer used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResponseFormat {
    Format1,
    Format2,
}

/// One Application File Locator entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AflEntry {
    pub sfi: u8,
    pub first_record: u8,
    pub last_record: u8,
    pub oda_records: u8,
}

impl AflEntry {
    /// Record numbers covered by this entry
    pub fn records(&self) -> std::ops::RangeInclusive<u8> {
        self.first_record..=self.last_record
    }

    /// AFL bytes for this entry
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.sfi << 3, self.first_record, self.last_record, self.oda_records]
    }

    /// Whether `record` is one of the first `oda_records` records
    pub fn is_oda_record(&self, record: u8) -> bool {
        record >= self.first_record
            && u16::from(record - self.first_record) < u16::from(self.oda_records)
    }
}

/// Split an AFL into 4-byte entries
pub fn parse_afl(afl: &[u8]) -> Result<Vec<AflEntry>, EngineError> {
    if afl.len() % 4 != 0 {
        return Err(malformed(
            Step::GetProcessingOptions,
            format!("AFL length {} is not a multiple of 4", afl.len()),
        ));
    }
    Ok(afl
        .chunks_exact(4)
        .map(|group| AflEntry {
            sfi: group[0] >> 3,
            first_record: group[1],
            last_record: group[2],
            oda_records: group[3],
        })
        .collect())
}

/// Application Interchange Profile and AFL from GET PROCESSING OPTIONS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub format: ResponseFormat,
    pub aip: Vec<u8>,
    pub afl: Vec<u8>,
    /// Every node of a Format 2 response, empty for Format 1
    pub nodes: Vec<TlvNode>,
}

pub fn parse_gpo_response(data: &[u8]) -> Result<ProcessingOptions, EngineError> {
    let nodes = decode(data)?;
    let template = nodes
        .first()
        .ok_or_else(|| malformed(Step::GetProcessingOptions, "empty response"))?;

    match template.tag() {
        tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1 => parse_gpo_format1(template.value()),
        tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2 => parse_gpo_format2(nodes),
        other => Err(malformed(
            Step::GetProcessingOptions,
            format!("unexpected response template {other}"),
        )),
    }
}

/// `80 LL <AIP 2><AFL n>`
pub fn parse_gpo_format1(value: &[u8]) -> Result<ProcessingOptions, EngineError> {
    if value.len() < 2 {
        return Err(malformed(
            Step::GetProcessingOptions,
            "Format 1 template shorter than the AIP",
        ));
    }
    Ok(ProcessingOptions {
        format: ResponseFormat::Format1,
        aip: value[..2].to_vec(),
        afl: value[2..].to_vec(),
        nodes: Vec::new(),
    })
}

/// `77 LL { 82 AIP, 94 AFL, ... }`
pub fn parse_gpo_format2(nodes: Vec<TlvNode>) -> Result<ProcessingOptions, EngineError> {
    let aip = find_in(&nodes, tags::AIP)
        .ok_or_else(|| malformed(Step::GetProcessingOptions, "Format 2 response has no AIP"))?
        .value()
        .to_vec();
    let afl = find_in(&nodes, tags::AFL)
        .map(|node| node.value().to_vec())
        .unwrap_or_default();
    Ok(ProcessingOptions {
        format: ResponseFormat::Format2,
        aip,
        afl,
        nodes,
    })
}

/// Outcome of GENERATE AC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcResponse {
    pub format: ResponseFormat,
    pub cid: u8,
    pub atc: Option<Vec<u8>>,
    pub cryptogram: Vec<u8>,
    pub nodes: Vec<TlvNode>,
}

impl AcResponse {
    pub fn cryptogram_type(&self) -> Option<CryptogramType> {
        CryptogramType::from_cid(self.cid)
    }
}

pub fn parse_gen_ac_response(data: &[u8]) -> Result<AcResponse, EngineError> {
    let nodes = decode(data)?;
    let template = nodes
        .first()
        .ok_or_else(|| malformed(Step::GenerateAc, "empty response"))?;

    match template.tag() {
        tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1 => parse_gen_ac_format1(template.value()),
        tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2 => parse_gen_ac_format2(nodes),
        other => Err(malformed(
            Step::GenerateAc,
            format!("unexpected response template {other}"),
        )),
    }
}

/// `80 LL <CID 1><ATC 2><AC n>`
pub fn parse_gen_ac_format1(value: &[u8]) -> Result<AcResponse, EngineError> {
    if value.len() < 3 {
        return Err(malformed(
            Step::GenerateAc,
            format!("Format 1 template of {} bytes has no room for CID and ATC", value.len()),
        ));
    }
    Ok(AcResponse {
        format: ResponseFormat::Format1,
        cid: value[0],
        atc: Some(value[1..3].to_vec()),
        cryptogram: value[3..].to_vec(),
        nodes: Vec::new(),
    })
}

/// `77 LL { 9F27 CID, 9F36 ATC, 9F26 AC, ... }`
pub fn parse_gen_ac_format2(nodes: Vec<TlvNode>) -> Result<AcResponse, EngineError> {
    let cid = find_in(&nodes, tags::CRYPTOGRAM_INFORMATION_DATA)
        .and_then(|node| node.value().first().copied())
        .ok_or_else(|| malformed(Step::GenerateAc, "Format 2 response has no CID"))?;
    let cryptogram = find_in(&nodes, tags::APPLICATION_CRYPTOGRAM)
        .ok_or_else(|| malformed(Step::GenerateAc, "Format 2 response has no cryptogram"))?
        .value()
        .to_vec();
    let atc = find_in(&nodes, tags::APPLICATION_TRANSACTION_COUNTER).map(|n| n.value().to_vec());
    Ok(AcResponse {
        format: ResponseFormat::Format2,
        cid,
        atc,
        cryptogram,
        nodes,
    })
}

/// Application listed in a PPSE/PSE directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    #[serde(serialize_with = "hex_upper")]
    pub aid: Vec<u8>,
    pub label: Option<String>,
    pub priority: Option<u8>,
    pub kernel: Option<KernelId>,
}

impl DirectoryEntry {
    /// Priority rank; lower wins, entries without a priority sort last
    pub fn rank(&self) -> u8 {
        match self.priority.map(|p| p & 0x0F) {
            Some(0) | None => 0x10,
            Some(p) => p,
        }
    }
}

/// Directory entries (tag 61) of a payment system environment FCI
pub fn parse_directory(data: &[u8]) -> Result<Vec<DirectoryEntry>, EngineError> {
    let nodes = decode(data)?;
    let mut entries = Vec::new();

    for node in nodes.iter().flat_map(TlvNode::iter) {
        if node.tag() != tags::DIRECTORY_ENTRY {
            continue;
        }
        let children = node.children();
        let Some(aid) = find_in(children, tags::APPLICATION_IDENTIFIER) else {
            continue;
        };
        entries.push(DirectoryEntry {
            aid: aid.value().to_vec(),
            label: find_in(children, tags::APPLICATION_LABEL)
                .map(|n| String::from_utf8_lossy(n.value()).into_owned()),
            priority: find_in(children, tags::APPLICATION_PRIORITY_INDICATOR)
                .and_then(|n| n.value().first().copied()),
            kernel: find_in(children, tags::KERNEL_IDENTIFIER)
                .and_then(|n| KernelId::from_tag_value(n.value())),
        });
    }

    Ok(entries)
}

pub(crate) fn hex_upper<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode_upper(bytes))
}

fn malformed(step: Step, reason: impl Into<String>) -> EngineError {
    EngineError::MalformedResponse {
        step,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_afl_entry_decoding() {
        let entries = parse_afl(&[0x08, 0x01, 0x01, 0x00]).unwrap();
        assert_eq!(
            entries,
            vec![AflEntry {
                sfi: 1,
                first_record: 1,
                last_record: 1,
                oda_records: 0
            }]
        );
    }

    #[test]
    fn test_afl_multiple_entries_and_oda() {
        let afl = hex::decode("080102011001030210050500").unwrap();
        let entries = parse_afl(&afl).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].sfi, 2);
        assert_eq!(entries[1].records().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(entries[1].is_oda_record(2));
        assert!(!entries[1].is_oda_record(3));
        assert_eq!(entries[2].sfi, 2);
        assert!(!entries[2].is_oda_record(5));
    }

    #[test]
    fn test_afl_bad_length() {
        assert!(matches!(
            parse_afl(&[0x08, 0x01, 0x01]),
            Err(EngineError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_gpo_formats_agree() {
        let f1 = parse_gpo_response(&hex::decode("8006198008010100").unwrap()).unwrap();
        let f2 = parse_gpo_response(&hex::decode("770A82021980940408010100").unwrap()).unwrap();
        assert_eq!(f1.format, ResponseFormat::Format1);
        assert_eq!(f2.format, ResponseFormat::Format2);
        assert_eq!(f1.aip, f2.aip);
        assert_eq!(f1.afl, f2.afl);
        assert_eq!(f1.aip, vec![0x19, 0x80]);
    }

    #[test]
    fn test_gpo_unknown_template() {
        let err = parse_gpo_response(&[0x6F, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedResponse {
                step: Step::GetProcessingOptions,
                ..
            }
        ));
    }

    #[test]
    fn test_gen_ac_format1() {
        let data = hex::decode("800B80001C0102030405060708").unwrap();
        let ac = parse_gen_ac_response(&data).unwrap();
        assert_eq!(ac.format, ResponseFormat::Format1);
        assert_eq!(ac.cryptogram_type(), Some(CryptogramType::Arqc));
        assert_eq!(ac.atc, Some(vec![0x00, 0x1C]));
        assert_eq!(ac.cryptogram, hex::decode("0102030405060708").unwrap());
    }

    #[test]
    fn test_gen_ac_format2() {
        let data = hex::decode("77149F2701409F360200019F26080102030405060708").unwrap();
        let ac = parse_gen_ac_response(&data).unwrap();
        assert_eq!(ac.format, ResponseFormat::Format2);
        assert_eq!(ac.cryptogram_type(), Some(CryptogramType::Tc));
        assert_eq!(ac.atc, Some(vec![0x00, 0x01]));
    }

    #[test]
    fn test_cid_classification() {
        assert_eq!(CryptogramType::from_cid(0x00), Some(CryptogramType::Aac));
        assert_eq!(CryptogramType::from_cid(0x41), Some(CryptogramType::Tc));
        assert_eq!(CryptogramType::from_cid(0x80), Some(CryptogramType::Arqc));
        assert_eq!(CryptogramType::from_cid(0xC0), None);
    }

    #[test]
    fn test_directory_entries() {
        // 6F { 84 PPSE, A5 { BF0C { 61 {4F A0000000031010, 50 "VISA", 87 01, 9F2A 03} } } }
        let data = hex::decode(
            "6F2D840E325041592E5359532E4444463031A51BBF0C1861164F07A0000000031010500456495341870101\
             9F2A0103",
        )
        .unwrap();
        let entries = parse_directory(&data).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].aid, hex::decode("A0000000031010").unwrap());
        assert_eq!(entries[0].label.as_deref(), Some("VISA"));
        assert_eq!(entries[0].priority, Some(1));
        assert_eq!(entries[0].kernel, Some(KernelId::C3));
    }
}
