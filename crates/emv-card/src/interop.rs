//! Interoperability findings
//!
//! Detectors here are pure functions over data objects. They return
//! [`Finding`]s, which the transaction context stamps with the state and time
//! of detection. Findings never influence the transaction flow.

use std::fmt;

use chrono::Utc;
use serde::{Serialize, Serializer};

use crate::engine::TransactionState;
use crate::kernel::KernelId;

/// Length of a Payment Account Reference in bytes
pub const PAR_LENGTH: usize = 29;

/// Length of a Form Factor Indicator in bytes
pub const FFI_LENGTH: usize = 4;

/// Length of Terminal Verification Results in bytes
pub const TVR_LENGTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// What was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    FfiLength,
    FfiInvalidFormFactor,
    FfiCommonKernel,
    ParLength,
    ParLegacyTerminal,
    KernelFallback,
    C8Fallback,
    Track2Separator,
    Track2Format,
    TvrLength,
    UndefinedCryptogramType,
}

impl IssueKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::FfiLength => "FFI_LENGTH",
            Self::FfiInvalidFormFactor => "FFI_INVALID_FORM_FACTOR",
            Self::FfiCommonKernel => "FFI_COMMON_KERNEL",
            Self::ParLength => "PAR_LENGTH",
            Self::ParLegacyTerminal => "PAR_LEGACY_TERMINAL",
            Self::KernelFallback => "KERNEL_FALLBACK",
            Self::C8Fallback => "C8_FALLBACK",
            Self::Track2Separator => "TRACK2_SEPARATOR",
            Self::Track2Format => "TRACK2_FORMAT",
            Self::TvrLength => "TVR_LENGTH",
            Self::UndefinedCryptogramType => "UNDEFINED_CRYPTOGRAM_TYPE",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for IssueKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Detector output before it is attached to a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    pub recommendation: Option<String>,
}

impl Finding {
    fn new(kind: IssueKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            recommendation: None,
        }
    }

    fn recommend(mut self, text: impl Into<String>) -> Self {
        self.recommendation = Some(text.into());
        self
    }
}

/// A finding recorded during a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteropIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub state: TransactionState,
}

impl InteropIssue {
    pub fn from_finding(finding: Finding, state: TransactionState) -> Self {
        let timestamp = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            kind: finding.kind,
            severity: finding.severity,
            message: finding.message,
            recommendation: finding.recommendation,
            timestamp,
            state,
        }
    }
}

/// Device type named by the low nibble of FFI byte 2
pub fn form_factor_name(nibble: u8) -> Option<&'static str> {
    match nibble {
        0x0 => Some("Card"),
        0x1 => Some("Mobile phone"),
        0x2 => Some("Key fob"),
        0x3 => Some("Watch"),
        0x4 => Some("Mobile tag"),
        0x5 => Some("Wristband"),
        0x6 => Some("Mobile phone case"),
        _ => None,
    }
}

/// Check a Form Factor Indicator (9F6E)
pub fn validate_ffi(ffi: &[u8], kernel: Option<KernelId>) -> Vec<Finding> {
    let mut findings = Vec::new();

    if ffi.len() != FFI_LENGTH {
        findings.push(
            Finding::new(
                IssueKind::FfiLength,
                Severity::Warning,
                format!("Form Factor Indicator is {} bytes, expected {FFI_LENGTH}", ffi.len()),
            )
            .recommend("Encode 9F6E as 4 bytes: version, device type, features, RFU"),
        );
    } else {
        let device = ffi[1] & 0x0F;
        if form_factor_name(device).is_none() {
            findings.push(
                Finding::new(
                    IssueKind::FfiInvalidFormFactor,
                    Severity::Error,
                    format!("Form Factor Indicator device type {device:X} is not defined"),
                )
                .recommend("Use a device type between 0 (card) and 6 (mobile phone case)"),
            );
        }
    }

    if kernel == Some(KernelId::C8) {
        findings.push(
            Finding::new(
                IssueKind::FfiCommonKernel,
                Severity::Info,
                "Form Factor Indicator presented to the common kernel",
            )
            .recommend("Test the same device against legacy C2-C7 terminals"),
        );
    }

    findings
}

/// Check a Payment Account Reference (DF8101)
pub fn validate_par(par: &[u8]) -> Vec<Finding> {
    let mut findings = Vec::new();

    if par.len() != PAR_LENGTH {
        findings.push(
            Finding::new(
                IssueKind::ParLength,
                Severity::Warning,
                format!("Payment Account Reference is {} bytes, expected {PAR_LENGTH}", par.len()),
            )
            .recommend("PAR must be 29 alphanumeric characters"),
        );
    }

    findings.push(
        Finding::new(
            IssueKind::ParLegacyTerminal,
            Severity::Info,
            "Legacy terminals may not recognise the PAR tag DF8101",
        )
        .recommend("Confirm acquirer host passes PAR through unchanged"),
    );

    findings
}

/// Compare the kernel the card asked for with the one the terminal ran
pub fn detect_kernel_fallback(preferred: KernelId, actual: KernelId) -> Vec<Finding> {
    let mut findings = Vec::new();
    if preferred == actual {
        return findings;
    }

    findings.push(
        Finding::new(
            IssueKind::KernelFallback,
            Severity::Warning,
            format!("Preferred kernel {preferred} but terminal activated {actual}"),
        )
        .recommend("Check the terminal's kernel configuration for this AID"),
    );

    if preferred == KernelId::C8 {
        findings.push(
            Finding::new(
                IssueKind::C8Fallback,
                Severity::Warning,
                format!("Common kernel C8 not supported by terminal, fell back to {actual}"),
            )
            .recommend("Keep network kernel data objects on C8 cards for legacy acceptance"),
        );
    }

    findings
}

/// Check Track 2 Equivalent Data (57) for separator and digit problems
pub fn validate_track2(track2: &[u8]) -> Vec<Finding> {
    let text = hex::encode_upper(track2);
    let body = text.trim_end_matches('F');
    let separators = body.matches('D').count();
    let mut findings = Vec::new();

    if separators != 1 {
        findings.push(
            Finding::new(
                IssueKind::Track2Separator,
                Severity::Warning,
                format!("Track 2 has {separators} field separators, expected exactly one 'D'"),
            )
            .recommend("Separate PAN and expiry with a single 'D' nibble"),
        );
    }

    if body.chars().any(|c| !c.is_ascii_digit() && c != 'D') {
        findings.push(
            Finding::new(
                IssueKind::Track2Format,
                Severity::Warning,
                "Track 2 contains nibbles other than digits, 'D' and trailing 'F' padding",
            )
            .recommend("Encode Track 2 as compressed numeric"),
        );
    }

    findings
}

/// Check Terminal Verification Results (95)
pub fn validate_tvr(tvr: &[u8]) -> Vec<Finding> {
    if tvr.len() == TVR_LENGTH {
        return Vec::new();
    }
    vec![Finding::new(
        IssueKind::TvrLength,
        Severity::Warning,
        format!("Terminal Verification Results is {} bytes, expected {TVR_LENGTH}", tvr.len()),
    )]
}

/// CID whose top bits are the reserved `11` pattern
pub fn undefined_cryptogram_type(cid: u8) -> Finding {
    Finding::new(
        IssueKind::UndefinedCryptogramType,
        Severity::Error,
        format!("Cryptogram Information Data {cid:02X} does not name AAC, TC or ARQC"),
    )
    .recommend("Card must set CID bits 8-7 to 00, 01 or 10")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(findings: &[Finding]) -> Vec<IssueKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_ffi_valid() {
        assert!(validate_ffi(&[0x20, 0x01, 0x00, 0x00], Some(KernelId::C3)).is_empty());
    }

    #[test]
    fn test_ffi_undefined_form_factor() {
        let findings = validate_ffi(&[0x20, 0x07, 0x00, 0x00], None);
        assert_eq!(kinds(&findings), vec![IssueKind::FfiInvalidFormFactor]);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn test_ffi_short_skips_form_factor_check() {
        let findings = validate_ffi(&[0x20, 0x0F, 0x00], None);
        assert_eq!(kinds(&findings), vec![IssueKind::FfiLength]);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_ffi_common_kernel_note() {
        let findings = validate_ffi(&[0x20, 0x01, 0x00, 0x00], Some(KernelId::C8));
        assert_eq!(kinds(&findings), vec![IssueKind::FfiCommonKernel]);
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn test_par() {
        let findings = validate_par(&[b'5'; PAR_LENGTH]);
        assert_eq!(kinds(&findings), vec![IssueKind::ParLegacyTerminal]);

        let findings = validate_par(&[b'5'; 20]);
        assert_eq!(kinds(&findings), vec![IssueKind::ParLength, IssueKind::ParLegacyTerminal]);
    }

    #[test]
    fn test_kernel_fallback_from_common_kernel() {
        let findings = detect_kernel_fallback(KernelId::C8, KernelId::C6);
        assert_eq!(kinds(&findings), vec![IssueKind::KernelFallback, IssueKind::C8Fallback]);
        assert!(findings.iter().all(|f| f.severity == Severity::Warning));
    }

    #[test]
    fn test_kernel_fallback_between_network_kernels() {
        assert_eq!(
            kinds(&detect_kernel_fallback(KernelId::C2, KernelId::C3)),
            vec![IssueKind::KernelFallback]
        );
        assert!(detect_kernel_fallback(KernelId::C3, KernelId::C3).is_empty());
    }

    #[test]
    fn test_track2() {
        let good = hex::decode("4761739001010010D25122011234567F").unwrap();
        assert!(validate_track2(&good).is_empty());

        let missing = hex::decode("476173900101001025122011").unwrap();
        assert_eq!(kinds(&validate_track2(&missing)), vec![IssueKind::Track2Separator]);

        let ascii = b"4761739001010010=2512".to_vec();
        let findings = validate_track2(&ascii);
        assert!(findings.iter().any(|f| f.kind == IssueKind::Track2Format));
    }

    #[test]
    fn test_tvr() {
        assert!(validate_tvr(&[0; 5]).is_empty());
        assert_eq!(kinds(&validate_tvr(&[0; 4])), vec![IssueKind::TvrLength]);
    }

    #[test]
    fn test_issue_serialises_with_codes() {
        let before = Utc::now().timestamp_millis();
        let finding = detect_kernel_fallback(KernelId::C8, KernelId::C6).remove(1);
        let issue = InteropIssue::from_finding(finding, TransactionState::ApplicationSelection);
        assert!(issue.timestamp as i64 >= before);
        assert!(issue.timestamp as i64 <= Utc::now().timestamp_millis());
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "C8_FALLBACK");
        assert_eq!(json["severity"], "WARNING");
        assert_eq!(json["state"], "APPLICATION_SELECTION");
    }
}
