//! Records produced by a transaction and the final result handed to callers

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Step, TransactionState};
use crate::apdu::StatusWord;
use crate::interop::InteropIssue;

/// Why a transaction stopped or a step was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The card answered with a non-success status word
    Protocol,
    /// A command could not be built from the data read so far
    Build,
    /// A step or the whole transaction ran past its deadline
    Timeout,
}

/// Entry of the `errors` or `warnings` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionError {
    pub kind: ErrorKind,
    pub phase: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_word: Option<String>,
    pub message: String,
}

impl TransactionError {
    pub fn protocol(phase: Step, sw: StatusWord) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            phase,
            status_word: Some(sw.to_string()),
            message: format!("{phase} failed: {}", sw.description()),
        }
    }

    /// The card kept answering `61 XX` past the GET RESPONSE limit
    pub fn unbounded_chaining(phase: Step, sw: StatusWord, limit: usize) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            phase,
            status_word: Some(sw.to_string()),
            message: format!("{phase} failed: too many 61XX continuations (limit {limit})"),
        }
    }

    pub fn build(phase: Step, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Build,
            phase,
            status_word: None,
            message: message.into(),
        }
    }

    pub fn timeout(phase: Step, limit_ms: u64) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            phase,
            status_word: None,
            message: format!("TIMEOUT: {phase} exceeded {limit_ms} ms"),
        }
    }
}

/// One line of the per-transaction event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub elapsed_ms: u64,
    pub state: TransactionState,
    pub message: String,
}

/// Time at which a step finished, relative to transaction start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub phase: Step,
    pub elapsed_ms: u64,
}

/// Plain summary of a finished transaction
///
/// This is the only view of a transaction that reporting code should use.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub success: bool,
    pub state: TransactionState,
    pub kernel: String,
    pub cryptogram_type: Option<String>,
    pub cryptogram: Option<String>,
    pub selected_aid: Option<String>,
    pub card_data: BTreeMap<String, String>,
    pub errors: Vec<TransactionError>,
    pub warnings: Vec<TransactionError>,
    pub interop_issues: Vec<InteropIssue>,
    pub timings: Vec<PhaseTiming>,
    pub log: Vec<LogEntry>,
}

impl TransactionResult {
    /// Issues at or above `severity`
    pub fn issues_at_least(
        &self,
        severity: crate::interop::Severity,
    ) -> impl Iterator<Item = &InteropIssue> {
        self.interop_issues
            .iter()
            .filter(move |issue| issue.severity >= severity)
    }
}
