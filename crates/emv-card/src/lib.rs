//! EMV Card - Protocol emulation and interoperability testing
//!
//! This crate emulates EMV cards, mobile wallets and terminals and runs the
//! transaction flow between them, recording interoperability problems such
//! as kernel fallback or malformed Form Factor Indicators along the way.
//!
//! - [`apdu`]: command/response model and the command factory
//! - [`engine`]: the transaction state machine and its async driver
//! - [`emulator`]: card and terminal emulators
//! - [`interop`]: interoperability findings and their detectors
//! - [`scenario`]: scenario and matrix runner

pub mod apdu;
pub mod config;
pub mod emulator;
pub mod engine;
pub mod interop;
pub mod kernel;
pub mod profile;
pub mod scenario;

pub use apdu::{ApduCommand, ApduError, ApduResponse, StatusWord};
pub use config::{ConfigError, EngineConfig, Specifications};
pub use emulator::{CardEmulator, Endpoint, TerminalEmulator};
pub use engine::response::CryptogramType;
pub use engine::result::{TransactionError, TransactionResult};
pub use engine::{EngineError, InterfaceType, TransactionContext, TransactionState};
pub use interop::{InteropIssue, IssueKind, Severity};
pub use kernel::KernelId;
pub use profile::{CardKind, CardProfile, TerminalKind, TerminalProfile};
pub use scenario::{run_matrix, run_scenario, run_scenarios, Outcome, Scenario, ScenarioReport, Summary};
