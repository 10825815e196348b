//! EMV transaction engine
//!
//! [`TransactionContext`] is a sans-IO state machine: it hands out the next
//! command APDU and consumes the card's answer, one exchange at a time.
//! [`driver::drive`] connects it to an [`Endpoint`](crate::emulator::Endpoint).
//!
//! ```text
//! IDLE → APPLICATION_SELECTION → INITIATE_APPLICATION_PROCESSING
//!      → READ_APPLICATION_DATA → COMPLETION
//! ```
//!
//! Any fatal failure moves the context to `ERROR`. Cardholder verification,
//! risk management and action analysis are not separate states.

pub mod driver;
pub mod response;
pub mod result;

use std::fmt;
use std::time::Instant;

use emv_common::dol::build_dol_data_with;
use emv_common::store::Layered;
use emv_common::tlv::{decode, encode_primitive, find_in, TlvNode};
use emv_common::{parse_dol, tags, DolEntry, TagMap, TagStore, TlvError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::apdu::{commands, ApduCommand, ApduError, ApduResponse};
use crate::interop::{self, Finding, InteropIssue, Severity};
use crate::kernel::KernelId;

pub use response::{AflEntry, CryptogramType, DirectoryEntry, ResponseFormat};
pub use result::{ErrorKind, LogEntry, PhaseTiming, TransactionError, TransactionResult};

/// Transaction progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Idle,
    ApplicationSelection,
    InitiateApplicationProcessing,
    ReadApplicationData,
    Completion,
    Error,
}

impl TransactionState {
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Completion | Self::Error)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ApplicationSelection => "APPLICATION_SELECTION",
            Self::InitiateApplicationProcessing => "INITIATE_APPLICATION_PROCESSING",
            Self::ReadApplicationData => "READ_APPLICATION_DATA",
            Self::Completion => "COMPLETION",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical or logical interface the transaction runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    Contact,
    Contactless,
    MobileHce,
}

impl InterfaceType {
    /// Directory name selected first on this interface
    pub fn environment(self) -> &'static [u8] {
        match self {
            Self::Contact => commands::PSE,
            Self::Contactless | Self::MobileHce => commands::PPSE,
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contact => "contact",
            Self::Contactless => "contactless",
            Self::MobileHce => "mobile HCE",
        })
    }
}

/// Command exchange within a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    SelectEnvironment,
    SelectApplication,
    GetProcessingOptions,
    ReadRecord,
    GenerateAc,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SelectEnvironment => "SELECT PPSE/PSE",
            Self::SelectApplication => "SELECT",
            Self::GetProcessingOptions => "GET PROCESSING OPTIONS",
            Self::ReadRecord => "READ RECORD",
            Self::GenerateAc => "GENERATE AC",
        })
    }
}

/// Errors that abort engine processing
///
/// Declined or failed card commands are not errors here; they are recorded
/// in the context and move it to [`TransactionState::Error`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("TLV decode failed: {0}")]
    Tlv(#[from] TlvError),

    #[error("APDU framing failed: {0}")]
    Apdu(#[from] ApduError),

    #[error("operation requires state {expected}, transaction is in {actual}")]
    InvalidState {
        expected: TransactionState,
        actual: TransactionState,
    },

    #[error("no {0} command is awaiting a response")]
    NoPendingCommand(Step),

    #[error("READ RECORD SFI {sfi} record {record} was not requested")]
    UnrequestedRecord { sfi: u8, record: u8 },

    #[error("malformed {step} response: {reason}")]
    MalformedResponse { step: Step, reason: String },
}

/// READ RECORD command planned from the AFL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    pub command: ApduCommand,
    pub sfi: u8,
    pub record: u8,
    /// Record takes part in offline data authentication
    pub oda: bool,
}

/// Working state of one transaction
#[derive(Debug)]
pub struct TransactionContext {
    interface: InterfaceType,
    state: TransactionState,
    awaiting: Option<Step>,
    /// SFI and record number of the READ RECORD in flight
    pending_read: Option<(u8, u8)>,
    selected_aid: Option<Vec<u8>>,
    card_kernel: Option<KernelId>,
    kernel: Option<KernelId>,
    card_data: TagMap,
    pdol: Option<Vec<DolEntry>>,
    aip: Option<Vec<u8>>,
    afl: Vec<AflEntry>,
    cdol1: Option<Vec<DolEntry>>,
    cdol2: Option<Vec<DolEntry>>,
    cryptogram: Option<Vec<u8>>,
    cryptogram_type: Option<CryptogramType>,
    errors: Vec<TransactionError>,
    warnings: Vec<TransactionError>,
    issues: Vec<InteropIssue>,
    log: Vec<LogEntry>,
    timings: Vec<PhaseTiming>,
    started: Instant,
}

impl TransactionContext {
    pub fn new(interface: InterfaceType) -> Self {
        let mut ctx = Self {
            interface,
            state: TransactionState::Idle,
            awaiting: None,
            pending_read: None,
            selected_aid: None,
            card_kernel: None,
            kernel: None,
            card_data: TagMap::new(),
            pdol: None,
            aip: None,
            afl: Vec::new(),
            cdol1: None,
            cdol2: None,
            cryptogram: None,
            cryptogram_type: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            issues: Vec::new(),
            log: Vec::new(),
            timings: Vec::new(),
            started: Instant::now(),
        };
        ctx.log(format!("Transaction started over {interface} interface"));
        ctx
    }

    pub fn interface(&self) -> InterfaceType {
        self.interface
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn selected_aid(&self) -> Option<&[u8]> {
        self.selected_aid.as_deref()
    }

    /// Kernel advertised by the card in its FCI (9F2A)
    pub fn card_kernel(&self) -> Option<KernelId> {
        self.card_kernel
    }

    /// Kernel the terminal activated
    pub fn kernel(&self) -> Option<KernelId> {
        self.kernel
    }

    /// Kernel the card would like: its advertised kernel, else the network
    /// kernel of the selected AID
    pub fn preferred_kernel(&self) -> Option<KernelId> {
        self.card_kernel
            .or_else(|| self.selected_aid.as_deref().and_then(KernelId::for_aid))
    }

    pub fn card_data(&self) -> &TagMap {
        &self.card_data
    }

    pub fn get_card_data(&self, tag: emv_common::Tag) -> Option<&[u8]> {
        self.card_data.get(tag)
    }

    pub fn pdol(&self) -> Option<&[DolEntry]> {
        self.pdol.as_deref()
    }

    pub fn aip(&self) -> Option<&[u8]> {
        self.aip.as_deref()
    }

    pub fn afl(&self) -> &[AflEntry] {
        &self.afl
    }

    pub fn cdol1(&self) -> Option<&[DolEntry]> {
        self.cdol1.as_deref()
    }

    pub fn cdol2(&self) -> Option<&[DolEntry]> {
        self.cdol2.as_deref()
    }

    pub fn cryptogram(&self) -> Option<&[u8]> {
        self.cryptogram.as_deref()
    }

    pub fn cryptogram_type(&self) -> Option<CryptogramType> {
        self.cryptogram_type
    }

    pub fn errors(&self) -> &[TransactionError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[TransactionError] {
        &self.warnings
    }

    pub fn interop_issues(&self) -> &[InteropIssue] {
        &self.issues
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log
    }

    /// Reached COMPLETION with a recognised cryptogram
    pub fn is_success(&self) -> bool {
        self.state == TransactionState::Completion && self.cryptogram_type.is_some()
    }

    /// Step that is running or would run next
    pub fn current_step(&self) -> Step {
        if let Some(step) = self.awaiting {
            return step;
        }
        match self.state {
            TransactionState::Idle => Step::SelectEnvironment,
            TransactionState::ApplicationSelection => Step::SelectApplication,
            TransactionState::InitiateApplicationProcessing => Step::GetProcessingOptions,
            TransactionState::ReadApplicationData => Step::ReadRecord,
            TransactionState::Completion | TransactionState::Error => Step::GenerateAc,
        }
    }

    /// Append an entry to the transaction log
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(state = %self.state, "{message}");
        self.log.push(LogEntry {
            elapsed_ms: self.elapsed_ms(),
            state: self.state,
            message,
        });
    }

    /// Stop the transaction with a fatal error
    pub fn abort(&mut self, error: TransactionError) {
        warn!(phase = %error.phase, "{}", error.message);
        self.log(error.message.clone());
        self.errors.push(error);
        self.awaiting = None;
        self.pending_read = None;
        self.transition(TransactionState::Error);
    }

    /// Stop the transaction because `step` ran past `limit_ms`
    pub fn record_timeout(&mut self, step: Step, limit_ms: u64) {
        self.abort(TransactionError::timeout(step, limit_ms));
    }

    // ---- application selection ----

    /// SELECT of the payment system environment for this interface
    pub fn select_environment_command(&mut self) -> Result<ApduCommand, EngineError> {
        self.expect_state(TransactionState::Idle)?;
        self.transition(TransactionState::ApplicationSelection);
        self.awaiting = Some(Step::SelectEnvironment);
        Ok(commands::select(
            self.interface.environment(),
            commands::SelectOccurrence::First,
        ))
    }

    /// Read the directory from a PPSE/PSE answer.
    ///
    /// A failed environment SELECT is only a warning; the caller falls back
    /// to its own AID list.
    pub fn process_environment_response(
        &mut self,
        response: &ApduResponse,
    ) -> Result<Vec<DirectoryEntry>, EngineError> {
        self.expect_awaiting(Step::SelectEnvironment)?;

        if !response.is_success() {
            let warning = TransactionError::protocol(Step::SelectEnvironment, response.status_word());
            warn!("{}", warning.message);
            self.log(format!("{}; falling back to terminal AID list", warning.message));
            self.warnings.push(warning);
            return Ok(Vec::new());
        }

        let entries = response::parse_directory(&response.data)?;
        self.mark(Step::SelectEnvironment);
        self.log(format!("Directory lists {} application(s)", entries.len()));
        Ok(entries)
    }

    /// SELECT of an application by AID
    pub fn select_application_command(&mut self, aid: &[u8]) -> Result<ApduCommand, EngineError> {
        if self.awaiting.is_some()
            || !matches!(
                self.state,
                TransactionState::Idle | TransactionState::ApplicationSelection
            )
        {
            return Err(EngineError::InvalidState {
                expected: TransactionState::ApplicationSelection,
                actual: self.state,
            });
        }
        if self.state == TransactionState::Idle {
            self.transition(TransactionState::ApplicationSelection);
        }
        self.selected_aid = Some(aid.to_vec());
        self.awaiting = Some(Step::SelectApplication);
        self.log(format!("Selecting AID {}", hex::encode_upper(aid)));
        Ok(commands::select(aid, commands::SelectOccurrence::First))
    }

    /// Consume the FCI of the selected application
    pub fn process_select_response(&mut self, response: &ApduResponse) -> Result<(), EngineError> {
        self.expect_awaiting(Step::SelectApplication)?;

        if !response.is_success() {
            self.abort(TransactionError::protocol(
                Step::SelectApplication,
                response.status_word(),
            ));
            return Ok(());
        }

        let nodes = decode(&response.data)?;
        self.absorb(&nodes);

        if let Some(pdol) = find_in(&nodes, tags::PDOL) {
            let entries = parse_dol(pdol.value())?;
            self.log(format!("PDOL requests {} data object(s)", entries.len()));
            self.pdol = Some(entries);
        }

        self.card_kernel = find_in(&nodes, tags::KERNEL_IDENTIFIER)
            .and_then(|node| KernelId::from_tag_value(node.value()));
        if let Some(kernel) = self.card_kernel {
            self.log(format!("Card advertises kernel {}", kernel.name()));
        }

        if let Some(ffi) = find_in(&nodes, tags::FORM_FACTOR_INDICATOR) {
            let findings = interop::validate_ffi(ffi.value(), self.card_kernel);
            self.record(findings);
        }

        self.mark(Step::SelectApplication);
        self.transition(TransactionState::InitiateApplicationProcessing);
        Ok(())
    }

    /// Note the kernel the terminal activated and compare it with the one
    /// the card prefers
    pub fn activate_kernel(&mut self, actual: KernelId) -> Result<(), EngineError> {
        self.expect_state(TransactionState::InitiateApplicationProcessing)?;
        self.kernel = Some(actual);
        self.log(format!("Terminal activated kernel {}", actual.name()));
        if let Some(preferred) = self.preferred_kernel() {
            let findings = interop::detect_kernel_fallback(preferred, actual);
            self.record(findings);
        }
        Ok(())
    }

    // ---- initiate application processing ----

    /// GPO command data: tag 83 wrapping the PDOL values, or `83 00`
    ///
    /// Values come from `terminal` first, then from card data already read.
    pub fn build_gpo_data(&self, terminal: &dyn TagStore) -> Result<Vec<u8>, EngineError> {
        let data = match &self.pdol {
            Some(entries) => self.dol_values(entries, terminal),
            None => Vec::new(),
        };
        Ok(encode_primitive(tags::COMMAND_TEMPLATE, &data)?)
    }

    pub fn gpo_command(&mut self, terminal: &dyn TagStore) -> Result<ApduCommand, EngineError> {
        self.expect_state(TransactionState::InitiateApplicationProcessing)?;
        self.expect_idle_exchange()?;
        let template = self.build_gpo_data(terminal)?;
        self.awaiting = Some(Step::GetProcessingOptions);
        Ok(commands::get_processing_options_template(template))
    }

    pub fn process_gpo_response(&mut self, response: &ApduResponse) -> Result<(), EngineError> {
        self.expect_awaiting(Step::GetProcessingOptions)?;

        if !response.is_success() {
            self.abort(TransactionError::protocol(
                Step::GetProcessingOptions,
                response.status_word(),
            ));
            return Ok(());
        }

        let options = response::parse_gpo_response(&response.data)?;
        let afl = response::parse_afl(&options.afl)?;
        self.absorb(&options.nodes);
        self.card_data.set(tags::AIP, options.aip.clone());
        self.card_data.set(tags::AFL, options.afl.clone());
        self.log(format!(
            "GPO {:?}: AIP {}, {} AFL entr{}",
            options.format,
            hex::encode_upper(&options.aip),
            afl.len(),
            if afl.len() == 1 { "y" } else { "ies" }
        ));
        self.aip = Some(options.aip);
        self.afl = afl;

        self.mark(Step::GetProcessingOptions);
        self.transition(TransactionState::ReadApplicationData);
        Ok(())
    }

    // ---- read application data ----

    /// One READ RECORD per record listed in the AFL, in AFL order
    pub fn generate_read_commands(&self) -> Vec<ReadCommand> {
        self.afl
            .iter()
            .flat_map(|entry| {
                entry.records().map(move |record| ReadCommand {
                    command: commands::read_record(record, entry.sfi),
                    sfi: entry.sfi,
                    record,
                    oda: entry.is_oda_record(record),
                })
            })
            .collect()
    }

    /// Send `read`; its response goes to [`Self::process_read_record_response`]
    pub fn read_record_command(&mut self, read: &ReadCommand) -> Result<ApduCommand, EngineError> {
        self.expect_state(TransactionState::ReadApplicationData)?;
        self.expect_idle_exchange()?;
        self.awaiting = Some(Step::ReadRecord);
        self.pending_read = Some((read.sfi, read.record));
        Ok(read.command.clone())
    }

    /// Consume one record. A failed read is a warning and reading goes on.
    pub fn process_read_record_response(
        &mut self,
        read: &ReadCommand,
        response: &ApduResponse,
    ) -> Result<(), EngineError> {
        self.expect_state(TransactionState::ReadApplicationData)?;
        self.expect_awaiting(Step::ReadRecord)?;
        if self.pending_read.take() != Some((read.sfi, read.record)) {
            return Err(EngineError::UnrequestedRecord {
                sfi: read.sfi,
                record: read.record,
            });
        }

        if !response.is_success() {
            let sw = response.status_word();
            let warning = TransactionError {
                kind: ErrorKind::Protocol,
                phase: Step::ReadRecord,
                status_word: Some(sw.to_string()),
                message: format!(
                    "READ RECORD SFI {} record {} failed: {}",
                    read.sfi,
                    read.record,
                    sw.description()
                ),
            };
            warn!("{}", warning.message);
            self.log(warning.message.clone());
            self.warnings.push(warning);
            return Ok(());
        }

        let nodes = decode(&response.data)?;
        self.absorb(&nodes);
        self.log(format!("Read SFI {} record {}", read.sfi, read.record));

        if let Some(cdol1) = find_in(&nodes, tags::CDOL1) {
            self.cdol1 = Some(parse_dol(cdol1.value())?);
        }
        if let Some(cdol2) = find_in(&nodes, tags::CDOL2) {
            self.cdol2 = Some(parse_dol(cdol2.value())?);
        }
        if let Some(par) = find_in(&nodes, tags::PAYMENT_ACCOUNT_REFERENCE) {
            let findings = interop::validate_par(par.value());
            self.record(findings);
        }
        if let Some(track2) = find_in(&nodes, tags::TRACK_2_EQUIVALENT_DATA) {
            let findings = interop::validate_track2(track2.value());
            self.record(findings);
        }
        Ok(())
    }

    // ---- completion ----

    /// CDOL1 values for the first GENERATE AC.
    ///
    /// Without a CDOL1 the transaction fails with a build error and `None`
    /// is returned.
    pub fn build_gen_ac_data(
        &mut self,
        terminal: &dyn TagStore,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        self.expect_state(TransactionState::ReadApplicationData)?;

        if let Some(tvr) = terminal.get(tags::TERMINAL_VERIFICATION_RESULTS) {
            let findings = interop::validate_tvr(tvr);
            self.record(findings);
        }

        let data = self
            .cdol1
            .as_deref()
            .map(|entries| self.dol_values(entries, terminal));
        if data.is_none() {
            self.abort(TransactionError::build(
                Step::GenerateAc,
                "CDOL1 not found in card records, GENERATE AC cannot be built",
            ));
        }
        Ok(data)
    }

    /// GENERATE AC asking for `requested`, or `None` when it cannot be built
    pub fn generate_ac_command(
        &mut self,
        requested: CryptogramType,
        terminal: &dyn TagStore,
    ) -> Result<Option<ApduCommand>, EngineError> {
        self.expect_state(TransactionState::ReadApplicationData)?;
        self.expect_idle_exchange()?;
        self.mark(Step::ReadRecord);
        let Some(data) = self.build_gen_ac_data(terminal)? else {
            return Ok(None);
        };
        self.awaiting = Some(Step::GenerateAc);
        self.log(format!("Requesting {requested}"));
        Ok(Some(commands::generate_ac(requested, false, data)))
    }

    pub fn process_gen_ac_response(&mut self, response: &ApduResponse) -> Result<(), EngineError> {
        self.expect_awaiting(Step::GenerateAc)?;

        if !response.is_success() {
            self.abort(TransactionError::protocol(
                Step::GenerateAc,
                response.status_word(),
            ));
            return Ok(());
        }

        let ac = response::parse_gen_ac_response(&response.data)?;
        self.absorb(&ac.nodes);
        self.card_data
            .set(tags::CRYPTOGRAM_INFORMATION_DATA, vec![ac.cid]);
        self.card_data
            .set(tags::APPLICATION_CRYPTOGRAM, ac.cryptogram.clone());
        if let Some(atc) = &ac.atc {
            self.card_data
                .set(tags::APPLICATION_TRANSACTION_COUNTER, atc.clone());
        }

        self.cryptogram_type = ac.cryptogram_type();
        match self.cryptogram_type {
            Some(kind) => self.log(format!("Card returned {kind}: {}", kind.outcome())),
            None => self.record(vec![interop::undefined_cryptogram_type(ac.cid)]),
        }
        self.cryptogram = Some(ac.cryptogram);

        self.mark(Step::GenerateAc);
        self.transition(TransactionState::Completion);
        Ok(())
    }

    /// Snapshot for reporting
    pub fn result(&self) -> TransactionResult {
        TransactionResult {
            success: self.is_success(),
            state: self.state,
            kernel: match (self.interface, self.kernel.or(self.card_kernel)) {
                (_, Some(kernel)) => kernel.name(),
                (InterfaceType::Contact, None) => "Contact".to_string(),
                (_, None) => "Unknown".to_string(),
            },
            cryptogram_type: self.cryptogram_type.map(|c| c.name().to_string()),
            cryptogram: self.cryptogram.as_deref().map(hex::encode_upper),
            selected_aid: self.selected_aid.as_deref().map(hex::encode_upper),
            card_data: self.card_data.to_hex_map(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            interop_issues: self.issues.clone(),
            timings: self.timings.clone(),
            log: self.log.clone(),
        }
    }

    // ---- internals ----

    fn dol_values(&self, entries: &[DolEntry], terminal: &dyn TagStore) -> Vec<u8> {
        let layers: [&dyn TagStore; 2] = [terminal, &self.card_data];
        let lookup = Layered::new(&layers);
        build_dol_data_with(entries, |tag| lookup.get(tag))
    }

    /// Store every primitive object of `nodes`; later values overwrite
    fn absorb(&mut self, nodes: &[TlvNode]) {
        for node in nodes.iter().flat_map(TlvNode::iter) {
            if !node.is_constructed() {
                self.card_data.set(node.tag(), node.value().to_vec());
            }
        }
    }

    fn record(&mut self, findings: Vec<Finding>) {
        for finding in findings {
            if finding.severity >= Severity::Warning {
                warn!(issue = %finding.kind, "{}", finding.message);
            } else {
                info!(issue = %finding.kind, "{}", finding.message);
            }
            self.log(format!("{}: {}", finding.kind, finding.message));
            self.issues
                .push(InteropIssue::from_finding(finding, self.state));
        }
    }

    fn transition(&mut self, next: TransactionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.log(format!("Entered {next}"));
    }

    fn mark(&mut self, phase: Step) {
        self.timings.push(PhaseTiming {
            phase,
            elapsed_ms: self.elapsed_ms(),
        });
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn expect_state(&self, expected: TransactionState) -> Result<(), EngineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn expect_idle_exchange(&self) -> Result<(), EngineError> {
        match self.awaiting {
            Some(step) => Err(EngineError::NoPendingCommand(step)),
            None => Ok(()),
        }
    }

    fn expect_awaiting(&mut self, step: Step) -> Result<(), EngineError> {
        if self.awaiting == Some(step) {
            self.awaiting = None;
            Ok(())
        } else {
            Err(EngineError::NoPendingCommand(step))
        }
    }
}
