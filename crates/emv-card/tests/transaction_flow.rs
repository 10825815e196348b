//! End-to-end transactions between the emulators
//!
//! Every test builds its own card, terminal and context, so they can run in
//! any order and in parallel.

use emv_card::apdu::{commands, ApduResponse, StatusWord};
use emv_card::engine::driver::{drive, MAX_RESPONSE_CHAIN};
use emv_card::engine::response::parse_directory;
use emv_card::engine::{ErrorKind, Step};
use emv_card::scenario::{run_matrix, run_scenarios, Outcome, Scenario};
use emv_card::{
    CardEmulator, CardKind, CardProfile, CryptogramType, EngineConfig, EngineError, Endpoint,
    InterfaceType, IssueKind, KernelId, Severity, TerminalEmulator, TerminalKind, TerminalProfile,
    TransactionContext, TransactionState,
};

async fn run(card: CardProfile, terminal: TerminalKind) -> TransactionContext {
    let config = EngineConfig::default();
    let terminal = TerminalEmulator::new(TerminalProfile::preset(terminal), &config);
    let mut ctx = TransactionContext::new(card.interface);
    let mut card = CardEmulator::new(card);
    drive(&mut ctx, &mut card, &terminal, &config)
        .await
        .expect("transaction should not hit a decode error");
    ctx
}

fn count(ctx: &TransactionContext, kind: IssueKind) -> usize {
    ctx.interop_issues()
        .iter()
        .filter(|issue| issue.kind == kind)
        .count()
}

#[tokio::test]
async fn test_contactless_happy_path() {
    let ctx = run(
        CardProfile::preset(CardKind::VisaContactless),
        TerminalKind::LegacyVisa,
    )
    .await;

    assert_eq!(ctx.state(), TransactionState::Completion);
    assert!(ctx.is_success());
    assert_eq!(ctx.kernel(), Some(KernelId::C3));
    assert_eq!(ctx.cryptogram_type(), Some(CryptogramType::Arqc));
    assert_eq!(ctx.cryptogram().map(<[u8]>::len), Some(8));
    assert!(ctx.errors().is_empty());
    assert!(ctx.warnings().is_empty());
    assert!(ctx.cdol1().is_some());

    let result = ctx.result();
    assert_eq!(result.kernel, "Visa (C3)");
    assert_eq!(result.cryptogram_type.as_deref(), Some("ARQC"));
    assert_eq!(result.selected_aid.as_deref(), Some("A0000000031010"));
    assert_eq!(result.card_data.get("9F36").map(String::as_str), Some("0011"));
    assert_eq!(result.timings.len(), 5);
    assert!(!result.log.is_empty());
}

#[tokio::test]
async fn test_contact_format1_offline_approval() {
    let ctx = run(
        CardProfile::preset(CardKind::VisaContact),
        TerminalKind::ContactEmv,
    )
    .await;

    assert!(ctx.is_success());
    assert_eq!(ctx.interface(), InterfaceType::Contact);
    assert_eq!(ctx.kernel(), None);
    assert_eq!(ctx.cryptogram_type(), Some(CryptogramType::Tc));
    assert_eq!(ctx.aip(), Some(&[0x5C, 0x00][..]));
    assert_eq!(ctx.afl().len(), 2);
    assert_eq!(ctx.result().kernel, "Contact");
}

#[tokio::test]
async fn test_format1_contactless_with_pdol() {
    let ctx = run(
        CardProfile::preset(CardKind::AmexContactless),
        TerminalKind::MultiNetwork,
    )
    .await;

    assert!(ctx.is_success());
    assert_eq!(ctx.kernel(), Some(KernelId::C4));
    assert_eq!(ctx.pdol().map(<[_]>::len), Some(1));
}

#[tokio::test]
async fn test_missing_record_is_only_a_warning() {
    let ctx = run(
        CardProfile::preset(CardKind::NonCompliantWearable),
        TerminalKind::MultiNetwork,
    )
    .await;

    assert_eq!(ctx.state(), TransactionState::Completion);
    assert!(ctx.is_success());
    assert_eq!(ctx.warnings().len(), 1);
    assert_eq!(
        ctx.warnings()[0].status_word.as_deref(),
        Some(StatusWord::RECORD_NOT_FOUND.to_string().as_str())
    );

    assert_eq!(count(&ctx, IssueKind::FfiInvalidFormFactor), 1);
    assert_eq!(count(&ctx, IssueKind::FfiLength), 0);
    assert_eq!(count(&ctx, IssueKind::ParLength), 1);
    assert_eq!(count(&ctx, IssueKind::Track2Separator), 1);
}

#[tokio::test]
async fn test_common_kernel_fallback() {
    let ctx = run(
        CardProfile::preset(CardKind::CommonKernel),
        TerminalKind::LegacyDiscover,
    )
    .await;

    assert!(ctx.is_success());
    assert_eq!(ctx.card_kernel(), Some(KernelId::C8));
    assert_eq!(ctx.kernel(), Some(KernelId::C6));
    assert_eq!(count(&ctx, IssueKind::KernelFallback), 1);
    assert_eq!(count(&ctx, IssueKind::C8Fallback), 1);
    for issue in ctx.interop_issues() {
        if matches!(issue.kind, IssueKind::KernelFallback | IssueKind::C8Fallback) {
            assert_eq!(issue.severity, Severity::Warning);
        }
    }
}

#[tokio::test]
async fn test_common_kernel_without_fallback() {
    let ctx = run(
        CardProfile::preset(CardKind::CommonKernel),
        TerminalKind::CommonKernel,
    )
    .await;

    assert_eq!(ctx.kernel(), Some(KernelId::C8));
    assert_eq!(count(&ctx, IssueKind::KernelFallback), 0);
    assert_eq!(count(&ctx, IssueKind::FfiCommonKernel), 1);
}

#[tokio::test]
async fn test_no_common_application() {
    let ctx = run(
        CardProfile::preset(CardKind::AmexContactless),
        TerminalKind::LegacyVisa,
    )
    .await;

    assert_eq!(ctx.state(), TransactionState::Error);
    assert_eq!(ctx.errors().len(), 1);
    assert_eq!(ctx.errors()[0].kind, ErrorKind::Build);
}

#[tokio::test]
async fn test_short_tvr_reported() {
    let ctx = run(
        CardProfile::preset(CardKind::MastercardContactless),
        TerminalKind::MisconfiguredKiosk,
    )
    .await;

    assert!(ctx.is_success());
    assert_eq!(count(&ctx, IssueKind::TvrLength), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_card_times_out() {
    let profile = CardProfile::preset(CardKind::VisaContactless).with_latency(5_000);
    let ctx = run(profile, TerminalKind::LegacyVisa).await;

    assert_eq!(ctx.state(), TransactionState::Error);
    assert_eq!(ctx.errors().len(), 1);
    let error = &ctx.errors()[0];
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert!(error.message.starts_with("TIMEOUT"));
}

#[tokio::test(start_paused = true)]
async fn test_latency_under_timeout_completes() {
    let profile = CardProfile::preset(CardKind::VisaContactless).with_latency(500);
    let ctx = run(profile, TerminalKind::LegacyVisa).await;
    assert!(ctx.is_success());
}

#[test]
fn test_out_of_order_calls_rejected() {
    let config = EngineConfig::default();
    let terminal = TerminalEmulator::new(TerminalProfile::preset(TerminalKind::LegacyVisa), &config);
    let mut ctx = TransactionContext::new(InterfaceType::Contactless);

    assert!(matches!(
        ctx.gpo_command(terminal.transaction_data()),
        Err(EngineError::InvalidState { .. })
    ));
    assert!(matches!(
        ctx.generate_ac_command(CryptogramType::Arqc, terminal.transaction_data()),
        Err(EngineError::InvalidState { .. })
    ));
    assert!(ctx
        .process_gpo_response(&ApduResponse::success(vec![0x80, 0x02, 0x00, 0x00]))
        .is_err());
    assert_eq!(ctx.state(), TransactionState::Idle);
}

#[test]
fn test_ppse_directory_from_emulator() {
    let mut card = CardEmulator::new(CardProfile::preset(CardKind::CommonKernel));
    let response = card.process_command(&commands::select_ppse().to_bytes().unwrap());
    assert!(response.is_success());

    let directory = parse_directory(&response.data).unwrap();
    assert_eq!(directory.len(), 1);
    assert_eq!(directory[0].kernel, Some(KernelId::C8));
    assert_eq!(directory[0].priority, Some(0x01));
    assert_eq!(directory[0].label.as_deref(), Some("DISCOVER C8"));
}

/// Answers every command with the same bytes
struct Garbage;

impl Endpoint for Garbage {
    fn process_command(&mut self, _command: &[u8]) -> ApduResponse {
        ApduResponse::success(vec![0x6F, 0x05, 0x84])
    }

    fn reset(&mut self) {}
}

#[tokio::test]
async fn test_decode_failure_propagates() {
    let config = EngineConfig::default();
    let terminal = TerminalEmulator::new(TerminalProfile::preset(TerminalKind::LegacyVisa), &config);
    let mut ctx = TransactionContext::new(InterfaceType::Contactless);

    let err = drive(&mut ctx, &mut Garbage, &terminal, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Tlv(_)));
    assert!(ctx.errors().is_empty());
}

/// Splits every data-carrying answer into a one-byte head and a `61 XX` tail
struct Chunked {
    inner: CardEmulator,
    pending: Option<ApduResponse>,
}

impl Endpoint for Chunked {
    fn process_command(&mut self, command: &[u8]) -> ApduResponse {
        if command.get(1) == Some(&0xC0) {
            return self
                .pending
                .take()
                .unwrap_or_else(|| ApduResponse::error(StatusWord::CONDITIONS_NOT_SATISFIED));
        }
        let mut response = self.inner.process_command(command);
        if response.data.len() < 2 {
            return response;
        }
        let rest = response.data.split_off(1);
        let available = StatusWord::more_data(rest.len().min(256) as u16);
        self.pending = Some(ApduResponse::new(rest, response.status_word()));
        ApduResponse::new(response.data, available)
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.pending = None;
    }
}

#[tokio::test]
async fn test_get_response_chaining_reassembles_data() {
    let config = EngineConfig::default();
    let terminal = TerminalEmulator::new(TerminalProfile::preset(TerminalKind::LegacyVisa), &config);
    let mut ctx = TransactionContext::new(InterfaceType::Contactless);
    let mut card = Chunked {
        inner: CardEmulator::new(CardProfile::preset(CardKind::VisaContactless)),
        pending: None,
    };

    drive(&mut ctx, &mut card, &terminal, &config).await.unwrap();
    assert_eq!(ctx.state(), TransactionState::Completion);
    assert!(ctx.is_success());
    assert!(ctx.cdol1().is_some());
}

/// Answers every command with one byte and `61 01`
struct EndlessChain {
    calls: usize,
}

impl Endpoint for EndlessChain {
    fn process_command(&mut self, _command: &[u8]) -> ApduResponse {
        self.calls += 1;
        ApduResponse::new(vec![0xAA], StatusWord::more_data(1))
    }

    fn reset(&mut self) {
        self.calls = 0;
    }
}

#[tokio::test]
async fn test_get_response_chain_is_bounded() {
    let config = EngineConfig::default();
    let terminal = TerminalEmulator::new(TerminalProfile::preset(TerminalKind::LegacyVisa), &config);
    let mut ctx = TransactionContext::new(InterfaceType::Contactless);
    let mut card = EndlessChain { calls: 0 };

    drive(&mut ctx, &mut card, &terminal, &config).await.unwrap();
    assert_eq!(card.calls, 1 + MAX_RESPONSE_CHAIN);
    assert_eq!(ctx.state(), TransactionState::Error);
    assert_eq!(ctx.errors().len(), 1);
    let error = &ctx.errors()[0];
    assert_eq!(error.kind, ErrorKind::Protocol);
    assert_eq!(error.phase, Step::SelectEnvironment);
    assert_eq!(error.status_word.as_deref(), Some("6101"));
    assert!(error.message.contains("61XX"));
}

#[tokio::test(start_paused = true)]
async fn test_builtin_scenarios_pass() {
    let reports = run_scenarios(&Scenario::builtin(), &EngineConfig::default()).await;
    for report in &reports {
        assert_eq!(
            report.outcome,
            Outcome::Passed,
            "{}: {:?}",
            report.scenario,
            report.reason
        );
    }
}

#[tokio::test]
async fn test_matrix_order_and_skips() {
    let reports = run_matrix(
        &[CardKind::VisaContactless, CardKind::VisaContact],
        &[TerminalKind::LegacyVisa, TerminalKind::ContactEmv],
        &EngineConfig::default(),
    )
    .await;

    let shape: Vec<_> = reports
        .iter()
        .map(|r| (r.card, r.terminal, r.outcome))
        .collect();
    assert_eq!(
        shape,
        vec![
            (CardKind::VisaContactless, TerminalKind::LegacyVisa, Outcome::Passed),
            (CardKind::VisaContactless, TerminalKind::ContactEmv, Outcome::Skipped),
            (CardKind::VisaContact, TerminalKind::LegacyVisa, Outcome::Skipped),
            (CardKind::VisaContact, TerminalKind::ContactEmv, Outcome::Passed),
        ]
    );
}

#[tokio::test]
async fn test_matrix_runs_are_isolated() {
    let reports = run_matrix(
        &[CardKind::MastercardContactless; 3],
        &[TerminalKind::MultiNetwork],
        &EngineConfig::default(),
    )
    .await;

    // Each run has a fresh card, so every ATC is the first increment
    for report in reports {
        let result = report.result.expect("pair shares an interface");
        assert_eq!(result.card_data.get("9F36").map(String::as_str), Some("0011"));
    }
}

#[tokio::test]
async fn test_reset_allows_reuse() {
    let config = EngineConfig::default();
    let terminal = TerminalEmulator::new(TerminalProfile::preset(TerminalKind::MultiNetwork), &config);
    let mut card = CardEmulator::new(CardProfile::preset(CardKind::MastercardContactless));

    for _ in 0..2 {
        let mut ctx = TransactionContext::new(InterfaceType::Contactless);
        drive(&mut ctx, &mut card, &terminal, &config).await.unwrap();
        assert!(ctx.is_success());
        card.reset();
    }
    assert_eq!(card.atc(), 0x0010);
}
