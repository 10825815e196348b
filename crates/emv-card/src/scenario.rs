//! Scenario runner
//!
//! A [`Scenario`] pairs a card kind with a terminal kind, optionally tweaks
//! the card, and states what the transaction should produce. Each run builds
//! its own emulators and [`TransactionContext`]; matrix runs put every pair
//! on its own tokio task.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::emulator::{CardEmulator, TerminalEmulator};
use crate::engine::driver::drive;
use crate::engine::result::TransactionResult;
use crate::engine::TransactionContext;
use crate::profile::{CardDecision, CardKind, CardProfile, TerminalKind, TerminalProfile};

/// What a scenario must produce to pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expectation {
    /// Required transaction success; unset means success is required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Issue codes that must all be reported, e.g. `KERNEL_FALLBACK`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub card: CardKind,
    pub terminal: TerminalKind,
    /// Override of the card's GENERATE AC policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<CardDecision>,
    /// Simulated card answer delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_online: Option<bool>,
    #[serde(default)]
    pub expect: Expectation,
}

impl Scenario {
    /// Plain pairing that expects a successful transaction
    pub fn pair(card: CardKind, terminal: TerminalKind) -> Self {
        Self {
            name: format!("{card}+{terminal}"),
            description: String::new(),
            card,
            terminal,
            decision: None,
            card_latency_ms: None,
            force_online: None,
            expect: Expectation::default(),
        }
    }

    fn described(mut self, name: &str, description: &str) -> Self {
        self.name = name.to_string();
        self.description = description.to_string();
        self
    }

    fn expecting(mut self, success: bool, issues: &[&str]) -> Self {
        self.expect = Expectation {
            success: Some(success),
            issues: issues.iter().map(|code| code.to_string()).collect(),
        };
        self
    }

    /// Stock scenarios covering the interoperability cases the emulator knows
    pub fn builtin() -> Vec<Self> {
        use CardKind as C;
        use TerminalKind as T;

        vec![
            Self::pair(C::VisaContactless, T::LegacyVisa)
                .described("visa-contactless-legacy", "qVSDC card on a Visa-only reader")
                .expecting(true, &[]),
            Self::pair(C::MastercardContactless, T::MultiNetwork)
                .described("mastercard-multi-network", "Mastercard card on a C2-C7 reader")
                .expecting(true, &[]),
            Self::pair(C::CommonKernel, T::LegacyDiscover)
                .described(
                    "c8-card-legacy-discover",
                    "C8 card falls back to the Discover kernel on an older reader",
                )
                .expecting(
                    true,
                    &["KERNEL_FALLBACK", "C8_FALLBACK", "FFI_COMMON_KERNEL", "PAR_LEGACY_TERMINAL"],
                ),
            Self::pair(C::CommonKernel, T::CommonKernel)
                .described("c8-card-common-kernel", "C8 card on a C8-capable reader")
                .expecting(true, &["FFI_COMMON_KERNEL"]),
            Self::pair(C::MobileWallet, T::MultiNetwork)
                .described("mobile-wallet-hce", "Phone wallet (HCE) with FFI and PAR")
                .expecting(true, &["PAR_LEGACY_TERMINAL"]),
            Self::pair(C::NonCompliantWearable, T::MultiNetwork)
                .described(
                    "wearable-non-compliant",
                    "Wearable with bad FFI, short PAR, broken Track 2 and a missing record",
                )
                .expecting(
                    true,
                    &["FFI_INVALID_FORM_FACTOR", "PAR_LENGTH", "TRACK2_SEPARATOR"],
                ),
            Self::pair(C::VisaContact, T::ContactEmv)
                .described("visa-contact-chip", "Contact chip card approved offline")
                .expecting(true, &[]),
            Self::pair(C::AmexContactless, T::LegacyVisa)
                .described("amex-on-visa-only", "No application in common")
                .expecting(false, &[]),
            Self::pair(C::MastercardContactless, T::MisconfiguredKiosk)
                .described("kiosk-short-tvr", "Kiosk sends a 4-byte TVR")
                .expecting(true, &["TVR_LENGTH"]),
            Self {
                decision: Some(CardDecision::Undefined),
                ..Self::pair(C::DiscoverContactless, T::MultiNetwork)
            }
            .described("undefined-cryptogram", "Card answers with an RFU CID")
            .expecting(false, &["UNDEFINED_CRYPTOGRAM_TYPE"]),
            Self {
                card_latency_ms: Some(5_000),
                ..Self::pair(C::VisaContactless, T::LegacyVisa)
            }
            .described("slow-card-timeout", "Card slower than the per-step timeout")
            .expecting(false, &[]),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Passed,
    Failed,
    /// Card and terminal share no interface
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        })
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub scenario: String,
    pub card: CardKind,
    pub terminal: TerminalKind,
    pub outcome: Outcome,
    /// Why the scenario failed or was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TransactionResult>,
    pub elapsed_ms: u64,
}

impl ScenarioReport {
    fn without_result(scenario: &Scenario, outcome: Outcome, reason: String) -> Self {
        Self {
            scenario: scenario.name.clone(),
            card: scenario.card,
            terminal: scenario.terminal,
            outcome,
            reason: Some(reason),
            result: None,
            elapsed_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Pass/fail counts over a set of reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn of(reports: &[ScenarioReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            match report.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
            summary
        })
    }
}

/// Run one scenario to completion. Never fails: decode errors, timeouts and
/// unmet expectations all end up in the report.
pub async fn run_scenario(scenario: &Scenario, config: &EngineConfig) -> ScenarioReport {
    let mut card_profile = CardProfile::preset(scenario.card);
    if let Some(decision) = scenario.decision {
        card_profile = card_profile.with_decision(decision);
    }
    if let Some(latency_ms) = scenario.card_latency_ms {
        card_profile = card_profile.with_latency(latency_ms);
    }
    let terminal_profile = TerminalProfile::preset(scenario.terminal);

    let interface = card_profile.interface;
    if !terminal_profile.supports_interface(interface) {
        return ScenarioReport::without_result(
            scenario,
            Outcome::Skipped,
            format!("{} does not accept the {interface} interface", terminal_profile.name),
        );
    }

    let mut config = config.clone();
    if let Some(force_online) = scenario.force_online {
        config.force_online = force_online;
    }

    let started = Instant::now();
    let mut card = CardEmulator::new(card_profile);
    let terminal = TerminalEmulator::new(terminal_profile, &config);
    let mut ctx = TransactionContext::new(interface);

    let run = timeout(
        config.transaction_timeout(),
        drive(&mut ctx, &mut card, &terminal, &config),
    )
    .await;

    let (outcome, reason) = match run {
        Ok(Ok(())) => evaluate(&scenario.expect, &ctx.result()),
        Ok(Err(err)) => {
            warn!(scenario = %scenario.name, "transaction aborted: {err}");
            (Outcome::Failed, Some(format!("transaction aborted: {err}")))
        }
        Err(_) => {
            let step = ctx.current_step();
            ctx.record_timeout(step, config.transaction_timeout_ms);
            evaluate(&scenario.expect, &ctx.result())
        }
    };

    info!(scenario = %scenario.name, %outcome, "scenario finished");
    ScenarioReport {
        scenario: scenario.name.clone(),
        card: scenario.card,
        terminal: scenario.terminal,
        outcome,
        reason,
        result: Some(ctx.result()),
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn evaluate(expect: &Expectation, result: &TransactionResult) -> (Outcome, Option<String>) {
    let wanted = expect.success.unwrap_or(true);
    if result.success != wanted {
        let reason = match result.errors.first() {
            Some(error) if wanted => format!("transaction failed: {}", error.message),
            _ if wanted => format!("transaction ended in {}", result.state),
            _ => "transaction succeeded but a failure was expected".to_string(),
        };
        return (Outcome::Failed, Some(reason));
    }

    let missing: Vec<&str> = expect
        .issues
        .iter()
        .map(String::as_str)
        .filter(|code| {
            !result
                .interop_issues
                .iter()
                .any(|issue| issue.kind.code() == *code)
        })
        .collect();
    if !missing.is_empty() {
        return (
            Outcome::Failed,
            Some(format!("expected issues not reported: {}", missing.join(", "))),
        );
    }
    (Outcome::Passed, None)
}

/// Run scenarios concurrently, one task each; reports come back in input
/// order
pub async fn run_scenarios(scenarios: &[Scenario], config: &EngineConfig) -> Vec<ScenarioReport> {
    let handles: Vec<(Scenario, JoinHandle<ScenarioReport>)> = scenarios
        .iter()
        .cloned()
        .map(|scenario| {
            let task_scenario = scenario.clone();
            let config = config.clone();
            let handle =
                tokio::spawn(async move { run_scenario(&task_scenario, &config).await });
            (scenario, handle)
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (scenario, handle) in handles {
        let report = match handle.await {
            Ok(report) => report,
            Err(err) => {
                warn!(scenario = %scenario.name, "scenario task failed: {err}");
                ScenarioReport::without_result(
                    &scenario,
                    Outcome::Failed,
                    format!("scenario task failed: {err}"),
                )
            }
        };
        reports.push(report);
    }
    reports
}

/// Every card × terminal pairing, cards outermost
pub async fn run_matrix(
    cards: &[CardKind],
    terminals: &[TerminalKind],
    config: &EngineConfig,
) -> Vec<ScenarioReport> {
    let scenarios: Vec<Scenario> = cards
        .iter()
        .flat_map(|&card| {
            terminals
                .iter()
                .map(move |&terminal| Scenario::pair(card, terminal))
        })
        .collect();
    run_scenarios(&scenarios, config).await
}
