//! Scenario and matrix runs

use emv_card::scenario::{self, Outcome, Scenario, ScenarioReport, Summary};
use emv_card::{CardKind, Severity, Specifications, TerminalKind};
use emv_common::{tag_name, Tag};

use crate::formatters::{self, FormatMode};

/// Which scenarios `run` executes
pub enum Selection {
    All,
    Named(String),
    Pair(CardKind, TerminalKind),
}

pub async fn cmd_run(
    specs: &Specifications,
    selection: Selection,
    format_mode: FormatMode,
) -> Result<Summary, String> {
    let scenarios = match selection {
        Selection::All => specs.scenarios.clone(),
        Selection::Named(name) => match specs.scenario(&name) {
            Some(scenario) => vec![scenario.clone()],
            None => {
                let known: Vec<&str> = specs.scenarios.iter().map(|s| s.name.as_str()).collect();
                return Err(format!(
                    "unknown scenario '{name}', expected one of: {}",
                    known.join(", ")
                ));
            }
        },
        Selection::Pair(card, terminal) => vec![Scenario::pair(card, terminal)],
    };
    if scenarios.is_empty() {
        return Err("no scenarios configured".to_string());
    }

    let reports = scenario::run_scenarios(&scenarios, &specs.engine).await;
    let detailed = reports.len() == 1;
    print_reports(&reports, format_mode, detailed)
}

pub async fn cmd_matrix(
    specs: &Specifications,
    cards: &[CardKind],
    terminals: &[TerminalKind],
    format_mode: FormatMode,
) -> Result<Summary, String> {
    let cards = if cards.is_empty() { &specs.cards[..] } else { cards };
    let terminals = if terminals.is_empty() {
        &specs.terminals[..]
    } else {
        terminals
    };

    let reports = scenario::run_matrix(cards, terminals, &specs.engine).await;
    print_reports(&reports, format_mode, false)
}

fn print_reports(
    reports: &[ScenarioReport],
    format_mode: FormatMode,
    detailed: bool,
) -> Result<Summary, String> {
    let summary = Summary::of(reports);

    if format_mode == FormatMode::Json {
        let document = serde_json::json!({ "summary": summary, "reports": reports });
        let text = serde_json::to_string_pretty(&document).map_err(|err| err.to_string())?;
        println!("{text}");
        return Ok(summary);
    }

    for report in reports {
        print_report(report, format_mode, detailed);
    }
    println!(
        "\n{} passed, {} failed, {} skipped",
        summary.passed, summary.failed, summary.skipped
    );
    Ok(summary)
}

fn print_report(report: &ScenarioReport, format_mode: FormatMode, detailed: bool) {
    let mark = match report.outcome {
        Outcome::Passed => "✓",
        Outcome::Failed => "✗",
        Outcome::Skipped => "-",
    };
    print!(
        "{mark} {} {:<28} {} / {}",
        report.outcome, report.scenario, report.card, report.terminal
    );
    match &report.result {
        Some(result) => println!(
            "  [{}, {}, {} ms]",
            result.state,
            result.cryptogram_type.as_deref().unwrap_or("no cryptogram"),
            report.elapsed_ms
        ),
        None => println!(),
    }
    if let Some(reason) = &report.reason {
        println!("    {reason}");
    }

    let Some(result) = &report.result else {
        return;
    };
    for issue in result.issues_at_least(Severity::Warning) {
        println!("    {:?} {}: {}", issue.severity, issue.kind, issue.message);
    }

    if !detailed {
        return;
    }

    println!("\n  Kernel: {}", result.kernel);
    if let Some(aid) = &result.selected_aid {
        println!("  AID: {aid}");
    }
    if let Some(cryptogram) = &result.cryptogram {
        println!("  Cryptogram: {cryptogram}");
    }

    println!("\n  Card data:");
    for (tag_hex, value_hex) in &result.card_data {
        let Ok(tag) = Tag::from_hex(tag_hex) else {
            continue;
        };
        let shown = match hex::decode(value_hex) {
            Ok(value) => formatters::format_value(tag, &value, format_mode),
            Err(_) => value_hex.clone(),
        };
        println!("    [{tag_hex}] {}: {shown}", tag_name(tag));
    }

    if !result.interop_issues.is_empty() {
        println!("\n  Interoperability issues:");
        for issue in &result.interop_issues {
            println!("    {:?} {} ({}): {}", issue.severity, issue.kind, issue.state, issue.message);
            if let Some(recommendation) = &issue.recommendation {
                println!("      → {recommendation}");
            }
        }
    }

    for (title, entries) in [("Errors", &result.errors), ("Warnings", &result.warnings)] {
        if entries.is_empty() {
            continue;
        }
        println!("\n  {title}:");
        for entry in entries.iter() {
            println!("    - {}", entry.message);
        }
    }

    println!("\n  Log:");
    for entry in &result.log {
        println!("    {:>5} ms  {:<32} {}", entry.elapsed_ms, entry.state.to_string(), entry.message);
    }
}
