use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use emv_card::{CardKind, Specifications, TerminalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod formatters;
use commands::run::Selection;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "emv-interop")]
#[command(about = "EMV Interoperability Tester - Emulate cards and terminals and report interop issues")]
#[command(version)]
struct Args {
    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human, global = true)]
    format: FormatMode,

    /// JSON specification file (engine settings, card and terminal sets, scenarios)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run configured scenarios, one named scenario, or a single card/terminal pair
    Run {
        /// Scenario name
        scenario: Option<String>,
        /// Card kind for an ad-hoc pair
        #[arg(long, requires = "terminal", conflicts_with = "scenario")]
        card: Option<CardKind>,
        /// Terminal kind for an ad-hoc pair
        #[arg(long, requires = "card")]
        terminal: Option<TerminalKind>,
    },
    /// Run every card against every terminal
    Matrix {
        /// Card kinds (default: all configured)
        #[arg(long = "card")]
        cards: Vec<CardKind>,
        /// Terminal kinds (default: all configured)
        #[arg(long = "terminal")]
        terminals: Vec<TerminalKind>,
    },
    /// Decode a BER-TLV hex string
    Decode { hex: String },
    /// List the tag dictionary
    Tags,
    /// List preset card and terminal profiles
    Profiles,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Set RUST_LOG=debug to see every APDU exchanged
    // Default: info level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let format_mode = args.format;

    let specs = match &args.config {
        Some(path) => match Specifications::load(path) {
            Ok(specs) => {
                info!("Loaded specifications from {}", path.display());
                specs
            }
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        },
        None => Specifications::builtin(),
    };

    let outcome = match args.command {
        Command::Run {
            scenario,
            card,
            terminal,
        } => {
            let selection = match (scenario, card, terminal) {
                (Some(name), _, _) => Selection::Named(name),
                (None, Some(card), Some(terminal)) => Selection::Pair(card, terminal),
                _ => Selection::All,
            };
            commands::run::cmd_run(&specs, selection, format_mode)
                .await
                .map(|summary| summary.failed == 0)
        }
        Command::Matrix { cards, terminals } => {
            commands::run::cmd_matrix(&specs, &cards, &terminals, format_mode)
                .await
                // Failed pairings are the point of a matrix; only errors fail the run
                .map(|_| true)
        }
        Command::Decode { hex } => {
            commands::decode::cmd_decode(&hex, format_mode).map(|()| true)
        }
        Command::Tags => {
            commands::listing::cmd_tags(format_mode);
            Ok(true)
        }
        Command::Profiles => {
            commands::listing::cmd_profiles(format_mode);
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
