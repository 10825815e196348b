//! Async transaction driver
//!
//! Feeds commands from a [`TransactionContext`] to an [`Endpoint`] one at a
//! time. Every exchange runs under the configured per-step timeout; expiry is
//! recorded on the context and ends the transaction.

use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use super::result::TransactionError;
use super::{EngineError, InterfaceType, Step, TransactionContext, TransactionState};
use crate::apdu::{commands, ApduCommand, ApduResponse};
use crate::config::EngineConfig;
use crate::emulator::{Endpoint, TerminalEmulator};

/// Run one complete transaction.
///
/// Protocol failures and timeouts end in `ERROR` on the context and still
/// return `Ok`; only decode and framing failures are returned as errors.
pub async fn drive(
    ctx: &mut TransactionContext,
    card: &mut dyn Endpoint,
    terminal: &TerminalEmulator,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    let terminal_data = terminal.transaction_data();

    // Application selection
    let command = ctx.select_environment_command()?;
    let Some(response) = exchange(ctx, card, &command, config).await? else {
        return Ok(());
    };
    let directory = ctx.process_environment_response(&response)?;

    let Some(aid) = terminal.choose_application(&directory) else {
        ctx.abort(TransactionError::build(
            Step::SelectApplication,
            "No application supported by both card and terminal",
        ));
        return Ok(());
    };
    let command = ctx.select_application_command(&aid)?;
    let Some(response) = exchange(ctx, card, &command, config).await? else {
        return Ok(());
    };
    ctx.process_select_response(&response)?;
    if ctx.state() == TransactionState::Error {
        return Ok(());
    }

    if ctx.interface() != InterfaceType::Contact {
        match terminal.select_kernel(ctx.card_kernel(), &aid) {
            Some(kernel) => ctx.activate_kernel(kernel)?,
            None => {
                ctx.abort(TransactionError::build(
                    Step::SelectApplication,
                    format!(
                        "Terminal has no kernel for AID {}",
                        hex::encode_upper(&aid)
                    ),
                ));
                return Ok(());
            }
        }
    }

    // Initiate application processing
    let command = ctx.gpo_command(terminal_data)?;
    let Some(response) = exchange(ctx, card, &command, config).await? else {
        return Ok(());
    };
    ctx.process_gpo_response(&response)?;
    if ctx.state() == TransactionState::Error {
        return Ok(());
    }

    // Read application data
    for read in ctx.generate_read_commands() {
        let command = ctx.read_record_command(&read)?;
        let Some(response) = exchange(ctx, card, &command, config).await? else {
            return Ok(());
        };
        ctx.process_read_record_response(&read, &response)?;
    }

    // Completion
    let requested = terminal.requested_cryptogram();
    let Some(command) = ctx.generate_ac_command(requested, terminal_data)? else {
        return Ok(());
    };
    let Some(response) = exchange(ctx, card, &command, config).await? else {
        return Ok(());
    };
    ctx.process_gen_ac_response(&response)?;

    info!(
        state = %ctx.state(),
        cryptogram = ?ctx.cryptogram_type(),
        issues = ctx.interop_issues().len(),
        "transaction finished"
    );
    Ok(())
}

/// GET RESPONSE commands chained onto a single command before giving up
pub const MAX_RESPONSE_CHAIN: usize = 16;

/// Send one command, collecting `61 XX` continuations with GET RESPONSE.
///
/// Returns `None` when the step timed out or the card exceeded
/// [`MAX_RESPONSE_CHAIN`]; the context is then in `ERROR`.
async fn exchange(
    ctx: &mut TransactionContext,
    card: &mut dyn Endpoint,
    command: &ApduCommand,
    config: &EngineConfig,
) -> Result<Option<ApduResponse>, EngineError> {
    let step = ctx.current_step();
    let Some(mut response) = transmit(ctx, card, command, step, config).await? else {
        return Ok(None);
    };

    let mut data = Vec::new();
    let mut chained = 0;
    while let Some(available) = response.status_word().bytes_available() {
        if chained == MAX_RESPONSE_CHAIN {
            ctx.abort(TransactionError::unbounded_chaining(
                step,
                response.status_word(),
                MAX_RESPONSE_CHAIN,
            ));
            return Ok(None);
        }
        chained += 1;
        data.append(&mut response.data);
        let length = u16::try_from(available).unwrap_or(256);
        let next = commands::get_response(length);
        let Some(more) = transmit(ctx, card, &next, step, config).await? else {
            return Ok(None);
        };
        response = more;
    }
    if !data.is_empty() {
        data.append(&mut response.data);
        response.data = data;
    }
    Ok(Some(response))
}

async fn transmit(
    ctx: &mut TransactionContext,
    card: &mut dyn Endpoint,
    command: &ApduCommand,
    step: Step,
    config: &EngineConfig,
) -> Result<Option<ApduResponse>, EngineError> {
    let bytes = command.to_bytes()?;
    debug!(
        command = command.name(),
        apdu = %hex::encode_upper(&bytes),
        "sending to card"
    );

    let latency = card.latency();
    let answer = timeout(config.step_timeout(), async {
        if !latency.is_zero() {
            sleep(latency).await;
        }
        card.process_command(&bytes)
    })
    .await;

    match answer {
        Ok(response) => {
            debug!(
                sw = %response.status_word(),
                len = response.data.len(),
                "card answered"
            );
            Ok(Some(response))
        }
        Err(_) => {
            ctx.record_timeout(step, config.step_timeout_ms);
            Ok(None)
        }
    }
}
