//! Emulated endpoints
//!
//! Emulation is computation, not I/O: an [`Endpoint`] answers each command
//! synchronously. A profile may ask for simulated latency, which the driver
//! waits out before delivering the answer.

mod card;
mod terminal;

use std::time::Duration;

pub use card::{parse_pin_block, pin_block, CardEmulator};
pub use terminal::TerminalEmulator;

use crate::apdu::ApduResponse;

/// Something that answers command APDUs
pub trait Endpoint: Send {
    /// Answer one raw command APDU
    fn process_command(&mut self, command: &[u8]) -> ApduResponse;

    /// Delay before the answer is available
    fn latency(&self) -> Duration {
        Duration::ZERO
    }

    /// Return to the power-on state
    fn reset(&mut self);
}
