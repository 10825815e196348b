//! Terminal-side data and decisions

use chrono::{Datelike, NaiveDate, Utc};
use emv_common::{tags, TagMap, TagStore};
use rand::Rng;
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::response::DirectoryEntry;
use crate::engine::CryptogramType;
use crate::kernel::KernelId;
use crate::profile::TerminalProfile;

/// Supplies terminal data objects and makes the terminal's choices
#[derive(Debug, Clone)]
pub struct TerminalEmulator {
    profile: TerminalProfile,
    force_online: bool,
    data: TagMap,
}

impl TerminalEmulator {
    pub fn new(profile: TerminalProfile, config: &EngineConfig) -> Self {
        let data = TagMap::new()
            .with(tags::AMOUNT_AUTHORISED, bcd(config.amount_authorised, 6))
            .with(tags::AMOUNT_OTHER, vec![0x00; 6])
            .with(tags::TRANSACTION_CURRENCY_CODE, bcd(config.currency_code.into(), 2))
            .with(tags::TERMINAL_COUNTRY_CODE, bcd(config.country_code.into(), 2))
            .with(tags::TRANSACTION_DATE, transaction_date(Utc::now().date_naive()))
            .with(tags::TRANSACTION_TYPE, [config.transaction_type])
            .with(tags::TERMINAL_VERIFICATION_RESULTS, profile.tvr.clone())
            .with(tags::TERMINAL_TYPE, [profile.terminal_type])
            .with(tags::TERMINAL_CAPABILITIES, profile.capabilities.clone())
            .with(
                tags::TERMINAL_TRANSACTION_QUALIFIERS,
                profile.transaction_qualifiers.clone(),
            );

        let mut terminal = Self {
            profile,
            force_online: config.force_online,
            data,
        };
        terminal.refresh_unpredictable_number();
        terminal
    }

    pub fn profile(&self) -> &TerminalProfile {
        &self.profile
    }

    /// Terminal data objects used to fill PDOL and CDOL requests
    pub fn transaction_data(&self) -> &TagMap {
        &self.data
    }

    /// Draw a new Unpredictable Number (9F37)
    pub fn refresh_unpredictable_number(&mut self) {
        let number: [u8; 4] = rand::rng().random();
        self.data.set(tags::UNPREDICTABLE_NUMBER, number.to_vec());
    }

    /// AID to select from a PPSE/PSE directory.
    ///
    /// The supported entry with the best priority wins; an empty directory
    /// falls back to the terminal's first AID.
    pub fn choose_application(&self, directory: &[DirectoryEntry]) -> Option<Vec<u8>> {
        if directory.is_empty() {
            return self.profile.aids.first().cloned();
        }
        directory
            .iter()
            .filter(|entry| self.profile.supports_aid(&entry.aid))
            .min_by_key(|entry| entry.rank())
            .map(|entry| entry.aid.clone())
    }

    /// Kernel the terminal activates for the selected application
    pub fn select_kernel(&self, card_kernel: Option<KernelId>, aid: &[u8]) -> Option<KernelId> {
        let chosen = card_kernel
            .filter(|&kernel| self.profile.supports_kernel(kernel))
            .or_else(|| KernelId::for_aid(aid).filter(|&k| self.profile.supports_kernel(k)));
        debug!(
            card = ?card_kernel,
            chosen = ?chosen,
            "terminal kernel selection"
        );
        chosen
    }

    /// Cryptogram requested in the first GENERATE AC
    pub fn requested_cryptogram(&self) -> CryptogramType {
        if self.force_online || self.profile.online_only {
            CryptogramType::Arqc
        } else {
            CryptogramType::Tc
        }
    }
}

/// Right-aligned packed BCD over `width` bytes
fn bcd(mut value: u64, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    for byte in out.iter_mut().rev() {
        let low = (value % 10) as u8;
        value /= 10;
        let high = (value % 10) as u8;
        value /= 10;
        *byte = high << 4 | low;
    }
    out
}

/// YYMMDD in BCD
fn transaction_date(date: NaiveDate) -> Vec<u8> {
    let mut out = bcd(date.year().rem_euclid(100) as u64, 1);
    out.extend(bcd(u64::from(date.month()), 1));
    out.extend(bcd(u64::from(date.day()), 1));
    out
}
