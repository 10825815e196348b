//! Engine settings and the scenario specification set
//!
//! Nothing here is global: callers build a [`Specifications`] value with
//! [`Specifications::builtin`] or [`Specifications::load`] and pass it on.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{CardKind, TerminalKind};
use crate::scenario::Scenario;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-transaction settings shared by the terminal emulator and the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for one command/response exchange
    pub step_timeout_ms: u64,
    /// Deadline for the whole transaction
    pub transaction_timeout_ms: u64,
    /// Amount in minor units
    pub amount_authorised: u64,
    /// ISO 4217 numeric currency
    pub currency_code: u16,
    /// ISO 3166 numeric country
    pub country_code: u16,
    pub transaction_type: u8,
    /// Ask for ARQC even where the terminal could approve offline
    pub force_online: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 2_000,
            transaction_timeout_ms: 10_000,
            amount_authorised: 1_000,
            currency_code: 840,
            country_code: 840,
            transaction_type: 0x00,
            force_online: false,
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_timeout_ms == 0 || self.transaction_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.amount_authorised > 999_999_999_999 {
            return Err(ConfigError::Invalid(
                "amount does not fit 12 BCD digits".into(),
            ));
        }
        if self.currency_code > 999 || self.country_code > 999 {
            return Err(ConfigError::Invalid(
                "currency and country codes are 3 digits".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a test run needs: engine settings, the card and terminal
/// kinds to sweep, and named scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specifications {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default = "CardKind::all")]
    pub cards: Vec<CardKind>,
    #[serde(default = "TerminalKind::all")]
    pub terminals: Vec<TerminalKind>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

impl Specifications {
    /// Built-in card and terminal sets with the stock scenarios
    pub fn builtin() -> Self {
        Self {
            engine: EngineConfig::default(),
            cards: CardKind::all(),
            terminals: TerminalKind::all(),
            scenarios: Scenario::builtin(),
        }
    }

    /// Load from a JSON file; missing sections take built-in defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let specs = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        specs.engine.validate()?;
        Ok(specs)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

impl Default for Specifications {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.step_timeout(), Duration::from_secs(2));
        assert_eq!(config.currency_code, 840);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let specs = Specifications::from_json(
            r#"{ "engine": { "amount_authorised": 2500, "force_online": true },
                 "cards": ["visa_contactless"] }"#,
        )
        .unwrap();
        assert_eq!(specs.engine.amount_authorised, 2500);
        assert!(specs.engine.force_online);
        assert_eq!(specs.engine.step_timeout_ms, 2000);
        assert_eq!(specs.cards, vec![CardKind::VisaContactless]);
        assert_eq!(specs.terminals, TerminalKind::all());
        assert!(specs.scenarios.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EngineConfig {
            currency_code: 1234,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Specifications::load("/nonexistent/specs.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_builtin_scenarios_named_uniquely() {
        let specs = Specifications::builtin();
        let mut names: Vec<_> = specs.scenarios.iter().map(|s| s.name.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(specs.scenario("visa-contactless-legacy").is_some());
    }
}
