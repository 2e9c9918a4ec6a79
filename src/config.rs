//! Configuration loaded from environment variables.
//!
//! - `LEDGER_LOCK_TIMEOUT_MS`: how long a unit of work waits for a wallet row lock
//!   before failing (default 5000, must be positive)
//! - `LEDGER_LOG_FORMAT`: `text` (default) or `json`
//!
//! Empty variables count as unset.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::store::DEFAULT_LOCK_TIMEOUT;

pub const LOCK_TIMEOUT_VAR: &str = "LEDGER_LOCK_TIMEOUT_MS";
pub const LOG_FORMAT_VAR: &str = "LEDGER_LOG_FORMAT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err("expected 'text' or 'json'".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lock_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            log_format: LogFormat::default(),
        }
    }
}

impl LedgerConfig {
    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = var(LOCK_TIMEOUT_VAR) {
            let millis = value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: LOCK_TIMEOUT_VAR,
                value: value.clone(),
                reason: e.to_string(),
            })?;
            if millis == 0 {
                return Err(ConfigError::Invalid {
                    var: LOCK_TIMEOUT_VAR,
                    value,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.lock_timeout = Duration::from_millis(millis);
        }

        if let Some(value) = var(LOG_FORMAT_VAR) {
            config.log_format = value.parse().map_err(|reason| ConfigError::Invalid {
                var: LOG_FORMAT_VAR,
                value,
                reason,
            })?;
        }

        Ok(config)
    }
}

/// Load the configuration from the process environment.
pub fn fetch_config() -> Result<LedgerConfig, ConfigError> {
    LedgerConfig::from_lookup(|name| std::env::var(name).ok())
}
