//! # Engine Configuration
//!
//! All values have defaults suitable for a single facility; each can be
//! overridden from the environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COC_MAX_SERIAL_LENGTH` | `64` | Longest accepted serial after normalisation |
//! | `COC_SERIAL_CASE` | `upper` | `preserve`, `upper` or `lower` |
//! | `COC_CONFLICT_RETRIES` | `5` | Compare-and-swap attempts per record write |
//! | `COC_CERTIFICATE_DATE_FORMAT` | `%Y-%m-%d` | chrono format for certificate dates |

use super::value_objects::SerialCase;
use std::env;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Longest accepted serial, in characters, after normalisation.
    pub max_serial_length: usize,
    /// Case folding applied before fingerprinting.
    pub case_policy: SerialCase,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_serial_length: 64,
            case_policy: SerialCase::Upper,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodyConfig {
    /// Ingestion settings.
    pub ingestion: IngestionConfig,
    /// Attempts for create-or-update under write conflicts.
    ///
    /// A writer loses at most one race to each other writer on the same
    /// serial, so a limit of `n` always suffices for `n` operators scanning
    /// one serial at once. Running out is fatal and aborts a bulk paste.
    pub conflict_retry_limit: u32,
    /// chrono format string for certificate dates.
    pub certificate_date_format: String,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            ingestion: IngestionConfig::default(),
            conflict_retry_limit: 5,
            certificate_date_format: "%Y-%m-%d".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Serial length limit of zero would reject everything.
    #[error("max_serial_length must be at least 1")]
    ZeroSerialLength,
    /// At least one write attempt is required.
    #[error("conflict_retry_limit must be at least 1")]
    ZeroRetryLimit,
    /// Empty date format renders blank certificate dates.
    #[error("certificate_date_format must not be empty")]
    EmptyDateFormat,
}

impl CustodyConfig {
    /// Defaults overridden by `COC_*` environment variables.
    ///
    /// Unparseable values are logged and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(len) = parse_env::<usize>("COC_MAX_SERIAL_LENGTH") {
            config.ingestion.max_serial_length = len;
        }
        if let Some(policy) = parse_env::<SerialCase>("COC_SERIAL_CASE") {
            config.ingestion.case_policy = policy;
        }
        if let Some(retries) = parse_env::<u32>("COC_CONFLICT_RETRIES") {
            config.conflict_retry_limit = retries;
        }
        if let Ok(format) = env::var("COC_CERTIFICATE_DATE_FORMAT") {
            config.certificate_date_format = format;
        }

        info!(
            "[custody] config: max_serial_length={} case={:?} retries={}",
            config.ingestion.max_serial_length,
            config.ingestion.case_policy,
            config.conflict_retry_limit
        );
        config
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingestion.max_serial_length == 0 {
            return Err(ConfigError::ZeroSerialLength);
        }
        if self.conflict_retry_limit == 0 {
            return Err(ConfigError::ZeroRetryLimit);
        }
        if self.certificate_date_format.trim().is_empty() {
            return Err(ConfigError::EmptyDateFormat);
        }
        Ok(())
    }

    /// Set the serial length limit.
    pub fn with_max_serial_length(mut self, max: usize) -> Self {
        self.ingestion.max_serial_length = max;
        self
    }

    /// Set the case folding policy.
    pub fn with_case_policy(mut self, policy: SerialCase) -> Self {
        self.ingestion.case_policy = policy;
        self
    }
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("[custody] ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
