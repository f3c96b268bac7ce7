//! # Custody Telemetry
//!
//! Structured logging for the custody engine, built on `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use custody_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COC_SERVICE_NAME` | `custody-chain` | Service name on every event |
//! | `COC_LOG_LEVEL` | `info` | Log level filter, falls back to `RUST_LOG` |
//! | `COC_JSON_LOGS` | `false` | JSON lines output |

#![warn(missing_docs)]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// The filter directive did not parse.
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error("Failed to install subscriber: {0}")]
    AlreadyInitialized(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Filter("bad".into());
        assert_eq!(err.to_string(), "Invalid log filter: bad");
    }
}
