//! # DD Telemetry
//!
//! Process-boundary logging setup for data distributor binaries and test
//! suites. Library crates only emit `tracing` events; this crate installs the
//! global subscriber that formats them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dd_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//!
//!     // Subscription events are now written to stdout
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DD_SERVICE_NAME` | `data-distributor` | Service name in log lines |
//! | `DD_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `DD_JSON_LOGS` | `false` | JSON output |
//! | `DD_LOG_LOCATION` | `false` | Source file and line |

mod config;

pub use config::TelemetryConfig;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to install log subscriber: {0}")]
    SubscriberInit(String),
}

/// Build the level filter for `config`.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global log subscriber.
///
/// Returns `Ok(false)` if a global subscriber is already installed, so test
/// suites may call this from every test.
pub fn init_logging(config: &TelemetryConfig) -> Result<bool, TelemetryError> {
    let filter = env_filter(config)?;

    let result = if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.with_location)
            .with_line_number(config.with_location);
        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.with_location)
            .with_line_number(config.with_location)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };

    match result {
        Ok(()) => {
            tracing::info!(
                service = %config.service_name,
                level = %config.log_level,
                json = config.json_logs,
                "Logging initialized"
            );
            Ok(true)
        }
        Err(e) if is_already_set(&e) => Ok(false),
        Err(e) => Err(TelemetryError::SubscriberInit(e.to_string())),
    }
}

fn is_already_set(error: &tracing_subscriber::util::TryInitError) -> bool {
    error.to_string().contains("already")
}

/// Install test logging once. Safe to call from every test.
pub fn init_test_logging() {
    if let Err(e) = init_logging(&TelemetryConfig::for_tests()) {
        eprintln!("Test logging not installed: {e}");
    }
}
