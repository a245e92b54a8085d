//! # Rill Telemetry
//!
//! Structured logging bootstrap for the rill stream node.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rill_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(&config).expect("failed to init telemetry");
//!
//!     // Application code; tracing events are now collected.
//! }
//! ```

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The global subscriber could not be installed.
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),

    /// Invalid configuration value.
    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}

/// Initialize the logging stack.
///
/// Returns a guard that should be held for the lifetime of the
/// application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let tracing_guard = tracing_setup::init_tracing(config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "rill-node");
    }
}
