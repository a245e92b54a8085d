//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for the logging stack.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line.
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether to emit JSON formatted logs (containers) instead of the
    /// pretty development format.
    pub json_logs: bool,

    /// Network identifier (devnet, testnet, mainnet).
    pub network: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "rill-node".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            network: "devnet".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RILL_SERVICE_NAME`: Service name (default: rill-node)
    /// - `RILL_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `RILL_JSON_LOGS`: JSON logs (default: true when running in a
    ///   container, false otherwise)
    /// - `RILL_NETWORK`: Network name (default: devnet)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("RILL_SERVICE_NAME").unwrap_or_else(|_| "rill-node".to_string()),

            log_level: env::var("RILL_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("RILL_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            network: env::var("RILL_NETWORK").unwrap_or_else(|_| "devnet".to_string()),
        }
    }
}
