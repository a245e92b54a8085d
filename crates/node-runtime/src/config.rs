//! # Node Configuration
//!
//! Unified configuration for the runtime: network surface, stream
//! engine tunables, and sync-session limits. Plain structs with sane
//! defaults and environment overrides.
//!
//! ## Security Requirements
//!
//! - `node_secret` MUST NOT be the built-in development value in
//!   production.

use rill_events::domain::EngineConfig;
use rill_sync::SyncConfig;
use std::env;
use std::time::Duration;

/// Built-in development signing secret. Never valid in production.
pub const DEV_NODE_SECRET: [u8; 32] = [0x42; 32];

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Stream engine configuration.
    pub stream: StreamConfig,
    /// Sync session configuration.
    pub sync: SyncConfig,
}

impl NodeConfig {
    /// Read overrides from the environment on top of the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `RILL_RPC_PORT`: HTTP listen port (default: 7040)
    /// - `RILL_NODE_SECRET`: 64-char hex signing secret
    /// - `RILL_MINIBLOCK_INTERVAL_MS`: producer tick period
    /// - `RILL_EVICTION_TTL_SECS`: idle-stream eviction threshold
    /// - `RILL_SYNC_QUEUE_CAPACITY`: per-session outbound queue bound
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("RILL_RPC_PORT") {
            config.network.rpc_port = port;
        }
        if let Ok(hex) = env::var("RILL_NODE_SECRET") {
            if let Some(secret) = parse_secret_hex(&hex) {
                config.network.node_secret = secret;
            }
        }
        if let Some(ms) = env_parse::<u64>("RILL_MINIBLOCK_INTERVAL_MS") {
            config.stream.miniblock_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("RILL_EVICTION_TTL_SECS") {
            config.stream.eviction_ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_parse::<usize>("RILL_SYNC_QUEUE_CAPACITY") {
            config.sync.queue_capacity = capacity;
        }

        config
    }

    /// The engine-facing slice of this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            num_preceding_miniblocks: self.stream.num_preceding_miniblocks,
            miniblocks_per_snapshot: self.stream.miniblocks_per_snapshot,
            eviction_ttl: self.stream.eviction_ttl,
        }
    }

    /// Validate configuration for production readiness.
    ///
    /// # Panics
    ///
    /// Panics when the signing secret is the built-in development
    /// value.
    pub fn validate_for_production(&self) {
        if self.network.node_secret == DEV_NODE_SECRET {
            panic!(
                "SECURITY VIOLATION: node secret is the development value. \
                 Set RILL_NODE_SECRET."
            );
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            stream: StreamConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// HTTP listening port.
    pub rpc_port: u16,
    /// secp256k1 signing secret; identifies this node.
    pub node_secret: [u8; 32],
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_port: 7040,
            node_secret: DEV_NODE_SECRET,
        }
    }
}

/// Stream engine configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Producer tick period.
    pub miniblock_interval: Duration,
    /// Cache cleanup pass period.
    pub cache_cleanup_interval: Duration,
    /// Idle time before an empty stream may be unloaded.
    pub eviction_ttl: Duration,
    /// Snapshot cadence in miniblocks.
    pub miniblocks_per_snapshot: u64,
    /// Extra blocks loaded before the last snapshot.
    pub num_preceding_miniblocks: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            miniblock_interval: Duration::from_millis(2_000),
            cache_cleanup_interval: Duration::from_secs(60),
            eviction_ttl: Duration::from_secs(300),
            miniblocks_per_snapshot: 10,
            num_preceding_miniblocks: 2,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_secret_hex(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = NodeConfig::default();
        assert_eq!(config.network.rpc_port, 7040);
        assert_eq!(config.stream.miniblocks_per_snapshot, 10);
        assert!(config.sync.queue_capacity > 0);
    }

    #[test]
    fn test_engine_config_mapping() {
        let mut config = NodeConfig::default();
        config.stream.miniblocks_per_snapshot = 3;
        config.stream.eviction_ttl = Duration::from_secs(7);
        let engine = config.engine_config();
        assert_eq!(engine.miniblocks_per_snapshot, 3);
        assert_eq!(engine.eviction_ttl, Duration::from_secs(7));
    }

    #[test]
    fn test_parse_secret_hex() {
        assert_eq!(parse_secret_hex("42".repeat(32).as_str()), Some([0x42; 32]));
        assert_eq!(parse_secret_hex("zz"), None);
    }

    #[test]
    #[should_panic(expected = "SECURITY VIOLATION")]
    fn test_production_validation_rejects_dev_secret() {
        NodeConfig::default().validate_for_production();
    }
}
