//! Engine configuration.

use std::time::Duration;

/// Tunables of the per-stream engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extra miniblocks loaded before the last snapshot, to satisfy
    /// recency checks on freshly loaded views.
    pub num_preceding_miniblocks: usize,
    /// A candidate carries a snapshot once this many blocks were sealed
    /// since the last snapshot block.
    pub miniblocks_per_snapshot: u64,
    /// Idle time after which an empty stream may be unloaded.
    pub eviction_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_preceding_miniblocks: 2,
            miniblocks_per_snapshot: 10,
            eviction_ttl: Duration::from_secs(300),
        }
    }
}
