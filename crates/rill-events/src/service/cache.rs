//! The process-wide stream cache.
//!
//! Maps stream ids to their actors. Entries are created on first access
//! and stay in the map; the periodic cleanup pass unloads idle views
//! but keeps the records, so receivers registered later still find
//! their stream.

use crate::service::{EngineParams, Stream};
use dashmap::DashMap;
use shared_types::StreamId;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Process-wide map from stream id to stream actor.
pub struct StreamCache {
    params: Arc<EngineParams>,
    streams: DashMap<StreamId, Arc<Stream>>,
}

impl StreamCache {
    pub fn new(params: Arc<EngineParams>) -> Self {
        Self {
            params,
            streams: DashMap::new(),
        }
    }

    /// The engine wiring shared by every stream.
    pub fn params(&self) -> &Arc<EngineParams> {
        &self.params
    }

    /// Get or insert the actor for `stream_id`. The view loads lazily
    /// under the stream's own lock, so concurrent first accesses produce
    /// exactly one storage load.
    pub fn get_stream(&self, stream_id: StreamId) -> Arc<Stream> {
        self.streams
            .entry(stream_id)
            .or_insert_with(|| Arc::new(Stream::new(self.params.clone(), stream_id)))
            .clone()
    }

    /// Snapshot of all cached streams, for maintenance passes.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of cached stream records.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// True when no streams are cached.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// One eviction pass: unload every stream idle for at least `ttl`
    /// with an empty minipool and no receivers. Returns how many views
    /// were unloaded by this pass.
    pub async fn cleanup_pass(&self, ttl: Duration) -> usize {
        let mut unloaded = 0;
        for stream in self.streams() {
            let was_loaded = stream.is_loaded().await;
            if stream.try_cleanup(ttl).await && was_loaded {
                unloaded += 1;
            }
        }
        if unloaded > 0 {
            debug!(unloaded, "cache cleanup pass unloaded idle streams");
        }
        unloaded
    }
}
