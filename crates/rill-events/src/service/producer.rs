//! The miniblock producer.
//!
//! Periodically seals non-empty minipools: builds a candidate from the
//! current view, durably saves the proposal, then promotes it. Streams
//! whose inception disables miniblock creation are skipped by the tick
//! and only sealed through the debug hook.

use crate::service::{EngineParams, StreamCache};
use shared_types::{short_hex, Hash, StreamError, StreamId};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Reference to a produced miniblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniblockRef {
    /// Header event hash.
    pub hash: Hash,
    /// Block number.
    pub num: u64,
}

/// Seals minipools into miniblocks across the cache.
pub struct MiniblockProducer {
    params: Arc<EngineParams>,
    cache: Arc<StreamCache>,
}

impl MiniblockProducer {
    pub fn new(cache: Arc<StreamCache>) -> Self {
        Self {
            params: cache.params().clone(),
            cache,
        }
    }

    /// One production pass over every eligible stream. Failures are
    /// logged per stream and do not stop the pass; a candidate that
    /// lost a promotion race simply surfaces on the next tick.
    pub async fn tick(&self) -> usize {
        let mut produced = 0;
        for stream in self.cache.streams() {
            if !stream.can_create_miniblock().await {
                continue;
            }
            let stream_id = stream.stream_id();
            match self.make_miniblock(stream_id, false, None).await {
                Ok(Some(mb)) => {
                    debug!(stream_id = %stream_id, miniblock_num = mb.num, "tick sealed miniblock");
                    produced += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(stream_id = %stream_id, error = %err, "miniblock production failed");
                }
            }
        }
        produced
    }

    /// Seal one stream's minipool now.
    ///
    /// `last_known_num`, when given, makes the request conditional: a
    /// mismatch with the view's tip means the request is stale and the
    /// call is a no-op. An empty minipool is also a no-op. This is the
    /// debug hook behind `make_miniblock` in the info surface.
    pub async fn make_miniblock(
        &self,
        stream_id: StreamId,
        force_snapshot: bool,
        last_known_num: Option<u64>,
    ) -> Result<Option<MiniblockRef>, StreamError> {
        let stream = self.cache.get_stream(stream_id);
        let view = stream.get_view().await?;

        if let Some(expected) = last_known_num {
            if view.last_block().num != expected {
                return Ok(None);
            }
        }
        if view.minipool_len() == 0 {
            return Ok(None);
        }

        let candidate = view.propose_next_miniblock(
            &self.params.config,
            self.params.signer.as_ref(),
            force_snapshot,
            now_ms(),
        )?;
        let reference = MiniblockRef {
            hash: candidate.hash,
            num: candidate.num,
        };

        stream.save_miniblock_candidate(&candidate.to_wire()).await?;
        stream.promote_candidate(candidate.hash, candidate.num).await?;

        debug!(
            stream_id = %stream_id,
            miniblock_num = reference.num,
            miniblock_hash = %short_hex(&reference.hash),
            "miniblock produced"
        );
        Ok(Some(reference))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bootstrap_stream, channel_id, message_event, test_params, TestSigner};

    #[tokio::test]
    async fn test_tick_skips_disabled_and_empty_streams() {
        let (params, _storage, registry) = test_params();
        let signer = TestSigner::new(1);
        let disabled = channel_id(1);
        let empty = channel_id(2);
        let active = channel_id(3);
        bootstrap_stream(&registry, &signer, disabled, true).await;
        bootstrap_stream(&registry, &signer, empty, false).await;
        bootstrap_stream(&registry, &signer, active, false).await;

        let cache = Arc::new(StreamCache::new(params));
        for id in [disabled, empty, active] {
            cache.get_stream(id).get_view().await.unwrap();
        }

        for id in [disabled, active] {
            let stream = cache.get_stream(id);
            let view = stream.get_view().await.unwrap();
            let event = message_event(&signer, view.last_block().hash, 1);
            stream.add_event(&event).await.unwrap();
        }

        let producer = MiniblockProducer::new(cache.clone());
        assert_eq!(producer.tick().await, 1);

        // Only the active stream advanced.
        assert_eq!(
            cache.get_stream(active).get_view().await.unwrap().generation(),
            2
        );
        assert_eq!(
            cache
                .get_stream(disabled)
                .get_view()
                .await
                .unwrap()
                .generation(),
            1
        );
    }

    #[tokio::test]
    async fn test_make_miniblock_respects_last_known_num() {
        let (params, _storage, registry) = test_params();
        let signer = TestSigner::new(1);
        let id = channel_id(1);
        bootstrap_stream(&registry, &signer, id, true).await;

        let cache = Arc::new(StreamCache::new(params));
        let stream = cache.get_stream(id);
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        let producer = MiniblockProducer::new(cache.clone());

        // Stale request: the caller thinks the tip is already 5.
        let result = producer.make_miniblock(id, false, Some(5)).await.unwrap();
        assert!(result.is_none());

        // Matching request seals the minipool.
        let result = producer.make_miniblock(id, false, Some(0)).await.unwrap();
        let mb = result.unwrap();
        assert_eq!(mb.num, 1);

        // Nothing left to seal.
        let result = producer.make_miniblock(id, true, None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_forced_snapshot_is_carried() {
        let (params, _storage, registry) = test_params();
        let signer = TestSigner::new(1);
        let id = channel_id(1);
        bootstrap_stream(&registry, &signer, id, true).await;

        let cache = Arc::new(StreamCache::new(params));
        let stream = cache.get_stream(id);
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        let producer = MiniblockProducer::new(cache.clone());
        producer.make_miniblock(id, true, None).await.unwrap().unwrap();

        // The snapshot block becomes the new retention floor.
        let view = stream.get_view().await.unwrap();
        assert_eq!(view.first_block_num(), 1);
        assert_eq!(view.miniblocks_from_last_snapshot().len(), 1);
    }
}
