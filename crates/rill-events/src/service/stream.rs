//! The per-stream actor.
//!
//! All mutating operations hold the stream's write lock for the entire
//! critical section, including the durable storage call and the fanout
//! to subscribers. This throttles per-stream throughput to storage
//! latency on purpose: it guarantees that fanout order equals admission
//! order and that readers never observe a view whose storage commitment
//! is pending.

use crate::domain::{encode_envelope, MiniblockInfo, ParsedEvent, StreamView};
use crate::ports::inbound::SyncReceiver;
use crate::ports::outbound::StreamSnapshotData;
use crate::service::EngineParams;
use shared_types::{
    Envelope, Hash, Miniblock, StorageError, StreamAndCookie, StreamError, StreamId, SyncCookie,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct StreamInner {
    /// The current immutable view; `None` when unloaded.
    view: Option<Arc<StreamView>>,
    /// Last time a client touched this stream.
    last_accessed: Instant,
    /// Registered subscription receivers by receiver id.
    receivers: HashMap<u64, Arc<dyn SyncReceiver>>,
}

/// One stream's serialization point: owns the view, the lock, and the
/// receiver set.
pub struct Stream {
    params: Arc<EngineParams>,
    stream_id: StreamId,
    inner: RwLock<StreamInner>,
}

impl Stream {
    pub(crate) fn new(params: Arc<EngineParams>, stream_id: StreamId) -> Self {
        Self {
            params,
            stream_id,
            inner: RwLock::new(StreamInner {
                view: None,
                last_accessed: Instant::now(),
                receivers: HashMap::new(),
            }),
        }
    }

    /// The stream this actor serializes.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Admit an event into the minipool.
    ///
    /// The event must anchor to the current tip and must not already be
    /// present. The envelope is durably written before the new view is
    /// published and fanned out.
    pub async fn add_event(&self, event: &ParsedEvent) -> Result<(), StreamError> {
        self.params.verifier.verify(event)?;

        let mut inner = self.inner.write().await;
        self.load_locked(&mut inner).await?;
        let view = current_view(&inner)?;

        view.validate_new_event(event)?;

        let bytes = encode_envelope(&event.envelope)?;
        let write = self
            .params
            .storage
            .write_event(
                self.stream_id,
                view.generation(),
                view.minipool_len() as u64,
                &bytes,
            )
            .await;
        if let Err(err) = write {
            return Err(self.handle_storage_failure(&mut inner, err));
        }

        let new_view = Arc::new(view.copy_and_add_event(event.clone())?);
        let cookie = new_view.sync_cookie(self.params.local_addr());
        inner.view = Some(new_view);
        inner.last_accessed = Instant::now();
        debug!(stream_id = %self.stream_id, event_hash = %shared_types::short_hex(&event.hash), "event admitted");

        self.notify_locked(&mut inner, vec![event.envelope.clone()], cookie);
        Ok(())
    }

    /// Advance the log by one sealed block.
    ///
    /// Idempotent for blocks at or below the current tip. A block that
    /// skips ahead of the current generation is rejected.
    pub async fn apply_miniblock(&self, miniblock: MiniblockInfo) -> Result<(), StreamError> {
        let mut inner = self.inner.write().await;
        self.load_locked(&mut inner).await?;
        self.apply_miniblock_locked(&mut inner, miniblock).await
    }

    /// Materialize the candidate `(hash, num)` from storage and apply
    /// it. A no-op when `num` is at or below the current tip.
    pub async fn promote_candidate(&self, hash: Hash, num: u64) -> Result<(), StreamError> {
        let mut inner = self.inner.write().await;
        self.load_locked(&mut inner).await?;

        if num <= current_view(&inner)?.last_block().num {
            return Ok(());
        }

        let bytes = self
            .params
            .storage
            .read_miniblock_candidate(self.stream_id, hash, num)
            .await?;
        let miniblock = MiniblockInfo::from_bytes(&bytes, Some(num))?;
        self.apply_miniblock_locked(&mut inner, miniblock).await
    }

    async fn apply_miniblock_locked(
        &self,
        inner: &mut StreamInner,
        miniblock: MiniblockInfo,
    ) -> Result<(), StreamError> {
        let view = current_view(inner)?;

        // Already applied; success without side effect.
        if miniblock.num <= view.last_block().num {
            return Ok(());
        }

        let header_envelope = miniblock.header_event.envelope.clone();
        let hash = miniblock.hash;
        let has_snapshot = miniblock.header.snapshot.is_some();
        let new_view = view.copy_and_apply_block(miniblock)?;

        let mut residual = Vec::with_capacity(new_view.minipool_len());
        for envelope in new_view.minipool_envelopes() {
            residual.push(encode_envelope(&envelope)?);
        }

        let promote = self
            .params
            .storage
            .promote_block(
                self.stream_id,
                view.generation(),
                hash,
                has_snapshot,
                residual,
            )
            .await;
        if let Err(err) = promote {
            return Err(self.handle_storage_failure(inner, err));
        }

        let new_view = Arc::new(new_view);
        let cookie = new_view.sync_cookie(self.params.local_addr());
        let num = new_view.last_block().num;
        inner.view = Some(new_view);
        inner.last_accessed = Instant::now();
        info!(stream_id = %self.stream_id, miniblock_num = num, has_snapshot, "miniblock promoted");

        self.notify_locked(inner, vec![header_envelope], cookie);
        Ok(())
    }

    /// Accept a candidate proposal: durably stored unless it is already
    /// at or below the tip. Takes only the read path around view
    /// inspection.
    pub async fn save_miniblock_candidate(&self, miniblock: &Miniblock) -> Result<(), StreamError> {
        let info = MiniblockInfo::from_wire(miniblock, None)?;
        let bytes = info.to_bytes()?;

        let view = self.get_view().await?;
        let last = view.last_block().num;
        if info.num <= last {
            return Err(StreamError::MiniblockTooOld {
                num: info.num,
                last,
            });
        }

        self.params
            .storage
            .write_block_proposal(self.stream_id, info.hash, info.num, bytes)
            .await?;
        Ok(())
    }

    /// Read miniblocks `[from, to)` straight from storage; does not
    /// require the view to be loaded.
    ///
    /// The terminus flag is true when `from` is 0 or the earliest
    /// available block is past `from`.
    pub async fn get_miniblocks(
        &self,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> Result<(Vec<Miniblock>, bool), StreamError> {
        let blocks = self
            .params
            .storage
            .read_miniblocks(self.stream_id, from_inclusive, to_exclusive)
            .await?;

        let mut miniblocks = Vec::with_capacity(blocks.len());
        let mut start_num = None;
        for (i, bytes) in blocks.iter().enumerate() {
            let expected = start_num.map(|start: u64| start + i as u64);
            let info = MiniblockInfo::from_bytes(bytes, expected)?;
            if start_num.is_none() {
                start_num = Some(info.num);
            }
            miniblocks.push(info.to_wire());
        }

        let terminus = from_inclusive == 0 || start_num.map(|s| s > from_inclusive).unwrap_or(false);
        Ok((miniblocks, terminus))
    }

    /// Register a receiver and deliver its catch-up.
    ///
    /// - A cookie at the current generation replays the minipool from
    ///   its slot (possibly empty, so the client knows it is up to
    ///   date).
    /// - A cookie at a retained older generation replays every envelope
    ///   from that block onward.
    /// - Anything older gets a sync reset: everything since the last
    ///   snapshot.
    pub async fn sub(
        &self,
        cookie: &SyncCookie,
        receiver: Arc<dyn SyncReceiver>,
    ) -> Result<(), StreamError> {
        if cookie.node_address != self.params.local_addr() {
            return Err(StreamError::BadSyncCookie(
                "cookie is not for this node".into(),
            ));
        }
        if cookie.stream_id != self.stream_id {
            return Err(StreamError::BadSyncCookie(format!(
                "cookie is for stream {}, not {}",
                cookie.stream_id, self.stream_id
            )));
        }
        if cookie.minipool_slot < 0 || cookie.minipool_gen < 0 {
            return Err(StreamError::BadSyncCookie("negative cursor".into()));
        }
        let slot = cookie.minipool_slot as u64;
        let gen = cookie.minipool_gen as u64;

        let mut inner = self.inner.write().await;
        self.load_locked(&mut inner).await?;
        inner.last_accessed = Instant::now();
        let view = current_view(&inner)?;

        let update = if gen == view.generation() {
            if slot > view.minipool_len() as u64 {
                return Err(StreamError::BadSyncCookie(format!(
                    "slot {slot} past minipool end"
                )));
            }
            let events: Vec<Envelope> = view
                .minipool_envelopes()
                .into_iter()
                .skip(slot as usize)
                .collect();
            StreamAndCookie {
                events,
                next_sync_cookie: view.sync_cookie(self.params.local_addr()),
                miniblocks: Vec::new(),
                sync_reset: false,
            }
        } else if let Some(idx) = view.index_of_miniblock_with_num(gen) {
            let mut events = Vec::with_capacity(16);
            view.for_each_event(idx, |e| {
                events.push(e.envelope.clone());
                true
            });
            StreamAndCookie {
                events,
                next_sync_cookie: view.sync_cookie(self.params.local_addr()),
                miniblocks: Vec::new(),
                sync_reset: false,
            }
        } else {
            // The cursor predates the retained window; restate
            // everything since the last snapshot.
            warn!(stream_id = %self.stream_id, cookie_gen = gen, "unresolvable cookie, sending sync reset");
            view.stream_and_cookie_reset(self.params.local_addr())
        };

        inner.receivers.insert(receiver.receiver_id(), receiver.clone());
        // Always deliver, even when empty, so the client knows it is up
        // to date.
        receiver.on_update(update);
        Ok(())
    }

    /// Remove a receiver. Unknown receivers are ignored; this happens
    /// normally after a force flush.
    pub async fn unsub(&self, receiver_id: u64) {
        let mut inner = self.inner.write().await;
        inner.receivers.remove(&receiver_id);
    }

    /// Transition to unloaded. Every registered receiver gets a sync
    /// error exactly once and is discarded.
    pub async fn force_flush(&self) {
        let mut inner = self.inner.write().await;
        self.flush_locked(&mut inner);
    }

    fn flush_locked(&self, inner: &mut StreamInner) {
        inner.view = None;
        if !inner.receivers.is_empty() {
            info!(stream_id = %self.stream_id, receivers = inner.receivers.len(), "stream unloaded, evicting receivers");
        }
        for receiver in inner.receivers.values() {
            receiver.on_sync_error(StreamError::Unloaded);
        }
        inner.receivers.clear();
    }

    /// The current immutable view, loading it first if needed.
    pub async fn get_view(&self) -> Result<Arc<StreamView>, StreamError> {
        {
            let inner = self.inner.read().await;
            if let Some(view) = &inner.view {
                return Ok(view.clone());
            }
        }

        let mut inner = self.inner.write().await;
        inner.last_accessed = Instant::now();
        self.load_locked(&mut inner).await?;
        current_view(&inner)
    }

    /// Unload the view when the stream has been idle for at least `ttl`
    /// and its minipool is empty. Refuses while receivers are
    /// registered, so subscribers are never dropped silently.
    ///
    /// Returns true when the view is absent after the call.
    pub async fn try_cleanup(&self, ttl: Duration) -> bool {
        let mut inner = self.inner.write().await;

        let Some(view) = &inner.view else {
            return true;
        };
        if !inner.receivers.is_empty() {
            return false;
        }
        if inner.last_accessed.elapsed() >= ttl && view.minipool_len() == 0 {
            inner.view = None;
            debug!(stream_id = %self.stream_id, "idle stream unloaded");
            return true;
        }
        false
    }

    /// True when this stream is eligible for a producer tick: loaded,
    /// non-empty minipool, and miniblock creation not disabled at
    /// inception.
    pub async fn can_create_miniblock(&self) -> bool {
        let inner = self.inner.read().await;
        match &inner.view {
            Some(view) => {
                view.minipool_len() > 0 && !view.settings().disable_miniblock_creation
            }
            None => false,
        }
    }

    /// Number of registered receivers, for maintenance introspection.
    pub async fn receiver_count(&self) -> usize {
        self.inner.read().await.receivers.len()
    }

    /// True when the view is currently loaded.
    pub async fn is_loaded(&self) -> bool {
        self.inner.read().await.view.is_some()
    }

    async fn load_locked(&self, inner: &mut StreamInner) -> Result<(), StreamError> {
        if inner.view.is_some() {
            return Ok(());
        }

        let read = self
            .params
            .storage
            .read_stream_from_last_snapshot(
                self.stream_id,
                self.params.config.num_preceding_miniblocks,
            )
            .await;
        match read {
            Ok(data) => {
                inner.view = Some(Arc::new(StreamView::make_stream_view(&data)?));
                Ok(())
            }
            Err(StorageError::NotFound) => self.init_from_registry(inner).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Bootstrap local storage from the chain registry on first access.
    async fn init_from_registry(&self, inner: &mut StreamInner) -> Result<(), StreamError> {
        let (record, genesis) = self
            .params
            .registry
            .get_stream_with_genesis(self.stream_id)
            .await?;

        if !record.is_local(self.params.local_addr()) {
            return Err(StreamError::NotLocal(self.stream_id));
        }
        if record.last_miniblock_num > 0 {
            return Err(StreamError::PastGenesis(self.stream_id));
        }

        self.params
            .storage
            .create_stream_storage(self.stream_id, &genesis)
            .await?;

        let view = StreamView::make_stream_view(&StreamSnapshotData {
            start_miniblock_num: 0,
            miniblocks: vec![genesis],
            minipool: Vec::new(),
        })?;
        info!(stream_id = %self.stream_id, "stream bootstrapped from registry");
        inner.view = Some(Arc::new(view));
        Ok(())
    }

    /// Ambiguous storage failures leave the commit status unknown: the
    /// cached view can no longer be trusted, so the stream unloads
    /// itself and receivers are told to resubscribe. The original error
    /// is surfaced unchanged either way.
    fn handle_storage_failure(&self, inner: &mut StreamInner, err: StorageError) -> StreamError {
        if matches!(err, StorageError::Ambiguous { .. }) {
            warn!(stream_id = %self.stream_id, error = %err, "ambiguous storage failure, force-flushing stream");
            self.flush_locked(inner);
        }
        err.into()
    }

    /// Fan out under the write lock so receivers observe updates in
    /// admission order.
    fn notify_locked(
        &self,
        inner: &mut StreamInner,
        envelopes: Vec<Envelope>,
        next_sync_cookie: SyncCookie,
    ) {
        if inner.receivers.is_empty() {
            return;
        }
        inner.last_accessed = Instant::now();

        let update = StreamAndCookie {
            events: envelopes,
            next_sync_cookie,
            miniblocks: Vec::new(),
            sync_reset: false,
        };
        for receiver in inner.receivers.values() {
            receiver.on_update(update.clone());
        }
    }
}

fn current_view(inner: &StreamInner) -> Result<Arc<StreamView>, StreamError> {
    inner.view.clone().ok_or(StreamError::Unloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EngineConfig;
    use crate::test_utils::{
        bootstrap_stream, channel_id, message_event, test_params, CollectingReceiver, TestSigner,
    };

    async fn loaded_stream() -> (Arc<EngineParams>, Stream, TestSigner) {
        let (params, _storage, registry) = test_params();
        let signer = TestSigner::new(1);
        let id = channel_id(1);
        bootstrap_stream(&registry, &signer, id, true).await;
        let stream = Stream::new(params.clone(), id);
        stream.get_view().await.unwrap();
        (params, stream, signer)
    }

    #[tokio::test]
    async fn test_bootstrap_and_add_event() {
        let (_params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        assert_eq!(view.generation(), 1);

        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        let view = stream.get_view().await.unwrap();
        assert_eq!(view.minipool_len(), 1);

        // Same event again is a duplicate.
        let err = stream.add_event(&event).await.unwrap_err();
        assert!(matches!(err, StreamError::DuplicateEvent(_)));
    }

    #[tokio::test]
    async fn test_add_event_is_durable_before_visible() {
        let (params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        // A reload from storage sees the event.
        let data = params
            .storage
            .read_stream_from_last_snapshot(channel_id(1), 0)
            .await
            .unwrap();
        assert_eq!(data.minipool.len(), 1);
    }

    #[tokio::test]
    async fn test_candidate_save_and_promote() {
        let (params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let tip = view.last_block().hash;

        let receiver = CollectingReceiver::new();
        let cookie = view.sync_cookie(params.local_addr());
        stream.sub(&cookie, receiver.clone()).await.unwrap();

        let e1 = message_event(&signer, tip, 1);
        let e2 = message_event(&signer, tip, 2);
        stream.add_event(&e1).await.unwrap();
        stream.add_event(&e2).await.unwrap();

        let view = stream.get_view().await.unwrap();
        let candidate = view
            .propose_next_miniblock(&EngineConfig::default(), &signer, false, 2_000)
            .unwrap();
        stream
            .save_miniblock_candidate(&candidate.to_wire())
            .await
            .unwrap();
        stream
            .promote_candidate(candidate.hash, candidate.num)
            .await
            .unwrap();

        let view = stream.get_view().await.unwrap();
        assert_eq!(view.last_block().num, 1);
        assert_eq!(view.generation(), 2);
        assert_eq!(view.minipool_len(), 0);

        // Subscriber saw the catch-up, both events, then the header, in
        // that order.
        let hashes = receiver.update_hashes();
        assert_eq!(hashes, vec![e1.hash, e2.hash, candidate.hash]);

        // Promotion is idempotent.
        stream
            .promote_candidate(candidate.hash, candidate.num)
            .await
            .unwrap();
        assert_eq!(receiver.update_hashes().len(), 3);
    }

    #[tokio::test]
    async fn test_stale_candidate_is_rejected() {
        let (_params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        let view = stream.get_view().await.unwrap();
        let candidate = view
            .propose_next_miniblock(&EngineConfig::default(), &signer, false, 2_000)
            .unwrap();
        stream
            .save_miniblock_candidate(&candidate.to_wire())
            .await
            .unwrap();
        stream
            .promote_candidate(candidate.hash, candidate.num)
            .await
            .unwrap();

        // Now the same candidate is too old to save again.
        let err = stream
            .save_miniblock_candidate(&candidate.to_wire())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::MiniblockTooOld { .. }));
    }

    #[tokio::test]
    async fn test_sub_rejects_foreign_and_negative_cookies() {
        let (params, stream, _signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let receiver = CollectingReceiver::new();

        let mut cookie = view.sync_cookie(params.local_addr());
        cookie.node_address = [9u8; 20];
        assert!(matches!(
            stream.sub(&cookie, receiver.clone()).await,
            Err(StreamError::BadSyncCookie(_))
        ));

        let mut cookie = view.sync_cookie(params.local_addr());
        cookie.minipool_slot = -1;
        assert!(matches!(
            stream.sub(&cookie, receiver.clone()).await,
            Err(StreamError::BadSyncCookie(_))
        ));

        let mut cookie = view.sync_cookie(params.local_addr());
        cookie.stream_id = channel_id(9);
        assert!(matches!(
            stream.sub(&cookie, receiver).await,
            Err(StreamError::BadSyncCookie(_))
        ));
    }

    #[tokio::test]
    async fn test_sub_catch_up_from_minipool_slot() {
        let (params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let tip = view.last_block().hash;
        let cookie_at_zero = view.sync_cookie(params.local_addr());

        let e1 = message_event(&signer, tip, 1);
        let e2 = message_event(&signer, tip, 2);
        stream.add_event(&e1).await.unwrap();
        stream.add_event(&e2).await.unwrap();

        let receiver = CollectingReceiver::new();
        stream.sub(&cookie_at_zero, receiver.clone()).await.unwrap();

        let updates = receiver.updates.lock().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].events.iter().map(|e| e.hash).collect::<Vec<_>>(),
            vec![e1.hash, e2.hash]
        );
        assert_eq!(updates[0].next_sync_cookie.minipool_slot, 2);
        assert!(!updates[0].sync_reset);
    }

    #[tokio::test]
    async fn test_sub_up_to_date_still_gets_empty_update() {
        let (params, stream, _signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let receiver = CollectingReceiver::new();
        stream
            .sub(&view.sync_cookie(params.local_addr()), receiver.clone())
            .await
            .unwrap();

        let updates = receiver.updates.lock().clone();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].events.is_empty());
    }

    #[tokio::test]
    async fn test_sub_with_unresolvable_cookie_sends_reset() {
        let (params, stream, _signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();

        let mut cookie = view.sync_cookie(params.local_addr());
        cookie.minipool_gen = 50;
        cookie.minipool_slot = 0;

        let receiver = CollectingReceiver::new();
        stream.sub(&cookie, receiver.clone()).await.unwrap();

        let updates = receiver.updates.lock().clone();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].sync_reset);
        assert_eq!(updates[0].miniblocks.len(), 1);
    }

    #[tokio::test]
    async fn test_force_flush_signals_receivers_once() {
        let (params, stream, _signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let receiver = CollectingReceiver::new();
        stream
            .sub(&view.sync_cookie(params.local_addr()), receiver.clone())
            .await
            .unwrap();

        stream.force_flush().await;
        assert_eq!(receiver.errors.lock().len(), 1);
        assert_eq!(stream.receiver_count().await, 0);

        // A second flush has nobody left to signal.
        stream.force_flush().await;
        assert_eq!(receiver.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_write_force_flushes() {
        let (params, storage, registry) = test_params();
        let signer = TestSigner::new(1);
        let id = channel_id(2);
        bootstrap_stream(&registry, &signer, id, true).await;
        let stream = Stream::new(params.clone(), id);

        let view = stream.get_view().await.unwrap();
        let receiver = CollectingReceiver::new();
        stream
            .sub(&view.sync_cookie(params.local_addr()), receiver.clone())
            .await
            .unwrap();

        storage.inject_ambiguous_failure("write_event");
        let event = message_event(&signer, view.last_block().hash, 1);
        let err = stream.add_event(&event).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Storage(StorageError::Ambiguous { .. })
        ));

        // Receivers were told to resubscribe and the view is unloaded.
        assert_eq!(receiver.errors.lock().len(), 1);
        assert!(stream.try_cleanup(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_cleanup_respects_ttl_minipool_and_receivers() {
        let (params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();

        // Fresh stream: not idle long enough.
        assert!(!stream.try_cleanup(Duration::from_secs(3600)).await);

        // Idle but with a receiver registered: refused.
        let receiver = CollectingReceiver::new();
        stream
            .sub(&view.sync_cookie(params.local_addr()), receiver.clone())
            .await
            .unwrap();
        assert!(!stream.try_cleanup(Duration::ZERO).await);
        stream.unsub(receiver.receiver_id()).await;

        // Idle and empty: unloaded.
        assert!(stream.try_cleanup(Duration::ZERO).await);

        // Reload, add an event: never unloaded with a non-empty
        // minipool.
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 7);
        stream.add_event(&event).await.unwrap();
        assert!(!stream.try_cleanup(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_get_miniblocks_terminus() {
        let (_params, stream, signer) = loaded_stream().await;
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();
        let view = stream.get_view().await.unwrap();
        let candidate = view
            .propose_next_miniblock(&EngineConfig::default(), &signer, false, 2_000)
            .unwrap();
        stream
            .save_miniblock_candidate(&candidate.to_wire())
            .await
            .unwrap();
        stream
            .promote_candidate(candidate.hash, candidate.num)
            .await
            .unwrap();

        let (blocks, terminus) = stream.get_miniblocks(0, 10).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(terminus);

        let (blocks, terminus) = stream.get_miniblocks(1, 2).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(!terminus);
    }
}
