//! One client's multi-stream subscription.
//!
//! The session owns a bounded outbound queue. The producer side is the
//! engine's fanout path, which runs under stream write locks and must
//! never block: enqueueing uses `try_send`, and a full queue cancels
//! the whole session (the slow-client policy). `SYNC_DOWN` is emitted
//! at most once consecutively per stream and the sub is dropped; the
//! client re-adds the stream to resume.

use crate::ports::NodeForwarder;
use rill_events::ports::{next_receiver_id, SyncReceiver};
use rill_events::StreamCache;
use shared_types::{
    Address, StreamAndCookie, StreamError, StreamId, SyncCookie, SyncError, SyncStreamsResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sync-session tunables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Capacity of the outbound queue; overflowing it cancels the
    /// session.
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
        }
    }
}

/// A client-scoped multiplex of per-stream subscriptions.
pub struct SyncSession {
    sync_id: String,
    local_addr: Address,
    cache: Arc<StreamCache>,
    forwarder: Arc<dyn NodeForwarder>,
    tx: mpsc::Sender<SyncStreamsResponse>,
    subs: dashmap::DashMap<StreamId, Arc<SessionReceiver>>,
    cancelled: AtomicBool,
    teardown_done: AtomicBool,
    self_ref: Weak<SyncSession>,
}

impl SyncSession {
    /// Open a session: allocate a sync id, emit `SYNC_NEW`, then
    /// subscribe every initial cookie. A failing initial sub tears the
    /// session down and fails the call.
    pub async fn start(
        cache: Arc<StreamCache>,
        forwarder: Arc<dyn NodeForwarder>,
        config: &SyncConfig,
        initial_cookies: Vec<SyncCookie>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SyncStreamsResponse>), SyncError> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let local_addr = cache.params().local_addr();
        let session = Arc::new_cyclic(|self_ref| Self {
            sync_id: Uuid::new_v4().simple().to_string(),
            local_addr,
            cache,
            forwarder,
            tx,
            subs: dashmap::DashMap::new(),
            cancelled: AtomicBool::new(false),
            teardown_done: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        session.enqueue(SyncStreamsResponse::new_sync(session.sync_id.clone()));

        for cookie in initial_cookies {
            if let Err(err) = session.add_stream(cookie).await {
                session.cancel().await;
                return Err(err);
            }
        }

        info!(sync_id = %session.sync_id, streams = session.subs.len(), "sync session opened");
        Ok((session, rx))
    }

    /// The server-allocated session id.
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    /// True once the session is cancelled (explicitly or by the
    /// slow-client policy).
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Subscribe one more stream, local or remote depending on the
    /// cookie's node address.
    pub async fn add_stream(self: &Arc<Self>, cookie: SyncCookie) -> Result<(), SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::SessionCancelled);
        }
        let stream_id = cookie.stream_id;
        if self.subs.contains_key(&stream_id) {
            return Err(SyncError::Stream(StreamError::InvalidRequest(format!(
                "stream {stream_id} is already in this sync"
            ))));
        }

        let receiver = Arc::new(SessionReceiver {
            id: next_receiver_id(),
            stream_id,
            node_address: cookie.node_address,
            session: Arc::downgrade(self),
            down_sent: AtomicBool::new(false),
        });

        if cookie.node_address == self.local_addr {
            let stream = self.cache.get_stream(stream_id);
            stream.sub(&cookie, receiver.clone()).await?;
        } else {
            self.forwarder
                .sub(cookie.node_address, &cookie, receiver.clone())
                .await?;
        }

        self.subs.insert(stream_id, receiver);
        debug!(sync_id = %self.sync_id, stream_id = %stream_id, "stream added to sync");
        Ok(())
    }

    /// Remove a stream from the session. Unknown streams are ignored.
    pub async fn remove_stream(&self, stream_id: StreamId) -> Result<(), SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::SessionCancelled);
        }
        if let Some((_, receiver)) = self.subs.remove(&stream_id) {
            self.unsub_receiver(&receiver).await;
            debug!(sync_id = %self.sync_id, stream_id = %stream_id, "stream removed from sync");
        }
        Ok(())
    }

    /// Enqueue a pong echoing `nonce`. Fails once the session is
    /// cancelled, including when this very enqueue overflows the queue.
    pub fn ping(&self, nonce: &str) -> Result<(), SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::SessionCancelled);
        }
        self.enqueue(SyncStreamsResponse::pong(
            self.sync_id.clone(),
            nonce.to_string(),
        ));
        if self.is_cancelled() {
            return Err(SyncError::SessionCancelled);
        }
        Ok(())
    }

    /// Terminal teardown: every sub is dropped and `SYNC_CLOSE` is
    /// emitted while the queue is still writable. Idempotent.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if self.teardown_done.swap(true, Ordering::AcqRel) {
            return;
        }
        let receivers: Vec<Arc<SessionReceiver>> = self
            .subs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.subs.clear();
        for receiver in receivers {
            self.unsub_receiver(&receiver).await;
        }
        let _ = self
            .tx
            .try_send(SyncStreamsResponse::close(self.sync_id.clone()));
        info!(sync_id = %self.sync_id, "sync session closed");
    }

    /// Debug hook: force the down path for one stream, as if its node
    /// had been lost.
    pub fn drop_stream(&self, stream_id: StreamId) -> Result<(), SyncError> {
        let receiver = self
            .subs
            .get(&stream_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                SyncError::Stream(StreamError::InvalidRequest(format!(
                    "stream {stream_id} is not in this sync"
                )))
            })?;
        receiver.mark_down();
        Ok(())
    }

    /// Streams currently subscribed.
    pub fn stream_count(&self) -> usize {
        self.subs.len()
    }

    async fn unsub_receiver(&self, receiver: &SessionReceiver) {
        if receiver.node_address == self.local_addr {
            self.cache
                .get_stream(receiver.stream_id)
                .unsub(receiver.id)
                .await;
        } else {
            self.forwarder
                .unsub(receiver.node_address, receiver.stream_id, receiver.id)
                .await;
        }
    }

    /// Non-blocking enqueue. Overflow means the client cannot keep up:
    /// the session cancels itself.
    fn enqueue(&self, response: SyncStreamsResponse) {
        if self.is_cancelled() && response.op != shared_types::SyncOp::Close {
            return;
        }
        match self.tx.try_send(response) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(sync_id = %self.sync_id, "outbound queue full, cancelling slow sync session");
                self.cancel_detached();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Cancel from a non-async context (the fanout path). The flag
    /// flips immediately so further operations fail; sub teardown runs
    /// on its own task.
    fn cancel_detached(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(session) = self.self_ref.upgrade() {
            tokio::spawn(async move { session.cancel().await });
        }
    }

    fn handle_update(&self, update: StreamAndCookie) {
        self.enqueue(SyncStreamsResponse::update(self.sync_id.clone(), update));
    }

    fn handle_down(&self, stream_id: StreamId) {
        self.enqueue(SyncStreamsResponse::down(self.sync_id.clone(), stream_id));
    }
}

/// Per-stream receiver registered with the engine (or a remote node) on
/// behalf of one session.
pub(crate) struct SessionReceiver {
    id: u64,
    stream_id: StreamId,
    node_address: Address,
    session: Weak<SyncSession>,
    /// Set while a `SYNC_DOWN` for this stream has not been followed by
    /// an update; enforces the at-most-once-consecutively rule.
    down_sent: AtomicBool,
}

impl SessionReceiver {
    /// Emit `SYNC_DOWN` once and drop this sub from the session. The
    /// client re-adds the stream with its cookie to resume.
    fn mark_down(&self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if session.is_cancelled() {
            return;
        }
        if !self.down_sent.swap(true, Ordering::AcqRel) {
            session.handle_down(self.stream_id);
        }
        let stream_id = self.stream_id;
        let id = self.id;
        let node_address = self.node_address;
        tokio::spawn(async move {
            if let Some((_, receiver)) = session.subs.remove(&stream_id) {
                // Only tear down our own registration; a re-added sub
                // under the same stream id belongs to a new receiver.
                if receiver.id == id {
                    if node_address == session.local_addr {
                        session.cache.get_stream(stream_id).unsub(id).await;
                    } else {
                        session.forwarder.unsub(node_address, stream_id, id).await;
                    }
                } else {
                    session.subs.insert(stream_id, receiver);
                }
            }
        });
    }
}

impl SyncReceiver for SessionReceiver {
    fn receiver_id(&self) -> u64 {
        self.id
    }

    fn on_update(&self, update: StreamAndCookie) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        self.down_sent.store(false, Ordering::Release);
        session.handle_update(update);
    }

    fn on_sync_error(&self, err: StreamError) {
        debug!(stream_id = %self.stream_id, error = %err, "sub failed, signalling down");
        self.mark_down();
    }

    fn on_stream_down(&self, stream_id: StreamId) {
        debug!(stream_id = %stream_id, "stream down");
        self.mark_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::UnreachableForwarder;
    use rill_events::test_utils::{
        bootstrap_stream, channel_id, message_event, test_params, TestSigner,
    };
    use shared_types::SyncOp;

    async fn session_fixture(
        queue_capacity: usize,
    ) -> (
        Arc<StreamCache>,
        TestSigner,
        SyncConfig,
        Arc<dyn NodeForwarder>,
    ) {
        let (params, _storage, registry) = test_params();
        let signer = TestSigner::new(1);
        bootstrap_stream(&registry, &signer, channel_id(1), true).await;
        bootstrap_stream(&registry, &signer, channel_id(2), true).await;
        let cache = Arc::new(StreamCache::new(params));
        (
            cache,
            signer,
            SyncConfig { queue_capacity },
            Arc::new(UnreachableForwarder),
        )
    }

    async fn cookie_for(cache: &Arc<StreamCache>, id: StreamId) -> SyncCookie {
        let view = cache.get_stream(id).get_view().await.unwrap();
        view.sync_cookie(cache.params().local_addr())
    }

    #[tokio::test]
    async fn test_session_emits_new_then_initial_updates() {
        let (cache, _signer, config, forwarder) = session_fixture(64).await;
        let cookie = cookie_for(&cache, channel_id(1)).await;

        let (session, mut rx) =
            SyncSession::start(cache.clone(), forwarder, &config, vec![cookie])
                .await
                .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.op, SyncOp::New);
        assert_eq!(first.sync_id, session.sync_id());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.op, SyncOp::Update);
        assert!(second.stream.unwrap().events.is_empty());
    }

    #[tokio::test]
    async fn test_updates_flow_after_subscription() {
        let (cache, signer, config, forwarder) = session_fixture(64).await;
        let id = channel_id(1);
        let cookie = cookie_for(&cache, id).await;

        let (_session, mut rx) =
            SyncSession::start(cache.clone(), forwarder, &config, vec![cookie])
                .await
                .unwrap();
        rx.recv().await.unwrap(); // NEW
        rx.recv().await.unwrap(); // initial UPDATE

        let stream = cache.get_stream(id);
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.op, SyncOp::Update);
        let stream_update = update.stream.unwrap();
        assert_eq!(stream_update.events[0].hash, event.hash);
    }

    #[tokio::test]
    async fn test_ping_pong_ordering() {
        let (cache, _signer, config, forwarder) = session_fixture(64).await;
        let (session, mut rx) = SyncSession::start(cache, forwarder, &config, vec![])
            .await
            .unwrap();
        rx.recv().await.unwrap(); // NEW

        for nonce in ["p1", "p2", "p3"] {
            session.ping(nonce).unwrap();
        }
        for nonce in ["p1", "p2", "p3"] {
            let pong = rx.recv().await.unwrap();
            assert_eq!(pong.op, SyncOp::Pong);
            assert_eq!(pong.pong_nonce.as_deref(), Some(nonce));
        }
    }

    #[tokio::test]
    async fn test_down_emitted_once_and_sub_dropped() {
        let (cache, _signer, config, forwarder) = session_fixture(64).await;
        let id = channel_id(1);
        let cookie = cookie_for(&cache, id).await;

        let (session, mut rx) =
            SyncSession::start(cache.clone(), forwarder, &config, vec![cookie.clone()])
                .await
                .unwrap();
        rx.recv().await.unwrap(); // NEW
        rx.recv().await.unwrap(); // initial UPDATE

        session.drop_stream(id).unwrap();
        // A second drop must not produce a second consecutive DOWN.
        let _ = session.drop_stream(id);

        let down = rx.recv().await.unwrap();
        assert_eq!(down.op, SyncOp::Down);
        assert_eq!(down.stream_id, Some(id));

        // Give the detached unsub a chance to run, then resubscribe.
        tokio::task::yield_now().await;
        session.add_stream(cookie).await.unwrap();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.op, SyncOp::Update);
    }

    #[tokio::test]
    async fn test_cancel_emits_close_and_blocks_ping() {
        let (cache, _signer, config, forwarder) = session_fixture(64).await;
        let id = channel_id(1);
        let cookie = cookie_for(&cache, id).await;

        let (session, mut rx) =
            SyncSession::start(cache.clone(), forwarder, &config, vec![cookie])
                .await
                .unwrap();
        rx.recv().await.unwrap(); // NEW
        rx.recv().await.unwrap(); // initial UPDATE

        session.cancel().await;
        let close = rx.recv().await.unwrap();
        assert_eq!(close.op, SyncOp::Close);

        assert!(matches!(
            session.ping("late"),
            Err(SyncError::SessionCancelled)
        ));
        assert_eq!(session.stream_count(), 0);
        assert_eq!(cache.get_stream(id).receiver_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_client_is_cancelled() {
        let (cache, signer, config, forwarder) = session_fixture(2).await;
        let id = channel_id(1);
        let cookie = cookie_for(&cache, id).await;

        let (session, _rx) =
            SyncSession::start(cache.clone(), forwarder, &config, vec![cookie])
                .await
                .unwrap();
        // Queue: NEW + initial UPDATE fill capacity 2. The next fanout
        // overflows and cancels the session.
        let stream = cache.get_stream(id);
        let view = stream.get_view().await.unwrap();
        let event = message_event(&signer, view.last_block().hash, 1);
        stream.add_event(&event).await.unwrap();

        tokio::task::yield_now().await;
        assert!(session.is_cancelled());
        assert!(matches!(
            session.ping("p"),
            Err(SyncError::SessionCancelled)
        ));
    }

    #[tokio::test]
    async fn test_remote_cookie_fails_via_forwarder() {
        let (cache, _signer, config, forwarder) = session_fixture(64).await;
        let mut cookie = cookie_for(&cache, channel_id(1)).await;
        cookie.node_address = [9u8; 20];

        let result = SyncSession::start(cache, forwarder, &config, vec![cookie]).await;
        assert!(matches!(
            result,
            Err(SyncError::Stream(StreamError::Transient(_)))
        ));
    }
}
