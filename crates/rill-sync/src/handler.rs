//! Process-wide registry of sync sessions, keyed by sync id.
//!
//! The node service dispatches every `syncId`-bearing call through this
//! handler.

use crate::ports::NodeForwarder;
use crate::session::{SyncConfig, SyncSession};
use dashmap::DashMap;
use rill_events::StreamCache;
use shared_types::{StreamId, SyncCookie, SyncError, SyncStreamsResponse};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Owns every live [`SyncSession`] of this node.
pub struct SyncHandler {
    cache: Arc<StreamCache>,
    forwarder: Arc<dyn NodeForwarder>,
    config: SyncConfig,
    sessions: DashMap<String, Arc<SyncSession>>,
}

impl SyncHandler {
    pub fn new(
        cache: Arc<StreamCache>,
        forwarder: Arc<dyn NodeForwarder>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            forwarder,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Open a session over `initial_cookies`. Returns the allocated
    /// sync id and the server-stream receiver.
    pub async fn sync_streams(
        &self,
        initial_cookies: Vec<SyncCookie>,
    ) -> Result<(String, mpsc::Receiver<SyncStreamsResponse>), SyncError> {
        let (session, rx) = SyncSession::start(
            self.cache.clone(),
            self.forwarder.clone(),
            &self.config,
            initial_cookies,
        )
        .await?;
        let sync_id = session.sync_id().to_string();
        self.sessions.insert(sync_id.clone(), session);
        Ok((sync_id, rx))
    }

    /// Add one stream to a live session.
    pub async fn add_stream_to_sync(
        &self,
        sync_id: &str,
        cookie: SyncCookie,
    ) -> Result<(), SyncError> {
        self.session(sync_id)?.add_stream(cookie).await
    }

    /// Remove one stream from a live session.
    pub async fn remove_stream_from_sync(
        &self,
        sync_id: &str,
        stream_id: StreamId,
    ) -> Result<(), SyncError> {
        self.session(sync_id)?.remove_stream(stream_id).await
    }

    /// Cancel a session and forget it.
    pub async fn cancel_sync(&self, sync_id: &str) -> Result<(), SyncError> {
        let (_, session) = self
            .sessions
            .remove(sync_id)
            .ok_or_else(|| SyncError::UnknownSyncId(sync_id.to_string()))?;
        session.cancel().await;
        Ok(())
    }

    /// Enqueue a pong on a live session.
    pub fn ping_sync(&self, sync_id: &str, nonce: &str) -> Result<(), SyncError> {
        self.session(sync_id)?.ping(nonce)
    }

    /// Debug hook: force the down path for one stream of one session.
    pub fn debug_drop_stream(&self, sync_id: &str, stream_id: StreamId) -> Result<(), SyncError> {
        self.session(sync_id)?.drop_stream(stream_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session(&self, sync_id: &str) -> Result<Arc<SyncSession>, SyncError> {
        self.sessions
            .get(sync_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SyncError::UnknownSyncId(sync_id.to_string()))
    }
}
