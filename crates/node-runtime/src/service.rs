//! The node's service surface.
//!
//! Transport-independent semantics of every operation the node exposes;
//! the HTTP adapter is a thin mapping on top. Calls for streams this
//! node does not replicate walk the stream's replica set through the
//! forwarding port, skipping unreachable peers.

use rill_events::domain::{MiniblockInfo, ParsedEvent};
use rill_events::{MiniblockProducer, MiniblockRef, StreamCache};
use rill_sync::{NodeForwarder, SyncHandler};
use shared_types::{
    short_hex, Envelope, Hash, Miniblock, RegistryError, StreamAndCookie, StreamError, StreamId,
    StreamPayload, StreamRecord, SyncCookie, SyncError, SyncStreamsResponse, ZERO_HASH,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The node: engine cache, sync sessions, producer, and forwarding.
pub struct StreamService {
    cache: Arc<StreamCache>,
    sync: Arc<SyncHandler>,
    producer: Arc<MiniblockProducer>,
    forwarder: Arc<dyn NodeForwarder>,
}

impl StreamService {
    pub fn new(
        cache: Arc<StreamCache>,
        sync: Arc<SyncHandler>,
        producer: Arc<MiniblockProducer>,
        forwarder: Arc<dyn NodeForwarder>,
    ) -> Self {
        Self {
            cache,
            sync,
            producer,
            forwarder,
        }
    }

    /// This node's address.
    pub fn local_addr(&self) -> shared_types::Address {
        self.cache.params().local_addr()
    }

    /// The engine cache, for maintenance tasks.
    pub fn cache(&self) -> &Arc<StreamCache> {
        &self.cache
    }

    /// Create a stream from its inception events.
    ///
    /// The first event must be an inception whose stream id matches the
    /// request; every event must be signed, anchored to the zero hash,
    /// and is sealed into the genesis miniblock. The registry picks the
    /// replica set; when this node is not in it, the call is served by
    /// fetching the stream back from a replica.
    pub async fn create_stream(
        &self,
        events: Vec<Envelope>,
        stream_id: StreamId,
    ) -> Result<StreamAndCookie, StreamError> {
        if events.is_empty() {
            return Err(StreamError::InvalidRequest(
                "create_stream requires at least the inception event".into(),
            ));
        }

        let params = self.cache.params();
        let mut parsed = Vec::with_capacity(events.len());
        for envelope in &events {
            let event = ParsedEvent::parse(envelope)?;
            params.verifier.verify(&event)?;
            if event.prev_miniblock_hash() != ZERO_HASH {
                return Err(StreamError::InvalidRequest(
                    "genesis events must anchor to the zero hash".into(),
                ));
            }
            parsed.push(event);
        }

        match parsed[0].payload() {
            StreamPayload::Inception(inception) if inception.stream_id == stream_id => {}
            StreamPayload::Inception(inception) => {
                return Err(StreamError::InvalidRequest(format!(
                    "inception is for stream {}, request names {}",
                    inception.stream_id, stream_id
                )));
            }
            _ => {
                return Err(StreamError::InvalidRequest(
                    "first event of a new stream must be an inception".into(),
                ));
            }
        }

        let genesis = MiniblockInfo::make_genesis(params.signer.as_ref(), &parsed, now_ms())?;
        let record = params
            .registry
            .allocate_stream(stream_id, genesis.hash, genesis.to_bytes()?)
            .await?;
        info!(stream_id = %stream_id, nodes = record.nodes.len(), "stream created");

        if record.is_local(self.local_addr()) {
            let view = self.cache.get_stream(stream_id).get_view().await?;
            Ok(view.stream_and_cookie_reset(self.local_addr()))
        } else {
            self.forward_get_stream(&record).await
        }
    }

    /// Current state of a stream. `None` iff `optional` and the stream
    /// was never allocated.
    pub async fn get_stream(
        &self,
        stream_id: StreamId,
        optional: bool,
    ) -> Result<Option<StreamAndCookie>, StreamError> {
        let record = match self.cache.params().registry.get_stream(stream_id).await {
            Ok(record) => record,
            Err(RegistryError::NotFound) if optional => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if record.is_local(self.local_addr()) {
            let view = self.cache.get_stream(stream_id).get_view().await?;
            Ok(Some(view.stream_and_cookie_reset(self.local_addr())))
        } else {
            self.forward_get_stream(&record).await.map(Some)
        }
    }

    /// Historical miniblocks `[from, to)` plus the terminus flag.
    pub async fn get_miniblocks(
        &self,
        stream_id: StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> Result<(Vec<Miniblock>, bool), StreamError> {
        self.cache
            .get_stream(stream_id)
            .get_miniblocks(from_inclusive, to_exclusive)
            .await
    }

    /// Hash and number of the stream's last sealed miniblock.
    pub async fn get_last_miniblock_hash(
        &self,
        stream_id: StreamId,
    ) -> Result<(Hash, u64), StreamError> {
        let view = self.cache.get_stream(stream_id).get_view().await?;
        let last = view.last_block();
        Ok((last.hash, last.num))
    }

    /// Admit an event. With `optional`, admission failures come back in
    /// the response body instead of failing the call.
    pub async fn add_event(
        &self,
        stream_id: StreamId,
        envelope: &Envelope,
        optional: bool,
    ) -> Result<Option<String>, StreamError> {
        let result = self.add_event_inner(stream_id, envelope).await;
        match result {
            Ok(()) => Ok(None),
            Err(err) if optional => Ok(Some(err.to_string())),
            Err(err) => Err(err),
        }
    }

    async fn add_event_inner(
        &self,
        stream_id: StreamId,
        envelope: &Envelope,
    ) -> Result<(), StreamError> {
        let record = self.cache.params().registry.get_stream(stream_id).await?;
        if record.is_local(self.local_addr()) {
            let event = ParsedEvent::parse(envelope)?;
            return self.cache.get_stream(stream_id).add_event(&event).await;
        }

        let mut last_err = StreamError::Transient("stream has no replicas".into());
        for node in replicas_excluding(&record, self.local_addr()) {
            match self.forwarder.add_event(node, stream_id, envelope).await {
                Ok(()) => return Ok(()),
                Err(StreamError::Transient(reason)) => {
                    warn!(stream_id = %stream_id, node = %short_hex(&node), reason, "replica unreachable, trying next");
                    last_err = StreamError::Transient(reason);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    /// Open a sync session over `initial_cookies`.
    pub async fn sync_streams(
        &self,
        initial_cookies: Vec<SyncCookie>,
    ) -> Result<(String, mpsc::Receiver<SyncStreamsResponse>), SyncError> {
        self.sync.sync_streams(initial_cookies).await
    }

    /// Add a stream to a live sync session.
    pub async fn add_stream_to_sync(
        &self,
        sync_id: &str,
        cookie: SyncCookie,
    ) -> Result<(), SyncError> {
        self.sync.add_stream_to_sync(sync_id, cookie).await
    }

    /// Remove a stream from a live sync session.
    pub async fn remove_stream_from_sync(
        &self,
        sync_id: &str,
        stream_id: StreamId,
    ) -> Result<(), SyncError> {
        self.sync.remove_stream_from_sync(sync_id, stream_id).await
    }

    /// Cancel a sync session.
    pub async fn cancel_sync(&self, sync_id: &str) -> Result<(), SyncError> {
        self.sync.cancel_sync(sync_id).await
    }

    /// Enqueue a pong on a sync session.
    pub fn ping_sync(&self, sync_id: &str, nonce: &str) -> Result<(), SyncError> {
        self.sync.ping_sync(sync_id, nonce)
    }

    /// Debug/info surface. With no tokens it echoes liveness; known
    /// token forms:
    ///
    /// - `make_miniblock <streamId> <forceSnapshot> [lastKnownNum]`
    /// - `drop_stream <syncId> <streamId>`
    pub async fn info(&self, debug: Vec<String>) -> Result<String, StreamError> {
        let Some(token) = debug.first() else {
            return Ok("rill node is healthy".to_string());
        };

        match token.as_str() {
            "make_miniblock" => {
                let stream_id = parse_stream_id(debug.get(1))?;
                let force_snapshot = debug
                    .get(2)
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false);
                let last_known_num = match debug.get(3) {
                    Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                        StreamError::InvalidRequest(format!("bad lastKnownNum: {raw}"))
                    })?),
                    None => None,
                };

                let made = self
                    .producer
                    .make_miniblock(stream_id, force_snapshot, last_known_num)
                    .await?;
                Ok(match made {
                    Some(MiniblockRef { hash, num }) => {
                        format!("made miniblock {num} {}", short_hex(&hash))
                    }
                    None => "no miniblock made".to_string(),
                })
            }
            "drop_stream" => {
                let sync_id = debug.get(1).ok_or_else(|| {
                    StreamError::InvalidRequest("drop_stream requires a sync id".into())
                })?;
                let stream_id = parse_stream_id(debug.get(2))?;
                self.sync
                    .debug_drop_stream(sync_id, stream_id)
                    .map_err(|e| StreamError::InvalidRequest(e.to_string()))?;
                Ok(format!("dropped stream {stream_id} from sync {sync_id}"))
            }
            other => Err(StreamError::InvalidRequest(format!(
                "unknown debug token: {other}"
            ))),
        }
    }

    async fn forward_get_stream(
        &self,
        record: &StreamRecord,
    ) -> Result<StreamAndCookie, StreamError> {
        let mut last_err = StreamError::Transient("stream has no replicas".into());
        for node in replicas_excluding(record, self.local_addr()) {
            match self.forwarder.get_stream(node, record.stream_id).await {
                Ok(stream) => return Ok(stream),
                Err(StreamError::Transient(reason)) => {
                    warn!(
                        stream_id = %record.stream_id,
                        node = %short_hex(&node),
                        reason,
                        "replica unreachable, trying next"
                    );
                    last_err = StreamError::Transient(reason);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }
}

fn replicas_excluding(
    record: &StreamRecord,
    local: shared_types::Address,
) -> impl Iterator<Item = shared_types::Address> + '_ {
    record.nodes.iter().copied().filter(move |n| *n != local)
}

fn parse_stream_id(raw: Option<&String>) -> Result<StreamId, StreamError> {
    let raw = raw.ok_or_else(|| StreamError::InvalidRequest("missing stream id".into()))?;
    StreamId::from_hex(raw)
        .ok_or_else(|| StreamError::InvalidRequest(format!("bad stream id: {raw}")))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
