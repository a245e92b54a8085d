//! # Sync Cursors and Update Messages
//!
//! The resumable cursor (`SyncCookie`), the per-stream update unit
//! (`StreamAndCookie`), and the session-level response envelope
//! (`SyncStreamsResponse`) tagged by `SyncOp`.

use crate::entities::{Address, Hash, StreamId};
use crate::envelope::{Envelope, Miniblock};
use serde::{Deserialize, Serialize};

/// Opaque resumable cursor: "the next event this client expects is slot
/// `minipool_slot` of generation `minipool_gen` on this node".
///
/// Generation and slot are signed on the wire so a malformed (negative)
/// cursor is representable and can be rejected rather than silently
/// wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCookie {
    /// The node this cookie was minted by.
    pub node_address: Address,
    /// The stream this cookie points into.
    pub stream_id: StreamId,
    /// Minipool generation (= next miniblock number) at mint time.
    pub minipool_gen: i64,
    /// Next expected minipool slot.
    pub minipool_slot: i64,
    /// Hash of the last sealed miniblock at mint time.
    pub prev_miniblock_hash: Hash,
}

/// One stream's incremental update: new envelopes plus the cookie to
/// resume from. On a sync reset it additionally carries the miniblocks
/// from the last snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAndCookie {
    /// New envelopes in stream order (possibly empty, so the client
    /// knows it is up to date).
    pub events: Vec<Envelope>,
    /// Cursor to resume from after consuming `events`.
    pub next_sync_cookie: SyncCookie,
    /// Populated only when `sync_reset` is set: all miniblocks from the
    /// last snapshot.
    pub miniblocks: Vec<Miniblock>,
    /// True when the client's cookie could not be resolved and this
    /// update restates everything since the last snapshot.
    pub sync_reset: bool,
}

/// Tag for messages emitted on a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOp {
    /// First message of a session; carries the sync id.
    New,
    /// Incremental update for one stream.
    Update,
    /// Updates for a stream are interrupted; at most once consecutively
    /// per stream.
    Down,
    /// Echo of a ping nonce.
    Pong,
    /// Terminal message; the session queue is closed afterwards.
    Close,
}

/// One message on the server stream of a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStreamsResponse {
    /// Session this message belongs to.
    pub sync_id: String,
    /// Message tag; decides which optional fields are set.
    pub op: SyncOp,
    /// Set on `Update`.
    pub stream: Option<StreamAndCookie>,
    /// Set on `Down`.
    pub stream_id: Option<StreamId>,
    /// Set on `Pong`.
    pub pong_nonce: Option<String>,
}

impl SyncStreamsResponse {
    /// The session-opening message.
    pub fn new_sync(sync_id: String) -> Self {
        Self {
            sync_id,
            op: SyncOp::New,
            stream: None,
            stream_id: None,
            pong_nonce: None,
        }
    }

    /// An incremental update for one stream.
    pub fn update(sync_id: String, stream: StreamAndCookie) -> Self {
        Self {
            sync_id,
            op: SyncOp::Update,
            stream: Some(stream),
            stream_id: None,
            pong_nonce: None,
        }
    }

    /// A down notice for one stream.
    pub fn down(sync_id: String, stream_id: StreamId) -> Self {
        Self {
            sync_id,
            op: SyncOp::Down,
            stream: None,
            stream_id: Some(stream_id),
            pong_nonce: None,
        }
    }

    /// A pong echoing `nonce`.
    pub fn pong(sync_id: String, nonce: String) -> Self {
        Self {
            sync_id,
            op: SyncOp::Pong,
            stream: None,
            stream_id: None,
            pong_nonce: Some(nonce),
        }
    }

    /// The terminal close message.
    pub fn close(sync_id: String) -> Self {
        Self {
            sync_id,
            op: SyncOp::Close,
            stream: None,
            stream_id: None,
            pong_nonce: None,
        }
    }
}
