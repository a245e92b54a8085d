//! # Error Types
//!
//! Error enums shared across subsystems, one per concern.

use crate::entities::{short_hex, Hash, StreamId};
use thiserror::Error;

/// Errors surfaced by the durable stream storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// No record for the requested stream.
    #[error("stream record not found")]
    NotFound,

    /// Stream storage already initialized.
    #[error("stream storage already exists")]
    AlreadyExists,

    /// The operation may or may not have committed; the caller must
    /// assume nothing about the stored state.
    #[error("ambiguous storage failure during {op}")]
    Ambiguous { op: String },

    /// Stored bytes failed validation on read.
    #[error("corrupt stream data: {reason}")]
    Corrupt { reason: String },

    /// Underlying I/O failure with known (not-committed) outcome.
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Errors surfaced by the chain registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream was never allocated.
    #[error("stream not registered")]
    NotFound,

    /// Allocation for an id that already has a record.
    #[error("stream already allocated")]
    AlreadyAllocated,

    /// Registry endpoint unreachable or mid-reorg.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the per-stream engine and the node service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The cookie is malformed or addressed to the wrong node/stream.
    #[error("bad sync cookie: {0}")]
    BadSyncCookie(String),

    /// Event anchored to a miniblock that is not the current tip.
    #[error("bad prev_miniblock_hash: expected {}, got {}", short_hex(.expected), short_hex(.got))]
    BadPrevMiniblockHash { expected: Hash, got: Hash },

    /// Event hash already present in the view.
    #[error("duplicate event {}", short_hex(.0))]
    DuplicateEvent(Hash),

    /// Candidate at or below the current tip.
    #[error("miniblock candidate too old: candidate num {num}, last block num {last}")]
    MiniblockTooOld { num: u64, last: u64 },

    /// Candidate skips ahead of the current generation.
    #[error("non-consecutive miniblock: num {num}, expected {expected}")]
    NonConsecutiveMiniblock { num: u64, expected: u64 },

    /// Candidate fails structural validation against the view.
    #[error("invalid miniblock: {0}")]
    InvalidMiniblock(String),

    /// Envelope fails parsing, hash, or signature validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Request is malformed at the service boundary.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Load attempted on a stream this node does not replicate.
    #[error("stream {0} is not local")]
    NotLocal(StreamId),

    /// Registry record is past genesis but local storage has nothing.
    #[error("stream {0} is already past genesis")]
    PastGenesis(StreamId),

    /// The stream view was force-flushed; subscribers must resubscribe.
    #[error("stream unloaded")]
    Unloaded,

    /// Remote node unreachable; the caller may try another replica.
    #[error("transient: {0}")]
    Transient(String),

    /// Storage failure, surfaced unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Registry failure, surfaced unchanged.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors surfaced by sync-session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// No session registered under this sync id.
    #[error("unknown sync id: {0}")]
    UnknownSyncId(String),

    /// The session was cancelled (explicitly or by the slow-client
    /// policy); no further operations are accepted.
    #[error("sync session cancelled")]
    SessionCancelled,

    /// A per-stream engine failure during a session operation.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{StreamKind, ZERO_HASH};

    #[test]
    fn test_storage_error_converts_into_stream_error() {
        let err: StreamError = StorageError::NotFound.into();
        assert_eq!(err, StreamError::Storage(StorageError::NotFound));
    }

    #[test]
    fn test_error_messages_render_short_hashes() {
        let err = StreamError::BadPrevMiniblockHash {
            expected: [0xAA; 32],
            got: ZERO_HASH,
        };
        let msg = err.to_string();
        assert!(msg.contains("aaaaaaaa"));
        assert!(msg.contains("00000000"));
    }

    #[test]
    fn test_not_local_names_the_stream() {
        let id = StreamId::new(StreamKind::User, &[3u8; 31]);
        let msg = StreamError::NotLocal(id).to_string();
        assert!(msg.contains(&id.to_string()));
    }
}
