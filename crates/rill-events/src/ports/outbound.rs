//! Outbound ports (driven ports): durable storage, the chain registry,
//! and the node's signing identity.
//!
//! These are the interfaces the engine requires the host application to
//! implement. In-memory implementations live in `crate::adapters`.

use async_trait::async_trait;
use shared_types::{
    Address, Hash, RegistryError, Signature, StorageError, StreamError, StreamId, StreamRecord,
};

use crate::domain::ParsedEvent;

/// Stream state as read from durable storage: a contiguous run of
/// miniblocks ending at the tip (starting at or before the last
/// snapshot) plus the current minipool.
#[derive(Debug, Clone, Default)]
pub struct StreamSnapshotData {
    /// Number of the first returned miniblock.
    pub start_miniblock_num: u64,
    /// Serialized miniblocks, contiguous, ending at the stream tip.
    pub miniblocks: Vec<Vec<u8>>,
    /// Serialized minipool envelopes of the current generation, in slot
    /// order.
    pub minipool: Vec<Vec<u8>>,
}

/// Durable per-stream storage.
///
/// Layout contract: sealed miniblocks are keyed by `(stream, num)`,
/// minipool events by `(stream, generation, slot)`, candidates by
/// `(stream, num, hash)`.
#[async_trait]
pub trait StreamStorage: Send + Sync {
    /// Read the stream from its last snapshot (plus up to
    /// `num_preceding` earlier blocks) through the tip, with the current
    /// minipool.
    async fn read_stream_from_last_snapshot(
        &self,
        stream_id: StreamId,
        num_preceding: usize,
    ) -> Result<StreamSnapshotData, StorageError>;

    /// Durably admit one minipool event at `(generation, slot)`.
    async fn write_event(
        &self,
        stream_id: StreamId,
        generation: u64,
        slot: u64,
        envelope: &[u8],
    ) -> Result<(), StorageError>;

    /// Read serialized miniblocks `[from_inclusive, to_exclusive)`.
    /// Returns the available prefix when the range reaches past the tip.
    async fn read_miniblocks(
        &self,
        stream_id: StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> Result<Vec<Vec<u8>>, StorageError>;

    /// Durably store a candidate keyed by `(num, hash)`.
    async fn write_block_proposal(
        &self,
        stream_id: StreamId,
        hash: Hash,
        num: u64,
        data: Vec<u8>,
    ) -> Result<(), StorageError>;

    /// Read back a candidate written by `write_block_proposal`.
    async fn read_miniblock_candidate(
        &self,
        stream_id: StreamId,
        hash: Hash,
        num: u64,
    ) -> Result<Vec<u8>, StorageError>;

    /// Atomically install the candidate `(prev_generation, hash)` as a
    /// sealed miniblock, drop the consumed minipool events of
    /// `prev_generation`, and write `residual_minipool` as the new
    /// generation's slots.
    async fn promote_block(
        &self,
        stream_id: StreamId,
        prev_generation: u64,
        hash: Hash,
        has_snapshot: bool,
        residual_minipool: Vec<Vec<u8>>,
    ) -> Result<(), StorageError>;

    /// Initialize storage for a new stream with its serialized genesis
    /// miniblock.
    async fn create_stream_storage(
        &self,
        stream_id: StreamId,
        genesis: &[u8],
    ) -> Result<(), StorageError>;
}

/// The chain registry: authority on stream allocation and node sets.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    /// The record for an allocated stream.
    async fn get_stream(&self, stream_id: StreamId) -> Result<StreamRecord, RegistryError>;

    /// The record plus the serialized genesis miniblock, used to
    /// bootstrap local storage on first access.
    async fn get_stream_with_genesis(
        &self,
        stream_id: StreamId,
    ) -> Result<(StreamRecord, Vec<u8>), RegistryError>;

    /// Allocate a stream: pick its replica set and register the genesis
    /// miniblock.
    async fn allocate_stream(
        &self,
        stream_id: StreamId,
        genesis_hash: Hash,
        genesis: Vec<u8>,
    ) -> Result<StreamRecord, RegistryError>;
}

/// The node's signing identity, used for miniblock header events.
pub trait EventSigner: Send + Sync {
    /// This node's address.
    fn address(&self) -> Address;

    /// Produce a recoverable signature over serialized payload bytes.
    fn sign(&self, payload: &[u8]) -> Result<Signature, StreamError>;
}

/// Signature verification for events arriving at the admission boundary.
pub trait EventVerifier: Send + Sync {
    /// Verify that the event's signature recovers to its declared
    /// creator.
    fn verify(&self, event: &ParsedEvent) -> Result<(), StreamError>;
}
