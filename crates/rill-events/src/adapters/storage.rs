//! In-memory stream storage.
//!
//! Honors the persisted layout the engine assumes: sealed miniblocks
//! keyed by `(stream, num)`, minipool events by `(stream, generation,
//! slot)`, candidates by `(stream, num, hash)`. `promote_block` is
//! atomic under the store mutex, installing the sealed block and
//! truncating consumed minipool events in one step.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{Hash, StorageError, StreamId};
use std::collections::{BTreeMap, HashMap};

use crate::ports::outbound::{StreamSnapshotData, StreamStorage};

#[derive(Debug, Default)]
struct StreamSlot {
    /// Sealed miniblocks by number.
    miniblocks: BTreeMap<u64, Vec<u8>>,
    /// Minipool envelopes by (generation, slot).
    minipool: BTreeMap<(u64, u64), Vec<u8>>,
    /// Candidates by (num, hash).
    candidates: HashMap<(u64, Hash), Vec<u8>>,
    /// Number of the last snapshot-bearing block.
    last_snapshot_num: u64,
}

impl StreamSlot {
    fn tip_num(&self) -> u64 {
        self.miniblocks.keys().next_back().copied().unwrap_or(0)
    }
}

/// HashMap-backed [`StreamStorage`].
#[derive(Default)]
pub struct InMemoryStreamStorage {
    streams: Mutex<HashMap<StreamId, StreamSlot>>,
    /// When set, the next mutating call performs its write and then
    /// reports an ambiguous failure. Lets tests exercise the
    /// commit-status-unknown path.
    fail_next_write: Mutex<Option<String>>,
}

impl InMemoryStreamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm ambiguous-failure injection for the next `write_event` or
    /// `promote_block`.
    pub fn inject_ambiguous_failure(&self, op: impl Into<String>) {
        *self.fail_next_write.lock() = Some(op.into());
    }

    fn take_injected_failure(&self) -> Option<String> {
        self.fail_next_write.lock().take()
    }
}

#[async_trait]
impl StreamStorage for InMemoryStreamStorage {
    async fn read_stream_from_last_snapshot(
        &self,
        stream_id: StreamId,
        num_preceding: usize,
    ) -> Result<StreamSnapshotData, StorageError> {
        let streams = self.streams.lock();
        let slot = streams.get(&stream_id).ok_or(StorageError::NotFound)?;

        let start = slot.last_snapshot_num.saturating_sub(num_preceding as u64);
        let tip = slot.tip_num();
        let mut miniblocks = Vec::with_capacity((tip - start + 1) as usize);
        for num in start..=tip {
            let bytes = slot.miniblocks.get(&num).ok_or(StorageError::Corrupt {
                reason: format!("missing miniblock {num} in [{start}, {tip}]"),
            })?;
            miniblocks.push(bytes.clone());
        }

        let generation = tip + 1;
        let minipool = slot
            .minipool
            .range((generation, 0)..(generation + 1, 0))
            .map(|(_, bytes)| bytes.clone())
            .collect();

        Ok(StreamSnapshotData {
            start_miniblock_num: start,
            miniblocks,
            minipool,
        })
    }

    async fn write_event(
        &self,
        stream_id: StreamId,
        generation: u64,
        slot_num: u64,
        envelope: &[u8],
    ) -> Result<(), StorageError> {
        let mut streams = self.streams.lock();
        let slot = streams.get_mut(&stream_id).ok_or(StorageError::NotFound)?;

        if generation != slot.tip_num() + 1 {
            return Err(StorageError::Io(format!(
                "write_event at stale generation {generation}"
            )));
        }
        let expected_slot = slot
            .minipool
            .range((generation, 0)..(generation + 1, 0))
            .count() as u64;
        if slot_num != expected_slot {
            return Err(StorageError::Io(format!(
                "write_event at slot {slot_num}, expected {expected_slot}"
            )));
        }

        slot.minipool.insert((generation, slot_num), envelope.to_vec());

        if let Some(op) = self.take_injected_failure() {
            return Err(StorageError::Ambiguous { op });
        }
        Ok(())
    }

    async fn read_miniblocks(
        &self,
        stream_id: StreamId,
        from_inclusive: u64,
        to_exclusive: u64,
    ) -> Result<Vec<Vec<u8>>, StorageError> {
        let streams = self.streams.lock();
        let slot = streams.get(&stream_id).ok_or(StorageError::NotFound)?;
        Ok(slot
            .miniblocks
            .range(from_inclusive..to_exclusive)
            .map(|(_, bytes)| bytes.clone())
            .collect())
    }

    async fn write_block_proposal(
        &self,
        stream_id: StreamId,
        hash: Hash,
        num: u64,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let mut streams = self.streams.lock();
        let slot = streams.get_mut(&stream_id).ok_or(StorageError::NotFound)?;
        slot.candidates.insert((num, hash), data);
        Ok(())
    }

    async fn read_miniblock_candidate(
        &self,
        stream_id: StreamId,
        hash: Hash,
        num: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let streams = self.streams.lock();
        let slot = streams.get(&stream_id).ok_or(StorageError::NotFound)?;
        slot.candidates
            .get(&(num, hash))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn promote_block(
        &self,
        stream_id: StreamId,
        prev_generation: u64,
        hash: Hash,
        has_snapshot: bool,
        residual_minipool: Vec<Vec<u8>>,
    ) -> Result<(), StorageError> {
        let mut streams = self.streams.lock();
        let slot = streams.get_mut(&stream_id).ok_or(StorageError::NotFound)?;

        let num = prev_generation;
        if num != slot.tip_num() + 1 {
            return Err(StorageError::Io(format!(
                "promote_block at num {num}, tip is {}",
                slot.tip_num()
            )));
        }
        let candidate = slot
            .candidates
            .get(&(num, hash))
            .cloned()
            .ok_or(StorageError::NotFound)?;

        slot.miniblocks.insert(num, candidate);
        if has_snapshot {
            slot.last_snapshot_num = num;
        }
        // Consumed minipool events go away with their generation; the
        // residual becomes the new generation's slots.
        slot.minipool = residual_minipool
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| ((num + 1, i as u64), bytes))
            .collect();
        slot.candidates.retain(|(n, _), _| *n > num);

        if let Some(op) = self.take_injected_failure() {
            return Err(StorageError::Ambiguous { op });
        }
        Ok(())
    }

    async fn create_stream_storage(
        &self,
        stream_id: StreamId,
        genesis: &[u8],
    ) -> Result<(), StorageError> {
        let mut streams = self.streams.lock();
        if streams.contains_key(&stream_id) {
            return Err(StorageError::AlreadyExists);
        }
        let mut slot = StreamSlot::default();
        slot.miniblocks.insert(0, genesis.to_vec());
        slot.last_snapshot_num = 0;
        streams.insert(stream_id, slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::channel_id;

    #[tokio::test]
    async fn test_create_then_read_roundtrip() {
        let storage = InMemoryStreamStorage::new();
        let id = channel_id(1);
        storage.create_stream_storage(id, b"genesis").await.unwrap();

        let err = storage.create_stream_storage(id, b"genesis").await;
        assert_eq!(err, Err(StorageError::AlreadyExists));

        let data = storage.read_stream_from_last_snapshot(id, 0).await.unwrap();
        assert_eq!(data.start_miniblock_num, 0);
        assert_eq!(data.miniblocks, vec![b"genesis".to_vec()]);
        assert!(data.minipool.is_empty());
    }

    #[tokio::test]
    async fn test_write_event_enforces_layout() {
        let storage = InMemoryStreamStorage::new();
        let id = channel_id(1);
        storage.create_stream_storage(id, b"genesis").await.unwrap();

        storage.write_event(id, 1, 0, b"e0").await.unwrap();
        storage.write_event(id, 1, 1, b"e1").await.unwrap();

        // Wrong slot and wrong generation are both layout violations.
        assert!(storage.write_event(id, 1, 5, b"bad").await.is_err());
        assert!(storage.write_event(id, 2, 0, b"bad").await.is_err());

        let data = storage.read_stream_from_last_snapshot(id, 0).await.unwrap();
        assert_eq!(data.minipool, vec![b"e0".to_vec(), b"e1".to_vec()]);
    }

    #[tokio::test]
    async fn test_promote_installs_block_and_truncates_minipool() {
        let storage = InMemoryStreamStorage::new();
        let id = channel_id(1);
        storage.create_stream_storage(id, b"genesis").await.unwrap();
        storage.write_event(id, 1, 0, b"e0").await.unwrap();
        storage
            .write_block_proposal(id, [7u8; 32], 1, b"block1".to_vec())
            .await
            .unwrap();

        storage
            .promote_block(id, 1, [7u8; 32], false, vec![b"residual".to_vec()])
            .await
            .unwrap();

        let blocks = storage.read_miniblocks(id, 0, 10).await.unwrap();
        assert_eq!(blocks, vec![b"genesis".to_vec(), b"block1".to_vec()]);

        let data = storage.read_stream_from_last_snapshot(id, 0).await.unwrap();
        assert_eq!(data.minipool, vec![b"residual".to_vec()]);

        // The candidate was consumed.
        assert_eq!(
            storage.read_miniblock_candidate(id, [7u8; 32], 1).await,
            Err(StorageError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_promote_requires_known_candidate() {
        let storage = InMemoryStreamStorage::new();
        let id = channel_id(1);
        storage.create_stream_storage(id, b"genesis").await.unwrap();

        let err = storage.promote_block(id, 1, [7u8; 32], false, vec![]).await;
        assert_eq!(err, Err(StorageError::NotFound));
    }

    #[tokio::test]
    async fn test_ambiguous_injection_fires_once() {
        let storage = InMemoryStreamStorage::new();
        let id = channel_id(1);
        storage.create_stream_storage(id, b"genesis").await.unwrap();

        storage.inject_ambiguous_failure("write_event");
        let err = storage.write_event(id, 1, 0, b"e0").await.unwrap_err();
        assert!(matches!(err, StorageError::Ambiguous { .. }));

        // The write landed despite the ambiguous report.
        let data = storage.read_stream_from_last_snapshot(id, 0).await.unwrap();
        assert_eq!(data.minipool.len(), 1);

        storage.write_event(id, 1, 1, b"e1").await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_read_window_includes_preceding() {
        let storage = InMemoryStreamStorage::new();
        let id = channel_id(1);
        storage.create_stream_storage(id, b"b0").await.unwrap();
        for num in 1..=3u64 {
            let hash = [num as u8; 32];
            storage
                .write_block_proposal(id, hash, num, format!("b{num}").into_bytes())
                .await
                .unwrap();
            storage
                .promote_block(id, num, hash, num == 2, vec![])
                .await
                .unwrap();
        }

        // Snapshot at 2; no preceding requested.
        let data = storage.read_stream_from_last_snapshot(id, 0).await.unwrap();
        assert_eq!(data.start_miniblock_num, 2);
        assert_eq!(data.miniblocks.len(), 2);

        // One preceding block pulls the window back to 1.
        let data = storage.read_stream_from_last_snapshot(id, 1).await.unwrap();
        assert_eq!(data.start_miniblock_num, 1);
        assert_eq!(data.miniblocks.len(), 3);
    }
}
