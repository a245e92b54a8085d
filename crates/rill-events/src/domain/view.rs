//! The immutable stream view.
//!
//! A view is a read-only projection of one stream: a contiguous run of
//! miniblocks starting at (or shortly before) the last snapshot, plus
//! the current minipool. Views are never mutated; every state change
//! builds a new view via the copy-on-write constructors, and the owning
//! stream swaps the pointer under its write lock.
//!
//! INVARIANTS:
//! - Block numbers are contiguous and end exactly where the minipool
//!   generation begins.
//! - The minipool contains no event whose hash appears in a retained
//!   block.
//! - A snapshot-bearing block resets the retention floor: older blocks
//!   are dropped from the view (they remain in storage).

use super::config::EngineConfig;
use super::event::{decode_envelope, make_envelope, ParsedEvent};
use super::miniblock::MiniblockInfo;
use super::minipool::Minipool;
use crate::ports::outbound::{EventSigner, StreamSnapshotData};
use shared_types::{
    Address, Envelope, EventPayload, Hash, Miniblock, MiniblockHeader, Snapshot, StreamAndCookie,
    StreamError, StreamId, StreamPayload, StreamSettings, SyncCookie,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Immutable snapshot of one stream's state.
#[derive(Debug, Clone)]
pub struct StreamView {
    stream_id: StreamId,
    /// Contiguous, never empty; `blocks[snapshot_index]` carries the
    /// last snapshot.
    blocks: Vec<Arc<MiniblockInfo>>,
    snapshot_index: usize,
    /// Running stream state through the last sealed block.
    snapshot: Snapshot,
    minipool: Minipool,
    /// Hashes of every event and header in the retained window plus the
    /// minipool; the duplicate-admission guard.
    event_hashes: HashSet<Hash>,
}

impl StreamView {
    /// Build a view from a storage read.
    pub fn make_stream_view(data: &StreamSnapshotData) -> Result<Self, StreamError> {
        if data.miniblocks.is_empty() {
            return Err(StreamError::InvalidMiniblock(
                "stream data contains no miniblocks".into(),
            ));
        }

        let mut blocks: Vec<Arc<MiniblockInfo>> = Vec::with_capacity(data.miniblocks.len());
        for (i, bytes) in data.miniblocks.iter().enumerate() {
            let expected = data.start_miniblock_num + i as u64;
            let info = MiniblockInfo::from_bytes(bytes, Some(expected))?;
            if let Some(prev) = blocks.last() {
                if info.header.prev_miniblock_hash != prev.hash {
                    return Err(StreamError::InvalidMiniblock(format!(
                        "block {} does not chain to block {}",
                        info.num, prev.num
                    )));
                }
            }
            blocks.push(Arc::new(info));
        }

        let snapshot_index = blocks
            .iter()
            .rposition(|b| b.header.snapshot.is_some())
            .ok_or_else(|| {
                StreamError::InvalidMiniblock("no snapshot in loaded miniblocks".into())
            })?;

        // Roll the snapshot state forward over the blocks sealed after it.
        let mut snapshot = blocks[snapshot_index]
            .header
            .snapshot
            .clone()
            .ok_or_else(|| StreamError::InvalidMiniblock("snapshot block lost its snapshot".into()))?;
        for block in &blocks[snapshot_index + 1..] {
            apply_block_to_snapshot(&mut snapshot, block);
        }

        let mut event_hashes: HashSet<Hash> = HashSet::new();
        for block in &blocks {
            event_hashes.insert(block.hash);
            event_hashes.extend(block.events.iter().map(|e| e.hash));
        }

        let generation = blocks[blocks.len() - 1].num + 1;
        let mut minipool_events = Vec::with_capacity(data.minipool.len());
        for bytes in &data.minipool {
            let event = ParsedEvent::parse(&decode_envelope(bytes)?)?;
            if !event_hashes.insert(event.hash) {
                return Err(StreamError::DuplicateEvent(event.hash));
            }
            minipool_events.push(event);
        }

        Ok(Self {
            stream_id: stream_id_of(&snapshot),
            blocks,
            snapshot_index,
            snapshot,
            minipool: Minipool::with_events(generation, minipool_events),
            event_hashes,
        })
    }

    /// The stream this view projects.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// The last sealed miniblock.
    pub fn last_block(&self) -> &MiniblockInfo {
        self.blocks
            .last()
            .expect("a stream view always holds at least one miniblock")
    }

    /// Number of the first retained miniblock.
    pub fn first_block_num(&self) -> u64 {
        self.blocks[0].num
    }

    /// Current minipool generation (= number of the next miniblock).
    pub fn generation(&self) -> u64 {
        self.minipool.generation()
    }

    /// Number of events currently buffered in the minipool.
    pub fn minipool_len(&self) -> usize {
        self.minipool.len()
    }

    /// The stream settings fixed at inception.
    pub fn settings(&self) -> StreamSettings {
        self.snapshot.inception.settings
    }

    /// Running stream state through the last sealed block.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Mint the resumption cursor for the current position.
    pub fn sync_cookie(&self, node_address: Address) -> SyncCookie {
        SyncCookie {
            node_address,
            stream_id: self.stream_id,
            minipool_gen: self.minipool.generation() as i64,
            minipool_slot: self.minipool.next_slot() as i64,
            prev_miniblock_hash: self.last_block().hash,
        }
    }

    /// The buffered envelopes in admission order.
    pub fn minipool_envelopes(&self) -> Vec<Envelope> {
        self.minipool.envelopes()
    }

    /// Wire miniblocks from the last snapshot block through the tip.
    pub fn miniblocks_from_last_snapshot(&self) -> Vec<Miniblock> {
        self.blocks[self.snapshot_index..]
            .iter()
            .map(|b| b.to_wire())
            .collect()
    }

    /// The full catch-up delivery for a client with no usable cursor.
    pub fn stream_and_cookie_reset(&self, node_address: Address) -> StreamAndCookie {
        StreamAndCookie {
            events: self.minipool_envelopes(),
            next_sync_cookie: self.sync_cookie(node_address),
            miniblocks: self.miniblocks_from_last_snapshot(),
            sync_reset: true,
        }
    }

    /// Index of the retained block with number `num`, if retained.
    pub fn index_of_miniblock_with_num(&self, num: u64) -> Option<usize> {
        let first = self.first_block_num();
        if num < first || num > self.last_block().num {
            return None;
        }
        Some((num - first) as usize)
    }

    /// Visit every envelope from block `from_block_idx` through the
    /// minipool, in admission order: each block's events, then its
    /// header, then the minipool. Returning `false` stops the walk.
    pub fn for_each_event<F>(&self, from_block_idx: usize, mut f: F)
    where
        F: FnMut(&ParsedEvent) -> bool,
    {
        for block in &self.blocks[from_block_idx..] {
            for event in &block.events {
                if !f(event) {
                    return;
                }
            }
            if !f(&block.header_event) {
                return;
            }
        }
        for event in self.minipool.events() {
            if !f(event) {
                return;
            }
        }
    }

    /// Admission checks for a new event: correct anchor, no duplicate.
    pub fn validate_new_event(&self, event: &ParsedEvent) -> Result<(), StreamError> {
        let last_hash = self.last_block().hash;
        if event.prev_miniblock_hash() != last_hash {
            return Err(StreamError::BadPrevMiniblockHash {
                expected: last_hash,
                got: event.prev_miniblock_hash(),
            });
        }
        if self.event_hashes.contains(&event.hash) {
            return Err(StreamError::DuplicateEvent(event.hash));
        }
        Ok(())
    }

    /// New view with `event` appended to a cloned minipool.
    pub fn copy_and_add_event(&self, event: ParsedEvent) -> Result<Self, StreamError> {
        self.validate_new_event(&event)?;
        let mut next = self.clone();
        next.event_hashes.insert(event.hash);
        next.minipool.push(event);
        Ok(next)
    }

    /// New view with `mb` sealed: the minipool generation advances and
    /// the residual minipool holds the events `mb` did not seal
    /// (normally none).
    ///
    /// Fails when the block does not directly extend this view: wrong
    /// number, wrong parent hash, events that were never admitted, or a
    /// header inconsistent with the view's running state.
    pub fn copy_and_apply_block(&self, mb: MiniblockInfo) -> Result<Self, StreamError> {
        let generation = self.minipool.generation();
        if mb.num != generation {
            return Err(StreamError::NonConsecutiveMiniblock {
                num: mb.num,
                expected: generation,
            });
        }
        let last_hash = self.last_block().hash;
        if mb.header.prev_miniblock_hash != last_hash {
            return Err(StreamError::InvalidMiniblock(format!(
                "candidate {} does not chain to the current tip",
                mb.num
            )));
        }
        if mb.header.event_num_offset != self.snapshot.event_count {
            return Err(StreamError::InvalidMiniblock(format!(
                "candidate {} declares event offset {}, view has {}",
                mb.num, mb.header.event_num_offset, self.snapshot.event_count
            )));
        }
        let sealed: HashSet<Hash> = mb.events.iter().map(|e| e.hash).collect();
        for hash in &sealed {
            if !self.minipool.contains(hash) {
                return Err(StreamError::InvalidMiniblock(format!(
                    "candidate {} seals an event that is not in the minipool",
                    mb.num
                )));
            }
        }

        let residual: Vec<ParsedEvent> = self
            .minipool
            .events()
            .iter()
            .filter(|e| !sealed.contains(&e.hash))
            .cloned()
            .collect();

        let snapshot = match &mb.header.snapshot {
            // A declared snapshot is authoritative but must cover the
            // block that carries it.
            Some(declared) => {
                let expected = self.snapshot.event_count + mb.events.len() as u64;
                if declared.event_count != expected {
                    return Err(StreamError::InvalidMiniblock(format!(
                        "candidate {} snapshot counts {} events, expected {}",
                        mb.num, declared.event_count, expected
                    )));
                }
                declared.clone()
            }
            None => {
                let mut rolled = self.snapshot.clone();
                apply_block_to_snapshot(&mut rolled, &mb);
                rolled
            }
        };

        let has_snapshot = mb.header.snapshot.is_some();
        let block = Arc::new(mb);

        let (blocks, snapshot_index) = if has_snapshot {
            (vec![block.clone()], 0)
        } else {
            let mut blocks = self.blocks.clone();
            blocks.push(block.clone());
            (blocks, self.snapshot_index)
        };

        let mut event_hashes: HashSet<Hash> = HashSet::new();
        for b in &blocks {
            event_hashes.insert(b.hash);
            event_hashes.extend(b.events.iter().map(|e| e.hash));
        }
        event_hashes.extend(residual.iter().map(|e| e.hash));

        Ok(Self {
            stream_id: self.stream_id,
            blocks,
            snapshot_index,
            snapshot,
            minipool: Minipool::with_events(generation + 1, residual),
            event_hashes,
        })
    }

    /// Seal the current minipool into a signed candidate miniblock.
    ///
    /// The candidate carries a snapshot when forced or when the snapshot
    /// cadence is due.
    pub fn propose_next_miniblock(
        &self,
        config: &EngineConfig,
        signer: &dyn EventSigner,
        force_snapshot: bool,
        timestamp_ms: u64,
    ) -> Result<MiniblockInfo, StreamError> {
        let generation = self.minipool.generation();
        let last = self.last_block();
        let snapshot_block_num = self.blocks[self.snapshot_index].num;
        let blocks_since_snapshot = generation - snapshot_block_num;
        let with_snapshot =
            force_snapshot || blocks_since_snapshot >= config.miniblocks_per_snapshot;

        let events = self.minipool.events().to_vec();
        let snapshot = if with_snapshot {
            let mut s = self.snapshot.clone();
            for event in &events {
                if let StreamPayload::Membership(m) = event.payload() {
                    s.apply_membership(m);
                }
            }
            s.event_count += events.len() as u64;
            Some(s)
        } else {
            None
        };

        let header = MiniblockHeader {
            miniblock_num: generation,
            prev_miniblock_hash: last.hash,
            timestamp_ms,
            event_hashes: events.iter().map(|e| e.hash).collect(),
            event_num_offset: self.snapshot.event_count,
            prev_snapshot_miniblock_num: snapshot_block_num,
            snapshot,
        };

        let header_event = make_envelope(
            signer,
            EventPayload {
                creator: signer.address(),
                prev_miniblock_hash: last.hash,
                salt: timestamp_ms,
                payload: StreamPayload::MiniblockHeader(header.clone()),
            },
        )?;

        Ok(MiniblockInfo {
            num: generation,
            hash: header_event.hash,
            header_event,
            header,
            events,
        })
    }
}

fn apply_block_to_snapshot(snapshot: &mut Snapshot, block: &MiniblockInfo) {
    for event in &block.events {
        if let StreamPayload::Membership(m) = event.payload() {
            snapshot.apply_membership(m);
        }
    }
    snapshot.event_count += block.events.len() as u64;
}

fn stream_id_of(snapshot: &Snapshot) -> StreamId {
    snapshot.inception.stream_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EngineConfig;
    use crate::test_utils::{channel_id, inception_event, message_event, TestSigner};

    fn genesis_view(signer: &TestSigner) -> StreamView {
        let inception = inception_event(signer, channel_id(1), false);
        let genesis = MiniblockInfo::make_genesis(signer, &[inception], 1_000).unwrap();
        StreamView::make_stream_view(&StreamSnapshotData {
            start_miniblock_num: 0,
            miniblocks: vec![genesis.to_bytes().unwrap()],
            minipool: vec![],
        })
        .unwrap()
    }

    #[test]
    fn test_make_stream_view_from_genesis() {
        let signer = TestSigner::new(1);
        let view = genesis_view(&signer);
        assert_eq!(view.stream_id(), channel_id(1));
        assert_eq!(view.generation(), 1);
        assert_eq!(view.minipool_len(), 0);
        assert_eq!(view.last_block().num, 0);
        assert_eq!(view.snapshot().event_count, 1);
    }

    #[test]
    fn test_cookie_tracks_minipool_position() {
        let signer = TestSigner::new(1);
        let view = genesis_view(&signer);
        let tip = view.last_block().hash;

        let cookie = view.sync_cookie([1u8; 20]);
        assert_eq!(cookie.minipool_gen, 1);
        assert_eq!(cookie.minipool_slot, 0);
        assert_eq!(cookie.prev_miniblock_hash, tip);

        let view = view
            .copy_and_add_event(message_event(&signer, tip, 1))
            .unwrap();
        let cookie = view.sync_cookie([1u8; 20]);
        assert_eq!(cookie.minipool_slot, 1);
    }

    #[test]
    fn test_add_event_rejects_wrong_anchor() {
        let signer = TestSigner::new(1);
        let view = genesis_view(&signer);
        let err = view
            .copy_and_add_event(message_event(&signer, [9u8; 32], 1))
            .unwrap_err();
        assert!(matches!(err, StreamError::BadPrevMiniblockHash { .. }));
    }

    #[test]
    fn test_add_event_rejects_duplicates() {
        let signer = TestSigner::new(1);
        let view = genesis_view(&signer);
        let tip = view.last_block().hash;
        let event = message_event(&signer, tip, 1);

        let view = view.copy_and_add_event(event.clone()).unwrap();
        let err = view.copy_and_add_event(event).unwrap_err();
        assert!(matches!(err, StreamError::DuplicateEvent(_)));
    }

    #[test]
    fn test_apply_block_seals_minipool() {
        let signer = TestSigner::new(1);
        let config = EngineConfig::default();
        let view = genesis_view(&signer);
        let tip = view.last_block().hash;

        let view = view
            .copy_and_add_event(message_event(&signer, tip, 1))
            .unwrap()
            .copy_and_add_event(message_event(&signer, tip, 2))
            .unwrap();

        let candidate = view
            .propose_next_miniblock(&config, &signer, false, 2_000)
            .unwrap();
        assert_eq!(candidate.num, 1);
        assert_eq!(candidate.events.len(), 2);
        assert!(candidate.header.snapshot.is_none());

        let next = view.copy_and_apply_block(candidate.clone()).unwrap();
        assert_eq!(next.generation(), 2);
        assert_eq!(next.minipool_len(), 0);
        assert_eq!(next.last_block().num, 1);
        assert_eq!(next.last_block().hash, candidate.hash);
        assert_eq!(next.snapshot().event_count, 3);
    }

    #[test]
    fn test_apply_block_rejects_non_consecutive() {
        let signer = TestSigner::new(1);
        let config = EngineConfig::default();
        let view = genesis_view(&signer);
        let tip = view.last_block().hash;
        let view = view
            .copy_and_add_event(message_event(&signer, tip, 1))
            .unwrap();

        let mut candidate = view
            .propose_next_miniblock(&config, &signer, false, 2_000)
            .unwrap();
        candidate.num = 5;
        candidate.header.miniblock_num = 5;

        let err = view.copy_and_apply_block(candidate).unwrap_err();
        assert!(matches!(err, StreamError::NonConsecutiveMiniblock { .. }));
    }

    #[test]
    fn test_apply_block_rejects_foreign_events() {
        let signer = TestSigner::new(1);
        let config = EngineConfig::default();
        let view = genesis_view(&signer);
        let tip = view.last_block().hash;
        let view = view
            .copy_and_add_event(message_event(&signer, tip, 1))
            .unwrap();

        // Propose from a richer view, then try to apply to the original.
        let richer = view
            .copy_and_add_event(message_event(&signer, tip, 2))
            .unwrap();
        let candidate = richer
            .propose_next_miniblock(&config, &signer, false, 2_000)
            .unwrap();

        let err = view.copy_and_apply_block(candidate).unwrap_err();
        assert!(matches!(err, StreamError::InvalidMiniblock(_)));
    }

    #[test]
    fn test_snapshot_block_resets_retention() {
        let signer = TestSigner::new(1);
        let config = EngineConfig::default();
        let mut view = genesis_view(&signer);

        // Seal two plain blocks, then one forced snapshot block.
        for salt in 0..2u64 {
            let tip = view.last_block().hash;
            view = view
                .copy_and_add_event(message_event(&signer, tip, salt))
                .unwrap();
            let candidate = view
                .propose_next_miniblock(&config, &signer, false, 2_000 + salt)
                .unwrap();
            view = view.copy_and_apply_block(candidate).unwrap();
        }
        assert_eq!(view.first_block_num(), 0);
        assert_eq!(view.miniblocks_from_last_snapshot().len(), 3);

        let tip = view.last_block().hash;
        view = view
            .copy_and_add_event(message_event(&signer, tip, 9))
            .unwrap();
        let candidate = view
            .propose_next_miniblock(&config, &signer, true, 5_000)
            .unwrap();
        assert!(candidate.header.snapshot.is_some());

        view = view.copy_and_apply_block(candidate).unwrap();
        assert_eq!(view.first_block_num(), 3);
        assert_eq!(view.miniblocks_from_last_snapshot().len(), 1);
        assert_eq!(view.generation(), 4);
    }

    #[test]
    fn test_index_of_miniblock_with_num() {
        let signer = TestSigner::new(1);
        let view = genesis_view(&signer);
        assert_eq!(view.index_of_miniblock_with_num(0), Some(0));
        assert_eq!(view.index_of_miniblock_with_num(1), None);
    }

    #[test]
    fn test_for_each_event_walks_blocks_then_minipool() {
        let signer = TestSigner::new(1);
        let config = EngineConfig::default();
        let view = genesis_view(&signer);
        let tip = view.last_block().hash;
        let view = view
            .copy_and_add_event(message_event(&signer, tip, 1))
            .unwrap();
        let candidate = view
            .propose_next_miniblock(&config, &signer, false, 2_000)
            .unwrap();
        let view = view.copy_and_apply_block(candidate).unwrap();
        let tip = view.last_block().hash;
        let view = view
            .copy_and_add_event(message_event(&signer, tip, 2))
            .unwrap();

        let mut hashes = Vec::new();
        view.for_each_event(0, |e| {
            hashes.push(e.hash);
            true
        });
        // genesis inception + genesis header + sealed message + header
        // of block 1 + minipool message
        assert_eq!(hashes.len(), 5);
        let genesis_header_hash = view.miniblocks_from_last_snapshot()[0].header.hash;
        assert_eq!(hashes[1], genesis_header_hash);
    }
}
