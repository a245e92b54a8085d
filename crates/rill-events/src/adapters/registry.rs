//! In-memory chain registry.
//!
//! Allocation picks a deterministic replica set of `replication` nodes
//! from the configured node list, keyed off the stream id, so tests get
//! stable placements.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{Address, Hash, RegistryError, StreamId, StreamRecord};
use std::collections::HashMap;

use crate::ports::outbound::StreamRegistry;

/// HashMap-backed [`StreamRegistry`].
pub struct InMemoryStreamRegistry {
    nodes: Vec<Address>,
    replication: usize,
    records: Mutex<HashMap<StreamId, (StreamRecord, Vec<u8>)>>,
}

impl InMemoryStreamRegistry {
    /// Registry over `nodes`, assigning `replication` replicas per
    /// stream.
    pub fn new(nodes: Vec<Address>, replication: usize) -> Self {
        Self {
            nodes,
            replication,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// All nodes known to the registry.
    pub fn nodes(&self) -> &[Address] {
        &self.nodes
    }

    fn pick_nodes(&self, stream_id: StreamId) -> Vec<Address> {
        let count = self.replication.min(self.nodes.len());
        let start = stream_id.as_bytes()[31] as usize % self.nodes.len().max(1);
        (0..count)
            .map(|i| self.nodes[(start + i) % self.nodes.len()])
            .collect()
    }
}

#[async_trait]
impl StreamRegistry for InMemoryStreamRegistry {
    async fn get_stream(&self, stream_id: StreamId) -> Result<StreamRecord, RegistryError> {
        self.records
            .lock()
            .get(&stream_id)
            .map(|(record, _)| record.clone())
            .ok_or(RegistryError::NotFound)
    }

    async fn get_stream_with_genesis(
        &self,
        stream_id: StreamId,
    ) -> Result<(StreamRecord, Vec<u8>), RegistryError> {
        self.records
            .lock()
            .get(&stream_id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn allocate_stream(
        &self,
        stream_id: StreamId,
        genesis_hash: Hash,
        genesis: Vec<u8>,
    ) -> Result<StreamRecord, RegistryError> {
        let mut records = self.records.lock();
        if records.contains_key(&stream_id) {
            return Err(RegistryError::AlreadyAllocated);
        }
        let record = StreamRecord {
            stream_id,
            nodes: self.pick_nodes(stream_id),
            last_miniblock_num: 0,
            last_miniblock_hash: genesis_hash,
        };
        records.insert(stream_id, (record.clone(), genesis));
        Ok(record)
    }
}
