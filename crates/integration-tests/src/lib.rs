//! Multi-node test harness: a cluster of in-process nodes sharing one
//! registry, wired together through an in-process forwarder with
//! per-node liveness toggles.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use node_runtime::adapters::{RecoveringEventVerifier, Secp256k1EventSigner};
use node_runtime::StreamService;
use rill_events::adapters::{InMemoryStreamRegistry, InMemoryStreamStorage};
use rill_events::domain::{make_envelope, EngineConfig, ParsedEvent};
use rill_events::ports::{EventSigner, SyncReceiver};
use rill_events::{EngineParams, MiniblockProducer, StreamCache};
use rill_sync::{NodeForwarder, SyncConfig, SyncHandler};
use shared_types::{
    Address, Envelope, EventPayload, Hash, InceptionPayload, MessagePayload, StreamAndCookie,
    StreamError, StreamId, StreamKind, StreamPayload, StreamSettings, SyncCookie, ZERO_HASH,
};
use std::sync::Arc;

/// One in-process node.
pub struct TestNode {
    /// The node's address.
    pub addr: Address,
    /// The node's engine cache.
    pub cache: Arc<StreamCache>,
    /// The node's producer.
    pub producer: Arc<MiniblockProducer>,
    /// The node's service surface.
    pub service: Arc<StreamService>,
}

/// A cluster of nodes over one shared registry.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub registry: Arc<InMemoryStreamRegistry>,
    forwarder: Arc<ClusterForwarder>,
}

impl TestCluster {
    /// Build `node_count` nodes with streams replicated on
    /// `replication` of them.
    pub fn new(node_count: usize, replication: usize) -> Self {
        let signers: Vec<Arc<Secp256k1EventSigner>> = (1..=node_count)
            .map(|i| {
                Arc::new(
                    Secp256k1EventSigner::from_secret_bytes(&[i as u8; 32])
                        .expect("test node secret"),
                )
            })
            .collect();
        let addrs: Vec<Address> = signers.iter().map(|s| s.address()).collect();
        let registry = Arc::new(InMemoryStreamRegistry::new(addrs.clone(), replication));
        let forwarder = Arc::new(ClusterForwarder::default());

        let nodes = signers
            .into_iter()
            .map(|signer| {
                let addr = signer.address();
                let params = Arc::new(EngineParams {
                    storage: Arc::new(InMemoryStreamStorage::new()),
                    registry: registry.clone(),
                    signer,
                    verifier: Arc::new(RecoveringEventVerifier),
                    config: EngineConfig::default(),
                });
                let cache = Arc::new(StreamCache::new(params));
                let producer = Arc::new(MiniblockProducer::new(cache.clone()));
                let sync = Arc::new(SyncHandler::new(
                    cache.clone(),
                    forwarder.clone(),
                    SyncConfig::default(),
                ));
                let service = Arc::new(StreamService::new(
                    cache.clone(),
                    sync,
                    producer.clone(),
                    forwarder.clone(),
                ));
                forwarder.register(addr, cache.clone());
                TestNode {
                    addr,
                    cache,
                    producer,
                    service,
                }
            })
            .collect();

        Self {
            nodes,
            registry,
            forwarder,
        }
    }

    /// Mark a node unreachable (or reachable again) for forwarded
    /// calls.
    pub fn set_node_down(&self, addr: Address, down: bool) {
        self.forwarder.set_down(addr, down);
    }

    /// The node at `idx`.
    pub fn node(&self, idx: usize) -> &TestNode {
        &self.nodes[idx]
    }
}

/// In-process forwarder: routes calls to the target node's cache, and
/// reports downed nodes as transiently unreachable.
#[derive(Default)]
pub struct ClusterForwarder {
    caches: DashMap<Address, Arc<StreamCache>>,
    down: DashSet<Address>,
}

impl ClusterForwarder {
    fn register(&self, addr: Address, cache: Arc<StreamCache>) {
        self.caches.insert(addr, cache);
    }

    fn set_down(&self, addr: Address, down: bool) {
        if down {
            self.down.insert(addr);
        } else {
            self.down.remove(&addr);
        }
    }

    fn reach(&self, node: Address) -> Result<Arc<StreamCache>, StreamError> {
        if self.down.contains(&node) {
            return Err(StreamError::Transient(format!(
                "node {} is down",
                shared_types::short_hex(&node)
            )));
        }
        self.caches
            .get(&node)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                StreamError::Transient(format!(
                    "unknown node {}",
                    shared_types::short_hex(&node)
                ))
            })
    }
}

#[async_trait]
impl NodeForwarder for ClusterForwarder {
    async fn sub(
        &self,
        node: Address,
        cookie: &SyncCookie,
        receiver: Arc<dyn SyncReceiver>,
    ) -> Result<(), StreamError> {
        let cache = self.reach(node)?;
        cache.get_stream(cookie.stream_id).sub(cookie, receiver).await
    }

    async fn unsub(&self, node: Address, stream_id: StreamId, receiver_id: u64) {
        if let Ok(cache) = self.reach(node) {
            cache.get_stream(stream_id).unsub(receiver_id).await;
        }
    }

    async fn get_stream(
        &self,
        node: Address,
        stream_id: StreamId,
    ) -> Result<StreamAndCookie, StreamError> {
        let cache = self.reach(node)?;
        let view = cache.get_stream(stream_id).get_view().await?;
        Ok(view.stream_and_cookie_reset(node))
    }

    async fn add_event(
        &self,
        node: Address,
        stream_id: StreamId,
        envelope: &Envelope,
    ) -> Result<(), StreamError> {
        let cache = self.reach(node)?;
        let event = ParsedEvent::parse(envelope)?;
        cache.get_stream(stream_id).add_event(&event).await
    }
}

/// A client-side wallet for signing test events.
pub fn client_wallet(seed: u8) -> Secp256k1EventSigner {
    Secp256k1EventSigner::from_secret_bytes(&[seed; 32]).expect("test wallet secret")
}

/// A channel stream id with a recognizable tail byte.
pub fn channel_id(tail: u8) -> StreamId {
    let mut payload = [0u8; 31];
    payload[30] = tail;
    StreamId::new(StreamKind::Channel, &payload)
}

/// A signed inception envelope for `stream_id`.
pub fn inception_envelope(
    wallet: &Secp256k1EventSigner,
    stream_id: StreamId,
    disable_miniblock_creation: bool,
) -> Envelope {
    make_envelope(
        wallet,
        EventPayload {
            creator: wallet.address(),
            prev_miniblock_hash: ZERO_HASH,
            salt: 0,
            payload: StreamPayload::Inception(InceptionPayload {
                stream_id,
                settings: StreamSettings {
                    disable_miniblock_creation,
                },
            }),
        },
    )
    .expect("test inception envelope")
    .envelope
}

/// A signed message envelope anchored to `prev`.
pub fn message_envelope(wallet: &Secp256k1EventSigner, prev: Hash, salt: u64) -> Envelope {
    make_envelope(
        wallet,
        EventPayload {
            creator: wallet.address(),
            prev_miniblock_hash: prev,
            salt,
            payload: StreamPayload::Message(MessagePayload {
                content: format!("message {salt}").into_bytes(),
            }),
        },
    )
    .expect("test message envelope")
    .envelope
}
