//! Test fixtures shared by unit tests across the engine and by the
//! integration-test crate.

use crate::adapters::{InMemoryStreamRegistry, InMemoryStreamStorage};
use crate::domain::{make_envelope, EngineConfig, MiniblockInfo, ParsedEvent};
use crate::ports::inbound::{next_receiver_id, SyncReceiver};
use crate::ports::outbound::{EventSigner, EventVerifier, StreamRegistry};
use crate::service::EngineParams;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use shared_types::{
    Address, EventPayload, Hash, InceptionPayload, MembershipOp, MembershipPayload, MessagePayload,
    Signature, StreamAndCookie, StreamError, StreamId, StreamKind, StreamPayload, StreamSettings,
};
use std::sync::Arc;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Deterministic signer for tests. Signatures are not cryptographically
/// meaningful; pair it with [`AcceptAllVerifier`].
#[derive(Debug, Clone)]
pub struct TestSigner {
    seed: u8,
}

impl TestSigner {
    /// Signer whose address is `[seed; 20]`.
    pub fn new(seed: u8) -> Self {
        Self { seed }
    }
}

impl EventSigner for TestSigner {
    fn address(&self) -> Address {
        [self.seed; 20]
    }

    fn sign(&self, payload: &[u8]) -> Result<Signature, StreamError> {
        let a = sha256(&[payload]);
        let b = sha256(&[&[self.seed], payload]);
        let mut sig = [0u8; 65];
        sig[..32].copy_from_slice(&a);
        sig[32..64].copy_from_slice(&b);
        sig[64] = self.seed;
        Ok(sig)
    }
}

/// Verifier that accepts every event.
#[derive(Debug, Default, Clone)]
pub struct AcceptAllVerifier;

impl EventVerifier for AcceptAllVerifier {
    fn verify(&self, _event: &ParsedEvent) -> Result<(), StreamError> {
        Ok(())
    }
}

/// A channel stream id with a recognizable payload byte.
pub fn channel_id(n: u8) -> StreamId {
    StreamId::new(StreamKind::Channel, &[n; 31])
}

/// An inception event for `stream_id`.
pub fn inception_event(
    signer: &dyn EventSigner,
    stream_id: StreamId,
    disable_miniblock_creation: bool,
) -> ParsedEvent {
    make_envelope(
        signer,
        EventPayload {
            creator: signer.address(),
            prev_miniblock_hash: shared_types::ZERO_HASH,
            salt: 0,
            payload: StreamPayload::Inception(InceptionPayload {
                stream_id,
                settings: StreamSettings {
                    disable_miniblock_creation,
                },
            }),
        },
    )
    .expect("test inception event")
}

/// A join event for `user`.
pub fn membership_event(signer: &dyn EventSigner, prev: Hash, user: Address) -> ParsedEvent {
    make_envelope(
        signer,
        EventPayload {
            creator: signer.address(),
            prev_miniblock_hash: prev,
            salt: u64::from(user[0]),
            payload: StreamPayload::Membership(MembershipPayload {
                op: MembershipOp::Join,
                user,
            }),
        },
    )
    .expect("test membership event")
}

/// A message event with `salt` controlling the hash.
pub fn message_event(signer: &dyn EventSigner, prev: Hash, salt: u64) -> ParsedEvent {
    make_envelope(
        signer,
        EventPayload {
            creator: signer.address(),
            prev_miniblock_hash: prev,
            salt,
            payload: StreamPayload::Message(MessagePayload {
                content: format!("message {salt}").into_bytes(),
            }),
        },
    )
    .expect("test message event")
}

/// Engine wiring over fresh in-memory adapters. The registry's node set
/// is just this node.
pub fn test_params() -> (
    Arc<EngineParams>,
    Arc<InMemoryStreamStorage>,
    Arc<InMemoryStreamRegistry>,
) {
    test_params_with_config(EngineConfig::default())
}

/// Same as [`test_params`] with an explicit engine config.
pub fn test_params_with_config(
    config: EngineConfig,
) -> (
    Arc<EngineParams>,
    Arc<InMemoryStreamStorage>,
    Arc<InMemoryStreamRegistry>,
) {
    let signer = Arc::new(TestSigner::new(1));
    let storage = Arc::new(InMemoryStreamStorage::new());
    let registry = Arc::new(InMemoryStreamRegistry::new(vec![signer.address()], 1));
    let params = Arc::new(EngineParams {
        storage: storage.clone(),
        registry: registry.clone(),
        signer,
        verifier: Arc::new(AcceptAllVerifier),
        config,
    });
    (params, storage, registry)
}

/// Register a stream in the registry with a signed genesis miniblock,
/// as stream creation would. Returns the genesis hash.
pub async fn bootstrap_stream(
    registry: &InMemoryStreamRegistry,
    signer: &dyn EventSigner,
    stream_id: StreamId,
    disable_miniblock_creation: bool,
) -> Hash {
    let inception = inception_event(signer, stream_id, disable_miniblock_creation);
    let genesis =
        MiniblockInfo::make_genesis(signer, &[inception], 1_000).expect("test genesis miniblock");
    let bytes = genesis.to_bytes().expect("test genesis bytes");
    registry
        .allocate_stream(stream_id, genesis.hash, bytes)
        .await
        .expect("test stream allocation");
    genesis.hash
}

/// Receiver that records everything it is told, for assertions.
pub struct CollectingReceiver {
    id: u64,
    /// Updates in delivery order.
    pub updates: Mutex<Vec<StreamAndCookie>>,
    /// Sync errors in delivery order.
    pub errors: Mutex<Vec<StreamError>>,
    /// Down notices in delivery order.
    pub downs: Mutex<Vec<StreamId>>,
}

impl CollectingReceiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_receiver_id(),
            updates: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            downs: Mutex::new(Vec::new()),
        })
    }

    /// Flattened envelope hashes across all received updates.
    pub fn update_hashes(&self) -> Vec<Hash> {
        self.updates
            .lock()
            .iter()
            .flat_map(|u| u.events.iter().map(|e| e.hash))
            .collect()
    }
}

impl SyncReceiver for CollectingReceiver {
    fn receiver_id(&self) -> u64 {
        self.id
    }

    fn on_update(&self, update: StreamAndCookie) {
        self.updates.lock().push(update);
    }

    fn on_sync_error(&self, err: StreamError) {
        self.errors.lock().push(err);
    }

    fn on_stream_down(&self, stream_id: StreamId) {
        self.downs.lock().push(stream_id);
    }
}
