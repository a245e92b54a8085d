//! Engine services: the per-stream actor, the process-wide cache, and
//! the miniblock producer.

mod cache;
mod producer;
mod stream;

pub use cache::StreamCache;
pub use producer::{MiniblockProducer, MiniblockRef};
pub use stream::Stream;

use crate::domain::EngineConfig;
use crate::ports::outbound::{EventSigner, EventVerifier, StreamRegistry, StreamStorage};
use shared_types::Address;
use std::sync::Arc;

/// Shared wiring handed to every stream: the driven ports and the
/// engine configuration.
pub struct EngineParams {
    /// Durable stream storage.
    pub storage: Arc<dyn StreamStorage>,
    /// Chain registry.
    pub registry: Arc<dyn StreamRegistry>,
    /// This node's signing identity.
    pub signer: Arc<dyn EventSigner>,
    /// Event signature verification at the admission boundary.
    pub verifier: Arc<dyn EventVerifier>,
    /// Engine tunables.
    pub config: EngineConfig,
}

impl EngineParams {
    /// This node's address.
    pub fn local_addr(&self) -> Address {
        self.signer.address()
    }
}
