//! Ports of the stream engine: driven dependencies (storage, registry,
//! signing) and the driving subscription interface.

pub mod inbound;
pub mod outbound;

pub use inbound::{next_receiver_id, SyncReceiver};
pub use outbound::{
    EventSigner, EventVerifier, StreamRegistry, StreamSnapshotData, StreamStorage,
};
