//! Outbound port for reaching streams replicated on other nodes.
//!
//! Down/up semantics are the same regardless of locality: a remote sub
//! feeds the same receiver a local one would.

use async_trait::async_trait;
use rill_events::ports::SyncReceiver;
use shared_types::{Address, Envelope, StreamAndCookie, StreamError, StreamId, SyncCookie};
use std::sync::Arc;

/// Gateway to peer nodes for streams this node does not replicate.
#[async_trait]
pub trait NodeForwarder: Send + Sync {
    /// Subscribe `receiver` to a stream on `node`, resuming from
    /// `cookie`.
    async fn sub(
        &self,
        node: Address,
        cookie: &SyncCookie,
        receiver: Arc<dyn SyncReceiver>,
    ) -> Result<(), StreamError>;

    /// Drop a remote subscription. Unknown receivers are ignored.
    async fn unsub(&self, node: Address, stream_id: StreamId, receiver_id: u64);

    /// Fetch the current state of a remote stream.
    async fn get_stream(
        &self,
        node: Address,
        stream_id: StreamId,
    ) -> Result<StreamAndCookie, StreamError>;

    /// Forward an event to a node replicating the stream.
    async fn add_event(
        &self,
        node: Address,
        stream_id: StreamId,
        envelope: &Envelope,
    ) -> Result<(), StreamError>;
}

/// Forwarder for single-node deployments: every remote call reports the
/// peer unreachable.
#[derive(Debug, Default, Clone)]
pub struct UnreachableForwarder;

#[async_trait]
impl NodeForwarder for UnreachableForwarder {
    async fn sub(
        &self,
        node: Address,
        _cookie: &SyncCookie,
        _receiver: Arc<dyn SyncReceiver>,
    ) -> Result<(), StreamError> {
        Err(StreamError::Transient(format!(
            "no route to node {}",
            shared_types::short_hex(&node)
        )))
    }

    async fn unsub(&self, _node: Address, _stream_id: StreamId, _receiver_id: u64) {}

    async fn get_stream(
        &self,
        node: Address,
        _stream_id: StreamId,
    ) -> Result<StreamAndCookie, StreamError> {
        Err(StreamError::Transient(format!(
            "no route to node {}",
            shared_types::short_hex(&node)
        )))
    }

    async fn add_event(
        &self,
        node: Address,
        _stream_id: StreamId,
        _envelope: &Envelope,
    ) -> Result<(), StreamError> {
        Err(StreamError::Transient(format!(
            "no route to node {}",
            shared_types::short_hex(&node)
        )))
    }
}
