//! # Rill Events
//!
//! The per-stream event-log engine. Each stream is an ordered log of
//! signed events, partitioned into immutable miniblocks with a transient
//! head buffer (the minipool).
//!
//! ## Components
//!
//! - [`domain`]: parsed events, miniblocks, the minipool, and the
//!   immutable copy-on-write [`domain::StreamView`].
//! - [`ports`]: driven ports (storage, registry, signer, verifier) and
//!   the driving [`ports::SyncReceiver`] subscription port.
//! - [`adapters`]: in-memory implementations of the driven ports.
//! - [`service`]: the [`service::Stream`] actor, the process-wide
//!   [`service::StreamCache`], and the [`service::MiniblockProducer`].
//!
//! ## Core guarantees
//!
//! - Views are immutable; every state change replaces the view under the
//!   stream's write lock.
//! - Durability precedes visibility: storage writes return before the
//!   new view is published.
//! - Fanout happens inside the write-lock section, so every subscriber
//!   observes envelopes in admission order.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;
pub mod test_utils;

pub use domain::{EngineConfig, MiniblockInfo, Minipool, ParsedEvent, StreamView};
pub use service::{EngineParams, MiniblockProducer, MiniblockRef, Stream, StreamCache};
