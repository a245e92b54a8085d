//! # Rill Sync
//!
//! Client-facing multi-stream subscriptions. A [`SyncSession`]
//! multiplexes per-stream subscriptions behind one server stream of
//! [`shared_types::SyncStreamsResponse`] messages, with resumable
//! cursors, per-stream down/up transitions, ping/pong keepalive, and a
//! slow-client eviction policy.
//!
//! The engine fans out under each stream's write lock; session
//! receivers therefore never block. They enqueue into the session's
//! bounded queue and cancel the whole session when it overflows.

pub mod handler;
pub mod ports;
pub mod session;

pub use handler::SyncHandler;
pub use ports::{NodeForwarder, UnreachableForwarder};
pub use session::{SyncConfig, SyncSession};
