//! Inbound ports: how the engine talks back to subscribers.

use shared_types::{StreamAndCookie, StreamError, StreamId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver side of a per-stream subscription.
///
/// Callbacks are invoked while the stream's write lock is held, so every
/// receiver observes updates in stream order. Implementations MUST NOT
/// block: enqueue into a bounded queue of your own and cancel yourself
/// on overflow.
pub trait SyncReceiver: Send + Sync {
    /// Stable identity of this receiver, used for idempotent
    /// registration and removal. Allocate with [`next_receiver_id`].
    fn receiver_id(&self) -> u64;

    /// A new cookie (and possibly events) is available for the stream.
    fn on_update(&self, update: StreamAndCookie);

    /// The subscription failed unrecoverably; the receiver is already
    /// unregistered and must resubscribe to continue.
    fn on_sync_error(&self, err: StreamError);

    /// Updates for the stream can no longer be delivered.
    fn on_stream_down(&self, stream_id: StreamId);
}

static NEXT_RECEIVER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique receiver id.
pub fn next_receiver_id() -> u64 {
    NEXT_RECEIVER_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_ids_are_unique() {
        let a = next_receiver_id();
        let b = next_receiver_id();
        assert_ne!(a, b);
    }
}
