//! # Event Envelope and Wire Payloads
//!
//! The universal wrapper for every signed event in a stream, and the
//! payload types carried inside it.
//!
//! ## Integrity Properties
//!
//! - `Envelope.hash` is SHA-256 over the serialized payload and is
//!   revalidated whenever an envelope is parsed.
//! - `Envelope.signature` is a recoverable ECDSA signature over the same
//!   bytes; the recovered address must equal the payload's `creator`.
//! - Every non-header event anchors itself to the log through
//!   `prev_miniblock_hash`.

use crate::entities::{Address, Hash, Signature, StreamId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

/// An opaque signed event blob as it travels on the wire and sits in
/// storage. The payload bytes decode to an [`EventPayload`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// SHA-256 of `payload`.
    pub hash: Hash,
    /// Recoverable ECDSA signature over `payload`.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
    /// Serialized [`EventPayload`] bytes.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Compute the envelope hash for a serialized payload.
    pub fn compute_hash(payload: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hasher.finalize().into()
    }
}

/// The signed content of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Address of the event creator (recovered from the signature on
    /// verification).
    pub creator: Address,
    /// Hash of the miniblock this event is anchored to. Must match the
    /// last sealed block at admission time.
    pub prev_miniblock_hash: Hash,
    /// Creator-supplied entropy so identical payloads hash differently.
    pub salt: u64,
    /// The domain payload.
    pub payload: StreamPayload,
}

/// Domain payload variants carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPayload {
    /// First event of a stream; fixes the stream id and settings.
    Inception(InceptionPayload),
    /// Membership change.
    Membership(MembershipPayload),
    /// An opaque application message.
    Message(MessagePayload),
    /// Seals a batch of events; only ever produced by nodes.
    MiniblockHeader(MiniblockHeader),
}

/// Inception payload: the first event in every stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InceptionPayload {
    /// The stream this inception creates. Must match the id the stream
    /// is created under.
    pub stream_id: StreamId,
    /// Stream-level settings fixed at creation time.
    pub settings: StreamSettings,
}

/// Stream settings carried in the inception event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamSettings {
    /// When set, the periodic miniblock producer skips this stream;
    /// miniblocks are only made through the debug hook.
    pub disable_miniblock_creation: bool,
}

/// Membership operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipOp {
    /// User joins the stream.
    Join,
    /// User leaves the stream.
    Leave,
}

/// Membership payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPayload {
    /// The operation.
    pub op: MembershipOp,
    /// The user the operation applies to.
    pub user: Address,
}

/// An opaque application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Ciphertext or plaintext; the node does not interpret it.
    pub content: Vec<u8>,
}

/// Header payload sealing one miniblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniblockHeader {
    /// Monotone, gap-free block number starting at 0.
    pub miniblock_num: u64,
    /// Hash of the previous miniblock's header event (`ZERO_HASH` for
    /// genesis).
    pub prev_miniblock_hash: Hash,
    /// Node-side wall clock at sealing, milliseconds since epoch.
    pub timestamp_ms: u64,
    /// Hashes of the sealed events, in stream order.
    pub event_hashes: Vec<Hash>,
    /// Count of events sealed in all preceding miniblocks.
    pub event_num_offset: u64,
    /// Number of the closest preceding miniblock carrying a snapshot.
    pub prev_snapshot_miniblock_num: u64,
    /// Materialized stream state; present on snapshot blocks only.
    pub snapshot: Option<Snapshot>,
}

/// Materialized stream state carried inside snapshot miniblock headers.
///
/// Defines the retention floor of an in-memory stream view: blocks older
/// than the last snapshot block are dropped from the view (they remain
/// in storage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The stream's inception, replayed so a view can be rebuilt without
    /// reading back to genesis.
    pub inception: InceptionPayload,
    /// Current members, in join order.
    pub members: Vec<Address>,
    /// Count of events sealed up to and including the snapshot block.
    pub event_count: u64,
}

impl Snapshot {
    /// Apply a membership operation to the member list.
    pub fn apply_membership(&mut self, payload: &MembershipPayload) {
        match payload.op {
            MembershipOp::Join => {
                if !self.members.contains(&payload.user) {
                    self.members.push(payload.user);
                }
            }
            MembershipOp::Leave => {
                self.members.retain(|m| *m != payload.user);
            }
        }
    }
}

/// A sealed miniblock in wire/storage form: the header event plus the
/// events it seals, all still enveloped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Miniblock {
    /// Envelope whose payload is a [`MiniblockHeader`].
    pub header: Envelope,
    /// The sealed events, in stream order.
    pub events: Vec<Envelope>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_hash_is_sha256_of_payload() {
        let payload = b"some payload bytes".to_vec();
        let hash = Envelope::compute_hash(&payload);
        assert_eq!(hash, Envelope::compute_hash(&payload));
        assert_ne!(hash, Envelope::compute_hash(b"other bytes"));
    }

    #[test]
    fn test_snapshot_membership() {
        let mut snapshot = Snapshot {
            inception: InceptionPayload {
                stream_id: StreamId::new(crate::StreamKind::Channel, &[0u8; 31]),
                settings: StreamSettings::default(),
            },
            members: Vec::new(),
            event_count: 0,
        };
        let user = [9u8; 20];
        snapshot.apply_membership(&MembershipPayload {
            op: MembershipOp::Join,
            user,
        });
        snapshot.apply_membership(&MembershipPayload {
            op: MembershipOp::Join,
            user,
        });
        assert_eq!(snapshot.members, vec![user]);

        snapshot.apply_membership(&MembershipPayload {
            op: MembershipOp::Leave,
            user,
        });
        assert!(snapshot.members.is_empty());
    }
}
