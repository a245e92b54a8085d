//! # Core Identifiers
//!
//! Defines the identifier types shared by every subsystem.
//!
//! ## Clusters
//!
//! - **Hashing & Signing**: `Hash`, `Signature`, `Address`
//! - **Streams**: `StreamId`, `StreamKind`, `StreamRecord`

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 65-byte recoverable ECDSA signature (r || s || v).
pub type Signature = [u8; 65];

/// A 20-byte Ethereum-style address derived from a secp256k1 public key.
pub type Address = [u8; 20];

/// The all-zero hash, used as the parent of a genesis miniblock header.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Kind of a stream, encoded as the first byte of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamKind {
    /// A space: the container grouping channels and members.
    Space = 0xA8,
    /// A channel: the ordinary message log inside a space.
    Channel = 0x20,
    /// A user's personal stream.
    User = 0xA1,
    /// A user's device-key stream.
    DeviceKey = 0xAD,
    /// A user's settings stream.
    UserSettings = 0xA5,
}

impl StreamKind {
    /// Decode a kind from an id prefix byte.
    pub fn from_prefix(b: u8) -> Option<Self> {
        match b {
            0xA8 => Some(Self::Space),
            0x20 => Some(Self::Channel),
            0xA1 => Some(Self::User),
            0xAD => Some(Self::DeviceKey),
            0xA5 => Some(Self::UserSettings),
            _ => None,
        }
    }
}

/// Unique identifier for a stream.
///
/// The first byte is the `StreamKind` prefix; the remaining 31 bytes are
/// kind-specific (derived from the owning address for user streams,
/// random for spaces and channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub [u8; 32]);

impl StreamId {
    /// Build a stream id from a kind prefix and 31 bytes of payload.
    pub fn new(kind: StreamKind, payload: &[u8; 31]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0] = kind as u8;
        bytes[1..].copy_from_slice(payload);
        StreamId(bytes)
    }

    /// Derive a user-scoped stream id from the owning address.
    ///
    /// The address is placed after the prefix; the tail stays zero so the
    /// mapping address -> id is stable.
    pub fn for_user(kind: StreamKind, address: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0] = kind as u8;
        bytes[1..21].copy_from_slice(&address);
        StreamId(bytes)
    }

    /// Parse an id from raw bytes, validating length and kind prefix.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        StreamKind::from_prefix(arr[0])?;
        Some(StreamId(arr))
    }

    /// Parse an id from its 64-character hex rendering.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Self::from_bytes(&bytes)
    }

    /// The kind encoded in the prefix byte.
    pub fn kind(&self) -> Option<StreamKind> {
        StreamKind::from_prefix(self.0[0])
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Registry record for an allocated stream.
///
/// The chain registry is the authority on which nodes replicate a stream
/// and what the last registered miniblock is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    /// The stream this record describes.
    pub stream_id: StreamId,
    /// Addresses of the nodes replicating this stream.
    pub nodes: Vec<Address>,
    /// Number of the last miniblock registered on chain.
    pub last_miniblock_num: u64,
    /// Hash of the last miniblock registered on chain.
    pub last_miniblock_hash: Hash,
}

impl StreamRecord {
    /// True when `address` is in the record's node set.
    pub fn is_local(&self, address: Address) -> bool {
        self.nodes.contains(&address)
    }
}

/// Short hex rendering of a hash or address for log fields.
pub fn short_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(10);
    for b in bytes.iter().take(4) {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
