//! Parsed, validated miniblocks.

use super::event::{make_envelope, ParsedEvent};
use crate::ports::outbound::EventSigner;
use shared_types::{
    EventPayload, Hash, InceptionPayload, Miniblock, MiniblockHeader, Snapshot, StreamError,
    StreamPayload, ZERO_HASH,
};

/// A miniblock parsed from its wire form and structurally validated:
/// the header event decodes to a [`MiniblockHeader`] whose event hashes
/// match the carried events one-to-one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniblockInfo {
    /// Block number, from the header.
    pub num: u64,
    /// Hash of the header event; this is "the miniblock hash".
    pub hash: Hash,
    /// The header event.
    pub header_event: ParsedEvent,
    /// The decoded header.
    pub header: MiniblockHeader,
    /// The sealed events, in stream order.
    pub events: Vec<ParsedEvent>,
}

impl MiniblockInfo {
    /// Parse a wire miniblock. When `expected_num` is given, the header
    /// must declare exactly that number.
    pub fn from_wire(mb: &Miniblock, expected_num: Option<u64>) -> Result<Self, StreamError> {
        let header_event = ParsedEvent::parse(&mb.header)?;
        let header = match header_event.payload() {
            StreamPayload::MiniblockHeader(h) => h.clone(),
            _ => {
                return Err(StreamError::InvalidMiniblock(
                    "header envelope does not carry a miniblock header".into(),
                ))
            }
        };

        if let Some(expected) = expected_num {
            if header.miniblock_num != expected {
                return Err(StreamError::InvalidMiniblock(format!(
                    "header declares num {}, expected {}",
                    header.miniblock_num, expected
                )));
            }
        }

        if header.event_hashes.len() != mb.events.len() {
            return Err(StreamError::InvalidMiniblock(format!(
                "header lists {} event hashes, block carries {} events",
                header.event_hashes.len(),
                mb.events.len()
            )));
        }

        let mut events = Vec::with_capacity(mb.events.len());
        for (i, envelope) in mb.events.iter().enumerate() {
            let event = ParsedEvent::parse(envelope)?;
            if event.hash != header.event_hashes[i] {
                return Err(StreamError::InvalidMiniblock(format!(
                    "event at index {i} does not match the header hash"
                )));
            }
            events.push(event);
        }

        Ok(Self {
            num: header.miniblock_num,
            hash: header_event.hash,
            header_event,
            header,
            events,
        })
    }

    /// Parse a miniblock from storage bytes.
    pub fn from_bytes(bytes: &[u8], expected_num: Option<u64>) -> Result<Self, StreamError> {
        let wire: Miniblock = bincode::deserialize(bytes)
            .map_err(|e| StreamError::InvalidMiniblock(format!("undecodable miniblock: {e}")))?;
        Self::from_wire(&wire, expected_num)
    }

    /// The wire form.
    pub fn to_wire(&self) -> Miniblock {
        Miniblock {
            header: self.header_event.envelope.clone(),
            events: self.events.iter().map(|e| e.envelope.clone()).collect(),
        }
    }

    /// Serialized wire form, as written to storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        bincode::serialize(&self.to_wire())
            .map_err(|e| StreamError::InvalidMiniblock(format!("unserializable miniblock: {e}")))
    }

    /// Build and sign the genesis miniblock for a stream being created.
    ///
    /// The first event must be the inception; the genesis header always
    /// carries a snapshot so freshly loaded views have a retention floor.
    pub fn make_genesis(
        signer: &dyn EventSigner,
        events: &[ParsedEvent],
        timestamp_ms: u64,
    ) -> Result<Self, StreamError> {
        let inception = match events.first().map(ParsedEvent::payload) {
            Some(StreamPayload::Inception(payload)) => payload.clone(),
            _ => {
                return Err(StreamError::InvalidRequest(
                    "first event of a new stream must be an inception".into(),
                ))
            }
        };

        let snapshot = snapshot_from_genesis(inception, events);
        let header = MiniblockHeader {
            miniblock_num: 0,
            prev_miniblock_hash: ZERO_HASH,
            timestamp_ms,
            event_hashes: events.iter().map(|e| e.hash).collect(),
            event_num_offset: 0,
            prev_snapshot_miniblock_num: 0,
            snapshot: Some(snapshot),
        };

        let header_event = make_envelope(
            signer,
            EventPayload {
                creator: signer.address(),
                prev_miniblock_hash: ZERO_HASH,
                salt: timestamp_ms,
                payload: StreamPayload::MiniblockHeader(header.clone()),
            },
        )?;

        Ok(Self {
            num: 0,
            hash: header_event.hash,
            header_event,
            header,
            events: events.to_vec(),
        })
    }
}

fn snapshot_from_genesis(inception: InceptionPayload, events: &[ParsedEvent]) -> Snapshot {
    let mut snapshot = Snapshot {
        inception,
        members: Vec::new(),
        event_count: events.len() as u64,
    };
    for event in events {
        if let StreamPayload::Membership(m) = event.payload() {
            snapshot.apply_membership(m);
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{inception_event, membership_event, TestSigner};

    #[test]
    fn test_genesis_roundtrip() {
        let signer = TestSigner::new(1);
        let inception = inception_event(&signer, crate::test_utils::channel_id(1), false);
        let join = membership_event(&signer, ZERO_HASH, [5u8; 20]);
        let genesis = MiniblockInfo::make_genesis(&signer, &[inception, join], 1000).unwrap();

        assert_eq!(genesis.num, 0);
        assert_eq!(genesis.header.prev_miniblock_hash, ZERO_HASH);
        let snapshot = genesis.header.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.members, vec![[5u8; 20]]);
        assert_eq!(snapshot.event_count, 2);

        let bytes = genesis.to_bytes().unwrap();
        let reparsed = MiniblockInfo::from_bytes(&bytes, Some(0)).unwrap();
        assert_eq!(reparsed, genesis);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_expected_num() {
        let signer = TestSigner::new(1);
        let inception = inception_event(&signer, crate::test_utils::channel_id(1), false);
        let genesis = MiniblockInfo::make_genesis(&signer, &[inception], 1000).unwrap();
        let bytes = genesis.to_bytes().unwrap();

        let err = MiniblockInfo::from_bytes(&bytes, Some(3)).unwrap_err();
        assert!(matches!(err, StreamError::InvalidMiniblock(_)));
    }

    #[test]
    fn test_from_wire_rejects_event_hash_mismatch() {
        let signer = TestSigner::new(1);
        let inception = inception_event(&signer, crate::test_utils::channel_id(1), false);
        let other = membership_event(&signer, ZERO_HASH, [6u8; 20]);
        let genesis = MiniblockInfo::make_genesis(&signer, &[inception], 1000).unwrap();

        let mut wire = genesis.to_wire();
        wire.events[0] = other.envelope;
        let err = MiniblockInfo::from_wire(&wire, None).unwrap_err();
        assert!(matches!(err, StreamError::InvalidMiniblock(_)));
    }

    #[test]
    fn test_genesis_requires_inception_first() {
        let signer = TestSigner::new(1);
        let join = membership_event(&signer, ZERO_HASH, [5u8; 20]);
        let err = MiniblockInfo::make_genesis(&signer, &[join], 1000).unwrap_err();
        assert!(matches!(err, StreamError::InvalidRequest(_)));
    }
}
