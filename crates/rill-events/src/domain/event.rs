//! Parsed events: envelope decoding, hash validation, construction.

use crate::ports::outbound::EventSigner;
use shared_types::{Envelope, EventPayload, Hash, StreamError, StreamPayload};

/// An envelope together with its decoded payload and validated hash.
///
/// Parsing checks structure and hash only; signature verification is the
/// admission boundary's job (the `EventVerifier` port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    /// The original wire envelope.
    pub envelope: Envelope,
    /// The decoded signed content.
    pub event: EventPayload,
    /// The envelope hash (equals SHA-256 of the payload bytes).
    pub hash: Hash,
}

impl ParsedEvent {
    /// Decode and validate an envelope.
    pub fn parse(envelope: &Envelope) -> Result<Self, StreamError> {
        let computed = Envelope::compute_hash(&envelope.payload);
        if computed != envelope.hash {
            return Err(StreamError::InvalidEvent(
                "envelope hash does not match payload".into(),
            ));
        }
        let event: EventPayload = bincode::deserialize(&envelope.payload)
            .map_err(|e| StreamError::InvalidEvent(format!("undecodable payload: {e}")))?;
        Ok(Self {
            envelope: envelope.clone(),
            event,
            hash: computed,
        })
    }

    /// The domain payload.
    pub fn payload(&self) -> &StreamPayload {
        &self.event.payload
    }

    /// The miniblock this event is anchored to.
    pub fn prev_miniblock_hash(&self) -> Hash {
        self.event.prev_miniblock_hash
    }
}

/// Serialize an envelope for storage.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, StreamError> {
    bincode::serialize(envelope)
        .map_err(|e| StreamError::InvalidEvent(format!("unserializable envelope: {e}")))
}

/// Deserialize an envelope from storage bytes.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, StreamError> {
    bincode::deserialize(bytes)
        .map_err(|e| StreamError::InvalidEvent(format!("undecodable envelope: {e}")))
}

/// Build and sign a new event envelope.
pub fn make_envelope(
    signer: &dyn EventSigner,
    event: EventPayload,
) -> Result<ParsedEvent, StreamError> {
    let payload = bincode::serialize(&event)
        .map_err(|e| StreamError::InvalidEvent(format!("unserializable payload: {e}")))?;
    let hash = Envelope::compute_hash(&payload);
    let signature = signer.sign(&payload)?;
    Ok(ParsedEvent {
        envelope: Envelope {
            hash,
            signature,
            payload,
        },
        event,
        hash,
    })
}
