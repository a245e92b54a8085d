//! secp256k1 signing identity and recovering verification.
//!
//! Signatures are recoverable ECDSA over the SHA-256 of the payload
//! bytes, serialized r || s || v. Addresses are the Ethereum-style
//! Keccak-256 truncation of the uncompressed public key, which lets the
//! verifier recover the creator address from the signature alone.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rill_events::domain::ParsedEvent;
use rill_events::ports::{EventSigner, EventVerifier};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use shared_types::{Address, Signature, StreamError};

/// The node's secp256k1 wallet.
pub struct Secp256k1EventSigner {
    key: SigningKey,
    address: Address,
}

impl Secp256k1EventSigner {
    /// Build a signer from a 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, StreamError> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| StreamError::InvalidRequest(format!("invalid signing secret: {e}")))?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }
}

impl EventSigner for Secp256k1EventSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, payload: &[u8]) -> Result<Signature, StreamError> {
        let prehash = Sha256::digest(payload);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(|e| StreamError::InvalidEvent(format!("signing failed: {e}")))?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(signature.to_bytes().as_slice());
        bytes[64] = recovery_id.to_byte();
        Ok(bytes)
    }
}

/// Verifies event signatures by recovering the signing address and
/// comparing it to the declared creator.
#[derive(Debug, Default, Clone)]
pub struct RecoveringEventVerifier;

impl EventVerifier for RecoveringEventVerifier {
    fn verify(&self, event: &ParsedEvent) -> Result<(), StreamError> {
        let sig = &event.envelope.signature;
        let ecdsa = EcdsaSignature::from_slice(&sig[..64])
            .map_err(|e| StreamError::InvalidEvent(format!("malformed signature: {e}")))?;
        let recovery_id = RecoveryId::from_byte(sig[64])
            .ok_or_else(|| StreamError::InvalidEvent("malformed recovery id".into()))?;

        let prehash = Sha256::digest(&event.envelope.payload);
        let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &ecdsa, recovery_id)
            .map_err(|e| StreamError::InvalidEvent(format!("unrecoverable signature: {e}")))?;

        if address_of(&key) != event.event.creator {
            return Err(StreamError::InvalidEvent(
                "signature does not recover to the event creator".into(),
            ));
        }
        Ok(())
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest.as_slice()[12..]);
    address
}
