//! Runtime adapters: the node's signing identity and the HTTP surface.

pub mod http;
pub mod signer;

pub use signer::{RecoveringEventVerifier, Secp256k1EventSigner};
