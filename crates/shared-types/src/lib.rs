//! # Shared Types Crate
//!
//! Cross-crate value types for the rill stream node.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All types that cross crate boundaries
//!   (identifiers, envelopes, wire payloads, sync cursors, error enums)
//!   are defined here.
//! - **Immutable Wire Data**: Envelopes and miniblocks are never mutated
//!   after construction; engine state changes produce new values.
//! - **Opaque Cursors**: `SyncCookie` is authoritative on the server and
//!   opaque to clients; every field mismatch is a `BadSyncCookie`.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod sync;

pub use entities::*;
pub use envelope::*;
pub use errors::*;
pub use sync::*;
