//! The unsealed tail buffer of a stream.

use super::event::ParsedEvent;
use shared_types::{Envelope, Hash};
use std::collections::HashSet;

/// Ordered buffer of admitted-but-unsealed events at one generation.
///
/// INVARIANTS:
/// - The slot of an event equals its index; the next free slot equals
///   the buffer length.
/// - No two events share a hash.
#[derive(Debug, Clone)]
pub struct Minipool {
    generation: u64,
    events: Vec<ParsedEvent>,
    hashes: HashSet<Hash>,
}

impl Minipool {
    /// Empty minipool at `generation`.
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            events: Vec::new(),
            hashes: HashSet::new(),
        }
    }

    /// Minipool pre-filled with `events` (loaded from storage or carried
    /// over as the residual of a promotion).
    pub fn with_events(generation: u64, events: Vec<ParsedEvent>) -> Self {
        let hashes = events.iter().map(|e| e.hash).collect();
        Self {
            generation,
            events,
            hashes,
        }
    }

    /// The generation, which equals the number of the next miniblock.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The slot the next admitted event will occupy.
    pub fn next_slot(&self) -> u64 {
        self.events.len() as u64
    }

    /// True when an event with this hash is buffered.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.hashes.contains(hash)
    }

    /// The buffered events in admission order.
    pub fn events(&self) -> &[ParsedEvent] {
        &self.events
    }

    /// The buffered envelopes in admission order.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.events.iter().map(|e| e.envelope.clone()).collect()
    }

    /// Append an event. The caller has already checked for duplicates at
    /// the view level.
    pub(crate) fn push(&mut self, event: ParsedEvent) {
        debug_assert!(!self.hashes.contains(&event.hash));
        self.hashes.insert(event.hash);
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{message_event, TestSigner};
    use shared_types::ZERO_HASH;

    #[test]
    fn test_slots_track_length() {
        let signer = TestSigner::new(1);
        let mut pool = Minipool::new(3);
        assert_eq!(pool.generation(), 3);
        assert_eq!(pool.next_slot(), 0);

        let event = message_event(&signer, ZERO_HASH, 1);
        pool.push(event.clone());
        assert_eq!(pool.next_slot(), 1);
        assert!(pool.contains(&event.hash));
        assert_eq!(pool.envelopes(), vec![event.envelope]);
    }

    #[test]
    fn test_with_events_rebuilds_hash_set() {
        let signer = TestSigner::new(1);
        let a = message_event(&signer, ZERO_HASH, 1);
        let b = message_event(&signer, ZERO_HASH, 2);
        let pool = Minipool::with_events(7, vec![a.clone(), b.clone()]);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&a.hash));
        assert!(pool.contains(&b.hash));
    }
}
