use crate::error::{MqttError, Result};

/// Cycles through packet identifiers 1..=65535, skipping identifiers still in flight.
#[derive(Debug, Clone)]
pub struct PacketIdGenerator {
    next: u16,
}

impl PacketIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns the next identifier for which `in_use` is false.
    ///
    /// # Errors
    /// Returns `PacketIdExhausted` if all 65535 identifiers are outstanding.
    pub fn next_free(&mut self, in_use: impl Fn(u16) -> bool) -> Result<u16> {
        for _ in 0..u16::MAX {
            let candidate = self.next;
            self.next = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !in_use(candidate) {
                return Ok(candidate);
            }
        }
        Err(MqttError::PacketIdExhausted)
    }

    /// Moves the cursor after `packet_id` so freshly allocated ids follow replayed ones.
    pub fn advance_past(&mut self, packet_id: u16) {
        if packet_id >= self.next {
            self.next = if packet_id == u16::MAX { 1 } else { packet_id + 1 };
        }
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_allocation() {
        let mut ids = PacketIdGenerator::new();
        assert_eq!(ids.next_free(|_| false), Ok(1));
        assert_eq!(ids.next_free(|_| false), Ok(2));
        assert_eq!(ids.next_free(|id| id == 3), Ok(4));
    }

    #[test]
    fn test_wraps_and_skips_zero() {
        let mut ids = PacketIdGenerator::new();
        ids.advance_past(65534);
        assert_eq!(ids.next_free(|_| false), Ok(65535));
        assert_eq!(ids.next_free(|_| false), Ok(1));
    }

    #[test]
    fn test_exhaustion() {
        let mut ids = PacketIdGenerator::new();
        assert_eq!(ids.next_free(|_| true), Err(MqttError::PacketIdExhausted));
    }

    proptest! {
        #[test]
        fn prop_never_returns_outstanding_id(outstanding in prop::collection::hash_set(1u16..=200, 0..150)) {
            let mut ids = PacketIdGenerator::new();
            let mut taken: HashSet<u16> = outstanding;
            for _ in 0..100 {
                let id = ids.next_free(|id| taken.contains(&id)).unwrap();
                prop_assert!(id != 0);
                prop_assert!(taken.insert(id));
            }
        }
    }
}
