//! 0-RTT anti-replay (§4.11): a bounded window of recently seen early-data
//! nonces, so a captured 0-RTT packet can't be replayed to re-run a
//! non-idempotent request. Not a cryptographic guarantee by itself — RFC
//! 9001 §9.2 requires the application to tolerate some replay window.

use std::collections::{HashSet, VecDeque};

const DEFAULT_CAPACITY: usize = 1000;

pub struct AntiReplayWindow {
    order: VecDeque<Vec<u8>>,
    seen: HashSet<Vec<u8>>,
    capacity: usize,
}

impl AntiReplayWindow {
    pub fn new(capacity: usize) -> Self {
        Self { order: VecDeque::with_capacity(capacity), seen: HashSet::with_capacity(capacity), capacity }
    }

    /// Returns `true` if `nonce` is new (and is now recorded), `false` if
    /// it's a replay of something still in the window.
    pub fn check_and_insert(&mut self, nonce: &[u8]) -> bool {
        if self.seen.contains(nonce) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(nonce.to_vec());
        self.seen.insert(nonce.to_vec());
        true
    }
}

impl Default for AntiReplayWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_accepted_second_is_rejected() {
        let mut window = AntiReplayWindow::default();
        assert!(window.check_and_insert(b"nonce-1"));
        assert!(!window.check_and_insert(b"nonce-1"));
    }

    #[test]
    fn eviction_allows_a_very_old_nonce_back_in() {
        let mut window = AntiReplayWindow::new(2);
        assert!(window.check_and_insert(b"a"));
        assert!(window.check_and_insert(b"b"));
        assert!(window.check_and_insert(b"c")); // evicts "a"
        assert!(window.check_and_insert(b"a"));
    }
}
