//! Rotating ring of explorer API credentials.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct KeyRing {
    keys: Vec<String>,
    /// Monotonic request counter; the active key is derived from it so
    /// rotation needs no lock.
    requests: AtomicUsize,
    rotate_every: usize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>, rotate_every: u32) -> Self {
        Self {
            keys,
            requests: AtomicUsize::new(0),
            rotate_every: (rotate_every as usize).max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key to use for the next request. Advances the per-key budget;
    /// after `rotate_every` uses the next key takes over.
    pub fn current(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let count = self.requests.fetch_add(1, Ordering::Relaxed);
        let index = (count / self.rotate_every) % self.keys.len();
        Some(self.keys[index].clone())
    }

    /// Skips the remainder of the active key's budget, moving straight
    /// to the next key. Used on rate-limit and invalid-key responses.
    pub fn rotate(&self) {
        if self.keys.is_empty() {
            return;
        }
        let count = self.requests.load(Ordering::Relaxed);
        let next_boundary = (count / self.rotate_every + 1) * self.rotate_every;
        self.requests.store(next_boundary, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_after_budget() {
        let ring = KeyRing::new(vec!["a".into(), "b".into()], 2);
        assert_eq!(ring.current().unwrap(), "a");
        assert_eq!(ring.current().unwrap(), "a");
        assert_eq!(ring.current().unwrap(), "b");
        assert_eq!(ring.current().unwrap(), "b");
        // Wraps around.
        assert_eq!(ring.current().unwrap(), "a");
    }

    #[test]
    fn forced_rotation_skips_budget() {
        let ring = KeyRing::new(vec!["a".into(), "b".into()], 100);
        assert_eq!(ring.current().unwrap(), "a");
        ring.rotate();
        assert_eq!(ring.current().unwrap(), "b");
    }

    #[test]
    fn empty_ring_yields_no_key() {
        let ring = KeyRing::new(vec![], 10);
        assert!(ring.current().is_none());
        ring.rotate();
    }
}
