//! Adaptive chunk sizing for helper-contract batches.

/// Grows slowly on sustained success, shrinks sharply on failure.
#[derive(Clone, Debug)]
pub struct AdaptiveChunker {
    size: usize,
    consecutive_successes: u32,
    floor: usize,
    ceiling: usize,
}

/// Growth kicks in after this many clean chunks in a row.
const GROW_AFTER: u32 = 3;
const GROW_STEP: usize = 50;
const SHRINK_FACTOR: f64 = 0.6;

impl Default for AdaptiveChunker {
    fn default() -> Self {
        Self::new(200, 20, 500)
    }
}

impl AdaptiveChunker {
    pub fn new(start: usize, floor: usize, ceiling: usize) -> Self {
        let floor = floor.max(1);
        let ceiling = ceiling.max(floor);
        Self {
            size: start.clamp(floor, ceiling),
            consecutive_successes: 0,
            floor,
            ceiling,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn at_floor(&self) -> bool {
        self.size == self.floor
    }

    pub fn record_success(&mut self) {
        self.consecutive_successes += 1;
        if self.consecutive_successes >= GROW_AFTER {
            self.consecutive_successes = 0;
            self.size = (self.size + GROW_STEP).min(self.ceiling);
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let shrunk = (self.size as f64 * SHRINK_FACTOR) as usize;
        self.size = shrunk.max(self.floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_after_three_successes() {
        let mut chunker = AdaptiveChunker::default();
        assert_eq!(chunker.size(), 200);
        chunker.record_success();
        chunker.record_success();
        assert_eq!(chunker.size(), 200);
        chunker.record_success();
        assert_eq!(chunker.size(), 250);
    }

    #[test]
    fn growth_is_capped() {
        let mut chunker = AdaptiveChunker::default();
        for _ in 0..100 {
            chunker.record_success();
        }
        assert_eq!(chunker.size(), 500);
    }

    #[test]
    fn shrinks_to_sixty_percent_with_floor() {
        let mut chunker = AdaptiveChunker::default();
        chunker.record_failure();
        assert_eq!(chunker.size(), 120);
        for _ in 0..20 {
            chunker.record_failure();
        }
        assert_eq!(chunker.size(), 20);
        assert!(chunker.at_floor());
    }

    #[test]
    fn failure_resets_success_streak() {
        let mut chunker = AdaptiveChunker::default();
        chunker.record_success();
        chunker.record_success();
        chunker.record_failure();
        chunker.record_success();
        chunker.record_success();
        // Only two successes since the failure: no growth yet.
        assert_eq!(chunker.size(), 120);
    }

    #[test]
    fn size_one_floor_never_shrinks_further() {
        let mut chunker = AdaptiveChunker::new(1, 1, 1);
        chunker.record_failure();
        assert_eq!(chunker.size(), 1);
    }
}
