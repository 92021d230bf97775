//! Adaptive block-range sizing for `eth_getLogs`, steered by two
//! signals per request: how long the gateway took and how many logs
//! came back.

use {chain::ScanProfile, std::time::Duration};

const FAST_MULTIPLIER: f64 = 1.8;
const SLOW_MULTIPLIER: f64 = 0.5;
/// Preemptive shrink once a response fills this share of the result
/// target: the next range would likely blow past the gateway cap.
const RESULT_PRESSURE: f64 = 0.8;

#[derive(Clone, Debug)]
pub struct AdaptiveBatcher {
    size: u64,
    profile: ScanProfile,
}

impl AdaptiveBatcher {
    pub fn new(profile: ScanProfile) -> Self {
        Self {
            size: profile.initial_batch,
            profile,
        }
    }

    /// Current block span per request. Always within the profile's
    /// bounds (which are already capped by the gateway tier).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Feedback from a successful request.
    pub fn adjust(&mut self, duration: Duration, results: usize) {
        let target = self.profile.target_duration.as_secs_f64();
        let took = duration.as_secs_f64();

        let factor = if took < target / 3.0 {
            FAST_MULTIPLIER
        } else if took < target {
            (target / took.max(0.001)).min(1.5)
        } else if took > target * 1.5 {
            // Covers the "very slow" (> 3x) case too.
            SLOW_MULTIPLIER
        } else {
            1.0
        };
        self.scale(factor);

        #[allow(clippy::cast_precision_loss)]
        if results as f64 > self.profile.target_results as f64 * RESULT_PRESSURE {
            self.scale(0.8);
        }
    }

    /// Halves the range after a failure. Failure shrinks may undercut
    /// the profile minimum all the way to a single block, which is what
    /// lets a poison block be isolated and excluded.
    pub fn shrink_half(&mut self) {
        self.size = (self.size / 2).max(1);
    }

    /// Aggressive shrink for oversized responses.
    pub fn shrink_slow(&mut self) {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let shrunk = (self.size as f64 * SLOW_MULTIPLIER).round() as u64;
        self.size = shrunk.max(1);
    }

    /// Adopts a gateway-suggested span. The suggestion may undercut the
    /// profile minimum; the gateway knows its own limits best.
    pub fn shrink_to(&mut self, span: u64) {
        self.size = span.clamp(1, self.profile.max_batch);
    }

    /// Success-path scaling keeps the profile bounds: recovering from a
    /// failure-driven shrink climbs back above the minimum here.
    fn scale(&mut self, factor: f64) {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (self.size as f64 * factor).round() as u64;
        self.size = scaled.clamp(self.profile.min_batch.max(1), self.profile.max_batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ScanProfile {
        ScanProfile {
            initial_batch: 100,
            min_batch: 10,
            max_batch: 1_000,
            target_duration: Duration::from_secs(6),
            target_results: 5_000,
        }
    }

    #[test]
    fn very_fast_grows_aggressively() {
        let mut batcher = AdaptiveBatcher::new(profile());
        batcher.adjust(Duration::from_secs(1), 100);
        assert_eq!(batcher.size(), 180);
    }

    #[test]
    fn fast_grows_proportionally_capped() {
        let mut batcher = AdaptiveBatcher::new(profile());
        // 4s against a 6s target: 1.5x cap applies.
        batcher.adjust(Duration::from_secs(4), 100);
        assert_eq!(batcher.size(), 150);
    }

    #[test]
    fn slow_halves() {
        let mut batcher = AdaptiveBatcher::new(profile());
        batcher.adjust(Duration::from_secs(10), 100);
        assert_eq!(batcher.size(), 50);
    }

    #[test]
    fn on_target_holds() {
        let mut batcher = AdaptiveBatcher::new(profile());
        batcher.adjust(Duration::from_secs(7), 100);
        assert_eq!(batcher.size(), 100);
    }

    #[test]
    fn result_pressure_shrinks_preemptively() {
        let mut batcher = AdaptiveBatcher::new(profile());
        // On-target duration but a nearly full result set.
        batcher.adjust(Duration::from_secs(7), 5_000);
        assert_eq!(batcher.size(), 80);
    }

    #[test]
    fn adaptive_adjustments_respect_profile_bounds() {
        let mut batcher = AdaptiveBatcher::new(profile());
        for _ in 0..50 {
            batcher.adjust(Duration::from_millis(10), 0);
            assert!(batcher.size() <= 1_000);
        }
        assert_eq!(batcher.size(), 1_000);
        for _ in 0..50 {
            batcher.adjust(Duration::from_secs(60), 0);
            assert!(batcher.size() >= 10);
        }
        assert_eq!(batcher.size(), 10);
    }

    #[test]
    fn failure_shrinks_can_isolate_a_single_block() {
        let mut batcher = AdaptiveBatcher::new(profile());
        for _ in 0..20 {
            batcher.shrink_half();
        }
        assert_eq!(batcher.size(), 1);
        // A clean request afterwards climbs back into profile bounds.
        batcher.adjust(Duration::from_secs(1), 0);
        assert!(batcher.size() >= 10);
    }

    #[test]
    fn gateway_suggestion_may_undercut_minimum() {
        let mut batcher = AdaptiveBatcher::new(profile());
        batcher.shrink_to(3);
        assert_eq!(batcher.size(), 3);
        batcher.shrink_to(10_000);
        assert_eq!(batcher.size(), 1_000);
    }
}
