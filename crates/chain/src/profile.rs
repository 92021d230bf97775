//! Scan profiles: how aggressively the log scanner may batch block
//! ranges, derived from chain activity crossed with the gateway tier.

use {
    crate::{Chain, Tier},
    std::time::Duration,
};

/// Rough ERC-20 transfer traffic class of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    High,
    Medium,
    Low,
}

/// Tuning parameters for adaptive `eth_getLogs` batching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanProfile {
    /// Block span of the first request.
    pub initial_batch: u64,
    /// The scanner never shrinks below this span.
    pub min_batch: u64,
    /// The scanner never grows beyond this span (further capped by the
    /// chain's tier span limit).
    pub max_batch: u64,
    /// Per-request duration the batcher steers towards.
    pub target_duration: Duration,
    /// Log count per request the batcher steers towards.
    pub target_results: usize,
}

impl ScanProfile {
    pub fn select(chain: Chain, tier: Tier) -> Self {
        let profile = match (chain.activity(), tier) {
            (Activity::High, Tier::Free) => Self {
                initial_batch: 40,
                min_batch: 5,
                max_batch: 400,
                target_duration: Duration::from_secs(6),
                target_results: 5_000,
            },
            (Activity::High, Tier::Premium) => Self {
                initial_batch: 200,
                min_batch: 10,
                max_batch: 2_000,
                target_duration: Duration::from_secs(4),
                target_results: 8_000,
            },
            (Activity::Medium, Tier::Free) => Self {
                initial_batch: 100,
                min_batch: 10,
                max_batch: 1_000,
                target_duration: Duration::from_secs(6),
                target_results: 5_000,
            },
            (Activity::Medium, Tier::Premium) => Self {
                initial_batch: 500,
                min_batch: 20,
                max_batch: 5_000,
                target_duration: Duration::from_secs(4),
                target_results: 8_000,
            },
            (Activity::Low, Tier::Free) => Self {
                initial_batch: 200,
                min_batch: 20,
                max_batch: 2_000,
                target_duration: Duration::from_secs(8),
                target_results: 4_000,
            },
            (Activity::Low, Tier::Premium) => Self {
                initial_batch: 1_000,
                min_batch: 50,
                max_batch: 10_000,
                target_duration: Duration::from_secs(6),
                target_results: 8_000,
            },
        };
        profile.capped(chain.log_span_cap(tier))
    }

    /// Clamps the profile to the gateway's hard span cap.
    fn capped(mut self, cap: u64) -> Self {
        self.max_batch = self.max_batch.min(cap);
        self.initial_batch = self.initial_batch.min(self.max_batch);
        self.min_batch = self.min_batch.min(self.initial_batch);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_ordered() {
        for &chain in Chain::variants() {
            for tier in [Tier::Free, Tier::Premium] {
                let profile = ScanProfile::select(chain, tier);
                assert!(profile.min_batch <= profile.initial_batch);
                assert!(profile.initial_batch <= profile.max_batch);
                assert!(profile.max_batch <= chain.log_span_cap(tier));
            }
        }
    }

    #[test]
    fn default_cap_shrinks_unknown_chains() {
        // Gnosis has no measured span table entry, so even premium may
        // not exceed the conservative default.
        let profile = ScanProfile::select(Chain::Gnosis, Tier::Premium);
        assert_eq!(profile.max_batch, crate::DEFAULT_LOG_SPAN_CAP);
    }
}
