//! Prefetch cache statistics.

use std::time::Duration;

/// Counters describing a [`PreCache`](crate::execution::PreCache) so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Batches finished by workers (including failures).
    pub produced: u64,
    /// Batches handed to consumers from the cache.
    pub consumed: u64,
    /// Worker calls that ended in an error.
    pub failed: u64,
    /// Requests served by a direct upstream call, bypassing the cache.
    pub bypassed: u64,
    /// Approximate bytes held by finished, unconsumed batches.
    pub resident_bytes: usize,
    /// Total time consumers spent waiting for a batch.
    pub time_waited: Duration,
}

impl CacheStats {
    /// Fraction of requests served from the cache.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.consumed + self.bypassed;
        if total == 0 {
            return 0.0;
        }
        self.consumed as f64 / total as f64
    }

    /// Fraction of worker calls that failed.
    pub fn failure_ratio(&self) -> f64 {
        if self.produced == 0 {
            return 0.0;
        }
        self.failed as f64 / self.produced as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios() {
        let stats = CacheStats {
            produced: 10,
            consumed: 3,
            failed: 1,
            bypassed: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_ratio(), 0.75);
        assert_eq!(stats.failure_ratio(), 0.1);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
