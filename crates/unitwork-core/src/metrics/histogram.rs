//! Fixed-bucket latency histogram.

use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bounds, in microseconds, of the publication latency buckets.
///
/// Publication runs in-process on the committing thread, so the range is
/// tighter than a network request histogram: 10us up to 250ms.
const PUBLISH_BUCKETS_US: [u64; 10] = [
    10, 50, 100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 250_000,
];

/// Lock-free histogram with non-cumulative bucket counts.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<u64>,
    counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Histogram with the default publication latency buckets.
    pub fn latency() -> Self {
        Self::with_bounds(PUBLISH_BUCKETS_US.to_vec())
    }

    /// Histogram with custom ascending bucket bounds.
    pub fn with_bounds(bounds: Vec<u64>) -> Self {
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record one observation in microseconds.
    pub fn observe(&self, value_us: u64) {
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(value_us, Ordering::Relaxed);

        // Values above the last bound land in the last bucket.
        let idx = self
            .bounds
            .iter()
            .position(|&bound| value_us <= bound)
            .unwrap_or(self.bounds.len().saturating_sub(1));
        if let Some(bucket) = self.counts.get(idx) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations.
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Largest observation.
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Mean observation, 0 when empty.
    pub fn avg(&self) -> u64 {
        match self.count() {
            0 => 0,
            n => self.sum() / n,
        }
    }

    /// Upper bound of the bucket holding the `p` quantile (0.0..=1.0).
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }

        let target = ((total as f64) * p).ceil().max(1.0) as u64;
        let mut seen = 0u64;
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            seen += count.load(Ordering::Relaxed);
            if seen >= target {
                return *bound;
            }
        }
        self.bounds.last().copied().unwrap_or(0)
    }

    /// P50 latency.
    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    /// P99 latency.
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    /// `(bound, count)` per bucket.
    pub fn snapshot(&self) -> Vec<(u64, u64)> {
        self.bounds
            .iter()
            .zip(&self.counts)
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::latency()
    }
}
