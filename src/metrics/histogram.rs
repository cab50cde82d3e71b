//! Lock-free latency histogram.
//!
//! Buckets are cumulative so the output feeds Prometheus'
//! `histogram_quantile()` directly.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bucket upper bounds in microseconds.
/// Segment advances pay for a synced write, so the range reaches one second.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    50,        // 50μs
    100,       // 100μs
    250,       // 250μs
    500,       // 500μs
    1_000,     // 1ms
    2_500,     // 2.5ms
    10_000,    // 10ms
    50_000,    // 50ms
    100_000,   // 100ms
    1_000_000, // 1s
];

const BUCKETS: usize = LATENCY_BUCKETS_US.len();

/// Point-in-time copy of a [`Histogram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub sum_us: u64,
    pub count: u64,
    /// Cumulative counts, one per entry of [`LATENCY_BUCKETS_US`].
    pub buckets: [u64; BUCKETS],
}

/// Thread-safe latency histogram.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use idcenter::metrics::Histogram;
///
/// let histogram = Histogram::new();
/// histogram.observe(Duration::from_micros(150));
///
/// let snapshot = histogram.snapshot();
/// assert_eq!(snapshot.count, 1);
/// assert_eq!(snapshot.sum_us, 150);
/// ```
pub struct Histogram {
    sum_us: AtomicU64,
    count: AtomicU64,
    buckets: [AtomicU64; BUCKETS],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    #[allow(clippy::declare_interior_mutable_const)]
    pub fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
            buckets: [ZERO; BUCKETS],
        }
    }

    /// Records one observation.
    #[inline]
    pub fn observe(&self, elapsed: Duration) {
        let value_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (bucket, &bound) in self.buckets.iter().zip(LATENCY_BUCKETS_US.iter()) {
            if value_us <= bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut buckets = [0u64; BUCKETS];
        for (slot, bucket) in buckets.iter_mut().zip(self.buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }

        HistogramSnapshot {
            sum_us: self.sum_us.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            buckets,
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Formats the histogram in Prometheus exposition format.
    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let snapshot = self.snapshot();
        let mut output = String::with_capacity(1024);

        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for (count, bound) in snapshot.buckets.iter().zip(LATENCY_BUCKETS_US.iter()) {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, count);
        }
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, snapshot.count);
        let _ = writeln!(output, "{}_sum {}", name, snapshot.sum_us);
        let _ = writeln!(output, "{}_count {}", name, snapshot.count);

        output
    }
}
