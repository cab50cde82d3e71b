//! Counters for the segment allocator.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::Histogram;

/// Allocator-wide counters, updated with relaxed atomics on every call.
#[derive(Default)]
pub struct AllocatorMetrics {
    /// Groups created by `build_info`
    pub builds_total: AtomicU64,
    /// `build_info` calls for groups that already existed
    pub builds_skipped_total: AtomicU64,
    /// `get` calls that reached the store
    pub gets_total: AtomicU64,
    /// Segments handed out by `propel`
    pub propels_total: AtomicU64,
    /// `propel` calls for groups that do not exist
    pub propels_skipped_total: AtomicU64,
    /// Pool checkouts that timed out
    pub pool_timeouts_total: AtomicU64,
    /// Store calls that failed
    pub store_errors_total: AtomicU64,
    /// Calls rejected before any I/O
    pub validation_errors_total: AtomicU64,
    /// Latency of successful `propel` calls, sign wait included
    pub propel_latency_us: Histogram,
}

/// Plain copy of the counters, for logging and JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorMetricsSnapshot {
    pub builds_total: u64,
    pub builds_skipped_total: u64,
    pub gets_total: u64,
    pub propels_total: u64,
    pub propels_skipped_total: u64,
    pub pool_timeouts_total: u64,
    pub store_errors_total: u64,
    pub validation_errors_total: u64,
}

impl AllocatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_build(&self, created: bool) {
        if created {
            self.builds_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.builds_skipped_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_get(&self) {
        self.gets_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_propel(&self, elapsed: Duration) {
        self.propels_total.fetch_add(1, Ordering::Relaxed);
        self.propel_latency_us.observe(elapsed);
    }

    #[inline]
    pub fn record_propel_skipped(&self) {
        self.propels_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pool_timeout(&self) {
        self.pool_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_error(&self) {
        self.store_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_validation_error(&self) {
        self.validation_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AllocatorMetricsSnapshot {
        AllocatorMetricsSnapshot {
            builds_total: self.builds_total.load(Ordering::Relaxed),
            builds_skipped_total: self.builds_skipped_total.load(Ordering::Relaxed),
            gets_total: self.gets_total.load(Ordering::Relaxed),
            propels_total: self.propels_total.load(Ordering::Relaxed),
            propels_skipped_total: self.propels_skipped_total.load(Ordering::Relaxed),
            pool_timeouts_total: self.pool_timeouts_total.load(Ordering::Relaxed),
            store_errors_total: self.store_errors_total.load(Ordering::Relaxed),
            validation_errors_total: self.validation_errors_total.load(Ordering::Relaxed),
        }
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("idcenter_builds_total", "Groups created", s.builds_total),
            (
                "idcenter_builds_skipped_total",
                "Build requests for existing groups",
                s.builds_skipped_total,
            ),
            ("idcenter_gets_total", "Group reads", s.gets_total),
            ("idcenter_propels_total", "Segments handed out", s.propels_total),
            (
                "idcenter_propels_skipped_total",
                "Propel requests for missing groups",
                s.propels_skipped_total,
            ),
            (
                "idcenter_pool_timeouts_total",
                "Connection pool checkouts that timed out",
                s.pool_timeouts_total,
            ),
            (
                "idcenter_store_errors_total",
                "Failed store calls",
                s.store_errors_total,
            ),
            (
                "idcenter_validation_errors_total",
                "Requests rejected before any I/O",
                s.validation_errors_total,
            ),
        ];

        let mut output = String::with_capacity(2048);
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value);
            output.push('\n');
        }
        output.push_str(&self.propel_latency_us.format_prometheus(
            "idcenter_propel_latency_us",
            "Latency of successful propel calls in microseconds",
        ));
        output
    }
}
