//! Observability metrics for the allocator.
//!
//! All counters are lock-free atomics so recording stays off the
//! critical path of a segment advance.

pub mod histogram;
pub mod registry;

pub use histogram::{Histogram, HistogramSnapshot, LATENCY_BUCKETS_US};
pub use registry::{AllocatorMetrics, AllocatorMetricsSnapshot};
