//! Allocator metrics.
//!
//! Plain atomics updated on the call path and rendered on demand in Prometheus
//! text format; there is no exporter here, the embedding service serves the text.

pub mod histogram;
pub mod registry;

pub use histogram::{Histogram, HistogramSnapshot, LATENCY_BUCKETS_US};
pub use registry::AllocatorMetrics;
