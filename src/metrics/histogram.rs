//! Lock-free latency histogram rendered in Prometheus exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket upper bounds in microseconds.
///
/// An allocation is one committed store round trip, usually well under a
/// millisecond, but retries with backoff can stretch it to seconds.
pub const LATENCY_BUCKETS_US: [u64; 12] = [
    50,         // 50μs
    100,        // 100μs
    250,        // 250μs
    500,        // 500μs
    1_000,      // 1ms
    2_500,      // 2.5ms
    10_000,     // 10ms
    50_000,     // 50ms
    250_000,    // 250ms
    1_000_000,  // 1s
    5_000_000,  // 5s
    30_000_000, // 30s
];

const BUCKET_COUNT: usize = LATENCY_BUCKETS_US.len();

/// Cumulative histogram over [`LATENCY_BUCKETS_US`].
///
/// # Example
///
/// ```
/// use seqalloc::metrics::Histogram;
///
/// let histogram = Histogram::new();
/// histogram.observe(320);
///
/// let snapshot = histogram.snapshot();
/// assert_eq!(snapshot.count, 1);
/// assert_eq!(snapshot.sum, 320);
/// ```
pub struct Histogram {
    sum: AtomicU64,
    count: AtomicU64,
    buckets: [AtomicU64; BUCKET_COUNT],
}

/// Point-in-time copy of a [`Histogram`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub sum: u64,
    pub count: u64,
    /// Cumulative: each entry includes every smaller bucket.
    pub buckets: [u64; BUCKET_COUNT],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Records an observation in microseconds.
    #[inline]
    pub fn observe(&self, value_us: u64) {
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (bucket, &bound) in self.buckets.iter().zip(LATENCY_BUCKETS_US.iter()) {
            if value_us <= bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            sum: self.sum.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            buckets: std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed)),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Appends the histogram to `output` under metric `name`.
    pub fn write_prometheus(&self, output: &mut String, name: &str, help: &str) {
        let snapshot = self.snapshot();

        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for (bound, count) in LATENCY_BUCKETS_US.iter().zip(snapshot.buckets.iter()) {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, count);
        }
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, snapshot.count);
        let _ = writeln!(output, "{}_sum {}", name, snapshot.sum);
        let _ = writeln!(output, "{}_count {}", name, snapshot.count);
    }
}
