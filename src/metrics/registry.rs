//! Allocation counters and latency.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::Histogram;

/// Observability for a [`SequenceAllocator`](crate::allocator::SequenceAllocator).
///
/// One instance is usually shared by every allocator in the process.
#[derive(Default)]
pub struct AllocatorMetrics {
    /// Values handed to callers, replays excluded
    pub allocations_total: AtomicU64,
    /// Idempotent calls answered on their first attempt with a value issued by
    /// an earlier call
    pub idempotent_replays_total: AtomicU64,
    /// Store attempts repeated after a retryable failure
    pub retries_total: AtomicU64,
    /// Calls that ended in StoreUnavailable
    pub store_failures_total: AtomicU64,
    /// Calls rejected for an empty namespace or idempotency key
    pub invalid_namespace_total: AtomicU64,
    /// Values allocated but not formattable
    pub format_failures_total: AtomicU64,
    /// End-to-end latency of successful calls, retries included
    pub allocate_latency_us: Histogram,
    per_namespace: DashMap<String, u64>,
}

impl AllocatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_allocation(&self, namespace: &str, latency_us: u64) {
        self.allocations_total.fetch_add(1, Ordering::Relaxed);
        self.allocate_latency_us.observe(latency_us);
        *self
            .per_namespace
            .entry(namespace.to_string())
            .or_insert(0) += 1;
    }

    #[inline]
    pub fn record_replay(&self, latency_us: u64) {
        self.idempotent_replays_total.fetch_add(1, Ordering::Relaxed);
        self.allocate_latency_us.observe(latency_us);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_failure(&self) {
        self.store_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_namespace(&self) {
        self.invalid_namespace_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_format_failure(&self) {
        self.format_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Values issued so far by this process for `namespace`.
    pub fn allocations_for(&self, namespace: &str) -> u64 {
        self.per_namespace.get(namespace).map(|v| *v).unwrap_or(0)
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        let counters = [
            (
                "seqalloc_allocations_total",
                "Sequence values issued to callers",
                &self.allocations_total,
            ),
            (
                "seqalloc_idempotent_replays_total",
                "Idempotent calls answered with a value issued by an earlier call",
                &self.idempotent_replays_total,
            ),
            (
                "seqalloc_retries_total",
                "Store attempts retried after a transient failure",
                &self.retries_total,
            ),
            (
                "seqalloc_store_failures_total",
                "Calls that failed with the store unavailable",
                &self.store_failures_total,
            ),
            (
                "seqalloc_invalid_namespace_total",
                "Calls rejected for an empty namespace or key",
                &self.invalid_namespace_total,
            ),
            (
                "seqalloc_format_failures_total",
                "Allocated values that could not be formatted",
                &self.format_failures_total,
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value.load(Ordering::Relaxed));
            output.push('\n');
        }

        let mut namespaces: Vec<(String, u64)> = self
            .per_namespace
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        namespaces.sort();
        if !namespaces.is_empty() {
            let _ = writeln!(
                output,
                "# HELP seqalloc_namespace_allocations_total Sequence values issued per namespace"
            );
            let _ = writeln!(output, "# TYPE seqalloc_namespace_allocations_total counter");
            for (namespace, count) in namespaces {
                let _ = writeln!(
                    output,
                    "seqalloc_namespace_allocations_total{{namespace=\"{}\"}} {}",
                    escape_label(&namespace),
                    count
                );
            }
            output.push('\n');
        }

        self.allocate_latency_us.write_prometheus(
            &mut output,
            "seqalloc_allocate_latency_us",
            "Allocation latency in microseconds, retries included",
        );

        output
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
