use serde::{Deserialize, Serialize};

use crate::contracts::error::StoreError;

/// Persistent per-namespace counters.
///
/// # Invariants
/// - At most one record per name; the store enforces it, not the caller
/// - A record's value never decreases and is only changed by an increment
/// - Each successful increment returns a value no other call has received
/// - A returned value has been durably committed
pub trait CounterStore: Send + Sync {
    /// Creates the record with value 0 if absent, increments it, and returns
    /// the new value, all as one indivisible step.
    fn increment_and_fetch(&self, name: &str) -> Result<u64, StoreError>;

    /// Like [`increment_and_fetch`](Self::increment_and_fetch), but a key that was
    /// already recorded for `name` returns its earlier value without advancing the
    /// counter.
    ///
    /// Key records are never expired, so storage grows with every distinct key.
    /// Use keys for operations that may be retried, not for every allocation.
    fn increment_and_fetch_idempotent(
        &self,
        name: &str,
        idempotency_key: &str,
    ) -> Result<Allocation, StoreError>;

    /// Returns the last issued value, or None if the namespace was never used.
    fn current(&self, name: &str) -> Result<Option<u64>, StoreError>;

    /// Returns every counter, sorted by name.
    fn counters(&self) -> Result<Vec<Counter>, StoreError>;
}

/// A counter record as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub value: u64,
}

/// Result of an idempotent increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub value: u64,
    /// True when the key had already been issued a value.
    pub replayed: bool,
}
