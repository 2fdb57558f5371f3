use std::time::Duration;

use thiserror::Error;

/// Startup failures: opening the store or loading format rules.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Failures of the persistence layer behind a [`CounterStore`](super::CounterStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    RocksDb(String),

    /// Timeouts, lock contention, connection resets. Safe to retry.
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Corrupt counter record: {0}")]
    Corrupt(String),

    #[error("Counter overflow")]
    Overflow,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the whole atomic operation may be attempted again.
    ///
    /// Only failures that leave the counter either untouched or advanced by
    /// exactly one committed increment qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }
}

/// Errors returned to entity-creation callers.
#[derive(Error, Debug)]
pub enum AllocError {
    #[error("Namespace must not be empty")]
    InvalidNamespace,

    #[error("Idempotency key must not be empty")]
    InvalidIdempotencyKey,

    #[error("Store unavailable for namespace {namespace} after {attempts} attempt(s): {source}")]
    StoreUnavailable {
        namespace: String,
        attempts: usize,
        #[source]
        source: StoreError,
    },

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

impl AllocError {
    /// Whether the caller may retry the entity-creation request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocError::StoreUnavailable { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("No identifier format configured for namespace {0}")]
    UnknownNamespace(String),

    #[error("Value {value} exceeds {width} digits for namespace {namespace}")]
    Overflow {
        namespace: String,
        value: u64,
        width: usize,
    },

    #[error("Invalid format configuration: {0}")]
    Config(String),

    #[error("Invalid format rule for namespace {namespace}: {reason}")]
    InvalidRule { namespace: String, reason: String },

    #[error("Malformed identifier {identifier:?} for namespace {namespace}")]
    Malformed {
        namespace: String,
        identifier: String,
    },
}
