//! The sequence allocator.
//!
//! `next(namespace)` is a single atomic increment-and-fetch against the store,
//! retried on transient failures. There is no in-process lock and no cached
//! counter value: two instances sharing one store stay collision-free because
//! the store alone decides each value.

mod service;

pub use service::IdentifierService;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::Retryable;

use crate::contracts::{AllocError, Counter, CounterStore, StoreError};
use crate::metrics::AllocatorMetrics;
use crate::storage::retry::parse_var;
use crate::storage::RetryConfig;

/// Configuration for the sequence allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Backoff between attempts of the same call
    pub retry: RetryConfig,
    /// Upper bound on one store round trip
    pub attempt_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            attempt_timeout: Duration::from_millis(2_000),
        }
    }
}

impl AllocatorConfig {
    /// Reads the retry variables (see [`RetryConfig::from_env`]) plus
    /// `SEQALLOC_ATTEMPT_TIMEOUT_MS` (default: 2000).
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        Self {
            retry: RetryConfig::from_vars(&lookup),
            attempt_timeout: parse_var(&lookup, "SEQALLOC_ATTEMPT_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default.attempt_timeout),
        }
    }
}

/// Hands out strictly increasing numbers per namespace.
pub struct SequenceAllocator<S: CounterStore + 'static> {
    store: Arc<S>,
    config: AllocatorConfig,
    metrics: Arc<AllocatorMetrics>,
}

impl<S: CounterStore + 'static> SequenceAllocator<S> {
    pub fn new(store: Arc<S>, config: AllocatorConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(AllocatorMetrics::new()),
        }
    }

    /// Shares an existing metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<AllocatorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<AllocatorMetrics> {
        &self.metrics
    }

    /// Returns the next value for `namespace`; 1 for a namespace never used.
    ///
    /// The value has been committed by the store before it is returned. If an
    /// attempt times out after the store committed it, the retry receives the
    /// following number and the timed-out one is never issued: a gap, never a
    /// duplicate.
    pub async fn next(&self, namespace: &str) -> Result<u64, AllocError> {
        self.check_namespace(namespace)?;
        let started = Instant::now();

        let name: Arc<str> = Arc::from(namespace);
        let value = self
            .with_retry(namespace, move |store: &S| store.increment_and_fetch(&name))
            .await?;

        self.metrics.record_allocation(namespace, elapsed_us(started));
        tracing::debug!(namespace = %namespace, value, "Issued sequence value");
        Ok(value)
    }

    /// Like [`next`](Self::next), but repeating a call with the same key returns
    /// the value issued the first time. Lets callers retry an entity creation
    /// without skipping a number.
    pub async fn next_idempotent(
        &self,
        namespace: &str,
        idempotency_key: &str,
    ) -> Result<u64, AllocError> {
        self.check_namespace(namespace)?;
        if idempotency_key.is_empty() {
            self.metrics.record_invalid_namespace();
            return Err(AllocError::InvalidIdempotencyKey);
        }
        let started = Instant::now();

        let name: Arc<str> = Arc::from(namespace);
        let key: Arc<str> = Arc::from(idempotency_key);
        let (allocation, attempts) = self
            .retry_counted(namespace, move |store: &S| {
                store.increment_and_fetch_idempotent(&name, &key)
            })
            .await?;

        // A replay after a failed attempt of this same call is most likely that
        // attempt's own commit, so it is counted as the allocation.
        if allocation.replayed && attempts == 1 {
            self.metrics.record_replay(elapsed_us(started));
            tracing::debug!(
                namespace = %namespace,
                value = allocation.value,
                "Replayed sequence value for idempotency key"
            );
        } else {
            self.metrics.record_allocation(namespace, elapsed_us(started));
            tracing::debug!(
                namespace = %namespace,
                value = allocation.value,
                attempts,
                "Issued sequence value"
            );
        }
        Ok(allocation.value)
    }

    /// Last value issued for `namespace`, or None if it was never used.
    pub async fn current(&self, namespace: &str) -> Result<Option<u64>, AllocError> {
        self.check_namespace(namespace)?;
        let name: Arc<str> = Arc::from(namespace);
        self.with_retry(namespace, move |store: &S| store.current(&name))
            .await
    }

    /// Every namespace with its last issued value.
    pub async fn counters(&self) -> Result<Vec<Counter>, AllocError> {
        self.with_retry("*", |store: &S| store.counters()).await
    }

    fn check_namespace(&self, namespace: &str) -> Result<(), AllocError> {
        if namespace.is_empty() {
            self.metrics.record_invalid_namespace();
            return Err(AllocError::InvalidNamespace);
        }
        Ok(())
    }

    async fn with_retry<T, F>(&self, namespace: &str, op: F) -> Result<T, AllocError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StoreError> + Clone + Send + Sync + 'static,
    {
        self.retry_counted(namespace, op).await.map(|(value, _)| value)
    }

    /// Runs `op` on the blocking pool, bounded by the attempt timeout, and
    /// retries retryable failures with backoff. Returns the result together
    /// with the number of attempts it took.
    async fn retry_counted<T, F>(&self, namespace: &str, op: F) -> Result<(T, usize), AllocError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StoreError> + Clone + Send + Sync + 'static,
    {
        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;
        let store = &self.store;
        let timeout = self.config.attempt_timeout;

        let result = (move || {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            run_attempt(Arc::clone(store), op.clone(), timeout)
        })
        .retry(self.config.retry.backoff())
        .when(StoreError::is_retryable)
        .notify(|err: &StoreError, dur: Duration| {
            self.metrics.record_retry();
            tracing::warn!(
                namespace = %namespace,
                error = %err,
                retry_in = ?dur,
                "Counter store attempt failed, retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        result.map(|value| (value, attempts)).map_err(|source| {
            self.metrics.record_store_failure();
            tracing::error!(
                namespace = %namespace,
                attempts,
                error = %source,
                "Counter store unavailable"
            );
            AllocError::StoreUnavailable {
                namespace: namespace.to_string(),
                attempts,
                source,
            }
        })
    }
}

async fn run_attempt<S, T, F>(store: Arc<S>, op: F, timeout: Duration) -> Result<T, StoreError>
where
    S: CounterStore + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(StoreError::Internal(format!("store task failed: {}", e))),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::contracts::Allocation;
    use crate::storage::MemoryCounterStore;

    fn fast_config(max_retries: usize) -> AllocatorConfig {
        AllocatorConfig {
            retry: RetryConfig {
                max_retries,
                initial_delay_ms: 1,
                max_delay_ms: 5,
            },
            attempt_timeout: Duration::from_secs(5),
        }
    }

    /// Fails the first `failures` increments with a transient error.
    struct FlakyStore {
        inner: MemoryCounterStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryCounterStore::new(),
                failures: AtomicU32::new(failures),
            }
        }

        fn fail_once(&self) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Transient("connection reset".into()));
            }
            Ok(())
        }
    }

    impl CounterStore for FlakyStore {
        fn increment_and_fetch(&self, name: &str) -> Result<u64, StoreError> {
            self.fail_once()?;
            self.inner.increment_and_fetch(name)
        }

        fn increment_and_fetch_idempotent(
            &self,
            name: &str,
            key: &str,
        ) -> Result<Allocation, StoreError> {
            self.fail_once()?;
            self.inner.increment_and_fetch_idempotent(name, key)
        }

        fn current(&self, name: &str) -> Result<Option<u64>, StoreError> {
            self.inner.current(name)
        }

        fn counters(&self) -> Result<Vec<Counter>, StoreError> {
            self.inner.counters()
        }
    }

    #[tokio::test]
    async fn fresh_namespace_starts_at_one() {
        let allocator =
            SequenceAllocator::new(Arc::new(MemoryCounterStore::new()), fast_config(0));
        assert_eq!(allocator.next("employee").await.unwrap(), 1);
        assert_eq!(allocator.next("employee").await.unwrap(), 2);
        assert_eq!(allocator.current("employee").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn empty_namespace_is_rejected_without_touching_store() {
        let store = Arc::new(FlakyStore::new(0));
        let allocator = SequenceAllocator::new(Arc::clone(&store), fast_config(3));

        let err = allocator.next("").await.unwrap_err();
        assert!(matches!(err, AllocError::InvalidNamespace));
        assert!(store.counters().unwrap().is_empty());
        assert_eq!(
            allocator
                .metrics()
                .invalid_namespace_total
                .load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let allocator = SequenceAllocator::new(store, fast_config(3));

        assert_eq!(allocator.next("shipment").await.unwrap(), 1);
        assert_eq!(
            allocator.metrics().retries_total.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn exhausted_retries_surface_store_unavailable() {
        let store = Arc::new(FlakyStore::new(10));
        let allocator = SequenceAllocator::new(Arc::clone(&store), fast_config(2));

        match allocator.next("shipment").await {
            Err(AllocError::StoreUnavailable {
                namespace,
                attempts,
                source,
            }) => {
                assert_eq!(namespace, "shipment");
                assert_eq!(attempts, 3);
                assert!(source.is_retryable());
            }
            other => panic!("expected StoreUnavailable, got {:?}", other),
        }
        assert_eq!(store.current("shipment").unwrap(), None);
    }

    #[tokio::test]
    async fn idempotent_calls_replay() {
        let allocator =
            SequenceAllocator::new(Arc::new(MemoryCounterStore::new()), fast_config(0));
        let first = allocator.next_idempotent("sale", "req-1").await.unwrap();
        let again = allocator.next_idempotent("sale", "req-1").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(allocator.next("sale").await.unwrap(), first + 1);

        let metrics = allocator.metrics();
        assert_eq!(metrics.allocations_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.idempotent_replays_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn empty_idempotency_key_is_rejected() {
        let allocator =
            SequenceAllocator::new(Arc::new(MemoryCounterStore::new()), fast_config(0));
        let err = allocator.next_idempotent("sale", "").await.unwrap_err();
        assert!(matches!(err, AllocError::InvalidIdempotencyKey));
    }

    #[tokio::test]
    async fn counters_lists_namespaces() {
        let allocator =
            SequenceAllocator::new(Arc::new(MemoryCounterStore::new()), fast_config(0));
        allocator.next("b").await.unwrap();
        allocator.next("a").await.unwrap();
        let names: Vec<String> = allocator
            .counters()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn config_from_vars() {
        let map: HashMap<&str, &str> = [
            ("SEQALLOC_MAX_RETRIES", "2"),
            ("SEQALLOC_ATTEMPT_TIMEOUT_MS", "750"),
        ]
        .into_iter()
        .collect();
        let config = AllocatorConfig::from_vars(|k| map.get(k).map(|v| v.to_string()));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.attempt_timeout, Duration::from_millis(750));

        let config = AllocatorConfig::from_vars(|_| Some("0".to_string()));
        assert_eq!(config.attempt_timeout, Duration::from_millis(2_000));
        assert_eq!(config.retry.max_retries, 0);
    }
}
