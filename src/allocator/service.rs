use std::path::Path;
use std::sync::Arc;

use crate::allocator::{AllocatorConfig, SequenceAllocator};
use crate::contracts::{AllocError, CounterStore, FormatError, SetupError};
use crate::format::IdentifierFormatter;
use crate::storage::{RocksDbCounterStore, RocksDbStoreConfig};

/// Entry point for entity-creation code: allocates a number and formats it
/// into the identifier stored on the new record.
pub struct IdentifierService<S: CounterStore + 'static> {
    allocator: SequenceAllocator<S>,
    formatter: IdentifierFormatter,
}

impl<S: CounterStore + 'static> IdentifierService<S> {
    pub fn new(allocator: SequenceAllocator<S>, formatter: IdentifierFormatter) -> Self {
        Self {
            allocator,
            formatter,
        }
    }

    pub fn allocator(&self) -> &SequenceAllocator<S> {
        &self.allocator
    }

    pub fn formatter(&self) -> &IdentifierFormatter {
        &self.formatter
    }

    /// Returns a fresh identifier such as `EMP-0007`.
    ///
    /// A namespace without a format rule is rejected before any number is
    /// consumed. A value that cannot be formatted (overflow under the `fail`
    /// policy) is lost; it is never handed out again.
    pub async fn allocate(&self, namespace: &str) -> Result<String, AllocError> {
        self.require_rule(namespace)?;
        let value = self.allocator.next(namespace).await?;
        self.format(namespace, value)
    }

    /// [`allocate`](Self::allocate) through the idempotent path: retrying with
    /// the same key yields the same identifier.
    pub async fn allocate_idempotent(
        &self,
        namespace: &str,
        idempotency_key: &str,
    ) -> Result<String, AllocError> {
        self.require_rule(namespace)?;
        let value = self
            .allocator
            .next_idempotent(namespace, idempotency_key)
            .await?;
        self.format(namespace, value)
    }

    /// Recovers the number inside an identifier issued by this service.
    pub fn parse(&self, namespace: &str, identifier: &str) -> Result<u64, FormatError> {
        self.formatter.parse(namespace, identifier)
    }

    fn require_rule(&self, namespace: &str) -> Result<(), AllocError> {
        if namespace.is_empty() {
            self.allocator.metrics().record_invalid_namespace();
            return Err(AllocError::InvalidNamespace);
        }
        if self.formatter.rule(namespace).is_none() {
            return Err(FormatError::UnknownNamespace(namespace.to_string()).into());
        }
        Ok(())
    }

    fn format(&self, namespace: &str, value: u64) -> Result<String, AllocError> {
        self.formatter.format(namespace, value).map_err(|e| {
            self.allocator.metrics().record_format_failure();
            tracing::error!(
                namespace = %namespace,
                value,
                error = %e,
                "Allocated value cannot be formatted, skipping it"
            );
            AllocError::from(e)
        })
    }
}

impl IdentifierService<RocksDbCounterStore> {
    /// Opens a RocksDB-backed service at `path` using environment settings for
    /// the store and the allocator.
    pub fn open(
        path: impl AsRef<Path>,
        formatter: IdentifierFormatter,
    ) -> Result<Self, SetupError> {
        let store = RocksDbCounterStore::open_with_config(path, RocksDbStoreConfig::from_env())?;
        let allocator = SequenceAllocator::new(Arc::new(store), AllocatorConfig::from_env());
        Ok(Self::new(allocator, formatter))
    }

    /// Everything from the environment: `SEQALLOC_DATA_DIR` (default
    /// `./data/counters`), `SEQALLOC_FORMAT_RULES`, and the store and retry
    /// variables.
    pub fn from_env() -> Result<Self, SetupError> {
        let data_dir =
            std::env::var("SEQALLOC_DATA_DIR").unwrap_or_else(|_| "./data/counters".into());
        let formatter = IdentifierFormatter::from_env()?;
        Self::open(data_dir, formatter)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::format::{FormatRule, OverflowPolicy};
    use crate::storage::{MemoryCounterStore, RetryConfig};

    fn service(formatter: IdentifierFormatter) -> IdentifierService<MemoryCounterStore> {
        let config = AllocatorConfig {
            retry: RetryConfig::none(),
            attempt_timeout: Duration::from_secs(5),
        };
        let allocator = SequenceAllocator::new(Arc::new(MemoryCounterStore::new()), config);
        IdentifierService::new(allocator, formatter)
    }

    #[tokio::test]
    async fn allocates_formatted_identifiers() {
        let service = service(IdentifierFormatter::with_defaults());
        assert_eq!(service.allocate("employee").await.unwrap(), "EMP-0001");
        assert_eq!(service.allocate("employee").await.unwrap(), "EMP-0002");
        assert_eq!(service.allocate("shipment").await.unwrap(), "SHP-0001");
        assert_eq!(service.parse("employee", "EMP-0002").unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_namespace_consumes_nothing() {
        let service = service(IdentifierFormatter::with_defaults());
        let err = service.allocate("invoice").await.unwrap_err();
        assert!(matches!(
            err,
            AllocError::Format(FormatError::UnknownNamespace(_))
        ));
        assert_eq!(service.allocator().current("invoice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_namespace_is_invalid() {
        let service = service(IdentifierFormatter::with_defaults());
        assert!(matches!(
            service.allocate("").await,
            Err(AllocError::InvalidNamespace)
        ));
    }

    #[tokio::test]
    async fn overflow_under_fail_policy_is_reported() {
        let formatter = IdentifierFormatter::new([(
            "sale".to_string(),
            FormatRule::new("S", 1).with_overflow(OverflowPolicy::Fail),
        )])
        .unwrap();
        let service = service(formatter);

        for expected in 1..=9 {
            assert_eq!(service.allocate("sale").await.unwrap(), format!("S{}", expected));
        }
        let err = service.allocate("sale").await.unwrap_err();
        assert!(matches!(
            err,
            AllocError::Format(FormatError::Overflow { value: 10, .. })
        ));
        // The failed value was still consumed
        assert_eq!(service.allocator().current("sale").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn idempotent_allocation_returns_same_identifier() {
        let service = service(IdentifierFormatter::with_defaults());
        let first = service
            .allocate_idempotent("delivery", "create-77")
            .await
            .unwrap();
        let retry = service
            .allocate_idempotent("delivery", "create-77")
            .await
            .unwrap();
        assert_eq!(first, "DLV-0001");
        assert_eq!(retry, first);
        assert_eq!(service.allocate("delivery").await.unwrap(), "DLV-0002");
    }
}
