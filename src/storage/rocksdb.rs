use std::path::Path;

use rocksdb::{
    Direction, ErrorKind, IteratorMode, Options, Transaction, TransactionDB,
    TransactionDBOptions, TransactionOptions, WriteOptions,
};

use crate::contracts::{Allocation, Counter, CounterStore, StoreError};
use crate::storage::retry::parse_var;

/// Key prefix for counter records
const COUNTER_PREFIX: &str = "ctr";
/// Key prefix for idempotency tracking
const IDEM_PREFIX: &str = "idem";

/// Settings for [`RocksDbCounterStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RocksDbStoreConfig {
    /// How long a transaction waits for the row lock before failing with a
    /// retryable timeout.
    pub lock_timeout_ms: i64,
    /// fsync the WAL on every commit. Without it a committed value survives a
    /// process crash but not an OS crash.
    pub sync_writes: bool,
}

impl Default for RocksDbStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 1_000,
            sync_writes: true,
        }
    }
}

impl RocksDbStoreConfig {
    /// Environment variables:
    /// - `SEQALLOC_LOCK_TIMEOUT_MS` (default: 1000)
    /// - `SEQALLOC_SYNC_WRITES` (default: true)
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        Self {
            lock_timeout_ms: parse_var(&lookup, "SEQALLOC_LOCK_TIMEOUT_MS")
                .filter(|ms: &i64| *ms > 0)
                .unwrap_or(default.lock_timeout_ms),
            sync_writes: lookup("SEQALLOC_SYNC_WRITES")
                .map(|v| !is_explicit_false(&v))
                .unwrap_or(default.sync_writes),
        }
    }
}

/// Only `0` or `false` turn sync off; anything unrecognised keeps fsync on.
fn is_explicit_false(value: &str) -> bool {
    let value = value.trim();
    value == "0" || value.eq_ignore_ascii_case("false")
}

/// RocksDB-backed counter store.
///
/// Every increment is one pessimistic transaction: the counter key is locked
/// with `get_for_update`, rewritten and committed. Writers to the same name
/// queue on the row lock inside RocksDB; different names never contend.
pub struct RocksDbCounterStore {
    db: TransactionDB,
    config: RocksDbStoreConfig,
}

impl RocksDbCounterStore {
    /// Opens or creates a store at the given path with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_config(path, RocksDbStoreConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: RocksDbStoreConfig,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let db = TransactionDB::open(&opts, &txn_db_opts, path).map_err(map_rocksdb_err)?;

        tracing::info!(
            path = %path.display(),
            lock_timeout_ms = config.lock_timeout_ms,
            sync_writes = config.sync_writes,
            "Opened counter store"
        );

        Ok(Self { db, config })
    }

    pub fn config(&self) -> &RocksDbStoreConfig {
        &self.config
    }

    /// Creates a counter key.
    fn counter_key(name: &str) -> String {
        format!("{}:{}", COUNTER_PREFIX, name)
    }

    /// Creates an idempotency key. The name is length-prefixed so that
    /// `("a:b", "c")` and `("a", "b:c")` stay distinct.
    fn idempotency_key(name: &str, key: &str) -> String {
        format!("{}:{}:{}:{}", IDEM_PREFIX, name.len(), name, key)
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn begin(&self) -> Transaction<'_, TransactionDB> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.config.lock_timeout_ms);
        self.db.transaction_opt(&self.write_options(), &txn_opts)
    }

    /// Locks the counter row, bumps it and stages the write. Returns the new value.
    fn bump(txn: &Transaction<'_, TransactionDB>, counter_key: &str) -> Result<u64, StoreError> {
        let current = match txn
            .get_for_update(counter_key.as_bytes(), true)
            .map_err(map_rocksdb_err)?
        {
            Some(bytes) => parse_u64_be(&bytes)?,
            None => 0,
        };
        let next = current.checked_add(1).ok_or(StoreError::Overflow)?;
        txn.put(counter_key.as_bytes(), next.to_be_bytes())
            .map_err(map_rocksdb_err)?;
        Ok(next)
    }
}

/// Parses a u64 from big-endian bytes.
#[inline]
fn parse_u64_be(bytes: &[u8]) -> Result<u64, StoreError> {
    bytes
        .try_into()
        .map(u64::from_be_bytes)
        .map_err(|_| StoreError::Corrupt(format!("expected 8 bytes, found {}", bytes.len())))
}

/// Classifies RocksDB failures. Lock waits, write conflicts and I/O hiccups
/// leave nothing committed and may be retried.
fn map_rocksdb_err(e: rocksdb::Error) -> StoreError {
    match e.kind() {
        ErrorKind::TimedOut
        | ErrorKind::Busy
        | ErrorKind::TryAgain
        | ErrorKind::Aborted
        | ErrorKind::Expired
        | ErrorKind::IOError
        | ErrorKind::Incomplete
        | ErrorKind::ShutdownInProgress => StoreError::Transient(e.to_string()),
        _ => StoreError::RocksDb(e.to_string()),
    }
}

impl CounterStore for RocksDbCounterStore {
    fn increment_and_fetch(&self, name: &str) -> Result<u64, StoreError> {
        let txn = self.begin();
        let value = Self::bump(&txn, &Self::counter_key(name))?;
        // Dropping an uncommitted transaction rolls it back
        txn.commit().map_err(map_rocksdb_err)?;
        Ok(value)
    }

    fn increment_and_fetch_idempotent(
        &self,
        name: &str,
        idempotency_key: &str,
    ) -> Result<Allocation, StoreError> {
        let txn = self.begin();
        let counter_key = Self::counter_key(name);
        let idem_key = Self::idempotency_key(name, idempotency_key);

        // Lock the counter row first so two callers with the same key serialize
        // before either checks the idempotency record.
        txn.get_for_update(counter_key.as_bytes(), true)
            .map_err(map_rocksdb_err)?;

        if let Some(bytes) = txn
            .get_for_update(idem_key.as_bytes(), true)
            .map_err(map_rocksdb_err)?
        {
            return Ok(Allocation {
                value: parse_u64_be(&bytes)?,
                replayed: true,
            });
        }

        let value = Self::bump(&txn, &counter_key)?;
        txn.put(idem_key.as_bytes(), value.to_be_bytes())
            .map_err(map_rocksdb_err)?;
        txn.commit().map_err(map_rocksdb_err)?;

        Ok(Allocation {
            value,
            replayed: false,
        })
    }

    fn current(&self, name: &str) -> Result<Option<u64>, StoreError> {
        match self.db.get(Self::counter_key(name).as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(parse_u64_be(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(map_rocksdb_err(e)),
        }
    }

    fn counters(&self) -> Result<Vec<Counter>, StoreError> {
        let prefix = format!("{}:", COUNTER_PREFIX);
        let mut counters = Vec::new();

        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, value) = item.map_err(map_rocksdb_err)?;
            let Some(name) = key.strip_prefix(prefix.as_bytes()) else {
                break;
            };
            let name = String::from_utf8(name.to_vec())
                .map_err(|e| StoreError::Corrupt(format!("counter name: {}", e)))?;
            counters.push(Counter {
                name,
                value: parse_u64_be(&value)?,
            });
        }

        // Byte order of the keys is already name order
        Ok(counters)
    }
}
