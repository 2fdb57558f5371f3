mod memory;
pub(crate) mod retry;
mod rocksdb;

pub use memory::MemoryCounterStore;
pub use retry::RetryConfig;
pub use self::rocksdb::{RocksDbCounterStore, RocksDbStoreConfig};
