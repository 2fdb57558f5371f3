#![no_main]

use libfuzzer_sys::fuzz_target;
use seqalloc::contracts::CounterStore;
use seqalloc::storage::RocksDbCounterStore;
use tempfile::TempDir;

fuzz_target!(|data: &[u8]| {
    // Arbitrary namespace strings: separators, unicode, control characters
    let dir = TempDir::new().unwrap();
    let store = RocksDbCounterStore::open(dir.path()).unwrap();
    let name = String::from_utf8_lossy(data);

    let first = store.increment_and_fetch(&name).unwrap();
    let second = store.increment_and_fetch(&name).unwrap();
    assert_eq!((first, second), (1, 2));
    assert_eq!(store.current(&name).unwrap(), Some(2));

    let counters = store.counters().unwrap();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].name, name);
});
