use std::collections::HashMap;

use dashmap::DashMap;

use crate::contracts::{Allocation, Counter, CounterStore, StoreError};

#[derive(Default)]
struct Slot {
    value: u64,
    /// Idempotency key to value; only grows
    issued: HashMap<String, u64>,
}

impl Slot {
    fn bump(&mut self) -> Result<u64, StoreError> {
        self.value = self.value.checked_add(1).ok_or(StoreError::Overflow)?;
        Ok(self.value)
    }
}

/// In-process counter store.
///
/// Each increment runs under the map's per-entry write lock, so concurrent
/// callers for one name are serialized. Nothing survives the process; use it
/// for tests and single-instance development only.
#[derive(Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment_and_fetch(&self, name: &str) -> Result<u64, StoreError> {
        // entry() holds the shard lock across find-or-create and increment
        let mut slot = self.slots.entry(name.to_string()).or_default();
        slot.bump()
    }

    fn increment_and_fetch_idempotent(
        &self,
        name: &str,
        idempotency_key: &str,
    ) -> Result<Allocation, StoreError> {
        let mut slot = self.slots.entry(name.to_string()).or_default();
        if let Some(&value) = slot.issued.get(idempotency_key) {
            return Ok(Allocation {
                value,
                replayed: true,
            });
        }
        let value = slot.bump()?;
        slot.issued.insert(idempotency_key.to_string(), value);
        Ok(Allocation {
            value,
            replayed: false,
        })
    }

    fn current(&self, name: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.slots.get(name).map(|slot| slot.value))
    }

    fn counters(&self) -> Result<Vec<Counter>, StoreError> {
        let mut counters: Vec<Counter> = self
            .slots
            .iter()
            .map(|entry| Counter {
                name: entry.key().clone(),
                value: entry.value().value,
            })
            .collect();
        counters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn first_increment_returns_one() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.current("employee").unwrap(), None);
        assert_eq!(store.increment_and_fetch("employee").unwrap(), 1);
        assert_eq!(store.increment_and_fetch("employee").unwrap(), 2);
        assert_eq!(store.current("employee").unwrap(), Some(2));
    }

    #[test]
    fn namespaces_are_independent() {
        let store = MemoryCounterStore::new();
        store.increment_and_fetch("a").unwrap();
        store.increment_and_fetch("a").unwrap();
        assert_eq!(store.increment_and_fetch("b").unwrap(), 1);
        assert_eq!(store.current("a").unwrap(), Some(2));
    }

    #[test]
    fn idempotent_key_replays_value() {
        let store = MemoryCounterStore::new();
        let first = store.increment_and_fetch_idempotent("sale", "req-1").unwrap();
        assert_eq!(
            first,
            Allocation {
                value: 1,
                replayed: false
            }
        );

        let again = store.increment_and_fetch_idempotent("sale", "req-1").unwrap();
        assert_eq!(again.value, 1);
        assert!(again.replayed);
        assert_eq!(store.current("sale").unwrap(), Some(1));

        let other = store.increment_and_fetch_idempotent("sale", "req-2").unwrap();
        assert_eq!(other.value, 2);
    }

    #[test]
    fn idempotency_keys_are_scoped_per_namespace() {
        let store = MemoryCounterStore::new();
        store.increment_and_fetch_idempotent("sale", "k").unwrap();
        store.increment_and_fetch("delivery").unwrap();
        let delivery = store.increment_and_fetch_idempotent("delivery", "k").unwrap();
        assert_eq!(delivery.value, 2);
        assert!(!delivery.replayed);
    }

    #[test]
    fn counters_are_sorted_by_name() {
        let store = MemoryCounterStore::new();
        store.increment_and_fetch("shipment").unwrap();
        store.increment_and_fetch("employee").unwrap();
        store.increment_and_fetch("employee").unwrap();

        let counters = store.counters().unwrap();
        assert_eq!(
            counters,
            vec![
                Counter {
                    name: "employee".into(),
                    value: 2
                },
                Counter {
                    name: "shipment".into(),
                    value: 1
                },
            ]
        );
    }

    #[test]
    fn concurrent_first_use_initializes_once() {
        let store = Arc::new(MemoryCounterStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| store.increment_and_fetch("fresh").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, (1..=2000).collect::<Vec<_>>());
    }
}
