use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CacheItem, CacheManager, CachedState, ItemCache};
use crate::error::{Error, Result};
use crate::storage::{Bucket, Store};

struct Counter {
    value: u64,
    dirty: AtomicBool,
}

impl Counter {
    fn new(value: u64) -> Self {
        Self {
            value,
            dirty: AtomicBool::new(true),
        }
    }
}

impl CacheItem<u64> for Counter {
    type Context = ();

    fn read_from(key: &u64, bucket: &Bucket, _: &()) -> Result<Option<Self>> {
        let Some(bytes) = bucket.get(&key.to_le_bytes())? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Storage("corrupt counter".into()))?;
        Ok(Some(Self {
            value: u64::from_le_bytes(raw),
            dirty: AtomicBool::new(false),
        }))
    }

    fn write_to(&self, key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.put(&key.to_le_bytes(), &self.value.to_le_bytes())
    }

    fn delete_from(key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.delete(&key.to_le_bytes())
    }

    fn size_in_memory(&self) -> usize {
        16
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn check_and_clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

#[derive(Default)]
struct CounterState {
    cache: ItemCache<u64, Counter>,
}

impl CachedState for CounterState {
    fn estimated_size(&self) -> usize {
        self.cache.mem_size()
    }

    fn is_clean(&self) -> bool {
        self.cache.is_clean()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn with_bucket(f: impl FnOnce(&Bucket)) {
    let store = Store::memory();
    store
        .write(|bm| {
            f(&bm.get("cache-test")?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_item_cache_lazy_load_and_flush() {
    with_bucket(|bucket| {
        let cache: ItemCache<u64, Counter> = ItemCache::new();
        assert!(cache.get(&7, bucket, &()).unwrap().is_none());

        cache.put(7, Counter::new(42));
        assert!(!cache.is_clean());
        cache.flush(bucket).unwrap();
        assert!(cache.is_clean());

        // A fresh cache sees the flushed value.
        let fresh: ItemCache<u64, Counter> = ItemCache::new();
        let item = fresh.get(&7, bucket, &()).unwrap().unwrap();
        assert_eq!(item.value, 42);
    });
}

#[test]
fn test_item_cache_tombstone_hides_and_deletes() {
    with_bucket(|bucket| {
        let cache: ItemCache<u64, Counter> = ItemCache::new();
        cache.put(3, Counter::new(1));
        cache.flush(bucket).unwrap();

        cache.delete(&3);
        assert!(cache.get(&3, bucket, &()).unwrap().is_none());
        cache.flush(bucket).unwrap();
        assert_eq!(bucket.get(&3u64.to_le_bytes()).unwrap(), None);
    });
}

#[test]
fn test_item_cache_flush_idempotent() {
    with_bucket(|bucket| {
        let cache: ItemCache<u64, Counter> = ItemCache::new();
        cache.put(1, Counter::new(10));
        cache.flush(bucket).unwrap();

        // Second flush with no changes must not mark anything dirty again.
        cache.flush(bucket).unwrap();
        assert!(cache.is_clean());
        assert_eq!(
            bucket.get(&1u64.to_le_bytes()).unwrap(),
            Some(10u64.to_le_bytes().to_vec())
        );
    });
}

#[test]
fn test_transaction_reuses_state_across_commits() {
    let manager = CacheManager::new(0);

    let tx = manager.transaction();
    tx.with(
        "shard/counters",
        false,
        || Ok(CounterState::default()),
        |state| {
            state.cache.put(1, Counter::new(5));
            Ok(())
        },
    )
    .unwrap();
    tx.commit(false);

    let tx = manager.transaction();
    let value = tx
        .with(
            "shard/counters",
            true,
            || Ok(CounterState::default()),
            |state| Ok(state.cache.get_cached(&1).map(|c| c.value)),
        )
        .unwrap();
    tx.commit(false);
    assert_eq!(value, Some(5));
}

#[test]
fn test_failed_write_invalidates_cache() {
    let manager = CacheManager::new(0);

    let tx = manager.transaction();
    let result: Result<()> = tx.with(
        "shard/counters",
        false,
        || Ok(CounterState::default()),
        |state| {
            state.cache.put(1, Counter::new(5));
            Err(Error::Storage("simulated".into()))
        },
    );
    assert!(result.is_err());
    tx.commit(true);

    assert!(!manager.contains("shard/counters"));
}

#[test]
fn test_prune_evicts_clean_lru_cache() {
    // Budget below one entry's footprint forces eviction of clean caches.
    let manager = CacheManager::new(8);

    let tx = manager.transaction();
    tx.with(
        "shard/a",
        false,
        || Ok(CounterState::default()),
        |state| {
            state.cache.put(1, Counter::new(1));
            Ok(())
        },
    )
    .unwrap();
    // Dirty at commit time: survives the prune.
    tx.commit(false);
    assert!(manager.contains("shard/a"));

    // Flush it clean through a second transaction, then exceed the budget.
    let store = Store::memory();
    store
        .write(|bm| {
            let bucket = bm.get("a")?;
            let tx = manager.transaction();
            tx.with(
                "shard/a",
                false,
                || Ok(CounterState::default()),
                |state: &CounterState| state.cache.flush(&bucket),
            )?;
            tx.commit(false);
            Ok(())
        })
        .unwrap();

    // The clean cache exceeds the 8-byte budget, so it is evicted.
    assert!(!manager.contains("shard/a"));
}

#[test]
fn test_type_mismatch_is_internal_error() {
    #[derive(Default)]
    struct OtherState;
    impl CachedState for OtherState {
        fn estimated_size(&self) -> usize {
            0
        }
        fn is_clean(&self) -> bool {
            true
        }
        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    let manager = CacheManager::new(0);
    let tx = manager.transaction();
    tx.with("shard/x", false, || Ok(CounterState::default()), |_| Ok(()))
        .unwrap();
    let err = tx
        .with("shard/y", true, || Ok(OtherState), |_: &OtherState| Ok(()))
        .and_then(|()| {
            tx.with(
                "shard/x-again",
                true,
                || Ok(CounterState::default()),
                |_: &CounterState| Ok(()),
            )
        });
    assert!(err.is_ok());
    tx.commit(false);

    // Re-open an existing name with the wrong type.
    let tx = manager.transaction();
    let mismatch = tx.with("shard/x", true, || Ok(OtherState), |_: &OtherState| Ok(()));
    assert!(matches!(mismatch, Err(Error::Internal(_))));
    tx.commit(false);
}
