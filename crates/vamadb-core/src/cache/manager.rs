//! Cache registry with a shared size budget and per-cache transactions.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::error::{Error, Result};

/// A whole index cache registered with the [`CacheManager`].
///
/// Implementors report their footprint for the shared budget and whether
/// they hold unflushed state; clean caches may be evicted between
/// transactions and will be lazily rebuilt from their bucket.
pub trait CachedState: Any + Send + Sync {
    /// Approximate in-memory footprint in bytes.
    fn estimated_size(&self) -> usize;

    /// Returns true if the cache holds no unflushed state.
    fn is_clean(&self) -> bool;

    /// Upcast used for downcasting to the concrete state type.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct CacheSlot {
    state: Arc<dyn CachedState>,
    lock: Arc<RwLock<()>>,
}

/// Registry of named caches sharing one memory budget.
///
/// The registry is LRU-ordered, front = least recently used. Budget
/// pressure evicts whole clean caches that no transaction currently holds;
/// a cache is never evicted mid-operation.
pub struct CacheManager {
    /// Shared budget in bytes; `0` disables eviction.
    max_size: usize,
    slots: Mutex<IndexMap<String, CacheSlot>>,
}

impl CacheManager {
    /// Creates a manager with the given shared budget in bytes (`0` =
    /// unbounded).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            slots: Mutex::new(IndexMap::new()),
        }
    }

    /// Opens a transaction. Caches touched read-only take shared locks;
    /// caches touched read-write take exclusive locks, all held until
    /// [`CacheTransaction::commit`].
    #[must_use]
    pub fn transaction(&self) -> CacheTransaction<'_> {
        CacheTransaction {
            manager: self,
            guards: Mutex::new(Vec::new()),
            write_held: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        }
    }

    /// Drops the named cache; the next transaction reloads it from its
    /// bucket.
    pub fn invalidate(&self, name: &str) {
        self.slots.lock().shift_remove(name);
    }

    /// Returns true if the named cache is currently registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.lock().contains_key(name)
    }

    /// Evicts clean, unheld caches from the LRU front until under budget.
    fn prune(&self) {
        if self.max_size == 0 {
            return;
        }
        let mut slots = self.slots.lock();
        let mut total: usize = slots.values().map(|s| s.state.estimated_size()).sum();
        if total <= self.max_size {
            return;
        }
        let mut evict = Vec::new();
        for (name, slot) in slots.iter() {
            if total <= self.max_size {
                break;
            }
            if !slot.state.is_clean() {
                continue;
            }
            // A held lock means a transaction is mid-flight on this cache.
            let Some(guard) = slot.lock.try_write() else {
                continue;
            };
            drop(guard);
            total = total.saturating_sub(slot.state.estimated_size());
            evict.push(name.clone());
        }
        for name in evict {
            tracing::debug!(cache = %name, "evicting clean cache over budget");
            slots.shift_remove(&name);
        }
    }
}

enum TxGuard {
    Read(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Write(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// A read-only or read-write transaction over named caches.
///
/// Each cache may be entered at most once per transaction; re-entering the
/// same name would self-deadlock on the cache lock.
pub struct CacheTransaction<'m> {
    manager: &'m CacheManager,
    guards: Mutex<Vec<TxGuard>>,
    write_held: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
}

impl CacheTransaction<'_> {
    /// Runs `f` against the named cache, creating it via `init` on first
    /// touch.
    ///
    /// With `read_only` the cache lock is shared, otherwise exclusive. If
    /// `f` fails on a read-write cache, the cache is marked for invalidation
    /// at commit so partially applied state never leaks into later
    /// transactions.
    ///
    /// # Errors
    ///
    /// Propagates `init` and `f` failures, and fails on a state type
    /// mismatch for the name.
    pub fn with<S, R>(
        &self,
        name: &str,
        read_only: bool,
        init: impl FnOnce() -> Result<S>,
        f: impl FnOnce(&S) -> Result<R>,
    ) -> Result<R>
    where
        S: CachedState,
    {
        let (state, lock) = {
            let mut slots = self.manager.slots.lock();
            if let Some(slot) = slots.shift_remove(name) {
                // Move to the MRU back of the registry.
                let cloned = (Arc::clone(&slot.state), Arc::clone(&slot.lock));
                slots.insert(name.to_string(), slot);
                cloned
            } else {
                let state: Arc<dyn CachedState> = Arc::new(init()?);
                let lock = Arc::new(RwLock::new(()));
                slots.insert(
                    name.to_string(),
                    CacheSlot {
                        state: Arc::clone(&state),
                        lock: Arc::clone(&lock),
                    },
                );
                (state, lock)
            }
        };

        let guard = if read_only {
            TxGuard::Read(RwLock::read_arc(&lock))
        } else {
            self.write_held.lock().push(name.to_string());
            TxGuard::Write(RwLock::write_arc(&lock))
        };
        self.guards.lock().push(guard);

        let state = state
            .as_any()
            .downcast::<S>()
            .map_err(|_| Error::Internal(format!("cache state type mismatch for '{name}'")))?;

        let result = f(&state);
        if result.is_err() && !read_only {
            self.failed.lock().push(name.to_string());
        }
        result
    }

    /// Finishes the transaction.
    ///
    /// With `discard` every read-write cache is invalidated (error path);
    /// otherwise only caches whose closure failed are invalidated, and the
    /// manager prunes over-budget caches.
    pub fn commit(self, discard: bool) {
        {
            let mut slots = self.manager.slots.lock();
            let names = if discard {
                self.write_held.lock()
            } else {
                self.failed.lock()
            };
            for name in names.iter() {
                slots.shift_remove(name);
            }
        }
        // Release cache locks before pruning, or prune would skip our own
        // caches as in-use.
        self.guards.lock().clear();
        if !discard {
            self.manager.prune();
        }
    }
}
