//! Generic lazy-load item cache over a bucket.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::storage::Bucket;

/// Hooks a payload type implements to live in an [`ItemCache`].
///
/// Dirtiness is owned by the payload (typically an `AtomicBool`) so that
/// entries mutated through shared references, such as graph nodes under their
/// edge lock, can mark themselves without going through the cache.
pub trait CacheItem<K>: Send + Sync + Sized + 'static {
    /// Decoding context, e.g. the quantiser needed to interpret vector bytes.
    type Context: Send + Sync + ?Sized;

    /// Loads the item stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error on bucket failure or corrupt serialised state.
    fn read_from(key: &K, bucket: &Bucket, ctx: &Self::Context) -> Result<Option<Self>>;

    /// Writes the item back under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error on bucket failure.
    fn write_to(&self, key: &K, bucket: &Bucket) -> Result<()>;

    /// Removes the item stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error on bucket failure.
    fn delete_from(key: &K, bucket: &Bucket) -> Result<()>;

    /// Approximate in-memory footprint in bytes.
    fn size_in_memory(&self) -> usize;

    /// Returns true if the item has unflushed changes.
    fn is_dirty(&self) -> bool;

    /// Returns the dirty flag and clears it.
    fn check_and_clear_dirty(&self) -> bool;
}

/// Lazy-load, dirty-flag, flush-on-commit map keyed by id.
///
/// `get` loads missing entries from the bucket; `delete` records a tombstone
/// that [`ItemCache::flush`] turns into a bucket delete. Entries are shared
/// as `Arc`s so per-entry locks (e.g. edge mutexes) work across threads.
pub struct ItemCache<K, V> {
    entries: RwLock<FxHashMap<K, Arc<V>>>,
    tombstones: Mutex<FxHashSet<K>>,
    mem_size: AtomicUsize,
}

impl<K, V> Default for ItemCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            tombstones: Mutex::new(FxHashSet::default()),
            mem_size: AtomicUsize::new(0),
        }
    }
}

impl<K, V> ItemCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: CacheItem<K>,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached item, loading it from the bucket on a miss.
    ///
    /// Tombstoned keys read as absent without touching the bucket.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub fn get(&self, key: &K, bucket: &Bucket, ctx: &V::Context) -> Result<Option<Arc<V>>> {
        if self.tombstones.lock().contains(key) {
            return Ok(None);
        }
        if let Some(item) = self.entries.read().get(key) {
            return Ok(Some(Arc::clone(item)));
        }
        let Some(loaded) = V::read_from(key, bucket, ctx)? else {
            return Ok(None);
        };
        let mut entries = self.entries.write();
        // Another thread may have loaded the same key meanwhile; keep the
        // first so shared per-entry locks stay unique.
        if let Some(existing) = entries.get(key) {
            return Ok(Some(Arc::clone(existing)));
        }
        let item = Arc::new(loaded);
        self.mem_size
            .fetch_add(item.size_in_memory(), Ordering::Relaxed);
        entries.insert(key.clone(), Arc::clone(&item));
        Ok(Some(item))
    }

    /// Returns the item only if it is already cached.
    #[must_use]
    pub fn get_cached(&self, key: &K) -> Option<Arc<V>> {
        if self.tombstones.lock().contains(key) {
            return None;
        }
        self.entries.read().get(key).map(Arc::clone)
    }

    /// Inserts an item, clearing any tombstone for the key.
    pub fn put(&self, key: K, item: V) -> Arc<V> {
        self.tombstones.lock().remove(&key);
        let item = Arc::new(item);
        let mut entries = self.entries.write();
        if let Some(previous) = entries.insert(key, Arc::clone(&item)) {
            self.mem_size
                .fetch_sub(previous.size_in_memory(), Ordering::Relaxed);
        }
        self.mem_size
            .fetch_add(item.size_in_memory(), Ordering::Relaxed);
        item
    }

    /// Removes the key and records a tombstone for the next flush.
    pub fn delete(&self, key: &K) {
        if let Some(previous) = self.entries.write().remove(key) {
            self.mem_size
                .fetch_sub(previous.size_in_memory(), Ordering::Relaxed);
        }
        self.tombstones.lock().insert(key.clone());
    }

    /// Writes every dirty entry and applies every tombstone to the bucket.
    ///
    /// Flushing twice without intervening changes writes nothing the second
    /// time.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures; on error the enclosing cache transaction
    /// is expected to be discarded.
    pub fn flush(&self, bucket: &Bucket) -> Result<()> {
        let tombstones: Vec<K> = self.tombstones.lock().drain().collect();
        for key in &tombstones {
            V::delete_from(key, bucket)?;
        }
        let entries = self.entries.read();
        for (key, item) in entries.iter() {
            if item.check_and_clear_dirty() {
                item.write_to(key, bucket)?;
            }
        }
        Ok(())
    }

    /// Returns the keys currently held in the cache.
    #[must_use]
    pub fn cached_keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns true if the key is tombstoned.
    #[must_use]
    pub fn is_tombstoned(&self, key: &K) -> bool {
        self.tombstones.lock().contains(key)
    }

    /// Approximate in-memory footprint of all cached entries.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.mem_size.load(Ordering::Relaxed)
    }

    /// Returns true if no entry is dirty and no tombstone is pending.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        if !self.tombstones.lock().is_empty() {
            return false;
        }
        self.entries.read().values().all(|item| !item.is_dirty())
    }
}
