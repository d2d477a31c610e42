//! Bucket store: named byte-keyed, byte-valued buckets within read or write
//! scopes.
//!
//! The embedded key-value engine is treated as a black box behind this
//! module. Two backends are provided:
//!
//! - [`disk`]: persistent store, one `sled` tree per named bucket
//! - [`memory`]: `BTreeMap`-backed store for tests, same semantics minus
//!   backup
//!
//! Scope contract: all operations inside one scope observe a consistent
//! state; concurrent read scopes are allowed while a write scope is
//! exclusive. Within a write scope, a single bucket must have at most one
//! writer in flight; buckets are cheap to clone and safe to hand to worker
//! threads.

mod disk;
mod memory;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::{Error, Result};

pub(crate) type MemTree = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// A bucket store, either disk-backed or in-memory.
pub enum Store {
    /// Persistent store backed by an embedded key-value engine.
    Disk(DiskStore),
    /// In-memory store for tests.
    Memory(MemoryStore),
}

impl Store {
    /// Opens or creates a disk store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the underlying engine cannot open the
    /// path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::Disk(DiskStore::open(path.as_ref())?))
    }

    /// Creates an empty in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    /// Returns the on-disk path, if this is a disk store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Disk(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Runs `f` inside a read scope. Concurrent read scopes are allowed.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f`.
    pub fn read<R>(&self, f: impl FnOnce(&BucketManager<'_>) -> Result<R>) -> Result<R> {
        let _guard = self.scope_lock().read();
        let manager = BucketManager {
            store: self,
            writable: false,
        };
        f(&manager)
    }

    /// Runs `f` inside an exclusive write scope. On success the store is
    /// flushed so committed state survives a crash.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and flush failures.
    pub fn write<R>(&self, f: impl FnOnce(&BucketManager<'_>) -> Result<R>) -> Result<R> {
        let _guard = self.scope_lock().write();
        let manager = BucketManager {
            store: self,
            writable: true,
        };
        let result = f(&manager)?;
        if let Self::Disk(store) = self {
            store.flush()?;
        }
        Ok(result)
    }

    /// Writes a self-contained copy of the store to `path`; re-opening that
    /// path yields the same logical state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] for memory stores, which do not
    /// support backup.
    pub fn backup_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        match self {
            Self::Disk(store) => store.backup_to_file(path.as_ref()),
            Self::Memory(_) => Err(Error::InvalidOperation(
                "memory store does not support backup".into(),
            )),
        }
    }

    /// Returns the approximate store size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the engine cannot report its size.
    pub fn size_in_bytes(&self) -> Result<u64> {
        match self {
            Self::Disk(store) => store.size_in_bytes(),
            Self::Memory(store) => Ok(store.size_in_bytes()),
        }
    }

    /// Flushes and closes the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the final flush fails.
    pub fn close(self) -> Result<()> {
        match self {
            Self::Disk(store) => store.close(),
            Self::Memory(_) => Ok(()),
        }
    }

    fn scope_lock(&self) -> &RwLock<()> {
        match self {
            Self::Disk(store) => store.scope_lock(),
            Self::Memory(store) => store.scope_lock(),
        }
    }
}

/// Handle to the store's buckets within one scope.
pub struct BucketManager<'a> {
    store: &'a Store,
    writable: bool,
}

impl BucketManager<'_> {
    /// Returns the named bucket.
    ///
    /// In a write scope the bucket is created if missing. In a read scope a
    /// missing bucket is returned as an empty read-only view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the engine fails to open the bucket.
    pub fn get(&self, name: &str) -> Result<Bucket> {
        let kind = match self.store {
            Store::Disk(store) => store.bucket(name, self.writable)?,
            Store::Memory(store) => store.bucket(name, self.writable),
        };
        Ok(Bucket {
            kind,
            writable: self.writable,
        })
    }

    /// Returns true if this is a write scope.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

#[derive(Clone)]
pub(crate) enum BucketKind {
    Disk(sled::Tree),
    Memory(MemTree),
    /// Bucket absent in a read scope: reads are empty, writes are rejected.
    Missing,
}

/// A named byte-keyed, byte-valued bucket.
///
/// Cloning is cheap; clones refer to the same underlying bucket. Writes fail
/// on buckets obtained from a read scope.
#[derive(Clone)]
pub struct Bucket {
    kind: BucketKind,
    writable: bool,
}

impl Bucket {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on engine failure.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.kind {
            BucketKind::Disk(tree) => Ok(tree.get(key)?.map(|v| v.to_vec())),
            BucketKind::Memory(map) => Ok(map.read().get(key).cloned()),
            BucketKind::Missing => Ok(None),
        }
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] on read-only buckets.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        match &self.kind {
            BucketKind::Disk(tree) => {
                tree.insert(key, value)?;
                Ok(())
            }
            BucketKind::Memory(map) => {
                map.write().insert(key.to_vec(), value.to_vec());
                Ok(())
            }
            BucketKind::Missing => unreachable!("missing buckets are never writable"),
        }
    }

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] on read-only buckets.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        match &self.kind {
            BucketKind::Disk(tree) => {
                tree.remove(key)?;
                Ok(())
            }
            BucketKind::Memory(map) => {
                map.write().remove(key);
                Ok(())
            }
            BucketKind::Missing => unreachable!("missing buckets are never writable"),
        }
    }

    /// Visits every entry in key order until `f` returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and the engine.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        match &self.kind {
            BucketKind::Disk(tree) => {
                for entry in tree.iter() {
                    let (key, value) = entry?;
                    if !f(&key, &value)? {
                        break;
                    }
                }
                Ok(())
            }
            BucketKind::Memory(map) => Self::scan_snapshot(&Self::mem_snapshot(map, None), f),
            BucketKind::Missing => Ok(()),
        }
    }

    /// Visits entries whose keys start with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and the engine.
    pub fn prefix_scan<F>(&self, prefix: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        match &self.kind {
            BucketKind::Disk(tree) => {
                for entry in tree.scan_prefix(prefix) {
                    let (key, value) = entry?;
                    if !f(&key, &value)? {
                        break;
                    }
                }
                Ok(())
            }
            BucketKind::Memory(map) => {
                Self::scan_snapshot(&Self::mem_snapshot(map, Some(prefix)), f)
            }
            BucketKind::Missing => Ok(()),
        }
    }

    /// Visits entries with keys in `[start, end]` bounds, in key order.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and the engine.
    pub fn range_scan<F>(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        match &self.kind {
            BucketKind::Disk(tree) => {
                for entry in tree.range((start, end)) {
                    let (key, value) = entry?;
                    if !f(&key, &value)? {
                        break;
                    }
                }
                Ok(())
            }
            BucketKind::Memory(map) => {
                let snapshot: Vec<(Vec<u8>, Vec<u8>)> = map
                    .read()
                    .range((start, end))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Self::scan_snapshot(&snapshot, f)
            }
            BucketKind::Missing => Ok(()),
        }
    }

    /// Returns true if the bucket accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::InvalidOperation(
                "bucket write outside a write scope".into(),
            ))
        }
    }

    // Memory scans copy the matching range first so callbacks may freely
    // write back into the same bucket without deadlocking on its lock.
    fn mem_snapshot(map: &MemTree, prefix: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let guard = map.read();
        match prefix {
            Some(p) => guard
                .range(p.to_vec()..)
                .take_while(|(k, _)| k.starts_with(p))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    fn scan_snapshot<F>(entries: &[(Vec<u8>, Vec<u8>)], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        for (key, value) in entries {
            if !f(key, value)? {
                break;
            }
        }
        Ok(())
    }
}
