//! In-memory bucket store for tests. Same scope semantics as the disk
//! variant, minus backup.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use super::{BucketKind, MemTree};

/// Bucket store holding every bucket in process memory.
#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<FxHashMap<String, MemTree>>,
    scope: RwLock<()>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn scope_lock(&self) -> &RwLock<()> {
        &self.scope
    }

    pub(super) fn bucket(&self, name: &str, create: bool) -> BucketKind {
        let mut buckets = self.buckets.lock();
        if let Some(tree) = buckets.get(name) {
            return BucketKind::Memory(Arc::clone(tree));
        }
        if !create {
            return BucketKind::Missing;
        }
        let tree: MemTree = Arc::new(RwLock::new(BTreeMap::new()));
        buckets.insert(name.to_string(), Arc::clone(&tree));
        BucketKind::Memory(tree)
    }

    pub(super) fn size_in_bytes(&self) -> u64 {
        let buckets = self.buckets.lock();
        let total: usize = buckets
            .values()
            .map(|tree| {
                tree.read()
                    .iter()
                    .map(|(k, v)| k.len() + v.len())
                    .sum::<usize>()
            })
            .sum();
        total as u64
    }
}
