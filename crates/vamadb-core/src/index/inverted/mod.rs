//! Inverted index: term → roaring set of node ids, with byte-sortable keys
//! so range operators become bucket range scans.

mod array;
mod sortable;

#[cfg(test)]
mod inverted_tests;

pub use array::{InvertedArrayChange, InvertedArrayIndex};
pub use sortable::SortableValue;

use std::any::Any;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringTreemap;
use rustc_hash::FxHashSet;

use crate::cache::{CacheItem, CachedState, ItemCache};
use crate::error::Result;
use crate::storage::Bucket;

/// One term's id set with its dirty flag.
pub struct TermSet {
    set: RwLock<RoaringTreemap>,
    dirty: AtomicBool,
}

impl TermSet {
    /// Creates an empty, clean set; checked mutations mark it dirty.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            set: RwLock::new(RoaringTreemap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Adds the id, marking the set dirty only on actual change.
    pub fn checked_add(&self, id: u64) -> bool {
        let changed = self.set.write().insert(id);
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        changed
    }

    /// Removes the id, marking the set dirty only on actual change.
    pub fn checked_remove(&self, id: u64) -> bool {
        let changed = self.set.write().remove(id);
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        changed
    }

    /// Copies the current id set.
    #[must_use]
    pub fn snapshot(&self) -> RoaringTreemap {
        self.set.read().clone()
    }

    /// Number of ids in the set.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.set.read().len()
    }

    /// Returns true if the set holds no ids.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.read().is_empty()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let set = RoaringTreemap::deserialize_from(bytes)
            .map_err(|err| crate::error::Error::Storage(format!("corrupt roaring set: {err}")))?;
        Ok(Self {
            set: RwLock::new(set),
            dirty: AtomicBool::new(false),
        })
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let set = self.set.read();
        let mut bytes = Vec::with_capacity(set.serialized_size());
        set.serialize_into(&mut bytes)
            .map_err(|err| crate::error::Error::Storage(format!("roaring serialise: {err}")))?;
        Ok(bytes)
    }
}

impl CacheItem<Vec<u8>> for TermSet {
    type Context = ();

    fn read_from(key: &Vec<u8>, bucket: &Bucket, _: &()) -> Result<Option<Self>> {
        match bucket.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_to(&self, key: &Vec<u8>, bucket: &Bucket) -> Result<()> {
        // An emptied set releases its key instead of storing a husk.
        if self.is_empty() {
            bucket.delete(key)
        } else {
            bucket.put(key, &self.encode()?)
        }
    }

    fn delete_from(key: &Vec<u8>, bucket: &Bucket) -> Result<()> {
        bucket.delete(key)
    }

    fn size_in_memory(&self) -> usize {
        self.set.read().serialized_size() + std::mem::size_of::<Self>()
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn check_and_clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

/// Cached state of one inverted-indexed property.
#[derive(Default)]
pub struct InvertedState {
    sets: ItemCache<Vec<u8>, TermSet>,
}

impl InvertedState {
    /// Creates an empty state; sets load lazily from the bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CachedState for InvertedState {
    fn estimated_size(&self) -> usize {
        self.sets.mem_size()
    }

    fn is_clean(&self) -> bool {
        self.sets.is_clean()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// One point's change for an inverted property.
#[derive(Debug, Clone)]
pub struct InvertedChange<T> {
    /// Node id.
    pub id: u64,
    /// Previous value, if the point had one.
    pub previous: Option<T>,
    /// Current value, if the point has one.
    pub current: Option<T>,
}

/// Inverted index over one scalar type, bound to its cached state and
/// bucket.
pub struct InvertedIndex<'a, T> {
    state: &'a InvertedState,
    bucket: Bucket,
    case_sensitive: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: SortableValue> InvertedIndex<'a, T> {
    /// Binds the index for one operation. `case_sensitive` only affects
    /// string values.
    #[must_use]
    pub fn new(state: &'a InvertedState, bucket: Bucket, case_sensitive: bool) -> Self {
        Self {
            state,
            bucket,
            case_sensitive,
            _marker: PhantomData,
        }
    }

    /// Applies one change: inserts add the id to the current value's set,
    /// deletes remove it from the previous value's set, updates do both
    /// when the value actually changed.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn update(&self, change: InvertedChange<T>) -> Result<()> {
        let previous = change
            .previous
            .map(|value| value.normalise(self.case_sensitive));
        let current = change
            .current
            .map(|value| value.normalise(self.case_sensitive));
        match (previous, current) {
            (None, Some(value)) => self.add_encoded(&value.to_sortable(), change.id),
            (Some(value), None) => self.remove_encoded(&value.to_sortable(), change.id),
            (Some(prev), Some(curr)) if prev != curr => {
                self.remove_encoded(&prev.to_sortable(), change.id)?;
                self.add_encoded(&curr.to_sortable(), change.id)
            }
            _ => Ok(()),
        }
    }

    /// Ids whose value equals `value`.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn equals(&self, value: T) -> Result<RoaringTreemap> {
        let key = value.normalise(self.case_sensitive).to_sortable();
        match self.state.sets.get(&key, &self.bucket, &())? {
            Some(set) => Ok(set.snapshot()),
            None => Ok(RoaringTreemap::new()),
        }
    }

    /// Ids whose value differs from `value` (full scan).
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn not_equals(&self, value: T) -> Result<RoaringTreemap> {
        let key = value.normalise(self.case_sensitive).to_sortable();
        self.union_sets(Bound::Unbounded, Bound::Unbounded, Some(&key))
    }

    /// Ids in the half-open or closed range described by the bounds.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn range(&self, start: Bound<T>, end: Bound<T>) -> Result<RoaringTreemap> {
        let encode =
            |bound: Bound<T>| bound.map(|v| v.normalise(self.case_sensitive).to_sortable());
        self.union_sets(encode(start), encode(end), None)
    }

    /// Applies the change directly on an encoded key.
    pub(crate) fn add_encoded(&self, key: &[u8], id: u64) -> Result<()> {
        let set = match self.state.sets.get(&key.to_vec(), &self.bucket, &())? {
            Some(set) => set,
            None => self.state.sets.put(key.to_vec(), TermSet::empty()),
        };
        set.checked_add(id);
        Ok(())
    }

    pub(crate) fn remove_encoded(&self, key: &[u8], id: u64) -> Result<()> {
        if let Some(set) = self.state.sets.get(&key.to_vec(), &self.bucket, &())? {
            set.checked_remove(id);
        }
        Ok(())
    }

    /// Writes dirty sets back; emptied sets delete their keys.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self) -> Result<()> {
        self.state.sets.flush(&self.bucket)
    }

    /// Unions every set in the key range, merging bucket state with dirty
    /// cached sets; `exclude` skips one key.
    fn union_sets(
        &self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        exclude: Option<&[u8]>,
    ) -> Result<RoaringTreemap> {
        let mut union = RoaringTreemap::new();
        let mut seen: FxHashSet<Vec<u8>> = FxHashSet::default();
        self.bucket
            .range_scan(start.clone(), end.clone(), |key, value| {
                if exclude == Some(key) || self.state.sets.is_tombstoned(&key.to_vec()) {
                    return Ok(true);
                }
                seen.insert(key.to_vec());
                if let Some(cached) = self.state.sets.get_cached(&key.to_vec()) {
                    union |= cached.snapshot();
                } else {
                    union |= TermSet::decode(value)?.snapshot();
                }
                Ok(true)
            })?;
        // Cached sets not yet flushed to the bucket.
        for key in self.state.sets.cached_keys() {
            if seen.contains(&key)
                || exclude == Some(key.as_slice())
                || !bounds_contain(&start, &end, &key)
            {
                continue;
            }
            if let Some(cached) = self.state.sets.get_cached(&key) {
                union |= cached.snapshot();
            }
        }
        Ok(union)
    }
}

impl InvertedIndex<'_, String> {
    /// Ids whose string value starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn starts_with(&self, prefix: String) -> Result<RoaringTreemap> {
        let prefix = prefix.normalise(self.case_sensitive).into_bytes();
        let end = prefix_end(&prefix);
        let start = Bound::Included(prefix);
        let end = match end {
            Some(bytes) => Bound::Excluded(bytes),
            None => Bound::Unbounded,
        };
        self.union_sets(start, end, None)
    }
}

/// Smallest byte string greater than every string with the given prefix, or
/// `None` when the prefix is all `0xFF`.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

fn bounds_contain(start: &Bound<Vec<u8>>, end: &Bound<Vec<u8>>, key: &[u8]) -> bool {
    let after_start = match start {
        Bound::Included(s) => key >= s.as_slice(),
        Bound::Excluded(s) => key > s.as_slice(),
        Bound::Unbounded => true,
    };
    let before_end = match end {
        Bound::Included(e) => key <= e.as_slice(),
        Bound::Excluded(e) => key < e.as_slice(),
        Bound::Unbounded => true,
    };
    after_start && before_end
}
