//! Array variant of the inverted index: element-wise changes through the
//! scalar index, plus set-composition search operators.

use roaring::RoaringTreemap;
use rustc_hash::FxHashSet;

use super::{InvertedIndex, InvertedState, SortableValue};
use crate::error::Result;
use crate::storage::Bucket;

/// One point's change for an array property.
#[derive(Debug, Clone)]
pub struct InvertedArrayChange<T> {
    /// Node id.
    pub id: u64,
    /// Previous elements, empty if the point had none.
    pub previous: Vec<T>,
    /// Current elements, empty if the point has none.
    pub current: Vec<T>,
}

/// Inverted index over arrays of one scalar type.
pub struct InvertedArrayIndex<'a, T> {
    inner: InvertedIndex<'a, T>,
    case_sensitive: bool,
}

impl<'a, T: SortableValue> InvertedArrayIndex<'a, T> {
    /// Binds the index for one operation.
    #[must_use]
    pub fn new(state: &'a InvertedState, bucket: Bucket, case_sensitive: bool) -> Self {
        Self {
            inner: InvertedIndex::new(state, bucket, case_sensitive),
            case_sensitive,
        }
    }

    /// Applies one change as the symmetric difference of the two element
    /// sets: dropped elements remove the id, new elements add it.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn update(&self, change: InvertedArrayChange<T>) -> Result<()> {
        let previous = self.encode_unique(change.previous);
        let current = self.encode_unique(change.current);
        for key in previous.difference(&current) {
            self.inner.remove_encoded(key, change.id)?;
        }
        for key in current.difference(&previous) {
            self.inner.add_encoded(key, change.id)?;
        }
        Ok(())
    }

    /// Ids whose array contains every one of `values`.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn contains_all(&self, values: Vec<T>) -> Result<RoaringTreemap> {
        let mut result: Option<RoaringTreemap> = None;
        for value in values {
            let set = self.inner.equals(value)?;
            result = Some(match result {
                Some(acc) => acc & set,
                None => set,
            });
            if result.as_ref().is_some_and(RoaringTreemap::is_empty) {
                break;
            }
        }
        Ok(result.unwrap_or_default())
    }

    /// Ids whose array contains any of `values`.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn contains_any(&self, values: Vec<T>) -> Result<RoaringTreemap> {
        let mut result = RoaringTreemap::new();
        for value in values {
            result |= self.inner.equals(value)?;
        }
        Ok(result)
    }

    /// Writes dirty sets back to the bucket.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn encode_unique(&self, values: Vec<T>) -> FxHashSet<Vec<u8>> {
        values
            .into_iter()
            .map(|value| value.normalise(self.case_sensitive).to_sortable())
            .collect()
    }
}
