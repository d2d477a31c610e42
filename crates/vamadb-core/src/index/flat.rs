//! Flat index: exhaustive-scan vector search.
//!
//! Reuses the vector store and its distance closures; the scan is
//! single-threaded so concurrent requests contend on CPU as little as
//! possible.

use std::any::Any;
use std::sync::Arc;

use roaring::RoaringTreemap;

use crate::cache::CachedState;
use crate::error::{Error, Result};
use crate::index::distset::{DistSet, DistSetElem};
use crate::index::SearchResult;
use crate::schema::FlatParams;
use crate::storage::Bucket;
use crate::vectorstore::VectorStoreState;

/// Cached state of one flat-indexed property.
pub struct FlatState {
    /// Id → vector map.
    pub vectors: VectorStoreState,
}

impl FlatState {
    /// Opens the vector store over the property's bucket.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn open(params: &FlatParams, bucket: &Bucket) -> Result<Self> {
        Ok(Self {
            vectors: VectorStoreState::open(
                params.vector_size,
                params.distance_metric,
                params.quantizer.as_ref(),
                bucket,
            )?,
        })
    }
}

impl CachedState for FlatState {
    fn estimated_size(&self) -> usize {
        self.vectors.mem_size()
    }

    fn is_clean(&self) -> bool {
        self.vectors.is_clean()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Flat index bound to its cached state and bucket for one operation.
pub struct FlatIndex<'a> {
    state: &'a FlatState,
    bucket: Bucket,
}

impl<'a> FlatIndex<'a> {
    /// Binds the index for one operation.
    #[must_use]
    pub fn new(state: &'a FlatState, bucket: Bucket) -> Self {
        Self { state, bucket }
    }

    /// Stores the vector for a point; insert and update are the same
    /// operation for an exhaustive index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] for the forbidden id 0.
    pub fn set(&self, id: u64, vector: Vec<f32>) -> Result<()> {
        if id == 0 {
            return Err(Error::InvalidOperation("node id 0 is forbidden".into()));
        }
        self.state.vectors.set(id, vector)
    }

    /// Removes the point's vector.
    pub fn delete(&self, id: u64) {
        self.state.vectors.delete(id);
    }

    /// Scans all vectors for the `limit` nearest to `query`.
    ///
    /// Returns the matching ids as a bitmap alongside the ordered results;
    /// each result scores `-weight · distance` for hybrid merging.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn search(
        &self,
        query: &[f32],
        filter: Option<&RoaringTreemap>,
        limit: usize,
        weight: f32,
    ) -> Result<(RoaringTreemap, Vec<SearchResult>)> {
        let mut nearest = DistSet::without_distances(limit);
        self.state
            .vectors
            .for_each_distance(query, &self.bucket, |id, distance| {
                if filter.is_none_or(|f| f.contains(id)) {
                    nearest.add_elem_with_limit(DistSetElem::new(id, distance));
                }
                Ok(true)
            })?;

        let mut bitmap = RoaringTreemap::new();
        let results: Vec<SearchResult> = nearest
            .items()
            .iter()
            .map(|elem| {
                bitmap.insert(elem.id);
                SearchResult {
                    node_id: elem.id,
                    distance: Some(elem.distance),
                    score: None,
                    hybrid_score: -weight * elem.distance,
                }
            })
            .collect();
        Ok((bitmap, results))
    }

    /// Trains the quantiser if due and flushes the vector store.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self) -> Result<()> {
        self.state.vectors.fit(&self.bucket)?;
        self.state.vectors.flush(&self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::storage::Store;

    fn flat_params(size: usize, metric: DistanceMetric) -> FlatParams {
        FlatParams {
            vector_size: size,
            distance_metric: metric,
            quantizer: None,
        }
    }

    fn with_flat(metric: DistanceMetric, size: usize, f: impl FnOnce(&FlatIndex<'_>)) {
        let store = Store::memory();
        store
            .write(|bm| {
                let bucket = bm.get("index/vectorFlat/v")?;
                let state = FlatState::open(&flat_params(size, metric), &bucket)?;
                let index = FlatIndex::new(&state, bucket);
                f(&index);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_search_orders_by_distance() {
        with_flat(DistanceMetric::Euclidean, 2, |index| {
            index.set(2, vec![0.0, 0.0]).unwrap();
            index.set(3, vec![1.0, 0.0]).unwrap();
            index.set(4, vec![5.0, 5.0]).unwrap();

            let (bitmap, results) = index.search(&[0.1, 0.0], None, 2, 1.0).unwrap();
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].node_id, 2);
            assert_eq!(results[1].node_id, 3);
            assert!(bitmap.contains(2) && bitmap.contains(3) && !bitmap.contains(4));
            // Hybrid score is the negated weighted distance.
            assert!(results[0].hybrid_score > results[1].hybrid_score);
        });
    }

    #[test]
    fn test_search_respects_filter() {
        with_flat(DistanceMetric::Euclidean, 2, |index| {
            index.set(2, vec![0.0, 0.0]).unwrap();
            index.set(3, vec![0.1, 0.0]).unwrap();

            let filter: RoaringTreemap = [3u64].into_iter().collect();
            let (_, results) = index.search(&[0.0, 0.0], Some(&filter), 5, 1.0).unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].node_id, 3);
        });
    }

    #[test]
    fn test_haversine_distance_in_metres() {
        with_flat(DistanceMetric::Haversine, 2, |index| {
            index.set(2, vec![49.008_389_966_4, 2.538_441_179_56]).unwrap();

            let (_, results) = index
                .search(&[-34.833_33, -58.516_664_6], None, 1, 1.0)
                .unwrap();
            let distance = results[0].distance.unwrap();
            assert!(
                (distance - 11_099_540.0).abs() <= 10.0,
                "got {distance} metres"
            );
        });
    }

    #[test]
    fn test_delete_removes_from_results() {
        with_flat(DistanceMetric::Euclidean, 2, |index| {
            index.set(2, vec![0.0, 0.0]).unwrap();
            index.set(3, vec![1.0, 1.0]).unwrap();
            index.flush().unwrap();
            index.delete(2);

            let (_, results) = index.search(&[0.0, 0.0], None, 5, 1.0).unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].node_id, 3);
        });
    }
}
