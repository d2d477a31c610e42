//! Vamana proximity-graph ANN index.
//!
//! Greedy search and robust prune over a disk-persistent graph, with
//! concurrent inserts, batch updates and deletes, and edge-scan repair that
//! keeps every surviving node reachable from the start node.

pub mod nodes;

mod prune;
mod search;

#[cfg(test)]
mod vamana_tests;

use std::any::Any;
use std::sync::Arc;

use roaring::RoaringTreemap;

use crate::cancel::CancelToken;
use crate::cache::CachedState;
use crate::error::{Error, Result};
use crate::schema::VamanaParams;
use crate::storage::Bucket;
use crate::vectorstore::VectorStoreState;

use nodes::{GraphNode, NodeStoreState};

/// Reserved entry-point node id; never user data.
pub const START_NODE_ID: u64 = 1;

/// Cached state of one Vamana-indexed property: its vector store and node
/// store, both over the same bucket.
pub struct VamanaState {
    /// Id → vector map.
    pub vectors: VectorStoreState,
    /// Id → edge-list map.
    pub nodes: NodeStoreState,
}

impl VamanaState {
    /// Opens both stores over the property's bucket.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn open(params: &VamanaParams, bucket: &Bucket) -> Result<Self> {
        Ok(Self {
            vectors: VectorStoreState::open(
                params.vector_size,
                params.distance_metric,
                params.quantizer.as_ref(),
                bucket,
            )?,
            nodes: NodeStoreState::open(bucket)?,
        })
    }
}

impl CachedState for VamanaState {
    fn estimated_size(&self) -> usize {
        self.vectors.mem_size() + self.nodes.mem_size()
    }

    fn is_clean(&self) -> bool {
        self.vectors.is_clean() && self.nodes.is_clean()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Vamana index bound to its cached state and bucket for one operation.
pub struct VamanaIndex<'a> {
    state: &'a VamanaState,
    bucket: Bucket,
    params: VamanaParams,
    cancel: CancelToken,
}

impl<'a> VamanaIndex<'a> {
    /// Binds the index for one operation.
    #[must_use]
    pub fn new(
        state: &'a VamanaState,
        bucket: Bucket,
        params: VamanaParams,
        cancel: CancelToken,
    ) -> Self {
        Self {
            state,
            bucket,
            params,
            cancel,
        }
    }

    /// Inserts a batch of new points through a bounded worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] for reserved ids; the first
    /// worker failure aborts the batch.
    pub fn insert(&self, points: Vec<(u64, Vec<f32>)>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.check_ids(points.iter().map(|(id, _)| *id))?;
        self.ensure_start_node()?;
        self.parallel_insert(points)
    }

    /// Updates existing points: inbound edges to every updated id are
    /// removed in one pass, then each point is re-inserted with its new
    /// vector.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`VamanaIndex::insert`].
    pub fn update(&self, points: Vec<(u64, Vec<f32>)>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.check_ids(points.iter().map(|(id, _)| *id))?;
        self.ensure_start_node()?;
        let ids: RoaringTreemap = points.iter().map(|(id, _)| *id).collect();
        self.remove_inbound_edges(&ids)?;
        self.parallel_insert(points)
    }

    /// Deletes points: inbound edges are repaired, then vectors and nodes
    /// are dropped from the caches so the next flush removes them from the
    /// stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] when the delete set touches
    /// reserved ids.
    pub fn delete(&self, delete_set: &RoaringTreemap) -> Result<()> {
        if delete_set.is_empty() {
            return Ok(());
        }
        self.check_ids(delete_set.iter())?;
        self.remove_inbound_edges(delete_set)?;
        for id in delete_set.iter() {
            self.state.nodes.delete(id);
            self.state.vectors.delete(id);
        }
        tracing::debug!(count = delete_set.len(), "deleted points from graph");
        Ok(())
    }

    /// Searches for the `k` nearest points to `query`, optionally
    /// restricted to ids in `filter`.
    ///
    /// # Errors
    ///
    /// Propagates store failures; an empty index returns no results.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&RoaringTreemap>,
    ) -> Result<Vec<(u64, f32)>> {
        if self.state.nodes.get(START_NODE_ID, &self.bucket)?.is_none() {
            return Ok(Vec::new());
        }
        let dist_fn = self.state.vectors.distance_from_float(query, &self.bucket)?;
        let (results, visited) = self.greedy_search(dist_fn, k, filter)?;
        visited.release();
        Ok(results
            .into_iter()
            .filter(|elem| elem.id != START_NODE_ID)
            .take(k)
            .map(|elem| (elem.id, elem.distance))
            .collect())
    }

    /// Scans every surviving node and classifies repair work for a delete
    /// set: `to_prune` holds nodes with an edge into the set, `to_save`
    /// holds nodes whose only inbound edges came from deleted nodes.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn edge_scan(&self, delete_set: &RoaringTreemap) -> Result<(Vec<u64>, Vec<u64>)> {
        let mut valid = RoaringTreemap::new();
        let mut has_inbound = RoaringTreemap::new();
        let mut to_prune = Vec::new();
        self.state.nodes.for_each(&self.bucket, |id, edges| {
            if delete_set.contains(id) {
                return Ok(true);
            }
            valid.insert(id);
            let mut points_into_set = false;
            for &edge in edges {
                has_inbound.insert(edge);
                if delete_set.contains(edge) {
                    points_into_set = true;
                }
            }
            if points_into_set {
                to_prune.push(id);
            }
            Ok(true)
        })?;
        let mut to_save = &valid - &has_inbound;
        to_save.remove(START_NODE_ID);
        Ok((to_prune, to_save.iter().collect()))
    }

    /// Flushes trained quantiser state, vectors, edges and counters to the
    /// bucket.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self) -> Result<()> {
        self.state.vectors.fit(&self.bucket)?;
        self.state.vectors.flush(&self.bucket)?;
        self.state.nodes.flush(&self.bucket)
    }

    /// Bootstraps the reserved start node with a random unit vector on
    /// first write.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn ensure_start_node(&self) -> Result<()> {
        if self
            .state
            .nodes
            .get(START_NODE_ID, &self.bucket)?
            .is_some()
        {
            return Ok(());
        }
        let vector = random_unit_vector(self.state.vectors.vector_size());
        self.state.vectors.set(START_NODE_ID, vector)?;
        self.state.nodes.put(START_NODE_ID, GraphNode::empty());
        tracing::debug!("bootstrapped start node");
        Ok(())
    }

    fn check_ids(&self, ids: impl Iterator<Item = u64>) -> Result<()> {
        for id in ids {
            if id == 0 {
                return Err(Error::InvalidOperation("node id 0 is forbidden".into()));
            }
            if id == START_NODE_ID {
                return Err(Error::InvalidOperation(
                    "cannot modify the start node".into(),
                ));
            }
        }
        Ok(())
    }

    /// Runs single-point inserts through a pool of `max(1, ncpu - 1)`
    /// workers fed from a bounded channel.
    fn parallel_insert(&self, points: Vec<(u64, Vec<f32>)>) -> Result<()> {
        let workers = std::thread::available_parallelism()
            .map_or(1, |n| n.get().saturating_sub(1).max(1))
            .min(points.len());
        std::thread::scope(|scope| {
            let (tx, rx) = crossbeam_channel::bounded::<(u64, Vec<f32>)>(workers);
            for _ in 0..workers {
                let rx = rx.clone();
                scope.spawn(move || {
                    while let Ok((id, vector)) = rx.recv() {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        if let Err(err) = self.insert_single(id, vector) {
                            self.cancel.cancel(err);
                            break;
                        }
                    }
                });
            }
            drop(rx);
            for point in points {
                if self.cancel.is_cancelled() {
                    break;
                }
                if tx.send(point).is_err() {
                    break;
                }
            }
        });
        if self.cancel.is_cancelled() {
            return Err(self
                .cancel
                .take_cause()
                .unwrap_or_else(|| Error::Cancelled("insert batch aborted".into())));
        }
        Ok(())
    }

    /// Single-point insert: set the vector, greedy-search for candidates,
    /// robust-prune the new node, then add bi-directional edges.
    fn insert_single(&self, id: u64, vector: Vec<f32>) -> Result<()> {
        self.state.vectors.set(id, vector.clone())?;
        self.state.nodes.observe_id(id);

        let dist_fn = self
            .state
            .vectors
            .distance_from_float(&vector, &self.bucket)?;
        let (_, mut visited) = self.greedy_search(dist_fn, 1, None)?;

        let node = self.state.nodes.put(id, GraphNode::empty());
        let edges =
            node.with_edges_mut(|edges| -> Result<Vec<u64>> {
                self.robust_prune(id, edges, &mut visited)?;
                Ok(edges.clone())
            })?;
        visited.release();

        for neighbour_id in edges {
            let neighbour = self.state.nodes.get_required(neighbour_id, &self.bucket)?;
            neighbour.with_edges_mut(|n_edges| -> Result<()> {
                if n_edges.len() + 1 > self.params.degree_bound {
                    let dist_fn = self
                        .state
                        .vectors
                        .distance_from_point(neighbour_id, &self.bucket)?;
                    let mut candidates = crate::index::DistSet::new(
                        n_edges.len() + 1,
                        dist_fn,
                        Some(self.state.nodes.max_node_id()),
                    );
                    candidates.add(n_edges)?;
                    candidates.add(&[id])?;
                    candidates.sort();
                    self.robust_prune(neighbour_id, n_edges, &mut candidates)?;
                } else {
                    n_edges.push(id);
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Removes every inbound edge into the delete set, rewiring affected
    /// nodes and reattaching orphans to the start node.
    fn remove_inbound_edges(&self, delete_set: &RoaringTreemap) -> Result<()> {
        let (to_prune, to_save) = self.edge_scan(delete_set)?;
        for id in &to_prune {
            self.cancel.check()?;
            self.prune_delete_neighbour(*id, delete_set)?;
        }
        if !to_save.is_empty() {
            tracing::debug!(
                count = to_save.len(),
                "reattaching orphaned nodes to start node"
            );
            let start = self.state.nodes.get_required(START_NODE_ID, &self.bucket)?;
            for id in to_save {
                start.add_neighbour_if_not_exists(id);
            }
        }
        Ok(())
    }
}

/// Deterministic random unit vector for the start node, using the xorshift64
/// generator.
fn random_unit_vector(size: usize) -> Vec<f32> {
    let mut state = 0x5DEE_CE66_D1A4_B5B5u64;
    let mut vector: Vec<f32> = (0..size)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            {
                ((state as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32
            }
        })
        .collect();
    let norm = vector.iter().map(|c| c * c).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in &mut vector {
            *component /= norm;
        }
    } else {
        vector[0] = 1.0;
    }
    vector
}
