//! Robust prune and deletion rewiring.

use roaring::RoaringTreemap;
use rustc_hash::FxHashSet;

use super::VamanaIndex;
use crate::error::{Error, Result};
use crate::index::distset::DistSet;

impl VamanaIndex<'_> {
    /// Robust prune: rebuilds `edges` for `node_id` from candidates in
    /// ascending distance order.
    ///
    /// Each kept survivor `c` removes every later candidate `d` with
    /// `α · dist(c, d) < dist(query, d)`; the α ≥ 1 slack widens pruning as
    /// the graph densifies, and α = 1 reproduces classic Vamana. Candidates
    /// must be sorted; the caller holds the node's edge lock.
    ///
    /// # Errors
    ///
    /// Propagates distance closure failures.
    pub(super) fn robust_prune(
        &self,
        node_id: u64,
        edges: &mut Vec<u64>,
        candidates: &mut DistSet<'_>,
    ) -> Result<()> {
        edges.clear();
        let len = candidates.len();
        for i in 0..len {
            let survivor = candidates.items()[i].clone();
            if survivor.prune_removed || survivor.id == node_id {
                continue;
            }
            edges.push(survivor.id);
            if edges.len() >= self.params.degree_bound {
                break;
            }
            let dist_from_survivor = self
                .state
                .vectors
                .distance_from_point(survivor.id, &self.bucket)?;
            for j in (i + 1)..len {
                let later = &candidates.items()[j];
                if later.prune_removed {
                    continue;
                }
                if self.params.alpha * dist_from_survivor(later.id)? < later.distance {
                    candidates.mark_prune_removed(j);
                }
            }
        }
        Ok(())
    }

    /// Rewires a node that points into the delete set.
    ///
    /// Candidates are the node's still-valid edges plus one level of each
    /// deleted neighbour's still-valid edges; deeper expansion is not
    /// worth the neighbourhood blow-up, the start-node repair covers the
    /// rare disconnections. When the candidate count fits the degree bound
    /// the edges are overwritten directly, otherwise robust prune selects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when the node has no deleted neighbour,
    /// which means the edge scan fed it here wrongly.
    pub(super) fn prune_delete_neighbour(
        &self,
        node_id: u64,
        delete_set: &RoaringTreemap,
    ) -> Result<()> {
        let node = self.state.nodes.get_required(node_id, &self.bucket)?;
        node.with_edges_mut(|edges| -> Result<()> {
            let mut seen = FxHashSet::default();
            let mut candidate_ids: Vec<u64> = Vec::new();
            let mut found_deleted = false;
            for &edge in edges.iter() {
                if delete_set.contains(edge) {
                    found_deleted = true;
                    let deleted = self.state.nodes.get_required(edge, &self.bucket)?;
                    for hop in deleted.snapshot_edges() {
                        if !delete_set.contains(hop) && hop != node_id && seen.insert(hop) {
                            candidate_ids.push(hop);
                        }
                    }
                } else if edge != node_id && seen.insert(edge) {
                    candidate_ids.push(edge);
                }
            }
            if !found_deleted {
                return Err(Error::Internal(format!(
                    "prune-delete-neighbour: node {node_id} has no deleted neighbour"
                )));
            }
            if candidate_ids.len() > self.params.degree_bound {
                let dist_fn = self
                    .state
                    .vectors
                    .distance_from_point(node_id, &self.bucket)?;
                let mut candidates = DistSet::new(
                    candidate_ids.len(),
                    dist_fn,
                    Some(self.state.nodes.max_node_id()),
                );
                candidates.add(&candidate_ids)?;
                candidates.sort();
                self.robust_prune(node_id, edges, &mut candidates)?;
            } else {
                *edges = candidate_ids;
            }
            Ok(())
        })
    }
}
