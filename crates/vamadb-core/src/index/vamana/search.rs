//! Greedy best-first graph traversal.

use roaring::RoaringTreemap;

use super::{VamanaIndex, START_NODE_ID};
use crate::error::Result;
use crate::index::distset::{DistFn, DistSet, DistSetElem};

impl VamanaIndex<'_> {
    /// Greedy search over the graph with frontier capacity `S`.
    ///
    /// Seeds with the start node, plus up to `S` ids from the filter when
    /// one is given so sparsely connected filtered regions are still
    /// explored. Returns the result elements (capacity `k` when filtering,
    /// the whole frontier otherwise) and the visited set in ascending
    /// distance order, which insertion uses as its prune candidates.
    pub(super) fn greedy_search(
        &self,
        dist_fn: DistFn<'_>,
        k: usize,
        filter: Option<&RoaringTreemap>,
    ) -> Result<(Vec<DistSetElem>, DistSet<'static>)> {
        let search_size = self.params.search_size;
        let max_id = self.state.nodes.max_node_id();
        let mut search = DistSet::new(search_size, dist_fn, Some(max_id));
        let mut visited = DistSet::without_distances(search_size);

        search.add_with_limit(&[START_NODE_ID])?;
        if let Some(filter) = filter {
            // A filter built by another property's index can name points
            // this vector property never had; those cannot seed.
            let mut seeds = Vec::new();
            for id in filter.iter().take(search_size) {
                if self.state.vectors.get(id, &self.bucket)?.is_some() {
                    seeds.push(id);
                }
            }
            search.add_with_limit(&seeds)?;
        }

        // Re-scan from the front after every expansion: newly added closer
        // candidates must be explored before the frontier is considered
        // settled.
        while let Some(idx) = search.first_unvisited(search_size) {
            let elem = search.mark_visited(idx);
            visited.add_already_unique(elem.clone());
            let node = self.state.nodes.get_required(elem.id, &self.bucket)?;
            let edges = node.snapshot_edges();
            search.add_with_limit(&edges)?;
        }

        let results = match filter {
            Some(filter) => {
                let mut result_set = DistSet::without_distances(k);
                for elem in search.items() {
                    if filter.contains(elem.id) {
                        result_set.add_elem_with_limit(elem.clone());
                    }
                }
                result_set.items().to_vec()
            }
            None => search.items().to_vec(),
        };

        visited.sort();
        Ok((results, visited))
    }
}
