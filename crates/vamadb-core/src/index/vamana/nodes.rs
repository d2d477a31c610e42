//! Node store: id → edge list over a bucket, with per-node edge locks.
//!
//! Keys are `n<little-endian u64>e`; edge lists are serialised as a
//! length-prefixed sequence of little-endian u64s, in insertion order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::cache::{CacheItem, ItemCache};
use crate::error::{Error, Result};
use crate::storage::Bucket;

/// Reserved bucket key persisting the maximum assigned node id.
const MAX_NODE_ID_KEY: &[u8] = b"_maxNodeId";

/// Builds the bucket key for a node's edge list.
#[must_use]
pub fn edge_key(id: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[0] = b'n';
    key[1..9].copy_from_slice(&id.to_le_bytes());
    key[9] = b'e';
    key
}

/// Parses an edge bucket key back into a node id.
#[must_use]
pub fn parse_edge_key(key: &[u8]) -> Option<u64> {
    if key.len() != 10 || key[0] != b'n' || key[9] != b'e' {
        return None;
    }
    let raw: [u8; 8] = key[1..9].try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

/// One graph node: an edge list behind a reader-writer lock.
///
/// The lock is the node's edge mutex: greedy search takes it shared while
/// enumerating, inserts and prunes take it exclusive while rewriting.
pub struct GraphNode {
    edges: RwLock<Vec<u64>>,
    dirty: AtomicBool,
}

impl GraphNode {
    /// Creates a dirty node with no edges.
    #[must_use]
    pub fn empty() -> Self {
        Self::with_edges(Vec::new())
    }

    /// Creates a dirty node with the given edges.
    #[must_use]
    pub fn with_edges(edges: Vec<u64>) -> Self {
        Self {
            edges: RwLock::new(edges),
            dirty: AtomicBool::new(true),
        }
    }

    /// Copies the edge list under the read lock.
    #[must_use]
    pub fn snapshot_edges(&self) -> Vec<u64> {
        self.edges.read().clone()
    }

    /// Current out-degree.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.read().len()
    }

    /// Replaces the edge list.
    pub fn set_edges(&self, edges: Vec<u64>) {
        *self.edges.write() = edges;
        self.dirty.store(true, Ordering::Release);
    }

    /// Runs `f` with exclusive access to the edge list and marks the node
    /// dirty.
    pub fn with_edges_mut<R>(&self, f: impl FnOnce(&mut Vec<u64>) -> R) -> R {
        let mut edges = self.edges.write();
        let result = f(&mut edges);
        self.dirty.store(true, Ordering::Release);
        result
    }

    /// Appends the id unless it is already an edge. Appending is the only
    /// operation that deduplicates; plain edge writes keep caller order.
    pub fn add_neighbour_if_not_exists(&self, id: u64) {
        let mut edges = self.edges.write();
        if !edges.contains(&id) {
            edges.push(id);
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn encode(&self) -> Vec<u8> {
        let edges = self.edges.read();
        let mut bytes = Vec::with_capacity(8 + edges.len() * 8);
        bytes.extend_from_slice(&(edges.len() as u64).to_le_bytes());
        for edge in edges.iter() {
            bytes.extend_from_slice(&edge.to_le_bytes());
        }
        bytes
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || bytes.len() % 8 != 0 {
            return Err(Error::Storage("corrupt edge list".into()));
        }
        let count = u64::from_le_bytes(bytes[..8].try_into().expect("checked length"));
        let expected = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(8))
            .and_then(|c| c.checked_add(8))
            .ok_or_else(|| Error::Storage("corrupt edge list".into()))?;
        if bytes.len() != expected {
            return Err(Error::Storage("corrupt edge list".into()));
        }
        let edges = bytes[8..]
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunked by 8")))
            .collect();
        Ok(Self {
            edges: RwLock::new(edges),
            dirty: AtomicBool::new(false),
        })
    }
}

impl CacheItem<u64> for GraphNode {
    type Context = ();

    fn read_from(key: &u64, bucket: &Bucket, _: &()) -> Result<Option<Self>> {
        let Some(bytes) = bucket.get(&edge_key(*key))? else {
            return Ok(None);
        };
        Ok(Some(Self::decode(&bytes)?))
    }

    fn write_to(&self, key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.put(&edge_key(*key), &self.encode())
    }

    fn delete_from(key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.delete(&edge_key(*key))
    }

    fn size_in_memory(&self) -> usize {
        self.edges.read().len() * 8 + std::mem::size_of::<Self>()
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn check_and_clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

/// Cached id → edge-list map over one bucket, tracking the maximum node id.
pub struct NodeStoreState {
    cache: ItemCache<u64, GraphNode>,
    max_node_id: AtomicU64,
    max_dirty: AtomicBool,
}

impl NodeStoreState {
    /// Opens the store, restoring the persisted maximum node id.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn open(bucket: &Bucket) -> Result<Self> {
        let max_node_id = match bucket.get(MAX_NODE_ID_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt max node id".into()))?;
                u64::from_le_bytes(raw)
            }
            None => 0,
        };
        Ok(Self {
            cache: ItemCache::new(),
            max_node_id: AtomicU64::new(max_node_id),
            max_dirty: AtomicBool::new(false),
        })
    }

    /// Returns the node, if present.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn get(&self, id: u64, bucket: &Bucket) -> Result<Option<Arc<GraphNode>>> {
        self.cache.get(&id, bucket, &())
    }

    /// Returns the node, failing on absence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when the id has no node entry.
    pub fn get_required(&self, id: u64, bucket: &Bucket) -> Result<Arc<GraphNode>> {
        self.get(id, bucket)?
            .ok_or_else(|| Error::Internal(format!("missing graph node {id}")))
    }

    /// Returns the nodes for several ids, failing on any absence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when an id has no node entry.
    pub fn get_many(&self, ids: &[u64], bucket: &Bucket) -> Result<Vec<Arc<GraphNode>>> {
        ids.iter()
            .map(|&id| self.get_required(id, bucket))
            .collect()
    }

    /// Inserts a node and observes its id for the max counter.
    pub fn put(&self, id: u64, node: GraphNode) -> Arc<GraphNode> {
        self.observe_id(id);
        self.cache.put(id, node)
    }

    /// Removes the node.
    pub fn delete(&self, id: u64) {
        self.cache.delete(&id);
    }

    /// Visits every node's edge list until `f` returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Propagates bucket and decode failures.
    pub fn for_each<F>(&self, bucket: &Bucket, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &[u64]) -> Result<bool>,
    {
        let cached: FxHashSet<u64> = self.cache.cached_keys().into_iter().collect();
        let mut stop = false;
        bucket.prefix_scan(b"n", |key, value| {
            let Some(id) = parse_edge_key(key) else {
                return Ok(true);
            };
            if cached.contains(&id) || self.cache.is_tombstoned(&id) {
                return Ok(true);
            }
            let node = GraphNode::decode(value)?;
            let keep_going = f(id, &node.edges.read())?;
            stop = !keep_going;
            Ok(keep_going)
        })?;
        if stop {
            return Ok(());
        }
        for id in cached {
            if let Some(node) = self.cache.get_cached(&id) {
                if !f(id, &node.snapshot_edges())? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Highest node id ever observed by this store.
    #[must_use]
    pub fn max_node_id(&self) -> u64 {
        self.max_node_id.load(Ordering::Acquire)
    }

    /// Raises the max counter to cover `id`.
    pub fn observe_id(&self, id: u64) {
        let previous = self.max_node_id.fetch_max(id, Ordering::AcqRel);
        if id > previous {
            self.max_dirty.store(true, Ordering::Release);
        }
    }

    /// Writes dirty nodes and the max counter back to the bucket.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self, bucket: &Bucket) -> Result<()> {
        if self.max_dirty.swap(false, Ordering::AcqRel) {
            bucket.put(MAX_NODE_ID_KEY, &self.max_node_id().to_le_bytes())?;
        }
        self.cache.flush(bucket)
    }

    /// Approximate in-memory footprint in bytes.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.cache.mem_size()
    }

    /// Returns true if nothing is waiting to be flushed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.max_dirty.load(Ordering::Acquire) && self.cache.is_clean()
    }
}
