//! # `VamaDB` Core
//!
//! Disk-persistent, in-memory-cached, graph-based approximate
//! nearest-neighbour search, with a multi-index dispatch layer for hybrid
//! queries.
//!
//! The heart of the crate is a Vamana (DiskANN-style) proximity graph:
//! greedy search over a bounded frontier, robust pruning with an α slack,
//! concurrent inserts, and deletion repair that keeps every surviving node
//! reachable from the reserved start node. Around it sit a flat exhaustive
//! index, roaring-bitmap inverted indexes with byte-sortable keys, a TF-IDF
//! text index, a shared size-bounded cache layer, and a bucket store over an
//! embedded key-value engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vamadb_core::{CacheManager, IndexManager, IndexSchema, Store};
//!
//! let store = Store::open("./data/shard-1")?;
//! let caches = CacheManager::new(512 * 1024 * 1024);
//!
//! store.write(|buckets| {
//!     let tx = caches.transaction();
//!     let manager = IndexManager::new(buckets, &tx, "shard-1", schema.clone())?;
//!     let result = manager.dispatch(changes);
//!     tx.commit(result.is_err());
//!     result
//! })?;
//!
//! let (ids, results) = store.read(|buckets| {
//!     let tx = caches.transaction();
//!     let manager = IndexManager::new(buckets, &tx, "shard-1", schema.clone())?;
//!     let found = manager.search(&query);
//!     tx.commit(false);
//!     found
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cancel;
pub mod dispatch;
pub mod distance;
pub mod error;
pub mod index;
pub mod schema;
pub mod storage;
pub mod vectorstore;


pub use cache::CacheManager;
pub use cancel::CancelToken;
pub use dispatch::query::Query;
pub use dispatch::{IndexManager, PointChange};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use index::SearchResult;
pub use schema::{IndexSchema, IndexSchemaValue};
pub use storage::Store;
