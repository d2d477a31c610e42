//! Vector store: id → vector mapping over a bucket, optionally quantised.
//!
//! Keys are `n<little-endian u64>v`. The quantiser variant decides the value
//! encoding: raw float32 little-endian, bit-packed sign words, or product
//! codes. Distance closures returned by [`VectorStoreState::distance_from_float`]
//! and [`VectorStoreState::distance_from_point`] are the only way graph logic
//! computes distances, which keeps the encoding fully internal.

mod quantizer;

#[cfg(test)]
mod tests;

pub use quantizer::{table_lookup_distance, BinaryQuantizer, ProductQuantizer, Quantizer, VectorData};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::cache::{CacheItem, ItemCache};
use crate::distance::{self, DistanceMetric};
use crate::error::{Error, Result};
use crate::index::distset::DistFn;
use crate::schema::QuantizerParams;
use crate::storage::Bucket;

/// Reserved bucket key holding serialised quantiser state.
const QUANTIZER_KEY: &[u8] = b"_quantizer";

/// Builds the bucket key for a node's vector.
#[must_use]
pub fn vector_key(id: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[0] = b'n';
    key[1..9].copy_from_slice(&id.to_le_bytes());
    key[9] = b'v';
    key
}

/// Parses a vector bucket key back into a node id.
#[must_use]
pub fn parse_vector_key(key: &[u8]) -> Option<u64> {
    if key.len() != 10 || key[0] != b'n' || key[9] != b'v' {
        return None;
    }
    let raw: [u8; 8] = key[1..9].try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

/// Decoding context for cached vector entries.
pub struct VectorContext {
    vector_size: usize,
    metric: DistanceMetric,
    quantizer: RwLock<Quantizer>,
}

/// One cached vector with its dirty flag.
pub struct VectorEntry {
    /// Encoded vector payload.
    pub data: VectorData,
    dirty: AtomicBool,
}

impl VectorEntry {
    fn dirty(data: VectorData) -> Self {
        Self {
            data,
            dirty: AtomicBool::new(true),
        }
    }

    fn decode(bytes: &[u8], ctx: &VectorContext) -> Result<VectorData> {
        let quantizer = ctx.quantizer.read();
        if !quantizer.is_trained() {
            return decode_floats(bytes, ctx.vector_size);
        }
        match &*quantizer {
            Quantizer::Binary(_) => {
                if bytes.len() != ctx.vector_size.div_ceil(64) * 8 {
                    return Err(Error::Storage("corrupt bit-packed vector".into()));
                }
                decode_words(bytes)
            }
            Quantizer::Product(q) => {
                if bytes.len() != q.num_subvectors {
                    return Err(Error::Storage("corrupt product-coded vector".into()));
                }
                Ok(VectorData::Product(bytes.to_vec()))
            }
            Quantizer::None => decode_floats(bytes, ctx.vector_size),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match &self.data {
            VectorData::Plain(v) => v.iter().flat_map(|c| c.to_le_bytes()).collect(),
            VectorData::Binary(words) => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
            VectorData::Product(codes) => codes.clone(),
        }
    }
}

fn decode_floats(bytes: &[u8], vector_size: usize) -> Result<VectorData> {
    if bytes.len() != vector_size * 4 {
        return Err(Error::Storage("corrupt vector bytes".into()));
    }
    let vector = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("chunked by 4")))
        .collect();
    Ok(VectorData::Plain(vector))
}

fn decode_words(bytes: &[u8]) -> Result<VectorData> {
    if bytes.len() % 8 != 0 {
        return Err(Error::Storage("corrupt bit-packed vector".into()));
    }
    let words = bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunked by 8")))
        .collect();
    Ok(VectorData::Binary(words))
}

impl CacheItem<u64> for VectorEntry {
    type Context = VectorContext;

    fn read_from(key: &u64, bucket: &Bucket, ctx: &VectorContext) -> Result<Option<Self>> {
        let Some(bytes) = bucket.get(&vector_key(*key))? else {
            return Ok(None);
        };
        Ok(Some(Self {
            data: Self::decode(&bytes, ctx)?,
            dirty: AtomicBool::new(false),
        }))
    }

    fn write_to(&self, key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.put(&vector_key(*key), &self.encode())
    }

    fn delete_from(key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.delete(&vector_key(*key))
    }

    fn size_in_memory(&self) -> usize {
        self.data.size_in_memory() + std::mem::size_of::<Self>()
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn check_and_clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

/// Query prepared against the store's current encoding.
enum PreparedQuery {
    Plain {
        query: Vec<f32>,
        metric: DistanceMetric,
    },
    Binary {
        packed: Vec<u64>,
        metric: DistanceMetric,
    },
    Product {
        table: Vec<f32>,
        num_centroids: usize,
        metric: DistanceMetric,
    },
}

impl PreparedQuery {
    fn distance(&self, data: &VectorData) -> Result<f32> {
        match (self, data) {
            (Self::Plain { query, metric }, VectorData::Plain(v)) => Ok(metric.calculate(query, v)),
            (Self::Binary { packed, metric }, VectorData::Binary(words)) => {
                Ok(match metric {
                    DistanceMetric::Jaccard => distance::jaccard_packed(packed, words),
                    _ => distance::hamming_packed(packed, words),
                })
            }
            (
                Self::Product {
                    table,
                    num_centroids,
                    metric,
                },
                VectorData::Product(codes),
            ) => Ok(table_lookup_distance(table, *num_centroids, codes, *metric)),
            _ => Err(Error::Internal("vector encoding mismatch".into())),
        }
    }
}

/// Cached id → vector map over one bucket.
pub struct VectorStoreState {
    ctx: VectorContext,
    cache: ItemCache<u64, VectorEntry>,
    quantizer_dirty: AtomicBool,
}

impl VectorStoreState {
    /// Opens the store, restoring persisted quantiser state when present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on bucket failure or corrupt quantiser
    /// state.
    pub fn open(
        vector_size: usize,
        metric: DistanceMetric,
        params: Option<&QuantizerParams>,
        bucket: &Bucket,
    ) -> Result<Self> {
        let quantizer = match bucket.get(QUANTIZER_KEY)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => Quantizer::from_params(params),
        };
        Ok(Self {
            ctx: VectorContext {
                vector_size,
                metric,
                quantizer: RwLock::new(quantizer),
            },
            cache: ItemCache::new(),
            quantizer_dirty: AtomicBool::new(false),
        })
    }

    /// Declared vector dimensionality.
    #[must_use]
    pub fn vector_size(&self) -> usize {
        self.ctx.vector_size
    }

    /// Stores a vector for the id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] when the vector length differs from
    /// the declared size.
    pub fn set(&self, id: u64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.ctx.vector_size {
            return Err(Error::SchemaMismatch(format!(
                "vector for node {id} has {} components, expected {}",
                vector.len(),
                self.ctx.vector_size
            )));
        }
        let data = self.ctx.quantizer.read().encode(vector);
        self.cache.put(id, VectorEntry::dirty(data));
        Ok(())
    }

    /// Returns the vector entry for the id, if present.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn get(&self, id: u64, bucket: &Bucket) -> Result<Option<Arc<VectorEntry>>> {
        self.cache.get(&id, bucket, &self.ctx)
    }

    /// Returns the vector entry for the id, failing on absence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when the id has no vector, which violates
    /// the store invariant.
    pub fn get_required(&self, id: u64, bucket: &Bucket) -> Result<Arc<VectorEntry>> {
        self.get(id, bucket)?
            .ok_or_else(|| Error::Internal(format!("missing vector for node {id}")))
    }

    /// Returns the vector entries for several ids, failing on any absence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when an id has no vector.
    pub fn get_many(&self, ids: &[u64], bucket: &Bucket) -> Result<Vec<Arc<VectorEntry>>> {
        ids.iter()
            .map(|&id| self.get_required(id, bucket))
            .collect()
    }

    /// Removes the id's vector.
    pub fn delete(&self, id: u64) {
        self.cache.delete(&id);
    }

    /// Visits every stored vector until `f` returns `Ok(false)`.
    ///
    /// Bucket entries shadowed by the cache are visited once, with the
    /// cached value.
    ///
    /// # Errors
    ///
    /// Propagates bucket and decode failures.
    pub fn for_each<F>(&self, bucket: &Bucket, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &VectorData) -> Result<bool>,
    {
        let cached: FxHashSet<u64> = self.cache.cached_keys().into_iter().collect();
        let mut stop = false;
        bucket.prefix_scan(b"n", |key, value| {
            let Some(id) = parse_vector_key(key) else {
                return Ok(true);
            };
            if cached.contains(&id) || self.cache.is_tombstoned(&id) {
                return Ok(true);
            }
            let data = VectorEntry::decode(value, &self.ctx)?;
            let keep_going = f(id, &data)?;
            stop = !keep_going;
            Ok(keep_going)
        })?;
        if stop {
            return Ok(());
        }
        for id in cached {
            if let Some(entry) = self.cache.get_cached(&id) {
                if !f(id, &entry.data)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Number of stored vectors.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn count(&self, bucket: &Bucket) -> Result<usize> {
        let cached: FxHashSet<u64> = self.cache.cached_keys().into_iter().collect();
        let mut count = cached.len();
        bucket.prefix_scan(b"n", |key, _| {
            if let Some(id) = parse_vector_key(key) {
                if !cached.contains(&id) && !self.cache.is_tombstoned(&id) {
                    count += 1;
                }
            }
            Ok(true)
        })?;
        Ok(count)
    }

    /// Returns a distance closure from a float query to stored points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] on a query of the wrong length.
    pub fn distance_from_float<'a>(
        &'a self,
        query: &[f32],
        bucket: &Bucket,
    ) -> Result<DistFn<'a>> {
        if query.len() != self.ctx.vector_size {
            return Err(Error::SchemaMismatch(format!(
                "query has {} components, expected {}",
                query.len(),
                self.ctx.vector_size
            )));
        }
        let prepared = self.prepare_query(query)?;
        let bucket = bucket.clone();
        Ok(Box::new(move |id| {
            let entry = self.get_required(id, &bucket)?;
            prepared.distance(&entry.data)
        }))
    }

    /// Returns a distance closure from a stored point to other stored
    /// points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when the point has no vector.
    pub fn distance_from_point<'a>(&'a self, id: u64, bucket: &Bucket) -> Result<DistFn<'a>> {
        let entry = self.get_required(id, bucket)?;
        let prepared = match &entry.data {
            VectorData::Plain(v) => return self.distance_from_float(&v.clone(), bucket),
            VectorData::Binary(words) => {
                let metric = match &*self.ctx.quantizer.read() {
                    Quantizer::Binary(q) => q.metric,
                    _ => return Err(Error::Internal("binary vector without quantizer".into())),
                };
                PreparedQuery::Binary {
                    packed: words.clone(),
                    metric,
                }
            }
            VectorData::Product(codes) => {
                let quantizer = self.ctx.quantizer.read();
                let Quantizer::Product(q) = &*quantizer else {
                    return Err(Error::Internal("product vector without quantizer".into()));
                };
                let reconstructed = q.reconstruct(codes, self.ctx.vector_size);
                PreparedQuery::Product {
                    table: q.distance_table(&reconstructed, self.ctx.metric)?,
                    num_centroids: q.num_centroids,
                    metric: self.ctx.metric,
                }
            }
        };
        let bucket = bucket.clone();
        Ok(Box::new(move |other| {
            let entry = self.get_required(other, &bucket)?;
            prepared.distance(&entry.data)
        }))
    }

    /// Visits every stored vector with its distance from `query`, until `f`
    /// returns `Ok(false)`.
    ///
    /// Distances are computed straight off the scanned entries, so a full
    /// scan does not populate the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] on a query of the wrong length and
    /// propagates bucket failures.
    pub fn for_each_distance<F>(&self, query: &[f32], bucket: &Bucket, mut f: F) -> Result<()>
    where
        F: FnMut(u64, f32) -> Result<bool>,
    {
        if query.len() != self.ctx.vector_size {
            return Err(Error::SchemaMismatch(format!(
                "query has {} components, expected {}",
                query.len(),
                self.ctx.vector_size
            )));
        }
        let prepared = self.prepare_query(query)?;
        self.for_each(bucket, |id, data| {
            let distance = prepared.distance(data)?;
            f(id, distance)
        })
    }

    /// Trains the quantiser once the stored-vector count reaches its
    /// trigger, re-encoding every cached and stored vector.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn fit(&self, bucket: &Bucket) -> Result<()> {
        let Some(trigger) = self.ctx.quantizer.read().train_after() else {
            return Ok(());
        };
        if self.count(bucket)? < trigger {
            return Ok(());
        }

        let mut raw: Vec<(u64, Vec<f32>)> = Vec::new();
        self.for_each(bucket, |id, data| {
            if let VectorData::Plain(v) = data {
                raw.push((id, v.clone()));
            }
            Ok(true)
        })?;

        {
            let mut quantizer = self.ctx.quantizer.write();
            if quantizer.is_trained() {
                return Ok(());
            }
            let samples: Vec<Vec<f32>> = raw
                .iter()
                .take(trigger)
                .map(|(_, v)| v.clone())
                .collect();
            quantizer.train(&samples, self.ctx.vector_size);
            if !quantizer.is_trained() {
                return Ok(());
            }
        }

        tracing::info!(vectors = raw.len(), "quantizer trained, re-encoding vectors");
        let quantizer = self.ctx.quantizer.read();
        for (id, vector) in raw {
            let data = quantizer.encode(vector);
            self.cache.put(id, VectorEntry::dirty(data));
        }
        self.quantizer_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Writes dirty entries and quantiser state back to the bucket.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self, bucket: &Bucket) -> Result<()> {
        if self.quantizer_dirty.swap(false, Ordering::AcqRel) {
            let encoded = bincode::serialize(&*self.ctx.quantizer.read())?;
            bucket.put(QUANTIZER_KEY, &encoded)?;
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
        !self.quantizer_dirty.load(Ordering::Acquire) && self.cache.is_clean()
    }

    fn prepare_query(&self, query: &[f32]) -> Result<PreparedQuery> {
        let quantizer = self.ctx.quantizer.read();
        Ok(match &*quantizer {
            Quantizer::Binary(q) if quantizer.is_trained() => PreparedQuery::Binary {
                packed: q.encode(query),
                metric: q.metric,
            },
            Quantizer::Product(q) if quantizer.is_trained() => PreparedQuery::Product {
                table: q.distance_table(query, self.ctx.metric)?,
                num_centroids: q.num_centroids,
                metric: self.ctx.metric,
            },
            _ => PreparedQuery::Plain {
                query: query.to_vec(),
                metric: self.ctx.metric,
            },
        })
    }
}
