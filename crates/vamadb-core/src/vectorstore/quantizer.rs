//! Vector quantisers: binary sign vectors and product quantisation.
//!
//! The quantiser owns the storage encoding and hides it from graph logic;
//! Vamana only ever sees distance closures. Training state is persisted in
//! the owning bucket and reloaded on open.

use serde::{Deserialize, Serialize};

use crate::distance::{self, DistanceMetric};
use crate::error::{Error, Result};
use crate::schema::QuantizerParams;

/// Storage representation of one vector under the current quantiser.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorData {
    /// Raw float32 components.
    Plain(Vec<f32>),
    /// Bit-packed sign vector, one bit per dimension.
    Binary(Vec<u64>),
    /// Per-subvector centroid indices.
    Product(Vec<u8>),
}

impl VectorData {
    /// Approximate heap footprint in bytes.
    #[must_use]
    pub fn size_in_memory(&self) -> usize {
        match self {
            Self::Plain(v) => v.len() * 4,
            Self::Binary(v) => v.len() * 8,
            Self::Product(v) => v.len(),
        }
    }
}

/// Tagged quantiser variant owned by a vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quantizer {
    /// Raw float32 storage.
    None,
    /// One bit per dimension.
    Binary(BinaryQuantizer),
    /// k-means codebook per subvector.
    Product(ProductQuantizer),
}

impl Quantizer {
    /// Builds the untrained quantiser described by schema parameters.
    #[must_use]
    pub fn from_params(params: Option<&QuantizerParams>) -> Self {
        match params {
            None | Some(QuantizerParams::None) => Self::None,
            Some(QuantizerParams::Binary {
                threshold,
                train_after,
                distance_metric,
            }) => Self::Binary(BinaryQuantizer {
                fixed_threshold: *threshold,
                train_after: *train_after,
                metric: *distance_metric,
                thresholds: None,
            }),
            Some(QuantizerParams::Product {
                num_centroids,
                num_subvectors,
                train_after,
            }) => Self::Product(ProductQuantizer {
                num_centroids: *num_centroids,
                num_subvectors: *num_subvectors,
                train_after: *train_after,
                codebook: None,
            }),
        }
    }

    /// Returns true once encoding differs from raw floats.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        match self {
            Self::None => false,
            Self::Binary(q) => q.is_trained(),
            Self::Product(q) => q.codebook.is_some(),
        }
    }

    /// Number of stored vectors that triggers training, or `None` when the
    /// quantiser never trains.
    #[must_use]
    pub fn train_after(&self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Binary(q) => (!q.is_trained()).then_some(q.train_after),
            Self::Product(q) => q.codebook.is_none().then_some(q.train_after),
        }
    }

    /// Encodes a raw vector under the current training state.
    #[must_use]
    pub fn encode(&self, vector: Vec<f32>) -> VectorData {
        match self {
            Self::None => VectorData::Plain(vector),
            Self::Binary(q) if q.is_trained() => VectorData::Binary(q.encode(&vector)),
            Self::Product(q) => match q.codebook {
                Some(_) => VectorData::Product(q.encode(&vector)),
                None => VectorData::Plain(vector),
            },
            Self::Binary(_) => VectorData::Plain(vector),
        }
    }

    /// Trains from raw sample vectors.
    pub fn train(&mut self, samples: &[Vec<f32>], vector_size: usize) {
        match self {
            Self::None => {}
            Self::Binary(q) => q.train(samples, vector_size),
            Self::Product(q) => q.train(samples, vector_size),
        }
    }
}

/// Sign quantiser: component above its threshold sets the bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryQuantizer {
    /// Fixed split threshold shared by every dimension, if configured.
    pub fixed_threshold: Option<f32>,
    /// Stored-vector count that triggers training.
    pub train_after: usize,
    /// Bit-space metric (hamming or jaccard).
    pub metric: DistanceMetric,
    /// Learned per-dimension thresholds; empty when `fixed_threshold` is
    /// set, `None` while untrained.
    pub thresholds: Option<Vec<f32>>,
}

impl BinaryQuantizer {
    fn is_trained(&self) -> bool {
        self.fixed_threshold.is_some() || self.thresholds.is_some()
    }

    fn threshold_for(&self, dim: usize) -> f32 {
        if let Some(fixed) = self.fixed_threshold {
            return fixed;
        }
        self.thresholds
            .as_ref()
            .and_then(|t| t.get(dim))
            .copied()
            .unwrap_or(0.0)
    }

    /// Packs a raw vector into sign bits.
    #[must_use]
    pub fn encode(&self, vector: &[f32]) -> Vec<u64> {
        let mut words = vec![0u64; vector.len().div_ceil(64)];
        for (dim, &component) in vector.iter().enumerate() {
            if component > self.threshold_for(dim) {
                words[dim / 64] |= 1 << (dim % 64);
            }
        }
        words
    }

    /// Learns per-dimension mean thresholds from samples.
    pub fn train(&mut self, samples: &[Vec<f32>], vector_size: usize) {
        if self.fixed_threshold.is_some() || samples.is_empty() {
            return;
        }
        let mut means = vec![0.0f64; vector_size];
        for sample in samples {
            for (dim, &component) in sample.iter().enumerate() {
                means[dim] += f64::from(component);
            }
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let thresholds = means
            .iter()
            .map(|&sum| (sum / samples.len() as f64) as f32)
            .collect();
        self.thresholds = Some(thresholds);
    }

    /// Distance between two packed vectors under the configured bit metric.
    #[must_use]
    pub fn packed_distance(&self, a: &[u64], b: &[u64]) -> f32 {
        match self.metric {
            DistanceMetric::Jaccard => distance::jaccard_packed(a, b),
            _ => distance::hamming_packed(a, b),
        }
    }
}

/// Product quantiser: the vector is split into subvectors, each encoded as
/// its nearest centroid index in a trained codebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuantizer {
    /// Centroids per subquantiser, at most 256.
    pub num_centroids: usize,
    /// Number of subvectors.
    pub num_subvectors: usize,
    /// Stored-vector count that triggers training.
    pub train_after: usize,
    /// Flattened codebook: `codebook[sub][centroid * sub_dim ..]`, `None`
    /// while untrained.
    pub codebook: Option<Vec<Vec<f32>>>,
}

const KMEANS_ITERATIONS: usize = 12;

impl ProductQuantizer {
    fn sub_dim(&self, vector_size: usize) -> usize {
        vector_size / self.num_subvectors
    }

    /// Encodes a raw vector into centroid indices.
    ///
    /// # Panics
    ///
    /// Panics if called before training.
    #[must_use]
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let codebook = self.codebook.as_ref().expect("product quantizer untrained");
        let sub_dim = vector.len() / self.num_subvectors;
        let mut codes = Vec::with_capacity(self.num_subvectors);
        for (sub, centroids) in codebook.iter().enumerate() {
            let slice = &vector[sub * sub_dim..(sub + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for c in 0..self.num_centroids {
                let centroid = &centroids[c * sub_dim..(c + 1) * sub_dim];
                let d = distance::euclidean_sq(slice, centroid);
                if d < best_dist {
                    best = c;
                    best_dist = d;
                }
            }
            #[allow(clippy::cast_possible_truncation)]
            codes.push(best as u8);
        }
        codes
    }

    /// Reconstructs the approximate float vector for stored codes.
    #[must_use]
    pub fn reconstruct(&self, codes: &[u8], vector_size: usize) -> Vec<f32> {
        let sub_dim = self.sub_dim(vector_size);
        let mut vector = Vec::with_capacity(vector_size);
        if let Some(codebook) = &self.codebook {
            for (sub, &code) in codes.iter().enumerate() {
                let centroids = &codebook[sub];
                let start = usize::from(code) * sub_dim;
                vector.extend_from_slice(&centroids[start..start + sub_dim]);
            }
        }
        vector
    }

    /// Lloyd's k-means per subvector.
    pub fn train(&mut self, samples: &[Vec<f32>], vector_size: usize) {
        if samples.is_empty() {
            return;
        }
        let sub_dim = self.sub_dim(vector_size);
        let k = self.num_centroids.min(samples.len());
        let mut codebook = Vec::with_capacity(self.num_subvectors);

        for sub in 0..self.num_subvectors {
            let slices: Vec<&[f32]> = samples
                .iter()
                .map(|s| &s[sub * sub_dim..(sub + 1) * sub_dim])
                .collect();

            // Deterministic init: evenly spaced samples.
            let mut centroids: Vec<f32> = Vec::with_capacity(self.num_centroids * sub_dim);
            for c in 0..self.num_centroids {
                let pick = (c.min(k - 1) * slices.len()) / k;
                centroids.extend_from_slice(slices[pick]);
            }

            for _ in 0..KMEANS_ITERATIONS {
                let mut sums = vec![0.0f64; self.num_centroids * sub_dim];
                let mut counts = vec![0usize; self.num_centroids];
                for slice in &slices {
                    let mut best = 0usize;
                    let mut best_dist = f32::MAX;
                    for c in 0..self.num_centroids {
                        let centroid = &centroids[c * sub_dim..(c + 1) * sub_dim];
                        let d = distance::euclidean_sq(slice, centroid);
                        if d < best_dist {
                            best = c;
                            best_dist = d;
                        }
                    }
                    counts[best] += 1;
                    for (dim, &component) in slice.iter().enumerate() {
                        sums[best * sub_dim + dim] += f64::from(component);
                    }
                }
                for c in 0..self.num_centroids {
                    if counts[c] == 0 {
                        continue; // empty cluster keeps its centroid
                    }
                    for dim in 0..sub_dim {
                        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                        {
                            centroids[c * sub_dim + dim] =
                                (sums[c * sub_dim + dim] / counts[c] as f64) as f32;
                        }
                    }
                }
            }
            codebook.push(centroids);
        }
        self.codebook = Some(codebook);
    }

    /// Builds the asymmetric distance table for a float query: one partial
    /// distance per `(subvector, centroid)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if called before training or with an
    /// unsupported metric.
    pub fn distance_table(&self, query: &[f32], metric: DistanceMetric) -> Result<Vec<f32>> {
        let codebook = self
            .codebook
            .as_ref()
            .ok_or_else(|| Error::Internal("product quantizer untrained".into()))?;
        let sub_dim = query.len() / self.num_subvectors;
        let mut table = vec![0.0f32; self.num_subvectors * self.num_centroids];
        for (sub, centroids) in codebook.iter().enumerate() {
            let slice = &query[sub * sub_dim..(sub + 1) * sub_dim];
            for c in 0..self.num_centroids {
                let centroid = &centroids[c * sub_dim..(c + 1) * sub_dim];
                let partial = match metric {
                    DistanceMetric::Euclidean => distance::euclidean_sq(slice, centroid),
                    // Dot and cosine both accumulate negated dot partials;
                    // cosine adds its constant 1 at combine time.
                    DistanceMetric::Dot | DistanceMetric::Cosine => {
                        distance::dot_distance(slice, centroid)
                    }
                    other => {
                        return Err(Error::Internal(format!(
                            "product quantizer does not support {other:?}"
                        )))
                    }
                };
                table[sub * self.num_centroids + c] = partial;
            }
        }
        Ok(table)
    }

    /// Sums table partials for stored codes.
    #[must_use]
    pub fn table_distance(&self, table: &[f32], codes: &[u8], metric: DistanceMetric) -> f32 {
        table_lookup_distance(table, self.num_centroids, codes, metric)
    }
}

/// Sums asymmetric-table partials for stored codes; cosine folds in its
/// constant term here.
#[must_use]
pub fn table_lookup_distance(
    table: &[f32],
    num_centroids: usize,
    codes: &[u8],
    metric: DistanceMetric,
) -> f32 {
    let mut total: f32 = codes
        .iter()
        .enumerate()
        .map(|(sub, &code)| table[sub * num_centroids + usize::from(code)])
        .sum();
    if metric == DistanceMetric::Cosine {
        total += 1.0;
    }
    total
}
