//! Distance metrics for vector similarity calculations.
//!
//! All metrics are distances: lower is more similar. Metrics that are
//! naturally similarities (dot product) are negated so that every index can
//! minimise uniformly. Scalar implementations only; the quantised bit-packed
//! variants operate on `u64` words produced by the binary quantiser.

use serde::{Deserialize, Serialize};

/// Mean earth radius in metres, used by the haversine metric.
const EARTH_RADIUS_METRES: f64 = 6_371_000.0;

/// Distance metric for vector similarity calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance (L2²). Monotone in L2, cheaper to compute.
    Euclidean,
    /// Cosine distance (`1 - dot`). Assumes normalised vectors.
    Cosine,
    /// Negated dot product, for maximum inner product search.
    Dot,
    /// Bit difference count. Meaningful for binary-like vectors.
    Hamming,
    /// Jaccard distance over set-like vectors (`1 - |a ∩ b| / |a ∪ b|`).
    Jaccard,
    /// Great-circle distance in metres over `(latitude, longitude)` degree
    /// pairs. Requires exactly 2 dimensions.
    Haversine,
}

impl DistanceMetric {
    /// Calculates the distance between two dense vectors.
    ///
    /// # Panics
    ///
    /// Panics if vectors have different dimensions.
    #[must_use]
    pub fn calculate(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "Vector dimensions must match");

        match self {
            Self::Euclidean => euclidean_sq(a, b),
            Self::Cosine => cosine_distance(a, b),
            Self::Dot => dot_distance(a, b),
            Self::Hamming => hamming_dense(a, b),
            Self::Jaccard => jaccard_dense(a, b),
            Self::Haversine => haversine(a, b),
        }
    }

    /// Returns the required vector size for this metric, if constrained.
    ///
    /// Only haversine constrains the dimension (latitude, longitude).
    #[must_use]
    pub const fn required_size(&self) -> Option<usize> {
        match self {
            Self::Haversine => Some(2),
            _ => None,
        }
    }

    /// Returns true if this metric is defined over bit-packed vectors.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Hamming | Self::Jaccard)
    }
}

/// Squared Euclidean distance.
#[must_use]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cosine distance as `1 - dot`, assuming normalised inputs.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>()
}

/// Negated dot product, so that minimising the distance maximises the inner
/// product.
#[must_use]
pub fn dot_distance(a: &[f32], b: &[f32]) -> f32 {
    -a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>()
}

/// Component mismatch count over dense vectors.
#[must_use]
pub fn hamming_dense(a: &[f32], b: &[f32]) -> f32 {
    let mismatches = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
    #[allow(clippy::cast_precision_loss)]
    {
        mismatches as f32
    }
}

/// Jaccard distance over dense vectors, treating non-zero components as set
/// membership.
#[must_use]
pub fn jaccard_dense(a: &[f32], b: &[f32]) -> f32 {
    let mut intersection = 0u32;
    let mut union = 0u32;
    for (x, y) in a.iter().zip(b.iter()) {
        let xs = *x != 0.0;
        let ys = *y != 0.0;
        if xs && ys {
            intersection += 1;
        }
        if xs || ys {
            union += 1;
        }
    }
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        1.0 - intersection as f32 / union as f32
    }
}

/// Hamming distance over bit-packed vectors.
#[must_use]
pub fn hamming_packed(a: &[u64], b: &[u64]) -> f32 {
    let bits: u32 = a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum();
    #[allow(clippy::cast_precision_loss)]
    {
        bits as f32
    }
}

/// Jaccard distance over bit-packed vectors.
#[must_use]
pub fn jaccard_packed(a: &[u64], b: &[u64]) -> f32 {
    let mut intersection = 0u32;
    let mut union = 0u32;
    for (x, y) in a.iter().zip(b.iter()) {
        intersection += (x & y).count_ones();
        union += (x | y).count_ones();
    }
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        1.0 - intersection as f32 / union as f32
    }
}

/// Great-circle distance in metres between two `(latitude, longitude)` degree
/// pairs.
///
/// Computed in `f64`: at earth scale the result has more significant digits
/// than a single `f32` trigonometric pipeline preserves.
///
/// # Panics
///
/// Panics if either vector is not 2-dimensional.
#[must_use]
pub fn haversine(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), 2, "haversine requires (latitude, longitude) pairs");
    assert_eq!(b.len(), 2, "haversine requires (latitude, longitude) pairs");

    let lat1 = f64::from(a[0]).to_radians();
    let lat2 = f64::from(b[0]).to_radians();
    let dlat = (f64::from(b[0]) - f64::from(a[0])).to_radians();
    let dlon = (f64::from(b[1]) - f64::from(a[1])).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    #[allow(clippy::cast_possible_truncation)]
    {
        (2.0 * EARTH_RADIUS_METRES * h.sqrt().asin()) as f32
    }
}
