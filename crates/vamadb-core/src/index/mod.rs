//! Secondary indexes: Vamana and flat vector indexes, inverted scalar and
//! array indexes, and the analysed text index.

pub mod distset;
pub mod flat;
pub mod inverted;
pub mod text;
pub mod vamana;

#[cfg(test)]
mod distset_tests;

pub use distset::{DistSet, DistSetElem};

/// One scored entry returned by an index search.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Internal node id of the matching point.
    pub node_id: u64,
    /// Raw distance for vector results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// Raw relevance score for text results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Weighted score used when merging hybrid result lists; higher is
    /// better.
    pub hybrid_score: f32,
}
