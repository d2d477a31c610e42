//! Recursive query tree: one leaf per property plus `_and` / `_or`
//! composition nodes.

use serde::{Deserialize, Serialize};

use crate::index::text::TextOperator;

/// Property name selecting AND composition over `_and` sub-queries.
pub const AND_PROPERTY: &str = "_and";
/// Property name selecting OR composition over `_or` sub-queries.
pub const OR_PROPERTY: &str = "_or";

fn default_weight() -> f32 {
    1.0
}

/// Vector search operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VectorOperator {
    /// Nearest-neighbour search.
    Near,
}

/// Options of a `vectorVamana` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVectorVamanaOptions {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Search operator.
    pub operator: VectorOperator,
    /// Result count, at most the index's search size.
    pub limit: usize,
    /// Optional pre-filter sub-query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Box<Query>>,
    /// Hybrid weight; results score `-weight · distance`.
    #[serde(default = "default_weight")]
    pub weight: f32,
}

/// Options of a `vectorFlat` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVectorFlatOptions {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Search operator.
    pub operator: VectorOperator,
    /// Result count.
    pub limit: usize,
    /// Optional pre-filter sub-query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Box<Query>>,
    /// Hybrid weight; results score `-weight · distance`.
    #[serde(default = "default_weight")]
    pub weight: f32,
}

/// Options of a `text` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTextOptions {
    /// Query text, analysed with the property's analyser.
    pub value: String,
    /// Term composition operator.
    pub operator: TextOperator,
    /// Result count.
    pub limit: usize,
    /// Optional pre-filter sub-query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Box<Query>>,
    /// Hybrid weight; results score `weight · tfidf`.
    #[serde(default = "default_weight")]
    pub weight: f32,
}

/// Operators over string properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StringOperator {
    /// Exact match.
    Equals,
    /// Everything but an exact match.
    NotEquals,
    /// Prefix match.
    StartsWith,
    /// Strictly greater.
    GreaterThan,
    /// Greater or equal.
    GreaterThanOrEquals,
    /// Strictly less.
    LessThan,
    /// Less or equal.
    LessThanOrEquals,
    /// Closed range `[value, endValue]`.
    InRange,
}

/// Options of a `string` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStringOptions {
    /// Comparison value.
    pub value: String,
    /// Comparison operator.
    pub operator: StringOperator,
    /// Range end, required by `inRange`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_value: Option<String>,
}

/// Operators over integer and float properties: the string set minus
/// `startsWith`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NumberOperator {
    /// Exact match.
    Equals,
    /// Everything but an exact match.
    NotEquals,
    /// Strictly greater.
    GreaterThan,
    /// Greater or equal.
    GreaterThanOrEquals,
    /// Strictly less.
    LessThan,
    /// Less or equal.
    LessThanOrEquals,
    /// Closed range `[value, endValue]`.
    InRange,
}

/// Options of an `integer` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIntegerOptions {
    /// Comparison value.
    pub value: i64,
    /// Comparison operator.
    pub operator: NumberOperator,
    /// Range end, required by `inRange`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_value: Option<i64>,
}

/// Options of a `float` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFloatOptions {
    /// Comparison value.
    pub value: f64,
    /// Comparison operator.
    pub operator: NumberOperator,
    /// Range end, required by `inRange`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_value: Option<f64>,
}

/// Operators over string-array properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArrayOperator {
    /// Arrays containing every value.
    ContainsAll,
    /// Arrays containing any value.
    ContainsAny,
}

/// Options of a `stringArray` leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStringArrayOptions {
    /// Comparison values.
    pub value: Vec<String>,
    /// Set operator.
    pub operator: ArrayOperator,
}

/// A query tree node: a per-property leaf, or `_and`/`_or` composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Property path, or the reserved `_and` / `_or` names.
    pub property: String,
    /// Vamana vector options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_vamana: Option<SearchVectorVamanaOptions>,
    /// Flat vector options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_flat: Option<SearchVectorFlatOptions>,
    /// Text options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<SearchTextOptions>,
    /// String options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<SearchStringOptions>,
    /// Integer options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer: Option<SearchIntegerOptions>,
    /// Float options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float: Option<SearchFloatOptions>,
    /// String-array options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_array: Option<SearchStringArrayOptions>,
    /// AND sub-queries.
    #[serde(rename = "_and", default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Query>>,
    /// OR sub-queries.
    #[serde(rename = "_or", default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Query>>,
}

impl Query {
    fn leaf(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            vector_vamana: None,
            vector_flat: None,
            text: None,
            string: None,
            integer: None,
            float: None,
            string_array: None,
            and: None,
            or: None,
        }
    }

    /// Builds a `vectorVamana` leaf.
    #[must_use]
    pub fn vector_vamana(property: impl Into<String>, options: SearchVectorVamanaOptions) -> Self {
        Self {
            vector_vamana: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds a `vectorFlat` leaf.
    #[must_use]
    pub fn vector_flat(property: impl Into<String>, options: SearchVectorFlatOptions) -> Self {
        Self {
            vector_flat: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds a `text` leaf.
    #[must_use]
    pub fn text(property: impl Into<String>, options: SearchTextOptions) -> Self {
        Self {
            text: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds a `string` leaf.
    #[must_use]
    pub fn string(property: impl Into<String>, options: SearchStringOptions) -> Self {
        Self {
            string: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds an `integer` leaf.
    #[must_use]
    pub fn integer(property: impl Into<String>, options: SearchIntegerOptions) -> Self {
        Self {
            integer: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds a `float` leaf.
    #[must_use]
    pub fn float(property: impl Into<String>, options: SearchFloatOptions) -> Self {
        Self {
            float: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds a `stringArray` leaf.
    #[must_use]
    pub fn string_array(property: impl Into<String>, options: SearchStringArrayOptions) -> Self {
        Self {
            string_array: Some(options),
            ..Self::leaf(property)
        }
    }

    /// Builds an `_and` composition node.
    #[must_use]
    pub fn and(queries: Vec<Query>) -> Self {
        Self {
            and: Some(queries),
            ..Self::leaf(AND_PROPERTY)
        }
    }

    /// Builds an `_or` composition node.
    #[must_use]
    pub fn or(queries: Vec<Query>) -> Self {
        Self {
            or: Some(queries),
            ..Self::leaf(OR_PROPERTY)
        }
    }
}
