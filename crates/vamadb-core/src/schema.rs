//! Index schema: dotted property paths mapped to index types and parameters.
//!
//! The schema lexically owns the per-property buckets (`index/<type>/<path>`)
//! and drives both write dispatch and query validation. Metadata blobs are
//! self-describing JSON documents; properties are addressed with dotted paths
//! (`profile.age`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

/// Reserved property holding the external point UUID.
pub const ID_PROPERTY: &str = "_id";

fn default_search_size() -> usize {
    75
}

fn default_degree_bound() -> usize {
    64
}

fn default_alpha() -> f32 {
    1.2
}

fn default_train_after() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

/// Index kinds a property can be declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexType {
    /// Vamana proximity-graph ANN index.
    VectorVamana,
    /// Exhaustive-scan vector index.
    VectorFlat,
    /// Analysed full-text index with TF-IDF ranking.
    Text,
    /// Inverted index over strings.
    String,
    /// Inverted index over string arrays.
    StringArray,
    /// Inverted index over signed integers.
    Integer,
    /// Inverted index over floats.
    Float,
}

impl IndexType {
    /// Stable name used in bucket and cache paths.
    #[must_use]
    pub const fn bucket_segment(&self) -> &'static str {
        match self {
            Self::VectorVamana => "vectorVamana",
            Self::VectorFlat => "vectorFlat",
            Self::Text => "text",
            Self::String => "string",
            Self::StringArray => "stringArray",
            Self::Integer => "integer",
            Self::Float => "float",
        }
    }
}

/// Quantiser configuration for a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QuantizerParams {
    /// Raw float32 storage.
    None,
    /// One bit per dimension; threshold fixed or learned from samples.
    #[serde(rename_all = "camelCase")]
    Binary {
        /// Fixed split threshold; learned per-dimension means when absent.
        #[serde(default)]
        threshold: Option<f32>,
        /// Number of stored vectors that triggers training.
        #[serde(default = "default_train_after")]
        train_after: usize,
        /// Bit-space metric, hamming or jaccard.
        distance_metric: DistanceMetric,
    },
    /// Product quantisation with a k-means codebook per subvector.
    #[serde(rename_all = "camelCase")]
    Product {
        /// Centroids per subquantiser, at most 256.
        num_centroids: usize,
        /// Number of subvectors the dimension is split into.
        num_subvectors: usize,
        /// Number of stored vectors that triggers training.
        #[serde(default = "default_train_after")]
        train_after: usize,
    },
}

/// Parameters of a Vamana-indexed vector property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VamanaParams {
    /// Expected vector dimensionality.
    pub vector_size: usize,
    /// Distance metric used for graph construction and search.
    pub distance_metric: DistanceMetric,
    /// Greedy-search frontier capacity (S), 25..=75.
    #[serde(default = "default_search_size")]
    pub search_size: usize,
    /// Maximum out-degree (R), 32..=64.
    #[serde(default = "default_degree_bound")]
    pub degree_bound: usize,
    /// Robust-prune slack (α), 1.1..=1.5.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// Optional vector quantiser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizer: Option<QuantizerParams>,
}

impl VamanaParams {
    fn validate(&self, property: &str) -> Result<()> {
        check_vector_common(property, self.vector_size, self.distance_metric, self.quantizer.as_ref())?;
        if !(25..=75).contains(&self.search_size) {
            return Err(Error::SchemaMismatch(format!(
                "{property}: searchSize {} outside 25..=75",
                self.search_size
            )));
        }
        if !(32..=64).contains(&self.degree_bound) {
            return Err(Error::SchemaMismatch(format!(
                "{property}: degreeBound {} outside 32..=64",
                self.degree_bound
            )));
        }
        if !(1.1..=1.5).contains(&self.alpha) {
            return Err(Error::SchemaMismatch(format!(
                "{property}: alpha {} outside 1.1..=1.5",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Parameters of a flat-indexed vector property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatParams {
    /// Expected vector dimensionality.
    pub vector_size: usize,
    /// Distance metric used for scans.
    pub distance_metric: DistanceMetric,
    /// Optional vector quantiser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizer: Option<QuantizerParams>,
}

impl FlatParams {
    fn validate(&self, property: &str) -> Result<()> {
        check_vector_common(property, self.vector_size, self.distance_metric, self.quantizer.as_ref())
    }
}

/// Text analyser selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Analyser {
    /// Lowercasing, Unicode word tokenisation, stop-word removal.
    #[default]
    Standard,
}

/// Parameters of a text property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextParams {
    /// Analyser applied to documents and queries.
    #[serde(default)]
    pub analyser: Analyser,
}

/// Parameters of string and string-array properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringParams {
    /// When false, values are lowercased before indexing and querying.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl Default for StringParams {
    fn default() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

fn check_vector_common(
    property: &str,
    vector_size: usize,
    metric: DistanceMetric,
    quantizer: Option<&QuantizerParams>,
) -> Result<()> {
    if vector_size == 0 {
        return Err(Error::SchemaMismatch(format!(
            "{property}: vectorSize must be positive"
        )));
    }
    if let Some(required) = metric.required_size() {
        if vector_size != required {
            return Err(Error::SchemaMismatch(format!(
                "{property}: {metric:?} requires vectorSize {required}, got {vector_size}"
            )));
        }
    }
    if metric == DistanceMetric::Haversine && !matches!(quantizer, None | Some(QuantizerParams::None)) {
        return Err(Error::SchemaMismatch(format!(
            "{property}: haversine cannot be quantised"
        )));
    }
    match quantizer {
        None | Some(QuantizerParams::None) => Ok(()),
        Some(QuantizerParams::Binary {
            distance_metric, ..
        }) => {
            if !distance_metric.is_binary() {
                return Err(Error::SchemaMismatch(format!(
                    "{property}: binary quantizer requires hamming or jaccard, got {distance_metric:?}"
                )));
            }
            Ok(())
        }
        Some(QuantizerParams::Product {
            num_centroids,
            num_subvectors,
            ..
        }) => {
            if !(2..=256).contains(num_centroids) {
                return Err(Error::SchemaMismatch(format!(
                    "{property}: numCentroids {num_centroids} outside 2..=256"
                )));
            }
            if *num_subvectors == 0 || vector_size % num_subvectors != 0 {
                return Err(Error::SchemaMismatch(format!(
                    "{property}: numSubvectors {num_subvectors} must divide vectorSize {vector_size}"
                )));
            }
            if !matches!(
                metric,
                DistanceMetric::Euclidean | DistanceMetric::Cosine | DistanceMetric::Dot
            ) {
                return Err(Error::SchemaMismatch(format!(
                    "{property}: product quantizer does not support {metric:?}"
                )));
            }
            Ok(())
        }
    }
}

/// Declared index of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchemaValue {
    /// Index kind.
    #[serde(rename = "type")]
    pub kind: IndexType,
    /// Vamana parameters, required for `vectorVamana`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_vamana: Option<VamanaParams>,
    /// Flat parameters, required for `vectorFlat`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_flat: Option<FlatParams>,
    /// Text parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextParams>,
    /// String parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<StringParams>,
    /// String-array parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_array: Option<StringParams>,
}

impl IndexSchemaValue {
    /// Creates a Vamana vector property.
    #[must_use]
    pub fn vector_vamana(params: VamanaParams) -> Self {
        Self {
            kind: IndexType::VectorVamana,
            vector_vamana: Some(params),
            vector_flat: None,
            text: None,
            string: None,
            string_array: None,
        }
    }

    /// Creates a flat vector property.
    #[must_use]
    pub fn vector_flat(params: FlatParams) -> Self {
        Self {
            kind: IndexType::VectorFlat,
            vector_vamana: None,
            vector_flat: Some(params),
            text: None,
            string: None,
            string_array: None,
        }
    }

    /// Creates a text property with the standard analyser.
    #[must_use]
    pub fn text() -> Self {
        Self {
            kind: IndexType::Text,
            vector_vamana: None,
            vector_flat: None,
            text: Some(TextParams::default()),
            string: None,
            string_array: None,
        }
    }

    /// Creates a string property.
    #[must_use]
    pub fn string(params: StringParams) -> Self {
        Self {
            kind: IndexType::String,
            vector_vamana: None,
            vector_flat: None,
            text: None,
            string: Some(params),
            string_array: None,
        }
    }

    /// Creates a string-array property.
    #[must_use]
    pub fn string_array(params: StringParams) -> Self {
        Self {
            kind: IndexType::StringArray,
            vector_vamana: None,
            vector_flat: None,
            text: None,
            string: None,
            string_array: Some(params),
        }
    }

    /// Creates an integer property.
    #[must_use]
    pub fn integer() -> Self {
        Self {
            kind: IndexType::Integer,
            vector_vamana: None,
            vector_flat: None,
            text: None,
            string: None,
            string_array: None,
        }
    }

    /// Creates a float property.
    #[must_use]
    pub fn float() -> Self {
        Self {
            kind: IndexType::Float,
            vector_vamana: None,
            vector_flat: None,
            text: None,
            string: None,
            string_array: None,
        }
    }
}

/// Map from dotted property path to its declared index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSchema(pub IndexMap<String, IndexSchemaValue>);

impl IndexSchema {
    /// Validates every property declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] for missing or out-of-range
    /// parameters, including haversine declared with a non-2 dimension.
    pub fn validate(&self) -> Result<()> {
        for (property, value) in &self.0 {
            if property.is_empty() {
                return Err(Error::SchemaMismatch("empty property path".into()));
            }
            match value.kind {
                IndexType::VectorVamana => {
                    let params = value.vector_vamana.as_ref().ok_or_else(|| {
                        Error::SchemaMismatch(format!("{property}: missing vectorVamana parameters"))
                    })?;
                    params.validate(property)?;
                }
                IndexType::VectorFlat => {
                    let params = value.vector_flat.as_ref().ok_or_else(|| {
                        Error::SchemaMismatch(format!("{property}: missing vectorFlat parameters"))
                    })?;
                    params.validate(property)?;
                }
                IndexType::Text
                | IndexType::String
                | IndexType::StringArray
                | IndexType::Integer
                | IndexType::Float => {}
            }
        }
        Ok(())
    }

    /// Returns the declaration for a property path.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&IndexSchemaValue> {
        self.0.get(property)
    }

    /// Iterates property declarations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexSchemaValue)> {
        self.0.iter()
    }

    /// Checks a decoded metadata document against the schema and normalises
    /// numeric encodings in place.
    ///
    /// Normalisations: a float holding an integral value becomes an integer
    /// where the declared type is `integer`; vector components are verified
    /// to be numbers of the declared length. Properties absent from the
    /// document are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] when a present value is not
    /// assignable to its declared type.
    pub fn check_compatible(&self, doc: &mut Value) -> Result<()> {
        for (property, decl) in &self.0 {
            let Some(value) = extract_path_mut(doc, property) else {
                continue;
            };
            match decl.kind {
                IndexType::VectorVamana | IndexType::VectorFlat => {
                    let size = match decl.kind {
                        IndexType::VectorVamana => {
                            decl.vector_vamana.as_ref().map(|p| p.vector_size)
                        }
                        _ => decl.vector_flat.as_ref().map(|p| p.vector_size),
                    }
                    .ok_or_else(|| {
                        Error::SchemaMismatch(format!("{property}: missing vector parameters"))
                    })?;
                    let vector = value_as_vector(value).ok_or_else(|| {
                        Error::SchemaMismatch(format!("{property}: expected a numeric array"))
                    })?;
                    if vector.len() != size {
                        return Err(Error::SchemaMismatch(format!(
                            "{property}: expected {size} components, got {}",
                            vector.len()
                        )));
                    }
                }
                IndexType::Integer => {
                    let int = value_as_i64(value).ok_or_else(|| {
                        Error::SchemaMismatch(format!("{property}: expected an integer"))
                    })?;
                    *value = Value::from(int);
                }
                IndexType::Float => {
                    if value_as_f64(value).is_none() {
                        return Err(Error::SchemaMismatch(format!(
                            "{property}: expected a number"
                        )));
                    }
                }
                IndexType::Text | IndexType::String => {
                    if !value.is_string() {
                        return Err(Error::SchemaMismatch(format!(
                            "{property}: expected a string"
                        )));
                    }
                    if property == ID_PROPERTY {
                        check_uuid(property, value)?;
                    }
                }
                IndexType::StringArray => {
                    let items = value.as_array().ok_or_else(|| {
                        Error::SchemaMismatch(format!("{property}: expected a string array"))
                    })?;
                    if !items.iter().all(Value::is_string) {
                        return Err(Error::SchemaMismatch(format!(
                            "{property}: expected a string array"
                        )));
                    }
                    if property == ID_PROPERTY {
                        for item in items {
                            check_uuid(property, item)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_uuid(property: &str, value: &Value) -> Result<()> {
    let raw = value.as_str().unwrap_or_default();
    uuid::Uuid::parse_str(raw)
        .map(|_| ())
        .map_err(|_| Error::SchemaMismatch(format!("{property}: '{raw}' is not a UUID")))
}

/// Walks a dotted path through nested objects.
#[must_use]
pub fn extract_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn extract_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get_mut(segment)?;
    }
    Some(current)
}

/// Interprets a JSON value as a float vector.
#[must_use]
pub fn value_as_vector(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    let mut vector = Vec::with_capacity(items.len());
    for item in items {
        #[allow(clippy::cast_possible_truncation)]
        vector.push(item.as_f64()? as f32);
    }
    Some(vector)
}

/// Interprets a JSON value as an integer, accepting integral floats.
#[must_use]
pub fn value_as_i64(value: &Value) -> Option<i64> {
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    let float = value.as_f64()?;
    #[allow(clippy::cast_possible_truncation)]
    if float.fract() == 0.0 && float.is_finite() {
        Some(float as i64)
    } else {
        None
    }
}

/// Interprets a JSON value as a float.
#[must_use]
pub fn value_as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Interprets a JSON value as a string.
#[must_use]
pub fn value_as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

/// Interprets a JSON value as a string array.
#[must_use]
pub fn value_as_string_array(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| item.as_str().map(str::to_owned))
        .collect()
}
