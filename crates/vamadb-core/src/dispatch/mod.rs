//! Dispatch & search manager: fans decoded per-property changes into
//! per-index drain pipelines, and evaluates query trees with parallel
//! `_and` / `_or` composition and hybrid-score merging.

pub mod query;


use std::ops::Bound;
use std::thread::{Scope, ScopedJoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;
use roaring::RoaringTreemap;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::cache::CacheTransaction;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::index::flat::{FlatIndex, FlatState};
use crate::index::inverted::{
    InvertedArrayChange, InvertedArrayIndex, InvertedChange, InvertedIndex, InvertedState,
    SortableValue,
};
use crate::index::text::{TextChange, TextIndex, TextState};
use crate::index::vamana::{VamanaIndex, VamanaState};
use crate::index::SearchResult;
use crate::schema::{self, IndexSchema, IndexSchemaValue, IndexType, ID_PROPERTY};
use crate::storage::BucketManager;

use query::{
    ArrayOperator, NumberOperator, Query, SearchStringArrayOptions, SearchStringOptions,
    StringOperator,
};

/// One point's change entering the dispatch pipeline: the encoded metadata
/// blob before and after.
#[derive(Debug, Clone)]
pub struct PointChange {
    /// Internal node id.
    pub node_id: u64,
    /// Encoded metadata before the change, absent on insert.
    pub previous: Option<Vec<u8>>,
    /// Encoded metadata after the change, absent on delete.
    pub current: Option<Vec<u8>>,
}

/// A change typed for one property's index.
enum IndexChange {
    Vector {
        id: u64,
        previous: Option<Vec<f32>>,
        current: Option<Vec<f32>>,
    },
    Text(TextChange),
    String(InvertedChange<String>),
    Integer(InvertedChange<i64>),
    Float(InvertedChange<f64>),
    StringArray(InvertedArrayChange<String>),
}

struct DrainHandle<'scope> {
    tx: Sender<IndexChange>,
    handle: ScopedJoinHandle<'scope, ()>,
}

/// Routes per-property changes and queries to the property indexes.
///
/// Created per operation inside a bucket-store scope; the caller owns the
/// cache transaction and commits or discards it after dispatch returns.
pub struct IndexManager<'a> {
    buckets: &'a BucketManager<'a>,
    cache_tx: &'a CacheTransaction<'a>,
    cache_root: String,
    schema: IndexSchema,
}

impl<'a> IndexManager<'a> {
    /// Creates a manager over a validated schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] for an invalid schema.
    pub fn new(
        buckets: &'a BucketManager<'a>,
        cache_tx: &'a CacheTransaction<'a>,
        cache_root: impl Into<String>,
        schema: IndexSchema,
    ) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            buckets,
            cache_tx,
            cache_root: cache_root.into(),
            schema,
        })
    }

    /// Consumes a stream of point changes, fanning each indexed property's
    /// typed change into that property's drain pipeline.
    ///
    /// Drains are created on the first change for their property and run
    /// until every channel is closed, then flush. The first failure anywhere
    /// cancels the shared context; sibling pipelines abort on their next
    /// check and the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first decode, conversion or index failure.
    pub fn dispatch<I>(&self, changes: I) -> Result<()>
    where
        I: IntoIterator<Item = PointChange>,
    {
        let cancel = CancelToken::new();
        std::thread::scope(|scope| {
            let mut drains: FxHashMap<&str, DrainHandle<'_>> = FxHashMap::default();
            'outer: for change in changes {
                if cancel.is_cancelled() {
                    break;
                }
                if change.node_id == 0 {
                    cancel.cancel(Error::InvalidOperation("node id 0 is forbidden".into()));
                    break;
                }
                let (previous, current) =
                    match decode_blobs(change.previous.as_deref(), change.current.as_deref()) {
                        Ok(decoded) => decoded,
                        Err(err) => {
                            cancel.cancel(err);
                            break;
                        }
                    };
                for (property, decl) in self.schema.iter() {
                    let prev_value = previous
                        .as_ref()
                        .and_then(|doc| schema::extract_path(doc, property));
                    let curr_value = current
                        .as_ref()
                        .and_then(|doc| schema::extract_path(doc, property));
                    if prev_value.is_none() && curr_value.is_none() {
                        continue;
                    }
                    if prev_value == curr_value {
                        continue; // unchanged value, nothing to re-index
                    }
                    let typed = match make_change(
                        property,
                        decl,
                        change.node_id,
                        prev_value,
                        curr_value,
                    ) {
                        Ok(typed) => typed,
                        Err(err) => {
                            cancel.cancel(err);
                            break 'outer;
                        }
                    };
                    let drain = drains.entry(property.as_str()).or_insert_with(|| {
                        let (tx, rx) = bounded(1);
                        let handle = self.spawn_drain(scope, property, decl, rx, cancel.clone());
                        DrainHandle { tx, handle }
                    });
                    // A send failure means the drain died on an error; its
                    // cause is already in the cancel token.
                    if drain.tx.send(typed).is_err() {
                        break 'outer;
                    }
                }
            }
            for (property, drain) in drains {
                drop(drain.tx);
                if drain.handle.join().is_err() {
                    cancel.cancel(Error::Internal(format!(
                        "index drain for '{property}' panicked"
                    )));
                }
            }
        });
        match cancel.take_cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Evaluates a query tree: leaves dispatch to their property indexes,
    /// `_and`/`_or` nodes run their children in parallel and combine.
    ///
    /// # Errors
    ///
    /// Any leaf failure aborts the whole query with its cause.
    pub fn search(&self, query: &Query) -> Result<(RoaringTreemap, Vec<SearchResult>)> {
        match query.property.as_str() {
            query::AND_PROPERTY => {
                let children = query.and.as_deref().ok_or_else(|| {
                    Error::InvalidOperation("_and requires sub-queries".into())
                })?;
                self.search_composite(children, true)
            }
            query::OR_PROPERTY => {
                let children = query.or.as_deref().ok_or_else(|| {
                    Error::InvalidOperation("_or requires sub-queries".into())
                })?;
                self.search_composite(children, false)
            }
            _ => self.search_leaf(query),
        }
    }

    fn search_composite(
        &self,
        children: &[Query],
        is_and: bool,
    ) -> Result<(RoaringTreemap, Vec<SearchResult>)> {
        if children.is_empty() {
            return Err(Error::InvalidOperation(
                "composite query requires at least one sub-query".into(),
            ));
        }
        let sub: Vec<(RoaringTreemap, Vec<SearchResult>)> = children
            .par_iter()
            .map(|child| self.search(child))
            .collect::<Result<Vec<_>>>()?;

        let mut bitmap = sub[0].0.clone();
        for (child_bitmap, _) in sub.iter().skip(1) {
            if is_and {
                bitmap &= child_bitmap;
            } else {
                bitmap |= child_bitmap;
            }
        }

        // Merge ordered result lists: duplicates sum their hybrid scores
        // and keep the first non-null distance and score.
        let mut order: Vec<u64> = Vec::new();
        let mut merged: FxHashMap<u64, SearchResult> = FxHashMap::default();
        for (_, results) in sub {
            for result in results {
                if let Some(existing) = merged.get_mut(&result.node_id) {
                    existing.hybrid_score += result.hybrid_score;
                    if existing.distance.is_none() {
                        existing.distance = result.distance;
                    }
                    if existing.score.is_none() {
                        existing.score = result.score;
                    }
                } else {
                    order.push(result.node_id);
                    merged.insert(result.node_id, result);
                }
            }
        }
        let mut results: Vec<SearchResult> = order
            .into_iter()
            .filter_map(|id| merged.remove(&id))
            .filter(|result| !is_and || bitmap.contains(result.node_id))
            .collect();
        results.sort_by(|a, b| b.hybrid_score.total_cmp(&a.hybrid_score));
        Ok((bitmap, results))
    }

    #[allow(clippy::too_many_lines)]
    fn search_leaf(&self, q: &Query) -> Result<(RoaringTreemap, Vec<SearchResult>)> {
        let decl = self.schema.get(&q.property).ok_or_else(|| {
            Error::SchemaMismatch(format!("property '{}' is not indexed", q.property))
        })?;
        if q.property == ID_PROPERTY {
            check_id_query(q)?;
        }
        let bucket_name = bucket_name(decl.kind, &q.property);
        let bucket = self.buckets.get(&bucket_name)?;
        let cache_name = self.cache_name(&bucket_name);

        match decl.kind {
            IndexType::VectorVamana => {
                let opts = q.vector_vamana.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing vectorVamana options", q.property))
                })?;
                let params = decl.vector_vamana.clone().ok_or_else(|| {
                    Error::SchemaMismatch(format!("{}: missing vectorVamana parameters", q.property))
                })?;
                if opts.limit == 0 || opts.limit > params.search_size {
                    return Err(Error::InvalidOperation(format!(
                        "{}: limit {} outside 1..={}",
                        q.property, opts.limit, params.search_size
                    )));
                }
                let filter = self.leaf_filter(opts.filter.as_deref())?;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || VamanaState::open(&params, &bucket),
                    |state: &VamanaState| {
                        let index = VamanaIndex::new(
                            state,
                            bucket.clone(),
                            params.clone(),
                            CancelToken::new(),
                        );
                        let pairs = index.search(&opts.vector, opts.limit, filter.as_ref())?;
                        let mut bitmap = RoaringTreemap::new();
                        let results = pairs
                            .into_iter()
                            .map(|(id, distance)| {
                                bitmap.insert(id);
                                SearchResult {
                                    node_id: id,
                                    distance: Some(distance),
                                    score: None,
                                    hybrid_score: -opts.weight * distance,
                                }
                            })
                            .collect();
                        Ok((bitmap, results))
                    },
                )
            }
            IndexType::VectorFlat => {
                let opts = q.vector_flat.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing vectorFlat options", q.property))
                })?;
                let params = decl.vector_flat.clone().ok_or_else(|| {
                    Error::SchemaMismatch(format!("{}: missing vectorFlat parameters", q.property))
                })?;
                let filter = self.leaf_filter(opts.filter.as_deref())?;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || FlatState::open(&params, &bucket),
                    |state: &FlatState| {
                        let index = FlatIndex::new(state, bucket.clone());
                        index.search(&opts.vector, filter.as_ref(), opts.limit, opts.weight)
                    },
                )
            }
            IndexType::Text => {
                let opts = q.text.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing text options", q.property))
                })?;
                let filter = self.leaf_filter(opts.filter.as_deref())?;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || TextState::open(&bucket),
                    |state: &TextState| {
                        let index = TextIndex::new(state, bucket.clone());
                        index.search(
                            &opts.value,
                            opts.operator,
                            opts.limit,
                            filter.as_ref(),
                            opts.weight,
                        )
                    },
                )
            }
            IndexType::String => {
                let opts = q.string.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing string options", q.property))
                })?;
                let case_sensitive = decl.string.clone().unwrap_or_default().case_sensitive;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || Ok(InvertedState::new()),
                    |state: &InvertedState| {
                        let index: InvertedIndex<'_, String> =
                            InvertedIndex::new(state, bucket.clone(), case_sensitive);
                        let bitmap = string_leaf(&index, opts)?;
                        Ok((bitmap, Vec::new()))
                    },
                )
            }
            IndexType::Integer => {
                let opts = q.integer.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing integer options", q.property))
                })?;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || Ok(InvertedState::new()),
                    |state: &InvertedState| {
                        let index: InvertedIndex<'_, i64> =
                            InvertedIndex::new(state, bucket.clone(), true);
                        let bitmap =
                            number_leaf(&index, opts.operator, opts.value, opts.end_value)?;
                        Ok((bitmap, Vec::new()))
                    },
                )
            }
            IndexType::Float => {
                let opts = q.float.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing float options", q.property))
                })?;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || Ok(InvertedState::new()),
                    |state: &InvertedState| {
                        let index: InvertedIndex<'_, f64> =
                            InvertedIndex::new(state, bucket.clone(), true);
                        let bitmap =
                            number_leaf(&index, opts.operator, opts.value, opts.end_value)?;
                        Ok((bitmap, Vec::new()))
                    },
                )
            }
            IndexType::StringArray => {
                let opts = q.string_array.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{}: missing stringArray options", q.property))
                })?;
                let case_sensitive = decl.string_array.clone().unwrap_or_default().case_sensitive;
                self.cache_tx.with(
                    &cache_name,
                    true,
                    || Ok(InvertedState::new()),
                    |state: &InvertedState| {
                        let index: InvertedArrayIndex<'_, String> =
                            InvertedArrayIndex::new(state, bucket.clone(), case_sensitive);
                        let bitmap = match opts.operator {
                            ArrayOperator::ContainsAll => index.contains_all(opts.value.clone())?,
                            ArrayOperator::ContainsAny => index.contains_any(opts.value.clone())?,
                        };
                        Ok((bitmap, Vec::new()))
                    },
                )
            }
        }
    }

    /// Resolves a leaf's pre-filter sub-query to its bitmap.
    fn leaf_filter(&self, filter: Option<&Query>) -> Result<Option<RoaringTreemap>> {
        filter
            .map(|query| self.search(query).map(|(bitmap, _)| bitmap))
            .transpose()
    }

    fn cache_name(&self, bucket_name: &str) -> String {
        format!("{}/{bucket_name}", self.cache_root)
    }

    fn spawn_drain<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        property: &'env str,
        decl: &'env IndexSchemaValue,
        rx: Receiver<IndexChange>,
        cancel: CancelToken,
    ) -> ScopedJoinHandle<'scope, ()> {
        scope.spawn(move || {
            if let Err(err) = self.run_drain(property, decl, &rx, &cancel) {
                tracing::warn!(property, error = %err, "index drain failed");
                cancel.cancel(err);
            }
        })
    }

    /// One property's drain: open the index under the cache transaction,
    /// consume the channel until closed, then flush.
    fn run_drain(
        &self,
        property: &str,
        decl: &IndexSchemaValue,
        rx: &Receiver<IndexChange>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let bucket_name = bucket_name(decl.kind, property);
        let bucket = self.buckets.get(&bucket_name)?;
        let cache_name = self.cache_name(&bucket_name);

        match decl.kind {
            IndexType::VectorVamana => {
                let params = decl.vector_vamana.clone().ok_or_else(|| {
                    Error::SchemaMismatch(format!("{property}: missing vectorVamana parameters"))
                })?;
                self.cache_tx.with(
                    &cache_name,
                    false,
                    || VamanaState::open(&params, &bucket),
                    |state: &VamanaState| {
                        let index = VamanaIndex::new(
                            state,
                            bucket.clone(),
                            params.clone(),
                            cancel.clone(),
                        );
                        let mut inserts = Vec::new();
                        let mut updates = Vec::new();
                        let mut deletes = RoaringTreemap::new();
                        while let Ok(change) = rx.recv() {
                            cancel.check()?;
                            let IndexChange::Vector {
                                id,
                                previous,
                                current,
                            } = change
                            else {
                                return Err(mismatched_change(property));
                            };
                            match (previous.is_some(), current) {
                                (false, Some(vector)) => inserts.push((id, vector)),
                                (true, Some(vector)) => updates.push((id, vector)),
                                (true, None) => {
                                    deletes.insert(id);
                                }
                                (false, None) => {}
                            }
                        }
                        cancel.check()?;
                        index.delete(&deletes)?;
                        index.update(updates)?;
                        index.insert(inserts)?;
                        index.flush()
                    },
                )
            }
            IndexType::VectorFlat => {
                let params = decl.vector_flat.clone().ok_or_else(|| {
                    Error::SchemaMismatch(format!("{property}: missing vectorFlat parameters"))
                })?;
                self.cache_tx.with(
                    &cache_name,
                    false,
                    || FlatState::open(&params, &bucket),
                    |state: &FlatState| {
                        let index = FlatIndex::new(state, bucket.clone());
                        while let Ok(change) = rx.recv() {
                            cancel.check()?;
                            let IndexChange::Vector { id, current, .. } = change else {
                                return Err(mismatched_change(property));
                            };
                            match current {
                                Some(vector) => index.set(id, vector)?,
                                None => index.delete(id),
                            }
                        }
                        cancel.check()?;
                        index.flush()
                    },
                )
            }
            IndexType::Text => self.cache_tx.with(
                &cache_name,
                false,
                || TextState::open(&bucket),
                |state: &TextState| {
                    let mut batch = Vec::new();
                    while let Ok(change) = rx.recv() {
                        cancel.check()?;
                        let IndexChange::Text(change) = change else {
                            return Err(mismatched_change(property));
                        };
                        batch.push(change);
                    }
                    cancel.check()?;
                    let index = TextIndex::new(state, bucket.clone());
                    index.update(batch)?;
                    index.flush()
                },
            ),
            IndexType::String => {
                let case_sensitive = decl.string.clone().unwrap_or_default().case_sensitive;
                self.cache_tx.with(
                    &cache_name,
                    false,
                    || Ok(InvertedState::new()),
                    |state: &InvertedState| {
                        let index: InvertedIndex<'_, String> =
                            InvertedIndex::new(state, bucket.clone(), case_sensitive);
                        while let Ok(change) = rx.recv() {
                            cancel.check()?;
                            let IndexChange::String(change) = change else {
                                return Err(mismatched_change(property));
                            };
                            index.update(change)?;
                        }
                        cancel.check()?;
                        index.flush()
                    },
                )
            }
            IndexType::Integer => self.cache_tx.with(
                &cache_name,
                false,
                || Ok(InvertedState::new()),
                |state: &InvertedState| {
                    let index: InvertedIndex<'_, i64> =
                        InvertedIndex::new(state, bucket.clone(), true);
                    while let Ok(change) = rx.recv() {
                        cancel.check()?;
                        let IndexChange::Integer(change) = change else {
                            return Err(mismatched_change(property));
                        };
                        index.update(change)?;
                    }
                    cancel.check()?;
                    index.flush()
                },
            ),
            IndexType::Float => self.cache_tx.with(
                &cache_name,
                false,
                || Ok(InvertedState::new()),
                |state: &InvertedState| {
                    let index: InvertedIndex<'_, f64> =
                        InvertedIndex::new(state, bucket.clone(), true);
                    while let Ok(change) = rx.recv() {
                        cancel.check()?;
                        let IndexChange::Float(change) = change else {
                            return Err(mismatched_change(property));
                        };
                        index.update(change)?;
                    }
                    cancel.check()?;
                    index.flush()
                },
            ),
            IndexType::StringArray => {
                let case_sensitive = decl.string_array.clone().unwrap_or_default().case_sensitive;
                self.cache_tx.with(
                    &cache_name,
                    false,
                    || Ok(InvertedState::new()),
                    |state: &InvertedState| {
                        let index: InvertedArrayIndex<'_, String> =
                            InvertedArrayIndex::new(state, bucket.clone(), case_sensitive);
                        while let Ok(change) = rx.recv() {
                            cancel.check()?;
                            let IndexChange::StringArray(change) = change else {
                                return Err(mismatched_change(property));
                            };
                            index.update(change)?;
                        }
                        cancel.check()?;
                        index.flush()
                    },
                )
            }
        }
    }
}

fn bucket_name(kind: IndexType, property: &str) -> String {
    format!("index/{}/{property}", kind.bucket_segment())
}

fn mismatched_change(property: &str) -> Error {
    Error::Internal(format!("drain for '{property}' received a mismatched change"))
}

fn decode_blobs(
    previous: Option<&[u8]>,
    current: Option<&[u8]>,
) -> Result<(Option<Value>, Option<Value>)> {
    let decode = |blob: Option<&[u8]>| -> Result<Option<Value>> {
        blob.map(serde_json::from_slice).transpose().map_err(|err| {
            Error::SchemaMismatch(format!("undecodable metadata blob: {err}"))
        })
    };
    Ok((decode(previous)?, decode(current)?))
}

/// Decides the typed change for one property from the extracted values.
fn make_change(
    property: &str,
    decl: &IndexSchemaValue,
    id: u64,
    previous: Option<&Value>,
    current: Option<&Value>,
) -> Result<IndexChange> {
    let type_err = |expected: &str| {
        Error::SchemaMismatch(format!("{property}: value is not assignable to {expected}"))
    };
    Ok(match decl.kind {
        IndexType::VectorVamana | IndexType::VectorFlat => IndexChange::Vector {
            id,
            previous: previous
                .map(|v| schema::value_as_vector(v).ok_or_else(|| type_err("a vector")))
                .transpose()?,
            current: current
                .map(|v| schema::value_as_vector(v).ok_or_else(|| type_err("a vector")))
                .transpose()?,
        },
        IndexType::Text => IndexChange::Text(TextChange {
            id,
            previous: previous
                .map(|v| schema::value_as_string(v).ok_or_else(|| type_err("a string")))
                .transpose()?,
            current: current
                .map(|v| schema::value_as_string(v).ok_or_else(|| type_err("a string")))
                .transpose()?,
        }),
        IndexType::String => IndexChange::String(InvertedChange {
            id,
            previous: previous
                .map(|v| schema::value_as_string(v).ok_or_else(|| type_err("a string")))
                .transpose()?,
            current: current
                .map(|v| schema::value_as_string(v).ok_or_else(|| type_err("a string")))
                .transpose()?,
        }),
        IndexType::Integer => IndexChange::Integer(InvertedChange {
            id,
            previous: previous
                .map(|v| schema::value_as_i64(v).ok_or_else(|| type_err("an integer")))
                .transpose()?,
            current: current
                .map(|v| schema::value_as_i64(v).ok_or_else(|| type_err("an integer")))
                .transpose()?,
        }),
        IndexType::Float => IndexChange::Float(InvertedChange {
            id,
            previous: previous
                .map(|v| schema::value_as_f64(v).ok_or_else(|| type_err("a number")))
                .transpose()?,
            current: current
                .map(|v| schema::value_as_f64(v).ok_or_else(|| type_err("a number")))
                .transpose()?,
        }),
        IndexType::StringArray => IndexChange::StringArray(InvertedArrayChange {
            id,
            previous: previous
                .map(|v| schema::value_as_string_array(v).ok_or_else(|| type_err("a string array")))
                .transpose()?
                .unwrap_or_default(),
            current: current
                .map(|v| schema::value_as_string_array(v).ok_or_else(|| type_err("a string array")))
                .transpose()?
                .unwrap_or_default(),
        }),
    })
}

fn string_leaf(
    index: &InvertedIndex<'_, String>,
    opts: &SearchStringOptions,
) -> Result<RoaringTreemap> {
    match opts.operator {
        StringOperator::Equals => index.equals(opts.value.clone()),
        StringOperator::NotEquals => index.not_equals(opts.value.clone()),
        StringOperator::StartsWith => index.starts_with(opts.value.clone()),
        StringOperator::GreaterThan => {
            index.range(Bound::Excluded(opts.value.clone()), Bound::Unbounded)
        }
        StringOperator::GreaterThanOrEquals => {
            index.range(Bound::Included(opts.value.clone()), Bound::Unbounded)
        }
        StringOperator::LessThan => {
            index.range(Bound::Unbounded, Bound::Excluded(opts.value.clone()))
        }
        StringOperator::LessThanOrEquals => {
            index.range(Bound::Unbounded, Bound::Included(opts.value.clone()))
        }
        StringOperator::InRange => {
            let end = opts
                .end_value
                .clone()
                .ok_or_else(|| Error::InvalidOperation("inRange requires endValue".into()))?;
            index.range(Bound::Included(opts.value.clone()), Bound::Included(end))
        }
    }
}

fn number_leaf<T: SortableValue>(
    index: &InvertedIndex<'_, T>,
    operator: NumberOperator,
    value: T,
    end_value: Option<T>,
) -> Result<RoaringTreemap> {
    match operator {
        NumberOperator::Equals => index.equals(value),
        NumberOperator::NotEquals => index.not_equals(value),
        NumberOperator::GreaterThan => index.range(Bound::Excluded(value), Bound::Unbounded),
        NumberOperator::GreaterThanOrEquals => {
            index.range(Bound::Included(value), Bound::Unbounded)
        }
        NumberOperator::LessThan => index.range(Bound::Unbounded, Bound::Excluded(value)),
        NumberOperator::LessThanOrEquals => index.range(Bound::Unbounded, Bound::Included(value)),
        NumberOperator::InRange => {
            let end = end_value
                .ok_or_else(|| Error::InvalidOperation("inRange requires endValue".into()))?;
            index.range(Bound::Included(value), Bound::Included(end))
        }
    }
}

/// `_id` is the external UUID; query values must parse as UUIDs.
fn check_id_query(q: &Query) -> Result<()> {
    let check = |raw: &str| {
        uuid::Uuid::parse_str(raw)
            .map(|_| ())
            .map_err(|_| Error::SchemaMismatch(format!("_id: '{raw}' is not a UUID")))
    };
    if let Some(SearchStringOptions {
        value, end_value, ..
    }) = &q.string
    {
        check(value)?;
        if let Some(end) = end_value {
            check(end)?;
        }
    }
    if let Some(SearchStringArrayOptions { value, .. }) = &q.string_array {
        for item in value {
            check(item)?;
        }
    }
    Ok(())
}
