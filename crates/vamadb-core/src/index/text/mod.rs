//! Text index: analysed documents with TF-IDF ranked search.
//!
//! Two caches over one bucket: `t<term>s` keys map terms to roaring id
//! sets, `d<little-endian u64>` keys map documents to their term
//! frequencies and length, and the reserved `_numDocuments` key holds the
//! document count. Analysis runs in parallel; cache application is
//! serialised through the index mutex because result ordering matters for
//! the counters.

pub mod analyzer;


use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use roaring::RoaringTreemap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheItem, CachedState, ItemCache};
use crate::error::{Error, Result};
use crate::index::inverted::TermSet;
use crate::index::SearchResult;
use crate::storage::Bucket;

/// Reserved bucket key holding the total document count.
const NUM_DOCUMENTS_KEY: &[u8] = b"_numDocuments";

fn term_key(term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 2);
    key.push(b't');
    key.extend_from_slice(term.as_bytes());
    key.push(b's');
    key
}

fn doc_key(id: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = b'd';
    key[1..9].copy_from_slice(&id.to_le_bytes());
    key
}

impl CacheItem<String> for TermSet {
    type Context = ();

    fn read_from(key: &String, bucket: &Bucket, _: &()) -> Result<Option<Self>> {
        match bucket.get(&term_key(key))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_to(&self, key: &String, bucket: &Bucket) -> Result<()> {
        if self.is_empty() {
            bucket.delete(&term_key(key))
        } else {
            bucket.put(&term_key(key), &self.encode()?)
        }
    }

    fn delete_from(key: &String, bucket: &Bucket) -> Result<()> {
        bucket.delete(&term_key(key))
    }

    fn size_in_memory(&self) -> usize {
        <Self as CacheItem<Vec<u8>>>::size_in_memory(self)
    }

    fn is_dirty(&self) -> bool {
        <Self as CacheItem<Vec<u8>>>::is_dirty(self)
    }

    fn check_and_clear_dirty(&self) -> bool {
        <Self as CacheItem<Vec<u8>>>::check_and_clear_dirty(self)
    }
}

/// Persisted per-document statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocStats {
    terms: FxHashMap<String, u32>,
    length: u32,
}

/// One cached document with its dirty flag.
struct DocItem {
    stats: DocStats,
    dirty: AtomicBool,
}

impl DocItem {
    fn dirty(stats: DocStats) -> Self {
        Self {
            stats,
            dirty: AtomicBool::new(true),
        }
    }
}

impl CacheItem<u64> for DocItem {
    type Context = ();

    fn read_from(key: &u64, bucket: &Bucket, _: &()) -> Result<Option<Self>> {
        match bucket.get(&doc_key(*key))? {
            Some(bytes) => Ok(Some(Self {
                stats: bincode::deserialize(&bytes)?,
                dirty: AtomicBool::new(false),
            })),
            None => Ok(None),
        }
    }

    fn write_to(&self, key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.put(&doc_key(*key), &bincode::serialize(&self.stats)?)
    }

    fn delete_from(key: &u64, bucket: &Bucket) -> Result<()> {
        bucket.delete(&doc_key(*key))
    }

    fn size_in_memory(&self) -> usize {
        self.stats
            .terms
            .iter()
            .map(|(term, _)| term.len() + 4)
            .sum::<usize>()
            + std::mem::size_of::<Self>()
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn check_and_clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

/// Cached state of one text-indexed property.
pub struct TextState {
    terms: ItemCache<String, TermSet>,
    docs: ItemCache<u64, DocItem>,
    num_documents: AtomicU64,
    num_dirty: AtomicBool,
    /// Serialises cache application; analysis itself runs in parallel.
    apply_lock: Mutex<()>,
}

impl TextState {
    /// Opens the state, restoring the persisted document count.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn open(bucket: &Bucket) -> Result<Self> {
        let num_documents = match bucket.get(NUM_DOCUMENTS_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt document count".into()))?;
                u64::from_le_bytes(raw)
            }
            None => 0,
        };
        Ok(Self {
            terms: ItemCache::new(),
            docs: ItemCache::new(),
            num_documents: AtomicU64::new(num_documents),
            num_dirty: AtomicBool::new(false),
            apply_lock: Mutex::new(()),
        })
    }

    /// Total number of indexed documents.
    #[must_use]
    pub fn num_documents(&self) -> u64 {
        self.num_documents.load(Ordering::Acquire)
    }
}

impl CachedState for TextState {
    fn estimated_size(&self) -> usize {
        self.terms.mem_size() + self.docs.mem_size()
    }

    fn is_clean(&self) -> bool {
        !self.num_dirty.load(Ordering::Acquire) && self.terms.is_clean() && self.docs.is_clean()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// One point's change for a text property.
#[derive(Debug, Clone)]
pub struct TextChange {
    /// Node id.
    pub id: u64,
    /// Previous document, if the point had one.
    pub previous: Option<String>,
    /// Current document, if the point has one.
    pub current: Option<String>,
}

/// Text search composition operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextOperator {
    /// Documents containing every query term.
    ContainsAll,
    /// Documents containing any query term.
    ContainsAny,
}

struct AnalysedChange {
    id: u64,
    previous: Option<FxHashMap<String, u32>>,
    current: Option<(FxHashMap<String, u32>, u32)>,
}

/// Text index bound to its cached state and bucket for one operation.
pub struct TextIndex<'a> {
    state: &'a TextState,
    bucket: Bucket,
}

impl<'a> TextIndex<'a> {
    /// Binds the index for one operation.
    #[must_use]
    pub fn new(state: &'a TextState, bucket: Bucket) -> Self {
        Self { state, bucket }
    }

    /// Applies a batch of changes: documents are analysed in parallel, then
    /// the results are applied to the caches under the index mutex.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn update(&self, changes: Vec<TextChange>) -> Result<()> {
        let analysed: Vec<AnalysedChange> = changes
            .into_par_iter()
            .map(|change| {
                let previous = change.previous.map(|text| {
                    let tokens = analyzer::standard_analyse(&text);
                    analyzer::term_frequencies(&tokens).0
                });
                let current = change.current.map(|text| {
                    let tokens = analyzer::standard_analyse(&text);
                    analyzer::term_frequencies(&tokens)
                });
                AnalysedChange {
                    id: change.id,
                    previous,
                    current,
                }
            })
            .collect();

        let _guard = self.state.apply_lock.lock();
        for change in analysed {
            self.apply(change)?;
        }
        Ok(())
    }

    /// Ranks matching documents by TF-IDF.
    ///
    /// Returns the full candidate bitmap and the top `limit` scored
    /// results; `hybrid_score = weight · score`.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn search(
        &self,
        query: &str,
        operator: TextOperator,
        limit: usize,
        filter: Option<&RoaringTreemap>,
        weight: f32,
    ) -> Result<(RoaringTreemap, Vec<SearchResult>)> {
        let tokens = analyzer::standard_analyse(query);
        let mut query_terms: Vec<String> = tokens.into_iter().map(|t| t.term).collect();
        query_terms.sort_unstable();
        query_terms.dedup();

        let mut sets: Vec<(String, RoaringTreemap)> = Vec::with_capacity(query_terms.len());
        for term in &query_terms {
            let set = match self.term_set(term)? {
                Some(set) => set.snapshot(),
                None => RoaringTreemap::new(),
            };
            sets.push((term.clone(), set));
        }

        let mut candidates: Option<RoaringTreemap> = None;
        for (_, set) in &sets {
            candidates = Some(match (candidates, operator) {
                (None, _) => set.clone(),
                (Some(acc), TextOperator::ContainsAll) => acc & set,
                (Some(acc), TextOperator::ContainsAny) => acc | set,
            });
        }
        let mut candidates = candidates.unwrap_or_default();
        if let Some(filter) = filter {
            candidates &= filter;
        }

        #[allow(clippy::cast_precision_loss)]
        let num_documents = self.state.num_documents() as f64;
        let idf: Vec<(&str, f64)> = sets
            .iter()
            .map(|(term, set)| {
                #[allow(clippy::cast_precision_loss)]
                let df = set.len() as f64;
                (term.as_str(), (num_documents / (df + 1.0)).log10())
            })
            .collect();

        let mut scored: Vec<SearchResult> = Vec::new();
        for id in candidates.iter() {
            let Some(doc) = self.state.docs.get(&id, &self.bucket, &())? else {
                tracing::warn!(id, "candidate document missing doc stats");
                continue;
            };
            if doc.stats.length == 0 {
                continue;
            }
            let mut score = 0.0f64;
            for (term, idf) in &idf {
                if let Some(&freq) = doc.stats.terms.get(*term) {
                    let tf = f64::from(freq) / f64::from(doc.stats.length);
                    score += tf * idf;
                }
            }
            #[allow(clippy::cast_possible_truncation)]
            let score = score as f32;
            scored.push(SearchResult {
                node_id: id,
                distance: None,
                score: Some(score),
                hybrid_score: weight * score,
            });
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(CmpOrdering::Equal)
                .then(a.node_id.cmp(&b.node_id))
        });
        scored.truncate(limit);
        Ok((candidates, scored))
    }

    /// Writes dirty term sets, documents and the document counter back.
    ///
    /// # Errors
    ///
    /// Propagates bucket failures.
    pub fn flush(&self) -> Result<()> {
        if self.state.num_dirty.swap(false, Ordering::AcqRel) {
            bucket_put_counter(&self.bucket, self.state.num_documents())?;
        }
        self.state.terms.flush(&self.bucket)?;
        self.state.docs.flush(&self.bucket)
    }

    fn apply(&self, change: AnalysedChange) -> Result<()> {
        match (change.previous, change.current) {
            (None, Some((terms, length))) => self.apply_insert(change.id, terms, length),
            (Some(previous), None) => self.apply_delete(change.id, &previous),
            (Some(previous), Some((terms, length))) => {
                self.apply_update(change.id, &previous, terms, length)
            }
            (None, None) => Ok(()),
        }
    }

    fn apply_insert(&self, id: u64, terms: FxHashMap<String, u32>, length: u32) -> Result<()> {
        for term in terms.keys() {
            self.term_set_or_create(term)?.checked_add(id);
        }
        self.state.docs.put(id, DocItem::dirty(DocStats { terms, length }));
        self.state.num_documents.fetch_add(1, Ordering::AcqRel);
        self.state.num_dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn apply_delete(&self, id: u64, analysed_previous: &FxHashMap<String, u32>) -> Result<()> {
        // The stored doc stats are authoritative; the re-analysed previous
        // blob only covers a doc item lost before flush.
        let terms: Vec<String> = match self.state.docs.get(&id, &self.bucket, &())? {
            Some(doc) => doc.stats.terms.keys().cloned().collect(),
            None => analysed_previous.keys().cloned().collect(),
        };
        for term in &terms {
            if let Some(set) = self.term_set(term)? {
                set.checked_remove(id);
            }
        }
        self.state.docs.delete(&id);
        self.state.num_documents.fetch_sub(1, Ordering::AcqRel);
        self.state.num_dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn apply_update(
        &self,
        id: u64,
        analysed_previous: &FxHashMap<String, u32>,
        terms: FxHashMap<String, u32>,
        length: u32,
    ) -> Result<()> {
        let old_terms: Vec<String> = match self.state.docs.get(&id, &self.bucket, &())? {
            Some(doc) => doc.stats.terms.keys().cloned().collect(),
            None => analysed_previous.keys().cloned().collect(),
        };
        for term in &old_terms {
            if !terms.contains_key(term) {
                if let Some(set) = self.term_set(term)? {
                    set.checked_remove(id);
                }
            }
        }
        for term in terms.keys() {
            self.term_set_or_create(term)?.checked_add(id);
        }
        self.state.docs.put(id, DocItem::dirty(DocStats { terms, length }));
        Ok(())
    }

    fn term_set(&self, term: &str) -> Result<Option<Arc<TermSet>>> {
        self.state
            .terms
            .get(&term.to_string(), &self.bucket, &())
    }

    fn term_set_or_create(&self, term: &str) -> Result<Arc<TermSet>> {
        match self.term_set(term)? {
            Some(set) => Ok(set),
            None => Ok(self.state.terms.put(term.to_string(), TermSet::empty())),
        }
    }
}

fn bucket_put_counter(bucket: &Bucket, count: u64) -> Result<()> {
    bucket.put(NUM_DOCUMENTS_KEY, &count.to_le_bytes())
}
