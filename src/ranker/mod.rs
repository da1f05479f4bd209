//! Ranked retrieval over an [`InvertedIndex`].
//!
//! A [`RankingFunction`] scores one `(query term, document)` pair at a time
//! from a [`ScoreData`] snapshot; [`RankingFunction::score`] walks the query
//! terms' postings, sums the per-document contributions and keeps the top
//! `k` documents in a bounded heap.
//!
//! Rankers are created by name through a [`RankerRegistry`] from the
//! `[ranker]` table of the configuration:
//!
//! ```toml
//! [ranker]
//! method = "bm25"
//! k1 = 1.2
//! b = 0.75
//! ```

mod bm25;
mod feedback;
mod language_model;
mod pivoted_length;

pub use bm25::OkapiBm25;
pub use feedback::{KlDivergencePrf, Rocchio};
pub use language_model::{AbsoluteDiscount, DirichletPrior, JelinekMercer};
pub use pivoted_length::PivotedLength;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::forward::ForwardIndex;
use crate::reader::InvertedIndex;
use crate::types::{Count, DocId, SearchResult, TermId};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a ranker may look at when scoring one term in one document.
#[derive(Debug, Clone, Copy)]
pub struct ScoreData<'a> {
    pub index: &'a InvertedIndex,
    /// Mean document length of the corpus.
    pub avg_doc_length: f64,
    /// Number of documents in the corpus.
    pub num_docs: u64,
    /// Term occurrences in the corpus.
    pub total_terms: u64,
    /// Sum of the query's term weights.
    pub query_length: f64,

    pub term_id: TermId,
    /// Weight of the term in the query.
    pub query_term_weight: f64,
    /// Number of documents containing the term.
    pub doc_freq: u64,
    /// Occurrences of the term in the corpus.
    pub corpus_term_count: u64,

    pub doc_id: DocId,
    /// Occurrences of the term in the document.
    pub doc_term_count: u64,
    /// Length of the document.
    pub doc_size: u64,
    /// Distinct terms of the document.
    pub doc_unique_terms: u64,
}

impl<'a> ScoreData<'a> {
    fn new(index: &'a InvertedIndex, query_length: f64) -> Self {
        Self {
            index,
            avg_doc_length: index.avg_doc_length(),
            num_docs: index.doc_count(),
            total_terms: index.total_corpus_terms(),
            query_length,
            term_id: TermId(0),
            query_term_weight: 0.0,
            doc_freq: 0,
            corpus_term_count: 0,
            doc_id: DocId(0),
            doc_term_count: 0,
            doc_size: 0,
            doc_unique_terms: 0,
        }
    }
}

/// A scoring function.
pub trait RankingFunction: Send + Sync {
    /// Name used in configuration.
    fn id(&self) -> &'static str;

    /// Contribution of one query term to one document's score.
    fn score_one(&self, sd: &ScoreData<'_>) -> f64;

    /// Score a document starts from, added once when it is first matched.
    fn initial_score(&self, _sd: &ScoreData<'_>) -> f64 {
        0.0
    }

    fn clone_box(&self) -> Box<dyn RankingFunction>;

    /// Top `k` documents for `query` (term id, weight pairs).
    fn score(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.score_filtered(index, query, k, &|_| true)
    }

    /// Like [`score`](RankingFunction::score), considering only documents
    /// accepted by `filter`.
    fn score_filtered(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        k: usize,
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<SearchResult>> {
        let weighted: Vec<(TermId, f64)> = query.iter().map(|&(t, w)| (t, f64::from(w))).collect();
        self.score_weighted(index, &weighted, k, filter)
    }

    /// Score a query with real-valued term weights, as produced by query
    /// expansion.
    fn score_weighted(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, f64)],
        k: usize,
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<SearchResult>> {
        let query_length: f64 = query.iter().map(|&(_, w)| w).sum();
        let mut sd = ScoreData::new(index, query_length);
        let mut scores: HashMap<DocId, f64> = HashMap::new();

        for &(term, weight) in query.iter().filter(|&&(_, w)| w > 0.0) {
            let postings = index.postings(term)?;
            sd.term_id = term;
            sd.query_term_weight = weight;
            sd.doc_freq = postings.len() as u64;
            sd.corpus_term_count = postings.total_count();
            for &(doc, count) in postings.counts() {
                if !filter(doc) {
                    continue;
                }
                sd.doc_id = doc;
                sd.doc_term_count = u64::from(count);
                sd.doc_size = index.doc_size(doc);
                sd.doc_unique_terms = index.doc_unique_terms(doc);
                let score = scores.entry(doc).or_insert_with(|| self.initial_score(&sd));
                *score += self.score_one(&sd);
            }
        }
        debug!(ranker = self.id(), candidates = scores.len(), k, "scored query");
        Ok(top_k(scores, k))
    }

    /// Tokenize `text` with the index's analyzer and score it.
    fn score_text(&self, index: &InvertedIndex, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.score(index, &index.tokenize(text), k)
    }
}

impl Clone for Box<dyn RankingFunction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Anything that answers a tokenized query with ranked documents: a plain
/// [`RankingFunction`] or a feedback ranker built around one.
pub trait Ranker: Send + Sync {
    fn id(&self) -> &'static str;

    /// Top `k` documents accepted by `filter`.
    fn rank(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        k: usize,
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<SearchResult>>;

    fn rank_text(&self, index: &InvertedIndex, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.rank(index, &index.tokenize(text), k, &|_| true)
    }
}

impl Ranker for Box<dyn RankingFunction> {
    fn id(&self) -> &'static str {
        (**self).id()
    }

    fn rank(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        k: usize,
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<SearchResult>> {
        (**self).score_filtered(index, query, k, filter)
    }
}

/// Heap entry ordered so that the better result is greater: higher score,
/// then lower document id.
#[derive(Debug, Clone, Copy)]
struct Ranked(SearchResult);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.doc_id.cmp(&self.0.doc_id))
    }
}

/// The `k` best `(doc, score)` pairs, best first.
pub fn top_k(scores: impl IntoIterator<Item = (DocId, f64)>, k: usize) -> Vec<SearchResult> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k + 1);
    for (doc_id, score) in scores {
        heap.push(Reverse(Ranked(SearchResult { doc_id, score })));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut results: Vec<Ranked> = heap.into_iter().map(|Reverse(r)| r).collect();
    results.sort_unstable_by(|a, b| b.cmp(a));
    results.into_iter().map(|r| r.0).collect()
}

/// Builds a ranker from its `[ranker]` table.
pub type RankerFactory = fn(&toml::Table) -> Result<Box<dyn RankingFunction>>;

const BUILTINS: &[(&str, RankerFactory)] = &[
    (OkapiBm25::ID, OkapiBm25::from_config),
    (PivotedLength::ID, PivotedLength::from_config),
    (JelinekMercer::ID, JelinekMercer::from_config),
    (DirichletPrior::ID, DirichletPrior::from_config),
    (AbsoluteDiscount::ID, AbsoluteDiscount::from_config),
];

/// Ranker factories keyed by method name.
#[derive(Clone)]
pub struct RankerRegistry {
    factories: HashMap<String, RankerFactory>,
}

impl Default for RankerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RankerRegistry {
    /// A registry holding the built-in rankers.
    pub fn new() -> Self {
        Self {
            factories: BUILTINS
                .iter()
                .map(|&(id, factory)| (id.to_string(), factory))
                .collect(),
        }
    }

    /// Add a ranker under `id`. Ids must be unique.
    pub fn register(&mut self, id: &str, factory: RankerFactory) -> Result<()> {
        if self.factories.contains_key(id) {
            return Err(Error::config(format!("ranker {:?} is already registered", id)));
        }
        self.factories.insert(id.to_string(), factory);
        Ok(())
    }

    /// Registered method names, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Build the ranker named by `table.method`.
    pub fn create(&self, table: &toml::Table) -> Result<Box<dyn RankingFunction>> {
        let method = match table.get("method") {
            Some(toml::Value::String(method)) => method,
            Some(other) => {
                return Err(Error::config(format!(
                    "ranker method must be a string, got {}",
                    other.type_str()
                )))
            }
            None => return Err(Error::config("missing required key `ranker.method`")),
        };
        let factory = self
            .factories
            .get(method)
            .ok_or_else(|| Error::config(format!("unknown ranker method {:?}", method)))?;
        factory(table)
    }
}

/// The configured ranker, or BM25 with default parameters.
pub fn make_ranker(table: Option<&toml::Table>) -> Result<Box<dyn RankingFunction>> {
    match table {
        Some(table) => RankerRegistry::new().create(table),
        None => Ok(Box::new(OkapiBm25::default())),
    }
}

/// The configured ranker for queries against `index`. Feedback rankers
/// open the forward index named by `forward-index`, building it from
/// `index` when needed.
pub fn make_query_ranker(config: &Config, index: &InvertedIndex) -> Result<Box<dyn Ranker>> {
    let Some(table) = config.ranker.as_ref() else {
        return Ok(Box::new(make_ranker(None)?));
    };
    match table.get("method").and_then(toml::Value::as_str) {
        Some(method @ (Rocchio::ID | KlDivergencePrf::ID)) => {
            let path = config.forward_index.as_ref().ok_or_else(|| {
                Error::config(format!("ranker {:?} needs `forward-index`", method))
            })?;
            let forward = Arc::new(ForwardIndex::make(index, path, config.indexer_ram_budget)?);
            info!(ranker = method, forward = %path.display(), "feedback ranker ready");
            feedback::from_config(table, forward)
        }
        _ => Ok(Box::new(RankerRegistry::new().create(table)?)),
    }
}

/// Read a numeric parameter, falling back to `default` when absent.
pub(crate) fn param(table: &toml::Table, key: &str, default: f64) -> Result<f64> {
    match table.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(v)) => Ok(*v),
        Some(toml::Value::Integer(v)) => Ok(*v as f64),
        Some(other) => Err(Error::config(format!(
            "ranker parameter `{}` must be a number, got {}",
            key,
            other.type_str()
        ))),
    }
}

/// Reject a parameter outside `[lo, hi]`, or `(lo, hi]` when `open_low`.
pub(crate) fn check_range(key: &str, value: f64, lo: f64, hi: f64, open_low: bool) -> Result<()> {
    let low_ok = if open_low { value > lo } else { value >= lo };
    if !(low_ok && value <= hi) {
        let open = if open_low { '(' } else { '[' };
        return Err(Error::config(format!(
            "ranker parameter `{}` = {} is outside {}{}, {}]",
            key, value, open, lo, hi
        )));
    }
    Ok(())
}
