//! Pseudo-relevance feedback.
//!
//! Both rankers retrieve the top `k` documents with an initial ranker,
//! expand the query with the best terms of those documents (read from the
//! forward index), and rank again with the expanded query.
//!
//! ```toml
//! forward-index = "fwd"
//!
//! [ranker]
//! method = "rocchio"
//! beta = 0.8
//! max-terms = 50
//!
//! [ranker.feedback]
//! method = "bm25"
//! ```

use super::{
    check_range, param, AbsoluteDiscount, DirichletPrior, JelinekMercer, OkapiBm25, Ranker,
    RankerRegistry, RankingFunction, ScoreData,
};
use crate::error::{Error, Result};
use crate::forward::ForwardIndex;
use crate::postings::ForwardPostings;
use crate::reader::InvertedIndex;
use crate::types::{Count, DocId, SearchResult, TermId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const MAX_EM_ITERATIONS: usize = 50;
/// Relative log-likelihood change below which EM stops.
const EM_CONVERGENCE: f64 = 1e-5;

/// Build the feedback ranker named by `table.method`.
pub(crate) fn from_config(
    table: &toml::Table,
    forward: Arc<ForwardIndex>,
) -> Result<Box<dyn Ranker>> {
    match table.get("method").and_then(toml::Value::as_str) {
        Some(Rocchio::ID) => Ok(Box::new(Rocchio::from_config(table, forward)?)),
        Some(KlDivergencePrf::ID) => Ok(Box::new(KlDivergencePrf::from_config(table, forward)?)),
        other => Err(Error::config(format!("{:?} is not a feedback ranker", other))),
    }
}

/// The `[ranker.feedback]` table's ranker, or `default`.
fn initial_ranker(
    table: &toml::Table,
    default: Box<dyn RankingFunction>,
) -> Result<Box<dyn RankingFunction>> {
    match table.get("feedback") {
        None => Ok(default),
        Some(toml::Value::Table(inner)) => RankerRegistry::new().create(inner),
        Some(other) => Err(Error::config(format!(
            "ranker.feedback must be a table, got {}",
            other.type_str()
        ))),
    }
}

/// Read a positive integer parameter.
fn count_param(table: &toml::Table, key: &str, default: usize) -> Result<usize> {
    match table.get(key) {
        None => Ok(default),
        Some(toml::Value::Integer(v)) if *v > 0 => Ok(*v as usize),
        Some(other) => Err(Error::config(format!(
            "ranker parameter `{}` must be a positive integer, got {}",
            key, other
        ))),
    }
}

/// The `n` highest weighted terms; ties go to the lower term id.
fn top_terms(weights: HashMap<TermId, f64>, n: usize) -> Vec<(TermId, f64)> {
    let mut terms: Vec<(TermId, f64)> = weights.into_iter().collect();
    terms.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.truncate(n);
    terms
}

fn sorted_query(weights: HashMap<TermId, f64>) -> Vec<(TermId, f64)> {
    let mut query: Vec<(TermId, f64)> = weights.into_iter().collect();
    query.sort_unstable_by_key(|&(t, _)| t);
    query
}

/// Rocchio feedback: the expanded query adds `beta` times the centroid of
/// the feedback documents, restricted to the `max_terms` terms the initial
/// ranker scores highest within them, to `alpha` times the original query.
pub struct Rocchio {
    forward: Arc<ForwardIndex>,
    initial: Box<dyn RankingFunction>,
    pub alpha: f64,
    pub beta: f64,
    /// Feedback documents.
    pub k: usize,
    /// Expansion terms.
    pub max_terms: usize,
}

impl Rocchio {
    pub const ID: &'static str = "rocchio";
    pub const DEFAULT_ALPHA: f64 = 1.0;
    pub const DEFAULT_BETA: f64 = 0.8;
    pub const DEFAULT_K: usize = 10;
    pub const DEFAULT_MAX_TERMS: usize = 50;

    /// Default parameters around BM25.
    pub fn new(forward: Arc<ForwardIndex>) -> Self {
        Self {
            forward,
            initial: Box::new(OkapiBm25::default()),
            alpha: Self::DEFAULT_ALPHA,
            beta: Self::DEFAULT_BETA,
            k: Self::DEFAULT_K,
            max_terms: Self::DEFAULT_MAX_TERMS,
        }
    }

    pub fn with_initial(mut self, initial: Box<dyn RankingFunction>) -> Self {
        self.initial = initial;
        self
    }

    pub fn from_config(table: &toml::Table, forward: Arc<ForwardIndex>) -> Result<Self> {
        let alpha = param(table, "alpha", Self::DEFAULT_ALPHA)?;
        let beta = param(table, "beta", Self::DEFAULT_BETA)?;
        check_range("alpha", alpha, 0.0, f64::INFINITY, false)?;
        check_range("beta", beta, 0.0, f64::INFINITY, false)?;
        Ok(Self {
            initial: initial_ranker(table, Box::new(OkapiBm25::default()))?,
            alpha,
            beta,
            k: count_param(table, "k", Self::DEFAULT_K)?,
            max_terms: count_param(table, "max-terms", Self::DEFAULT_MAX_TERMS)?,
            forward,
        })
    }

    /// The expanded query for `query`.
    pub fn expand(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<(TermId, f64)>> {
        let feedback = self.initial.score_filtered(index, query, self.k, filter)?;
        let k = self.k as f64;
        let mut sd = ScoreData::new(index, 1.0);
        sd.query_term_weight = 1.0;
        let mut term_scores: HashMap<TermId, f64> = HashMap::new();
        let mut centroid: HashMap<TermId, f64> = HashMap::new();
        for result in &feedback {
            sd.doc_id = result.doc_id;
            sd.doc_size = index.doc_size(result.doc_id);
            sd.doc_unique_terms = index.doc_unique_terms(result.doc_id);
            for &(term, count) in self.forward.postings(result.doc_id)?.counts() {
                let postings = index.postings(term)?;
                sd.term_id = term;
                sd.doc_freq = postings.len() as u64;
                sd.corpus_term_count = postings.total_count();
                sd.doc_term_count = u64::from(count);
                *term_scores.entry(term).or_default() += self.initial.score_one(&sd) / k;
                *centroid.entry(term).or_default() += f64::from(count) / k;
            }
        }

        let mut expanded: HashMap<TermId, f64> = HashMap::new();
        for (term, _) in top_terms(term_scores, self.max_terms) {
            let weight = centroid.get(&term).copied().unwrap_or(0.0);
            *expanded.entry(term).or_default() += self.beta * weight;
        }
        for &(term, weight) in query {
            *expanded.entry(term).or_default() += self.alpha * f64::from(weight);
        }
        debug!(feedback_docs = feedback.len(), terms = expanded.len(), "rocchio expansion");
        Ok(sorted_query(expanded))
    }
}

impl Ranker for Rocchio {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn rank(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        k: usize,
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<SearchResult>> {
        let expanded = self.expand(index, query, filter)?;
        self.initial.score_weighted(index, &expanded, k, filter)
    }
}

/// Model-based feedback for language-model rankers: a feedback unigram
/// model is fit to the feedback documents by EM against the collection
/// model, and its top `max_terms` terms are interpolated with the original
/// query distribution by `alpha`.
pub struct KlDivergencePrf {
    forward: Arc<ForwardIndex>,
    initial: Box<dyn RankingFunction>,
    /// Weight of the feedback model in the expanded query.
    pub alpha: f64,
    /// Weight of the collection model in the mixture.
    pub lambda: f64,
    pub k: usize,
    pub max_terms: usize,
}

impl KlDivergencePrf {
    pub const ID: &'static str = "kl-divergence-prf";
    pub const DEFAULT_ALPHA: f64 = 0.5;
    pub const DEFAULT_LAMBDA: f64 = 0.5;
    pub const DEFAULT_K: usize = 10;
    pub const DEFAULT_MAX_TERMS: usize = 50;

    /// Default parameters around a Dirichlet prior ranker.
    pub fn new(forward: Arc<ForwardIndex>) -> Self {
        Self {
            forward,
            initial: Box::new(DirichletPrior::default()),
            alpha: Self::DEFAULT_ALPHA,
            lambda: Self::DEFAULT_LAMBDA,
            k: Self::DEFAULT_K,
            max_terms: Self::DEFAULT_MAX_TERMS,
        }
    }

    /// Replace the initial ranker, which must be a language-model ranker.
    pub fn with_initial(mut self, initial: Box<dyn RankingFunction>) -> Result<Self> {
        check_language_model(initial.as_ref())?;
        self.initial = initial;
        Ok(self)
    }

    pub fn from_config(table: &toml::Table, forward: Arc<ForwardIndex>) -> Result<Self> {
        let alpha = param(table, "alpha", Self::DEFAULT_ALPHA)?;
        let lambda = param(table, "lambda", Self::DEFAULT_LAMBDA)?;
        check_range("alpha", alpha, 0.0, 1.0, false)?;
        check_lambda(lambda)?;
        let initial = initial_ranker(table, Box::new(DirichletPrior::default()))?;
        check_language_model(initial.as_ref())?;
        Ok(Self {
            forward,
            initial,
            alpha,
            lambda,
            k: count_param(table, "k", Self::DEFAULT_K)?,
            max_terms: count_param(table, "max-terms", Self::DEFAULT_MAX_TERMS)?,
        })
    }

    /// The expanded query distribution for `query`.
    pub fn expand(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<(TermId, f64)>> {
        check_lambda(self.lambda)?;
        let feedback = self.initial.score_filtered(index, query, self.k, filter)?;
        let docs = feedback
            .iter()
            .map(|r| self.forward.postings(r.doc_id))
            .collect::<Result<Vec<_>>>()?;
        let total = index.total_corpus_terms().max(1) as f64;
        let model = unigram_mixture(
            &docs,
            |term| Ok(index.total_num_occurrences(term)? as f64 / total),
            self.lambda,
        )?;

        let mut expanded: HashMap<TermId, f64> = HashMap::new();
        for (term, p) in top_terms(model, self.max_terms) {
            *expanded.entry(term).or_default() += self.alpha * p;
        }
        let query_length: f64 = query.iter().map(|&(_, w)| f64::from(w)).sum();
        if query_length > 0.0 {
            for &(term, weight) in query {
                *expanded.entry(term).or_default() +=
                    (1.0 - self.alpha) * f64::from(weight) / query_length;
            }
        }
        debug!(feedback_docs = docs.len(), terms = expanded.len(), "model feedback expansion");
        Ok(sorted_query(expanded))
    }
}

impl Ranker for KlDivergencePrf {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn rank(
        &self,
        index: &InvertedIndex,
        query: &[(TermId, Count)],
        k: usize,
        filter: &dyn Fn(DocId) -> bool,
    ) -> Result<Vec<SearchResult>> {
        let expanded = self.expand(index, query, filter)?;
        self.initial.score_weighted(index, &expanded, k, filter)
    }
}

fn check_lambda(lambda: f64) -> Result<()> {
    if !(0.0..1.0).contains(&lambda) {
        return Err(Error::config(format!(
            "ranker parameter `lambda` = {} is outside [0, 1)",
            lambda
        )));
    }
    Ok(())
}

fn check_language_model(ranker: &dyn RankingFunction) -> Result<()> {
    match ranker.id() {
        JelinekMercer::ID | DirichletPrior::ID | AbsoluteDiscount::ID => Ok(()),
        other => Err(Error::config(format!(
            "{} needs a language-model feedback ranker, got {:?}",
            KlDivergencePrf::ID,
            other
        ))),
    }
}

/// Normalize counts into probabilities; empty when nothing was counted.
fn normalize(mut counts: HashMap<TermId, f64>) -> HashMap<TermId, f64> {
    let total: f64 = counts.values().sum();
    if total <= 0.0 {
        return HashMap::new();
    }
    for p in counts.values_mut() {
        *p /= total;
    }
    counts
}

/// Fit the feedback component of a two-component mixture whose other
/// component, the collection model `background`, is chosen with fixed
/// probability `lambda`.
fn unigram_mixture(
    docs: &[ForwardPostings],
    background: impl Fn(TermId) -> Result<f64>,
    lambda: f64,
) -> Result<HashMap<TermId, f64>> {
    let mut counts: HashMap<TermId, f64> = HashMap::new();
    let mut collection: HashMap<TermId, f64> = HashMap::new();
    for doc in docs {
        for &(term, count) in doc.counts() {
            *counts.entry(term).or_default() += f64::from(count);
            if !collection.contains_key(&term) {
                collection.insert(term, background(term)?);
            }
        }
    }
    let mut feedback = normalize(counts);
    let mut old_ll = f64::MIN;
    for _ in 0..MAX_EM_ITERATIONS {
        let mut next: HashMap<TermId, f64> = HashMap::new();
        let mut ll = 0.0;
        for doc in docs {
            for &(term, count) in doc.counts() {
                let count = f64::from(count);
                let from_collection = lambda * collection.get(&term).copied().unwrap_or(0.0);
                let mixed =
                    from_collection + (1.0 - lambda) * feedback.get(&term).copied().unwrap_or(0.0);
                if mixed <= 0.0 {
                    continue;
                }
                *next.entry(term).or_default() += (1.0 - from_collection / mixed) * count;
                ll += count * mixed.ln();
            }
        }
        feedback = normalize(next);
        let change = (old_ll - ll) / old_ll;
        old_ll = ll;
        if change < EM_CONVERGENCE {
            break;
        }
    }
    Ok(feedback)
}
