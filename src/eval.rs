//! Retrieval quality against relevance judgements.
//!
//! A judgements file has one `query doc relevance` triple per line, or the
//! four-column TREC form `query iteration doc relevance`. Lines with zero
//! relevance are ignored. Every metric takes a `cutoff`: only the first
//! `cutoff` results are considered.
//!
//! ```text
//! 1 0 2
//! 1 0 4 1
//! 2 7 1
//! ```

use crate::error::{Error, Result};
use crate::types::{DocId, SearchResult};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Query identifier used in judgements files.
pub type QueryId = u64;

/// Per-query metrics reported by [`IrEval::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QueryStats {
    pub ndcg: f64,
    pub avg_precision: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Relevance judgements plus the running average precision of every
/// evaluated query.
#[derive(Debug, Clone, Default)]
pub struct IrEval {
    qrels: HashMap<QueryId, HashMap<DocId, u64>>,
    scores: Vec<f64>,
}

impl IrEval {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "cannot read query judgements {}: {}",
                path.display(),
                e
            ))
        })?;
        let eval = Self::parse(&text)?;
        debug!(path = %path.display(), queries = eval.qrels.len(), "loaded judgements");
        Ok(eval)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut qrels: HashMap<QueryId, HashMap<DocId, u64>> = HashMap::new();
        for (n, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (query, doc, relevance) = match fields.as_slice() {
                [] => continue,
                [q, d, r] | [q, _, d, r] => (*q, *d, *r),
                _ => {
                    return Err(Error::config(format!(
                        "judgements line {}: expected 3 or 4 columns, got {}",
                        n + 1,
                        fields.len()
                    )))
                }
            };
            let number = |field: &str| {
                field.parse::<u64>().map_err(|e| {
                    Error::config(format!("judgements line {}: {:?}: {}", n + 1, field, e))
                })
            };
            let relevance = number(relevance)?;
            if relevance > 0 {
                qrels
                    .entry(number(query)?)
                    .or_default()
                    .insert(DocId(number(doc)?), relevance);
            }
        }
        Ok(Self {
            qrels,
            scores: Vec::new(),
        })
    }

    /// Number of queries with at least one relevant document.
    pub fn judged_queries(&self) -> usize {
        self.qrels.len()
    }

    /// Judged relevance of `doc` for `query`; 0 when unjudged.
    pub fn relevance(&self, query: QueryId, doc: DocId) -> u64 {
        self.qrels
            .get(&query)
            .and_then(|docs| docs.get(&doc))
            .copied()
            .unwrap_or(0)
    }

    fn relevant_retrieved(&self, results: &[SearchResult], query: QueryId, cutoff: usize) -> f64 {
        results
            .iter()
            .take(cutoff)
            .filter(|r| self.relevance(query, r.doc_id) > 0)
            .count() as f64
    }

    /// Fraction of the retrieved documents that are relevant.
    pub fn precision(&self, results: &[SearchResult], query: QueryId, cutoff: usize) -> f64 {
        if results.is_empty() || cutoff == 0 || !self.qrels.contains_key(&query) {
            return 0.0;
        }
        self.relevant_retrieved(results, query, cutoff) / results.len().min(cutoff) as f64
    }

    /// Fraction of the relevant documents that were retrieved.
    pub fn recall(&self, results: &[SearchResult], query: QueryId, cutoff: usize) -> f64 {
        match self.qrels.get(&query) {
            Some(relevant) if !results.is_empty() => {
                self.relevant_retrieved(results, query, cutoff) / relevant.len() as f64
            }
            _ => 0.0,
        }
    }

    /// F-measure weighting recall `beta` times as much as precision.
    pub fn f_score(&self, results: &[SearchResult], query: QueryId, cutoff: usize, beta: f64) -> f64 {
        let p = self.precision(results, query, cutoff);
        let r = self.recall(results, query, cutoff);
        let denominator = beta * beta * p + r;
        if denominator < 1e-8 {
            return 0.0;
        }
        (1.0 + beta * beta) * p * r / denominator
    }

    pub fn f1(&self, results: &[SearchResult], query: QueryId, cutoff: usize) -> f64 {
        self.f_score(results, query, cutoff, 1.0)
    }

    /// Normalized discounted cumulative gain with `2^rel - 1` gains.
    pub fn ndcg(&self, results: &[SearchResult], query: QueryId, cutoff: usize) -> f64 {
        let Some(judged) = self.qrels.get(&query) else {
            return 0.0;
        };
        if results.is_empty() {
            return 0.0;
        }
        let gain = |rank: usize, rel: u64| (2f64.powf(rel as f64) - 1.0) / (rank as f64 + 1.0).log2();

        let dcg: f64 = results
            .iter()
            .take(cutoff)
            .enumerate()
            .map(|(i, r)| gain(i + 1, self.relevance(query, r.doc_id)))
            .sum();

        let mut ideal: Vec<u64> = judged.values().copied().collect();
        ideal.sort_unstable_by(|a, b| b.cmp(a));
        let idcg: f64 = ideal
            .into_iter()
            .take(cutoff)
            .enumerate()
            .map(|(i, rel)| gain(i + 1, rel))
            .sum();
        if idcg <= 0.0 {
            return 0.0;
        }
        dcg / idcg
    }

    /// Average precision at `cutoff`, normalized by the number of relevant
    /// documents that fit under the cutoff.
    pub fn avg_precision(&self, results: &[SearchResult], query: QueryId, cutoff: usize) -> f64 {
        let Some(judged) = self.qrels.get(&query) else {
            return 0.0;
        };
        if results.is_empty() || cutoff == 0 {
            return 0.0;
        }
        let possible = cutoff.min(judged.len());
        let mut found = 0usize;
        let mut sum = 0.0;
        for (i, result) in results.iter().take(cutoff).enumerate() {
            if self.relevance(query, result.doc_id) > 0 {
                found += 1;
                sum += found as f64 / (i + 1) as f64;
                if found == possible {
                    break;
                }
            }
        }
        sum / possible as f64
    }

    /// All per-query metrics. The query's average precision is recorded for
    /// [`map`](IrEval::map) and [`gmap`](IrEval::gmap).
    pub fn evaluate(&mut self, results: &[SearchResult], query: QueryId, cutoff: usize) -> QueryStats {
        let stats = QueryStats {
            ndcg: self.ndcg(results, query, cutoff),
            avg_precision: self.avg_precision(results, query, cutoff),
            f1: self.f1(results, query, cutoff),
            precision: self.precision(results, query, cutoff),
            recall: self.recall(results, query, cutoff),
        };
        self.scores.push(stats.avg_precision);
        stats
    }

    /// Mean average precision over evaluated queries.
    pub fn map(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }

    /// Geometric mean average precision; 0 if any query scored 0.
    pub fn gmap(&self) -> f64 {
        if self.scores.is_empty() || self.scores.iter().any(|&s| s <= 0.0) {
            return 0.0;
        }
        (self.scores.iter().map(|s| s.ln()).sum::<f64>() / self.scores.len() as f64).exp()
    }

    /// Forget recorded average precisions.
    pub fn reset(&mut self) {
        self.scores.clear();
    }
}
