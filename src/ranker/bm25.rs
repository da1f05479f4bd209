//! Okapi BM25.

use super::{check_range, param, RankingFunction, ScoreData};
use crate::error::Result;

/// Okapi BM25 with query term saturation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OkapiBm25 {
    /// Term frequency saturation.
    pub k1: f64,
    /// Length normalization.
    pub b: f64,
    /// Query term frequency saturation.
    pub k3: f64,
}

impl Default for OkapiBm25 {
    fn default() -> Self {
        Self {
            k1: Self::DEFAULT_K1,
            b: Self::DEFAULT_B,
            k3: Self::DEFAULT_K3,
        }
    }
}

impl OkapiBm25 {
    pub const ID: &'static str = "bm25";
    pub const DEFAULT_K1: f64 = 1.2;
    pub const DEFAULT_B: f64 = 0.75;
    pub const DEFAULT_K3: f64 = 500.0;

    pub fn new(k1: f64, b: f64, k3: f64) -> Result<Self> {
        check_range("k1", k1, 0.0, f64::INFINITY, false)?;
        check_range("b", b, 0.0, 1.0, false)?;
        check_range("k3", k3, 0.0, f64::INFINITY, false)?;
        Ok(Self { k1, b, k3 })
    }

    pub fn from_config(table: &toml::Table) -> Result<Box<dyn RankingFunction>> {
        Ok(Box::new(Self::new(
            param(table, "k1", Self::DEFAULT_K1)?,
            param(table, "b", Self::DEFAULT_B)?,
            param(table, "k3", Self::DEFAULT_K3)?,
        )?))
    }
}

impl RankingFunction for OkapiBm25 {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn score_one(&self, sd: &ScoreData<'_>) -> f64 {
        let df = sd.doc_freq as f64;
        let n = sd.num_docs as f64;
        let dl = sd.doc_size as f64;
        let tf = sd.doc_term_count as f64;
        let qtw = sd.query_term_weight;

        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
        let norm = if sd.avg_doc_length > 0.0 {
            (1.0 - self.b) + self.b * dl / sd.avg_doc_length
        } else {
            1.0
        };
        let tf_part = ((self.k1 + 1.0) * tf) / (self.k1 * norm + tf);
        let qtf_part = ((self.k3 + 1.0) * qtw) / (self.k3 + qtw);
        tf_part * idf * qtf_part
    }

    fn clone_box(&self) -> Box<dyn RankingFunction> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::config::Config;
    use crate::reader::InvertedIndex;
    use crate::types::{DocId, Document, TermId};
    use tempfile::TempDir;

    fn index(tmp: &TempDir) -> InvertedIndex {
        let docs = vec![Ok(Document::text(0, "a b")), Ok(Document::text(1, "b c d"))];
        IndexBuilder::new(Config::new(tmp.path().join("idx")))
            .build(docs)
            .unwrap()
    }

    fn sample(index: &InvertedIndex) -> ScoreData<'_> {
        ScoreData {
            index,
            avg_doc_length: 10.0,
            num_docs: 100,
            total_terms: 1000,
            query_length: 1.0,
            term_id: TermId(0),
            query_term_weight: 1.0,
            doc_freq: 10,
            corpus_term_count: 20,
            doc_id: DocId(0),
            doc_term_count: 1,
            doc_size: 10,
            doc_unique_terms: 8,
        }
    }

    #[test]
    fn test_known_value() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let sd = sample(&index);
        // dl == avgdl: tf part is (k1 + 1) / (k1 + 1) = 1
        let idf = (1.0f64 + 90.5 / 10.5).ln();
        let qtf = 501.0 / 501.0;
        let expected = idf * qtf;
        assert!((OkapiBm25::default().score_one(&sd) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_in_term_count() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let ranker = OkapiBm25::default();
        let mut sd = sample(&index);
        let mut previous = f64::NEG_INFINITY;
        for count in 1..50 {
            sd.doc_term_count = count;
            let score = ranker.score_one(&sd);
            assert!(score >= previous, "score fell at count {}", count);
            previous = score;
        }
    }

    #[test]
    fn test_parameters_validated() {
        assert!(OkapiBm25::new(1.2, 1.5, 500.0).is_err());
        assert!(OkapiBm25::new(-1.0, 0.75, 500.0).is_err());
        let t: toml::Table = toml::from_str("method = \"bm25\"\nk1 = 2\nb = 0.5").unwrap();
        assert!(OkapiBm25::from_config(&t).is_ok());
    }
}
