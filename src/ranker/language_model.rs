//! Smoothed query-likelihood rankers.
//!
//! Each ranker supplies a smoothed probability `p_s(t|d)` and a
//! document constant `alpha_d`. A matched term contributes
//! `qtw * ln(p_s / (alpha_d * p(t|C)))` and every matched document starts
//! from `|q| * ln(alpha_d)`.

use super::{check_range, param, RankingFunction, ScoreData};
use crate::error::Result;

/// Probability of the term in the whole collection.
fn collection_prob(sd: &ScoreData<'_>) -> f64 {
    sd.corpus_term_count as f64 / sd.total_terms as f64
}

fn term_score(sd: &ScoreData<'_>, smoothed: f64, doc_constant: f64) -> f64 {
    sd.query_term_weight * (smoothed / (doc_constant * collection_prob(sd))).ln()
}

/// Linear interpolation with the collection model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JelinekMercer {
    pub lambda: f64,
}

impl Default for JelinekMercer {
    fn default() -> Self {
        Self {
            lambda: Self::DEFAULT_LAMBDA,
        }
    }
}

impl JelinekMercer {
    pub const ID: &'static str = "jelinek-mercer";
    pub const DEFAULT_LAMBDA: f64 = 0.7;

    pub fn new(lambda: f64) -> Result<Self> {
        check_range("lambda", lambda, 0.0, 1.0, true)?;
        Ok(Self { lambda })
    }

    pub fn from_config(table: &toml::Table) -> Result<Box<dyn RankingFunction>> {
        Ok(Box::new(Self::new(param(table, "lambda", Self::DEFAULT_LAMBDA)?)?))
    }

    fn smoothed_prob(&self, sd: &ScoreData<'_>) -> f64 {
        let ml = sd.doc_term_count as f64 / sd.doc_size as f64;
        (1.0 - self.lambda) * ml + self.lambda * collection_prob(sd)
    }
}

impl RankingFunction for JelinekMercer {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn score_one(&self, sd: &ScoreData<'_>) -> f64 {
        term_score(sd, self.smoothed_prob(sd), self.lambda)
    }

    fn initial_score(&self, sd: &ScoreData<'_>) -> f64 {
        sd.query_length * self.lambda.ln()
    }

    fn clone_box(&self) -> Box<dyn RankingFunction> {
        Box::new(*self)
    }
}

/// Bayesian smoothing with a Dirichlet prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirichletPrior {
    pub mu: f64,
}

impl Default for DirichletPrior {
    fn default() -> Self {
        Self {
            mu: Self::DEFAULT_MU,
        }
    }
}

impl DirichletPrior {
    pub const ID: &'static str = "dirichlet-prior";
    pub const DEFAULT_MU: f64 = 2000.0;

    pub fn new(mu: f64) -> Result<Self> {
        check_range("mu", mu, 0.0, f64::INFINITY, true)?;
        Ok(Self { mu })
    }

    pub fn from_config(table: &toml::Table) -> Result<Box<dyn RankingFunction>> {
        Ok(Box::new(Self::new(param(table, "mu", Self::DEFAULT_MU)?)?))
    }

    fn doc_constant(&self, sd: &ScoreData<'_>) -> f64 {
        self.mu / (sd.doc_size as f64 + self.mu)
    }

    fn smoothed_prob(&self, sd: &ScoreData<'_>) -> f64 {
        (sd.doc_term_count as f64 + self.mu * collection_prob(sd)) / (sd.doc_size as f64 + self.mu)
    }
}

impl RankingFunction for DirichletPrior {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn score_one(&self, sd: &ScoreData<'_>) -> f64 {
        term_score(sd, self.smoothed_prob(sd), self.doc_constant(sd))
    }

    fn initial_score(&self, sd: &ScoreData<'_>) -> f64 {
        sd.query_length * self.doc_constant(sd).ln()
    }

    fn clone_box(&self) -> Box<dyn RankingFunction> {
        Box::new(*self)
    }
}

/// Absolute discounting of seen terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteDiscount {
    pub delta: f64,
}

impl Default for AbsoluteDiscount {
    fn default() -> Self {
        Self {
            delta: Self::DEFAULT_DELTA,
        }
    }
}

impl AbsoluteDiscount {
    pub const ID: &'static str = "absolute-discount";
    pub const DEFAULT_DELTA: f64 = 0.7;

    pub fn new(delta: f64) -> Result<Self> {
        check_range("delta", delta, 0.0, 1.0, true)?;
        Ok(Self { delta })
    }

    pub fn from_config(table: &toml::Table) -> Result<Box<dyn RankingFunction>> {
        Ok(Box::new(Self::new(param(table, "delta", Self::DEFAULT_DELTA)?)?))
    }

    fn doc_constant(&self, sd: &ScoreData<'_>) -> f64 {
        self.delta * sd.doc_unique_terms as f64 / sd.doc_size as f64
    }

    fn smoothed_prob(&self, sd: &ScoreData<'_>) -> f64 {
        let discounted = (sd.doc_term_count as f64 - self.delta).max(0.0);
        discounted / sd.doc_size as f64 + self.doc_constant(sd) * collection_prob(sd)
    }
}

impl RankingFunction for AbsoluteDiscount {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn score_one(&self, sd: &ScoreData<'_>) -> f64 {
        term_score(sd, self.smoothed_prob(sd), self.doc_constant(sd))
    }

    fn initial_score(&self, sd: &ScoreData<'_>) -> f64 {
        sd.query_length * self.doc_constant(sd).ln()
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
        IndexBuilder::new(Config::new(tmp.path().join("idx")))
            .build(vec![Ok(Document::text(0, "a"))])
            .unwrap()
    }

    fn sample(index: &InvertedIndex) -> ScoreData<'_> {
        ScoreData {
            index,
            avg_doc_length: 100.0,
            num_docs: 10,
            total_terms: 1000,
            query_length: 2.0,
            term_id: TermId(0),
            query_term_weight: 1.0,
            doc_freq: 4,
            corpus_term_count: 10,
            doc_id: DocId(0),
            doc_term_count: 3,
            doc_size: 100,
            doc_unique_terms: 50,
        }
    }

    #[test]
    fn test_jelinek_mercer_value() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let sd = sample(&index);
        let jm = JelinekMercer::default();
        let p: f64 = 0.3 * 0.03 + 0.7 * 0.01;
        let expected = (p / (0.7 * 0.01)).ln();
        assert!((jm.score_one(&sd) - expected).abs() < 1e-12);
        assert!((jm.initial_score(&sd) - 2.0 * 0.7f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_dirichlet_value() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let sd = sample(&index);
        let dp = DirichletPrior::default();
        let p: f64 = (3.0 + 2000.0 * 0.01) / 2100.0;
        let alpha = 2000.0 / 2100.0;
        assert!((dp.score_one(&sd) - (p / (alpha * 0.01)).ln()).abs() < 1e-12);
        assert!((dp.initial_score(&sd) - 2.0 * f64::ln(alpha)).abs() < 1e-12);
    }

    #[test]
    fn test_absolute_discount_value() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let sd = sample(&index);
        let ad = AbsoluteDiscount::default();
        let alpha = 0.7 * 50.0 / 100.0;
        let p: f64 = 2.3 / 100.0 + alpha * 0.01;
        assert!((ad.score_one(&sd) - (p / (alpha * 0.01)).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_seen_terms_score_positive() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp);
        let sd = sample(&index);
        let rankers: Vec<Box<dyn RankingFunction>> = vec![
            Box::new(JelinekMercer::default()),
            Box::new(DirichletPrior::default()),
            Box::new(AbsoluteDiscount::default()),
        ];
        for ranker in rankers {
            assert!(ranker.score_one(&sd) > 0.0, "{}", ranker.id());
        }
    }

    #[test]
    fn test_parameters_validated() {
        assert!(JelinekMercer::new(0.0).is_err());
        assert!(DirichletPrior::new(-5.0).is_err());
        assert!(AbsoluteDiscount::new(1.5).is_err());
        assert!(AbsoluteDiscount::new(1.0).is_ok());
    }
}
