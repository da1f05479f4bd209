//! Pivoted length normalization.

use super::{check_range, param, RankingFunction, ScoreData};
use crate::error::Result;

/// Pivoted length normalized TF-IDF with a doubly logarithmic TF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotedLength {
    /// Pivot slope.
    pub s: f64,
}

impl Default for PivotedLength {
    fn default() -> Self {
        Self { s: Self::DEFAULT_S }
    }
}

impl PivotedLength {
    pub const ID: &'static str = "pivoted-length";
    pub const DEFAULT_S: f64 = 0.2;

    pub fn new(s: f64) -> Result<Self> {
        check_range("s", s, 0.0, 1.0, false)?;
        Ok(Self { s })
    }

    pub fn from_config(table: &toml::Table) -> Result<Box<dyn RankingFunction>> {
        Ok(Box::new(Self::new(param(table, "s", Self::DEFAULT_S)?)?))
    }
}

impl RankingFunction for PivotedLength {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn score_one(&self, sd: &ScoreData<'_>) -> f64 {
        let tf = 1.0 + (1.0 + (sd.doc_term_count as f64).ln()).ln();
        let norm = if sd.avg_doc_length > 0.0 {
            (1.0 - self.s) + self.s * sd.doc_size as f64 / sd.avg_doc_length
        } else {
            1.0
        };
        let idf = ((sd.num_docs as f64 + 1.0) / (0.5 + sd.doc_freq as f64)).ln();
        sd.query_term_weight * tf / norm * idf
    }

    fn clone_box(&self) -> Box<dyn RankingFunction> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slope_validated() {
        assert!(PivotedLength::new(0.2).is_ok());
        assert!(PivotedLength::new(1.2).is_err());
        let t: toml::Table = toml::from_str("method = \"pivoted-length\"\ns = 0.4").unwrap();
        assert_eq!(PivotedLength::from_config(&t).unwrap().id(), "pivoted-length");
    }
}
