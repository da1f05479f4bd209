//! Text analyzers: turn raw document text into `term -> count` maps.

use crate::types::Count;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tokenizes text and counts terms.
pub trait Analyzer: Send + Sync {
    /// Name used in configuration and manifests.
    fn id(&self) -> &'static str;

    /// Terms of `text` in order of appearance.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Term counts of `text`.
    fn analyze(&self, text: &str) -> HashMap<String, Count> {
        let mut counts = HashMap::new();
        for token in self.tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }
        counts
    }
}

/// Splits on Unicode whitespace and keeps tokens verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn id(&self) -> &'static str {
        "whitespace"
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}

/// Lowercases, splits on non-alphanumeric characters and drops
/// single-character tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleAnalyzer;

impl Analyzer for SimpleAnalyzer {
    fn id(&self) -> &'static str {
        "simple"
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() > 1)
            .map(|s| s.to_string())
            .collect()
    }
}

/// Analyzer choice, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalyzerKind {
    #[default]
    Whitespace,
    Simple,
}

impl AnalyzerKind {
    pub fn build(self) -> Box<dyn Analyzer> {
        match self {
            AnalyzerKind::Whitespace => Box::new(WhitespaceAnalyzer),
            AnalyzerKind::Simple => Box::new(SimpleAnalyzer),
        }
    }
}
