//! TOML configuration.
//!
//! ```toml
//! index-path = "idx"
//! corpus = "corpus.toml"
//! indexer-ram-budget = 134217728
//! indexer-num-threads = 4
//! analyzer = "whitespace"
//!
//! [[metadata]]
//! name = "year"
//! type = "uint"
//!
//! [cache]
//! type = "dblru"
//! capacity = 10000
//!
//! [ranker]
//! method = "bm25"
//! k1 = 1.2
//!
//! [query-runner]
//! query-path = "queries.txt"
//! query-judgements = "qrels.txt"
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use crate::analyzer::AnalyzerKind;
use crate::cache::{CacheType, DEFAULT_CAPACITY};
use crate::chunk_handler::DEFAULT_RAM_BUDGET;
use crate::error::{Error, Result};
use crate::metadata::{FieldInfo, Schema};
use crate::vocabulary::DEFAULT_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Postings cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    #[serde(rename = "type", default)]
    pub cache_type: CacheType,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::default(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Settings of the query binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueryRunnerConfig {
    /// File with one query per line.
    #[serde(default)]
    pub query_path: Option<PathBuf>,
    /// Relevance judgements; queries are evaluated when present.
    #[serde(default)]
    pub query_judgements: Option<PathBuf>,
    /// Id of the first query in the file.
    #[serde(default = "default_query_id_start")]
    pub query_id_start: u64,
}

impl Default for QueryRunnerConfig {
    fn default() -> Self {
        Self {
            query_path: None,
            query_judgements: None,
            query_id_start: default_query_id_start(),
        }
    }
}

fn default_query_id_start() -> u64 {
    1
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_ram_budget() -> u64 {
    DEFAULT_RAM_BUDGET
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

/// Index and query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Output directory of the inverted index.
    pub index_path: PathBuf,
    /// Corpus descriptor file.
    #[serde(default)]
    pub corpus: Option<PathBuf>,
    /// Per-worker bytes accumulated before spilling a chunk.
    #[serde(default = "default_ram_budget")]
    pub indexer_ram_budget: u64,
    /// Worker count; defaults to the available parallelism.
    #[serde(default)]
    pub indexer_num_threads: Option<usize>,
    #[serde(default)]
    pub analyzer: AnalyzerKind,
    /// Vocabulary block size in bytes.
    #[serde(default = "default_block_size")]
    pub vocab_block_size: usize,
    /// Output directory of an optional forward index.
    #[serde(default)]
    pub forward_index: Option<PathBuf>,
    /// Declared metadata fields.
    #[serde(default)]
    pub metadata: Vec<FieldInfo>,
    #[serde(default)]
    pub cache: CacheConfig,
    /// `[ranker]` table, passed to the ranker registry.
    #[serde(default)]
    pub ranker: Option<toml::Table>,
    #[serde(default)]
    pub query_runner: QueryRunnerConfig,
}

impl Config {
    /// Defaults for an index at `index_path`.
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            corpus: None,
            indexer_ram_budget: DEFAULT_RAM_BUDGET,
            indexer_num_threads: None,
            analyzer: AnalyzerKind::default(),
            vocab_block_size: DEFAULT_BLOCK_SIZE,
            forward_index: None,
            metadata: Vec::new(),
            cache: CacheConfig::default(),
            ranker: None,
            query_runner: QueryRunnerConfig::default(),
        }
    }

    pub fn with_corpus(mut self, corpus: impl Into<PathBuf>) -> Self {
        self.corpus = Some(corpus.into());
        self
    }

    pub fn with_ram_budget(mut self, bytes: u64) -> Self {
        self.indexer_ram_budget = bytes;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.indexer_num_threads = Some(threads);
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerKind) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_metadata(mut self, fields: Vec<FieldInfo>) -> Self {
        self.metadata = fields;
        self
    }

    pub fn with_vocab_block_size(mut self, bytes: usize) -> Self {
        self.vocab_block_size = bytes;
        self
    }

    pub fn with_cache(mut self, cache_type: CacheType, capacity: usize) -> Self {
        self.cache = CacheConfig {
            cache_type,
            capacity,
        };
        self
    }

    /// Parse TOML text, resolving relative paths against `base_dir`. Unlike
    /// [`Config::new`], a config loaded from text must name a corpus.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(text)?;
        let corpus = config
            .corpus
            .take()
            .ok_or_else(|| Error::config("missing required key `corpus`"))?;
        config.corpus = Some(resolve(base_dir, corpus));
        config.index_path = resolve(base_dir, config.index_path);
        config.forward_index = config.forward_index.map(|p| resolve(base_dir, p));
        let runner = &mut config.query_runner;
        runner.query_path = runner.query_path.take().map(|p| resolve(base_dir, p));
        runner.query_judgements = runner.query_judgements.take().map(|p| resolve(base_dir, p));
        config.validate()?;
        Ok(config)
    }

    /// Load a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::parse(&text, path.parent().unwrap_or_else(|| Path::new(".")))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.indexer_num_threads == Some(0) {
            return Err(Error::config("indexer-num-threads must be positive"));
        }
        if self.vocab_block_size < 64 {
            return Err(Error::config(format!(
                "vocab-block-size {} is below the 64-byte minimum",
                self.vocab_block_size
            )));
        }
        self.schema()?;
        Ok(())
    }

    /// Resolved worker count.
    pub fn num_threads(&self) -> usize {
        self.indexer_num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Declared metadata schema.
    pub fn schema(&self) -> Result<Schema> {
        Schema::new(self.metadata.clone())
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
