//! lexdisk - disk-based inverted index construction and ranked retrieval.
//!
//! Building an index streams documents through a pool of tokenizing
//! workers. Postings accumulate in memory up to a RAM budget, spill to
//! sorted chunk files, and are merged into a γ-coded postings file with a
//! B-tree-like vocabulary. Everything on disk is memory mapped for reading:
//!
//! - [`IndexBuilder`] / [`make_index`]: build or reopen an index directory
//! - [`InvertedIndex`]: term statistics and postings lookups
//! - [`ForwardIndex`]: document to term postings
//! - [`ranker`]: BM25, pivoted length, language-model and feedback rankers
//! - [`eval`]: precision, recall, NDCG and MAP against relevance judgements

pub mod analyzer;
pub mod bitstream;
pub mod builder;
pub mod cache;
pub mod chunk;
pub mod chunk_handler;
pub mod config;
pub mod corpus;
pub mod disk_vector;
pub mod error;
pub mod eval;
pub mod forward;
pub mod metadata;
pub mod mmap;
pub mod packed;
pub mod postings;
pub mod postings_file;
pub mod progress;
pub mod ranker;
pub mod reader;
pub mod string_list;
pub mod types;
pub mod vocabulary;

// Re-export commonly used types
pub use analyzer::{Analyzer, AnalyzerKind};
pub use builder::{make_index, IndexBuilder, IndexKind, Manifest};
pub use cache::CacheType;
pub use config::Config;
pub use corpus::CorpusDescriptor;
pub use error::{Error, Result};
pub use forward::ForwardIndex;
pub use metadata::{FieldInfo, FieldType, FieldValue, Metadata, Schema};
pub use postings::{ForwardPostings, InvertedPostings, PostingsData};
pub use ranker::{make_query_ranker, make_ranker, Ranker, RankerRegistry, RankingFunction};
pub use reader::InvertedIndex;
pub use types::{Content, Count, DocId, Document, LabelId, SearchResult, TermId};
