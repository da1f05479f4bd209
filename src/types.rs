//! Core types for the lexdisk index.

use crate::metadata::FieldValue;
use std::fmt;

macro_rules! identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u64);

        impl $name {
            /// The raw integer value.
            #[inline]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                $name(v)
            }
        }

        impl From<$name> for u64 {
            fn from(v: $name) -> u64 {
                v.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

identifier!(
    /// Term identifier; the rank of the term in the sorted vocabulary.
    TermId
);

identifier!(
    /// Document identifier; documents are numbered densely from zero.
    DocId
);

identifier!(
    /// Class label identifier.
    LabelId
);

/// Term occurrence count within one document.
pub type Count = u32;

/// What a document contributes to the index.
#[derive(Debug, Clone)]
pub enum Content {
    /// Raw text, run through the configured analyzer.
    Text(String),
    /// Already tokenized `term -> count` pairs.
    Counts(Vec<(String, Count)>),
}

/// A document to be indexed.
#[derive(Debug, Clone)]
pub struct Document {
    /// Document identifier.
    pub id: DocId,
    /// Text or pre-tokenized counts.
    pub content: Content,
    /// Optional class label.
    pub label: Option<String>,
    /// Metadata values, in schema order.
    pub metadata: Vec<FieldValue>,
}

impl Document {
    /// A text document with no label or metadata.
    pub fn text(id: u64, text: impl Into<String>) -> Self {
        Self {
            id: DocId(id),
            content: Content::Text(text.into()),
            label: None,
            metadata: Vec::new(),
        }
    }

    /// Attach a class label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attach metadata values (schema order).
    pub fn with_metadata(mut self, metadata: Vec<FieldValue>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A search result returned from queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// The document ID.
    pub doc_id: DocId,
    /// Relevance score (higher is better).
    pub score: f64,
}
