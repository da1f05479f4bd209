//! Document sources described by corpus descriptor files.
//!
//! A descriptor is a small TOML file:
//!
//! ```toml
//! type = "line-corpus"       # or "jsonl-corpus"
//! path = "docs.txt"
//! labels = "labels.txt"      # optional, one label per line
//! metadata = "metadata.tsv"  # optional, tab-separated, schema order
//! ```
//!
//! A line corpus holds one document per line. A JSONL corpus holds one JSON
//! object per line with a `content` string and an optional `label` that
//! takes precedence over the labels file. Documents are numbered from zero
//! in file order.

use crate::error::{Error, Result};
use crate::metadata::Schema;
use crate::types::{Content, DocId, Document};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Corpus file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorpusType {
    LineCorpus,
    JsonlCorpus,
}

/// Parsed corpus descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDescriptor {
    #[serde(rename = "type")]
    pub corpus_type: CorpusType,
    pub path: PathBuf,
    #[serde(default)]
    pub labels: Option<PathBuf>,
    #[serde(default)]
    pub metadata: Option<PathBuf>,
}

impl CorpusDescriptor {
    /// Load a descriptor, resolving its paths against its own directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read corpus descriptor {}: {}", path.display(), e))
        })?;
        let mut desc: CorpusDescriptor = toml::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        desc.path = resolve(desc.path);
        desc.labels = desc.labels.map(resolve);
        desc.metadata = desc.metadata.map(resolve);
        Ok(desc)
    }

    /// Stream the corpus documents. Metadata columns are parsed with
    /// `schema`.
    pub fn documents(&self, schema: &Schema) -> Result<Documents> {
        let open = |p: &Path| -> Result<Lines<BufReader<File>>> {
            let file = File::open(p).map_err(|e| {
                Error::config(format!("cannot open corpus file {}: {}", p.display(), e))
            })?;
            Ok(BufReader::new(file).lines())
        };
        if !schema.is_empty() && self.metadata.is_none() {
            return Err(Error::config(
                "metadata fields are declared but the corpus has no metadata file",
            ));
        }
        Ok(Documents {
            corpus_type: self.corpus_type,
            content: open(&self.path)?,
            labels: self.labels.as_deref().map(open).transpose()?,
            metadata: self.metadata.as_deref().map(open).transpose()?,
            schema: schema.clone(),
            next_id: 0,
        })
    }
}

#[derive(Deserialize)]
struct JsonlRecord {
    content: String,
    #[serde(default)]
    label: Option<String>,
}

/// Iterator over a corpus' documents.
pub struct Documents {
    corpus_type: CorpusType,
    content: Lines<BufReader<File>>,
    labels: Option<Lines<BufReader<File>>>,
    metadata: Option<Lines<BufReader<File>>>,
    schema: Schema,
    next_id: u64,
}

impl Documents {
    fn side_line(
        lines: &mut Option<Lines<BufReader<File>>>,
        what: &str,
        doc: u64,
    ) -> Result<Option<String>> {
        match lines {
            None => Ok(None),
            Some(lines) => match lines.next() {
                Some(line) => Ok(Some(line?)),
                None => Err(Error::config(format!(
                    "{} file ends before document {}",
                    what, doc
                ))),
            },
        }
    }

    fn next_document(&mut self, line: String) -> Result<Document> {
        let id = self.next_id;
        self.next_id += 1;
        let (text, mut label) = match self.corpus_type {
            CorpusType::LineCorpus => (line, None),
            CorpusType::JsonlCorpus => {
                let record: JsonlRecord = serde_json::from_str(&line).map_err(|e| {
                    Error::config(format!("document {}: invalid JSON: {}", id, e))
                })?;
                (record.content, record.label)
            }
        };
        if let Some(l) = Self::side_line(&mut self.labels, "labels", id)? {
            label.get_or_insert(l);
        }
        let metadata = match Self::side_line(&mut self.metadata, "metadata", id)? {
            Some(line) => self.schema.parse_line(&line)?,
            None => Vec::new(),
        };
        Ok(Document {
            id: DocId(id),
            content: Content::Text(text),
            label,
            metadata,
        })
    }
}

impl Iterator for Documents {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.content.next()? {
            Ok(line) => line,
            Err(e) => return Some(Err(e.into())),
        };
        Some(self.next_document(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldInfo, FieldType, FieldValue};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_line_corpus_with_labels_and_metadata() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "docs.txt", "the cat sat\nthe dog sat\n");
        write(tmp.path(), "labels.txt", "cats\ndogs\n");
        write(tmp.path(), "meta.tsv", "2001\n2019\n");
        let desc_path = write(
            tmp.path(),
            "corpus.toml",
            "type = \"line-corpus\"\npath = \"docs.txt\"\nlabels = \"labels.txt\"\nmetadata = \"meta.tsv\"\n",
        );
        let desc = CorpusDescriptor::from_file(&desc_path).unwrap();
        assert_eq!(desc.path, tmp.path().join("docs.txt"));

        let schema = Schema::new(vec![FieldInfo::new("year", FieldType::UnsignedInt)]).unwrap();
        let docs: Vec<Document> = desc.documents(&schema).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].id, DocId(1));
        assert_eq!(docs[1].label.as_deref(), Some("dogs"));
        assert_eq!(docs[0].metadata, vec![FieldValue::UnsignedInt(2001)]);
        assert!(matches!(&docs[0].content, Content::Text(t) if t == "the cat sat"));
    }

    #[test]
    fn test_jsonl_corpus() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "docs.jsonl",
            "{\"content\": \"a b\", \"label\": \"x\"}\n{\"content\": \"c\"}\n",
        );
        let desc = CorpusDescriptor {
            corpus_type: CorpusType::JsonlCorpus,
            path: tmp.path().join("docs.jsonl"),
            labels: None,
            metadata: None,
        };
        let docs: Vec<Document> = desc
            .documents(&Schema::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs[0].label.as_deref(), Some("x"));
        assert_eq!(docs[1].label, None);
    }

    #[test]
    fn test_short_labels_file() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "docs.txt", "a\nb\n");
        write(tmp.path(), "labels.txt", "only-one\n");
        let desc = CorpusDescriptor {
            corpus_type: CorpusType::LineCorpus,
            path: tmp.path().join("docs.txt"),
            labels: Some(tmp.path().join("labels.txt")),
            metadata: None,
        };
        let results: Vec<Result<Document>> = desc.documents(&Schema::default()).unwrap().collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_corpus_type() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "corpus.toml", "type = \"gz-corpus\"\npath = \"x\"\n");
        assert!(matches!(
            CorpusDescriptor::from_file(&path),
            Err(Error::Config(_))
        ));
    }
}
