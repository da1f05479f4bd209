//! Forward index: document to term postings, built by uninverting an
//! inverted index.
//!
//! The forward directory carries its own copies of the vocabulary and the
//! per-document files, so it opens without the inverted index.

use crate::builder::{
    install, is_valid, prepare_partial, IndexKind, Manifest, FORMAT_VERSION, VOCABULARY_FILE,
};
use crate::chunk_handler::ChunkHandler;
use crate::error::{Error, Result};
use crate::metadata::{Metadata, Schema};
use crate::postings::ForwardPostings;
use crate::postings_file::{PostingsFile, PostingsFileWriter};
use crate::progress::progress_bar;
use crate::reader::{check_manifest, DocumentFiles, InvertedIndex};
use crate::types::{DocId, TermId};
use crate::vocabulary::VocabularyMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CHUNK_DIR: &str = "chunks";

/// A read-only forward index.
pub struct ForwardIndex {
    dir: PathBuf,
    manifest: Manifest,
    vocabulary: VocabularyMap,
    postings: PostingsFile<DocId, TermId>,
    docs: DocumentFiles,
}

impl fmt::Debug for ForwardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardIndex")
            .field("dir", &self.dir)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl ForwardIndex {
    /// Open the forward index at `path`, building it from `index` when it is
    /// missing or corrupt.
    pub fn make(index: &InvertedIndex, path: impl AsRef<Path>, ram_budget: u64) -> Result<Self> {
        let path = path.as_ref();
        if is_valid(path, IndexKind::Forward) {
            match Self::open(path) {
                Ok(forward) => return Ok(forward),
                Err(e) if e.is_corrupt() => {
                    warn!(path = %path.display(), error = %e, "forward index is corrupt, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
        Self::build(index, path, ram_budget)
    }

    /// Uninvert `index` into `path`, replacing whatever is there.
    pub fn build(index: &InvertedIndex, path: impl AsRef<Path>, ram_budget: u64) -> Result<Self> {
        let path = path.as_ref();
        let partial = prepare_partial(path)?;
        if let Err(e) = Self::build_into(index, &partial, ram_budget) {
            if let Err(cleanup) = fs::remove_dir_all(&partial) {
                warn!(error = %cleanup, "failed to remove partial forward index");
            }
            return Err(e);
        }
        install(&partial, path)?;
        info!(
            path = %path.display(),
            docs = index.doc_count(),
            terms = index.term_count(),
            "forward index built"
        );
        Self::open(path)
    }

    fn build_into(index: &InvertedIndex, dir: &Path, ram_budget: u64) -> Result<()> {
        let handler = ChunkHandler::<DocId, TermId>::new(dir.join(CHUNK_DIR), ram_budget)?;
        {
            let mut producer = handler.producer();
            let pb = progress_bar(index.term_count(), "Uninverting postings");
            for t in 0..index.term_count() {
                let term = TermId(t);
                for &(doc, count) in index.read_postings(term)?.counts() {
                    producer.add(doc, term, count)?;
                }
                pb.inc(1);
            }
            pb.finish_and_clear();
            producer.finish()?;
        }

        let mut writer = PostingsFileWriter::<DocId, TermId>::create(dir)?;
        if let Some(chunk) = handler.merge_chunks()? {
            let mut reader = chunk.reader()?;
            while let Some(record) = reader.next_record()? {
                writer.write(&record)?;
            }
            drop(reader);
            chunk.remove()?;
        }
        writer.finish(index.doc_count())?;
        fs::remove_dir_all(handler.dir())?;

        DocumentFiles::copy(index.dir(), dir)?;
        Manifest {
            kind: IndexKind::Forward,
            format_version: FORMAT_VERSION,
            ..index.manifest().clone()
        }
        .write(dir)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref();
        let manifest = Manifest::read(dir)?;
        check_manifest(dir, &manifest, IndexKind::Forward)?;
        let vocabulary = VocabularyMap::open(dir.join(VOCABULARY_FILE), manifest.vocab_block_size)?;
        let postings = PostingsFile::open(dir)?;
        if postings.len() as u64 != manifest.doc_count {
            return Err(Error::corrupt(format!(
                "forward postings hold {} documents, manifest records {}",
                postings.len(),
                manifest.doc_count
            )));
        }
        let docs = DocumentFiles::open(dir, manifest.doc_count)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            vocabulary,
            postings,
            docs,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn doc_count(&self) -> u64 {
        self.manifest.doc_count
    }

    pub fn term_count(&self) -> u64 {
        self.manifest.term_count
    }

    pub fn total_corpus_terms(&self) -> u64 {
        self.manifest.total_corpus_terms
    }

    /// Terms of `doc` with their counts, in ascending term order.
    pub fn postings(&self, doc: DocId) -> Result<ForwardPostings> {
        self.postings.find(doc)
    }

    pub fn doc_size(&self, doc: DocId) -> u64 {
        self.docs.doc_size(doc)
    }

    pub fn doc_unique_terms(&self, doc: DocId) -> u64 {
        self.docs.unique_terms(doc)
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.vocabulary.find(term)
    }

    pub fn term(&self, id: TermId) -> Result<Option<&str>> {
        self.vocabulary.find_term(id)
    }

    pub fn metadata(&self, doc: DocId) -> Result<Metadata> {
        self.docs.metadata().get(doc)
    }

    pub fn schema(&self) -> &Schema {
        self.docs.metadata().schema()
    }

    pub fn label(&self, doc: DocId) -> Result<Option<String>> {
        self.docs.label(doc)
    }

    pub fn labels(&self) -> Result<Vec<String>> {
        self.docs.labels()
    }

    pub fn docs(&self) -> impl Iterator<Item = DocId> {
        (0..self.doc_count()).map(DocId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::config::Config;
    use crate::types::Document;
    use tempfile::TempDir;

    fn inverted(tmp: &TempDir) -> InvertedIndex {
        let docs = vec![
            Ok(Document::text(0, "b a b").with_label("x")),
            Ok(Document::text(1, "")),
            Ok(Document::text(2, "c a")),
        ];
        IndexBuilder::new(Config::new(tmp.path().join("inv")))
            .build(docs)
            .unwrap()
    }

    #[test]
    fn test_forward_postings() {
        let tmp = TempDir::new().unwrap();
        let index = inverted(&tmp);
        let fwd = ForwardIndex::build(&index, tmp.path().join("fwd"), 1).unwrap();
        assert_eq!(fwd.doc_count(), 3);
        assert_eq!(fwd.term_count(), 3);

        let a = fwd.term_id("a").unwrap();
        let b = fwd.term_id("b").unwrap();
        let c = fwd.term_id("c").unwrap();
        assert_eq!(fwd.postings(DocId(0)).unwrap().counts(), &[(a, 1), (b, 2)]);
        assert!(fwd.postings(DocId(1)).unwrap().is_empty());
        assert_eq!(fwd.postings(DocId(2)).unwrap().counts(), &[(a, 1), (c, 1)]);
    }

    #[test]
    fn test_forward_index_opens_standalone() {
        let tmp = TempDir::new().unwrap();
        let index = inverted(&tmp);
        ForwardIndex::build(&index, tmp.path().join("fwd"), 1 << 20).unwrap();
        drop(index);
        fs::remove_dir_all(tmp.path().join("inv")).unwrap();

        let fwd = ForwardIndex::open(tmp.path().join("fwd")).unwrap();
        assert_eq!(fwd.doc_size(DocId(0)), 3);
        assert_eq!(fwd.doc_unique_terms(DocId(2)), 2);
        assert_eq!(fwd.label(DocId(0)).unwrap().as_deref(), Some("x"));
        assert_eq!(fwd.label(DocId(2)).unwrap(), None);
        assert_eq!(fwd.term(TermId(2)).unwrap(), Some("c"));
        assert_eq!(fwd.metadata(DocId(0)).unwrap().length(), 3);
        assert_eq!(fwd.docs().count(), 3);
    }

    #[test]
    fn test_make_reuses_and_rejects_wrong_kind() {
        let tmp = TempDir::new().unwrap();
        let index = inverted(&tmp);
        let path = tmp.path().join("fwd");
        ForwardIndex::make(&index, &path, 1 << 20).unwrap();
        let manifest = Manifest::read(&path).unwrap();
        assert_eq!(manifest.kind, IndexKind::Forward);
        ForwardIndex::make(&index, &path, 1 << 20).unwrap();

        assert!(ForwardIndex::open(index.dir()).unwrap_err().is_corrupt());
    }
}
