//! Index reader: opens a built inverted index and answers statistics and
//! postings queries.
//!
//! All files are memory mapped and shared immutably, so an
//! [`InvertedIndex`] can be used from many threads at once. Decoded postings
//! go through the configured [`Cache`].

use crate::analyzer::Analyzer;
use crate::builder::{
    self, IndexKind, Manifest, DOC_SIZES_FILE, FORMAT_VERSION, LABELS_FILE, LABEL_IDS_FILE,
    MANIFEST_FILE, UNIQUE_TERMS_FILE, VOCABULARY_FILE,
};
use crate::cache::{get_or_load, make_cache, Cache};
use crate::config::{CacheConfig, Config};
use crate::disk_vector::DiskVector;
use crate::error::{Error, Result};
use crate::metadata::{self, Metadata, MetadataFile, Schema};
use crate::postings::InvertedPostings;
use crate::postings_file::PostingsFile;
use crate::string_list::{self, StringList};
use crate::types::{Count, DocId, LabelId, TermId};
use crate::vocabulary::{self, VocabularyMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Check a manifest read from `dir` against the kind of index being opened.
pub(crate) fn check_manifest(dir: &Path, manifest: &Manifest, kind: IndexKind) -> Result<()> {
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "{}: format version {} is not supported (expected {})",
            dir.join(MANIFEST_FILE).display(),
            manifest.format_version,
            FORMAT_VERSION
        )));
    }
    if manifest.kind != kind {
        return Err(Error::corrupt(format!(
            "{} holds a {:?} index, expected {:?}",
            dir.display(),
            manifest.kind,
            kind
        )));
    }
    Ok(())
}

fn check_len(what: &str, actual: usize, expected: u64) -> Result<()> {
    if actual as u64 != expected {
        return Err(Error::corrupt(format!(
            "{} has {} entries, manifest records {}",
            what, actual, expected
        )));
    }
    Ok(())
}

/// Per-document files shared by inverted and forward indexes.
#[derive(Debug)]
pub(crate) struct DocumentFiles {
    sizes: DiskVector<u64>,
    unique_terms: DiskVector<u64>,
    labels: StringList,
    label_ids: DiskVector<u64>,
    metadata: MetadataFile,
}

impl DocumentFiles {
    /// File names, relative to the index directory.
    pub(crate) fn names() -> Vec<PathBuf> {
        vec![
            PathBuf::from(DOC_SIZES_FILE),
            PathBuf::from(UNIQUE_TERMS_FILE),
            PathBuf::from(LABELS_FILE),
            string_list::index_path(Path::new(LABELS_FILE)),
            PathBuf::from(LABEL_IDS_FILE),
            PathBuf::from(metadata::SCHEMA_FILE),
            PathBuf::from(metadata::DB_FILE),
            PathBuf::from(metadata::INDEX_FILE),
        ]
    }

    /// Copy the document files and the vocabulary from `from` to `to`.
    pub(crate) fn copy(from: &Path, to: &Path) -> Result<()> {
        let vocab = [
            PathBuf::from(VOCABULARY_FILE),
            vocabulary::inverse_path(Path::new(VOCABULARY_FILE)),
        ];
        for name in Self::names().iter().chain(vocab.iter()) {
            fs::copy(from.join(name), to.join(name))?;
        }
        Ok(())
    }

    pub(crate) fn open(dir: &Path, doc_count: u64) -> Result<Self> {
        let files = Self {
            sizes: DiskVector::open(dir.join(DOC_SIZES_FILE))?,
            unique_terms: DiskVector::open(dir.join(UNIQUE_TERMS_FILE))?,
            labels: StringList::open(dir.join(LABELS_FILE))?,
            label_ids: DiskVector::open(dir.join(LABEL_IDS_FILE))?,
            metadata: MetadataFile::open(dir)?,
        };
        check_len(DOC_SIZES_FILE, files.sizes.len(), doc_count)?;
        check_len(UNIQUE_TERMS_FILE, files.unique_terms.len(), doc_count)?;
        check_len(LABEL_IDS_FILE, files.label_ids.len(), doc_count)?;
        check_len(metadata::INDEX_FILE, files.metadata.len(), doc_count)?;
        Ok(files)
    }

    pub(crate) fn doc_size(&self, doc: DocId) -> u64 {
        self.sizes.try_get(doc.0 as usize).unwrap_or(0)
    }

    pub(crate) fn unique_terms(&self, doc: DocId) -> u64 {
        self.unique_terms.try_get(doc.0 as usize).unwrap_or(0)
    }

    pub(crate) fn label_id(&self, doc: DocId) -> Option<LabelId> {
        self.label_ids.try_get(doc.0 as usize).map(LabelId)
    }

    pub(crate) fn label(&self, doc: DocId) -> Result<Option<String>> {
        let Some(id) = self.label_id(doc) else {
            return Ok(None);
        };
        if id.0 >= self.labels.len() as u64 {
            return Err(Error::corrupt(format!(
                "document {} has label id {} but only {} labels exist",
                doc,
                id,
                self.labels.len()
            )));
        }
        let label = self.labels.at(id.0 as usize)?;
        Ok((!label.is_empty()).then(|| label.to_string()))
    }

    pub(crate) fn labels(&self) -> Result<Vec<String>> {
        self.labels
            .iter()
            .filter(|l| !matches!(l, Ok("")))
            .map(|l| l.map(str::to_string))
            .collect()
    }

    pub(crate) fn metadata(&self) -> &MetadataFile {
        &self.metadata
    }
}

/// A read-only inverted index.
pub struct InvertedIndex {
    dir: PathBuf,
    manifest: Manifest,
    vocabulary: VocabularyMap,
    postings: PostingsFile<TermId, DocId>,
    docs: DocumentFiles,
    analyzer: Box<dyn Analyzer>,
    cache: Box<dyn Cache<TermId, InvertedPostings>>,
}

impl fmt::Debug for InvertedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvertedIndex")
            .field("dir", &self.dir)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl InvertedIndex {
    /// Open the index at the configured path.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_dir(&config.index_path, &config.cache)
    }

    /// Open the index in `dir`, caching postings as `cache` says.
    pub fn open_dir(dir: impl AsRef<Path>, cache: &CacheConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = Manifest::read(dir)?;
        check_manifest(dir, &manifest, IndexKind::Inverted)?;

        let vocabulary = VocabularyMap::open(dir.join(VOCABULARY_FILE), manifest.vocab_block_size)?;
        check_len(VOCABULARY_FILE, vocabulary.len(), manifest.term_count)?;
        let postings = PostingsFile::open(dir)?;
        check_len(crate::postings_file::POSTINGS_INDEX_FILE, postings.len(), manifest.term_count)?;
        let docs = DocumentFiles::open(dir, manifest.doc_count)?;

        debug!(
            path = %dir.display(),
            docs = manifest.doc_count,
            terms = manifest.term_count,
            "opened inverted index"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            analyzer: manifest.analyzer.build(),
            manifest,
            vocabulary,
            postings,
            docs,
            cache: make_cache(cache.cache_type, cache.capacity),
        })
    }

    /// Open the configured index, building it if needed.
    pub fn make_index(config: &Config) -> Result<Self> {
        builder::make_index(config)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn doc_count(&self) -> u64 {
        self.manifest.doc_count
    }

    pub fn term_count(&self) -> u64 {
        self.manifest.term_count
    }

    /// Sum of all document lengths.
    pub fn total_corpus_terms(&self) -> u64 {
        self.manifest.total_corpus_terms
    }

    /// Mean document length; zero for an empty index.
    pub fn avg_doc_length(&self) -> f64 {
        if self.doc_count() == 0 {
            0.0
        } else {
            self.total_corpus_terms() as f64 / self.doc_count() as f64
        }
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.vocabulary.find(term)
    }

    /// The term string of `id`, or `None` past the end of the vocabulary.
    pub fn term(&self, id: TermId) -> Result<Option<&str>> {
        self.vocabulary.find_term(id)
    }

    /// Number of term occurrences in `doc`.
    pub fn doc_size(&self, doc: DocId) -> u64 {
        self.docs.doc_size(doc)
    }

    /// Number of distinct terms in `doc`.
    pub fn doc_unique_terms(&self, doc: DocId) -> u64 {
        self.docs.unique_terms(doc)
    }

    /// Postings of `term`, in ascending document order. Unknown terms have
    /// empty postings.
    pub fn postings(&self, term: TermId) -> Result<Arc<InvertedPostings>> {
        get_or_load(self.cache.as_ref(), term, || self.postings.find(term))
    }

    /// Number of documents containing `term`.
    pub fn doc_freq(&self, term: TermId) -> Result<u64> {
        Ok(self.postings(term)?.len() as u64)
    }

    /// Number of occurrences of `term` across the corpus.
    pub fn total_num_occurrences(&self, term: TermId) -> Result<u64> {
        Ok(self.postings(term)?.total_count())
    }

    /// Occurrences of `term` in `doc`.
    pub fn term_freq(&self, term: TermId, doc: DocId) -> Result<u64> {
        Ok(u64::from(self.postings(term)?.count(doc)))
    }

    pub fn metadata(&self, doc: DocId) -> Result<Metadata> {
        self.docs.metadata().get(doc)
    }

    pub fn schema(&self) -> &Schema {
        self.docs.metadata().schema()
    }

    /// Class label of `doc`; `None` when unlabeled or out of range.
    pub fn label(&self, doc: DocId) -> Result<Option<String>> {
        self.docs.label(doc)
    }

    pub fn label_id(&self, doc: DocId) -> Option<LabelId> {
        self.docs.label_id(doc)
    }

    /// Distinct non-empty labels in label-id order.
    pub fn labels(&self) -> Result<Vec<String>> {
        self.docs.labels()
    }

    pub fn docs(&self) -> impl Iterator<Item = DocId> {
        (0..self.doc_count()).map(DocId)
    }

    pub fn analyzer(&self) -> &dyn Analyzer {
        self.analyzer.as_ref()
    }

    /// Analyze `text` with the index's analyzer. Terms outside the
    /// vocabulary are dropped; the result is sorted by term id.
    pub fn tokenize(&self, text: &str) -> Vec<(TermId, Count)> {
        let mut terms: Vec<(TermId, Count)> = self
            .analyzer
            .analyze(text)
            .into_iter()
            .filter_map(|(term, count)| self.term_id(&term).map(|id| (id, count)))
            .collect();
        terms.sort_unstable();
        terms
    }

    /// Drop every cached postings list.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Decode postings without touching the cache.
    pub(crate) fn read_postings(&self, term: TermId) -> Result<InvertedPostings> {
        self.postings.find(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::cache::CacheType;
    use crate::types::Document;
    use tempfile::TempDir;

    fn build(tmp: &TempDir, cache: CacheType) -> InvertedIndex {
        let config = Config::new(tmp.path().join("idx")).with_cache(cache, 4);
        let docs = vec![
            Ok(Document::text(0, "the cat sat").with_label("pets")),
            Ok(Document::text(1, "the dog sat the mat")),
            Ok(Document::text(2, "the cat ran").with_label("animals")),
        ];
        IndexBuilder::new(config).build(docs).unwrap()
    }

    #[test]
    fn test_statistics() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::Dblru);
        assert_eq!(index.doc_count(), 3);
        assert_eq!(index.total_corpus_terms(), 11);
        assert!((index.avg_doc_length() - 11.0 / 3.0).abs() < 1e-12);
        assert_eq!(index.doc_size(DocId(1)), 5);
        assert_eq!(index.doc_unique_terms(DocId(1)), 4);
        assert_eq!(index.doc_size(DocId(99)), 0);

        let the = index.term_id("the").unwrap();
        assert_eq!(index.doc_freq(the).unwrap(), 3);
        assert_eq!(index.total_num_occurrences(the).unwrap(), 4);
        assert_eq!(index.term_freq(the, DocId(1)).unwrap(), 2);
        assert_eq!(index.term_freq(the, DocId(7)).unwrap(), 0);
        assert_eq!(index.term(the).unwrap(), Some("the"));
        assert_eq!(index.term(TermId(1000)).unwrap(), None);
        assert_eq!(index.term_id("zebra"), None);
    }

    #[test]
    fn test_unknown_term_has_empty_postings() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::NoEvict);
        let postings = index.postings(TermId(500)).unwrap();
        assert!(postings.is_empty());
        assert_eq!(index.doc_freq(TermId(500)).unwrap(), 0);
    }

    #[test]
    fn test_postings_are_cached() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::NoEvict);
        let cat = index.term_id("cat").unwrap();
        let first = index.postings(cat).unwrap();
        let second = index.postings(cat).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        index.clear_cache();
        let third = index.postings(cat).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first.counts(), third.counts());
    }

    #[test]
    fn test_labels() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::None);
        assert_eq!(index.labels().unwrap(), vec!["animals", "pets"]);
        assert_eq!(index.label(DocId(0)).unwrap().as_deref(), Some("pets"));
        assert_eq!(index.label(DocId(1)).unwrap(), None);
        assert_eq!(index.label(DocId(2)).unwrap().as_deref(), Some("animals"));
        assert_eq!(index.label(DocId(3)).unwrap(), None);
        // "" sorts first
        assert_eq!(index.label_id(DocId(1)), Some(LabelId(0)));
        assert_eq!(index.label_id(DocId(2)), Some(LabelId(1)));
    }

    #[test]
    fn test_tokenize_drops_unknown_terms() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::Dblru);
        let terms = index.tokenize("cat zebra cat the");
        let cat = index.term_id("cat").unwrap();
        let the = index.term_id("the").unwrap();
        assert_eq!(terms, vec![(cat, 2), (the, 1)]);
    }

    #[test]
    fn test_docs_and_metadata_lengths() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::Dblru);
        let docs: Vec<DocId> = index.docs().collect();
        assert_eq!(docs, vec![DocId(0), DocId(1), DocId(2)]);
        for doc in docs {
            let meta = index.metadata(doc).unwrap();
            assert_eq!(meta.length(), index.doc_size(doc));
            assert_eq!(meta.unique_terms(), index.doc_unique_terms(doc));
        }
        assert!(index.schema().is_empty());
        assert!(matches!(index.metadata(DocId(3)), Err(Error::Usage(_))));
    }

    #[test]
    fn test_missing_manifest_fails() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::Dblru);
        let dir = index.dir().to_path_buf();
        drop(index);
        fs::remove_file(dir.join(MANIFEST_FILE)).unwrap();
        assert!(matches!(
            InvertedIndex::open_dir(&dir, &CacheConfig::default()),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_doc_file_length_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let index = build(&tmp, CacheType::Dblru);
        let dir = index.dir().to_path_buf();
        drop(index);
        let sizes = dir.join(DOC_SIZES_FILE);
        let bytes = fs::read(&sizes).unwrap();
        fs::write(&sizes, &bytes[..16]).unwrap();
        let err = InvertedIndex::open_dir(&dir, &CacheConfig::default()).unwrap_err();
        assert!(err.is_corrupt());
    }
}
