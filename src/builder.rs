//! Index builder: turns a document stream into an on-disk inverted index.
//!
//! Documents are tokenized by a pool of workers. Each worker accumulates
//! `term -> {doc -> count}` postings in its own chunk-handler producer and
//! spills sorted chunks when its RAM budget is reached. Chunks are keyed by
//! the term string; once every document is consumed they are merged into a
//! single sorted run and term ids are assigned by rank while the vocabulary
//! and postings files are written. The output is therefore identical for
//! any thread count or spill schedule.
//!
//! Everything is written to `<index-path>.partial`, fsynced, and renamed
//! into place once `manifest.toml` has been written.

use crate::analyzer::{Analyzer, AnalyzerKind};
use crate::chunk_handler::{ChunkHandler, Producer};
use crate::config::Config;
use crate::corpus::CorpusDescriptor;
use crate::disk_vector::DiskVectorMut;
use crate::error::{Error, Result};
use crate::metadata::MetadataWriter;
use crate::postings_file::{PostingsFileWriter, POSTINGS_FILE, POSTINGS_INDEX_FILE};
use crate::progress::{progress_bar, spinner};
use crate::reader::InvertedIndex;
use crate::string_list::{self, StringListWriter};
use crate::types::{Content, Count, DocId, Document, TermId};
use crate::vocabulary::{self, VocabularyMapWriter};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "manifest.toml";
pub const VOCABULARY_FILE: &str = "termids.mapping";
pub const DOC_SIZES_FILE: &str = "docsizes.counts";
pub const UNIQUE_TERMS_FILE: &str = "docs.uniqueterms";
pub const LABELS_FILE: &str = "labels.labels";
pub const LABEL_IDS_FILE: &str = "labels.ids";

/// Scratch directory for chunks inside the partial index.
const CHUNK_DIR: &str = "chunks";

/// Documents queued per worker.
const CHANNEL_DEPTH: usize = 64;

/// On-disk format version written to manifests.
pub const FORMAT_VERSION: u32 = 1;

/// Which way an index maps keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    /// Term to documents.
    Inverted,
    /// Document to terms.
    Forward,
}

/// Summary written last; its presence marks a complete index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub format_version: u32,
    pub kind: IndexKind,
    /// Number of documents.
    pub doc_count: u64,
    /// Number of terms in the vocabulary.
    pub term_count: u64,
    /// Sum of all document lengths.
    pub total_corpus_terms: u64,
    /// Vocabulary block size in bytes.
    pub vocab_block_size: usize,
    /// Analyzer used to tokenize documents.
    pub analyzer: AnalyzerKind,
}

impl Manifest {
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path)?;
        toml::from_str(&text)
            .map_err(|e| Error::corrupt(format!("{}: {}", path.display(), e)))
    }

    /// Write and fsync `manifest.toml`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, toml::to_string(self)?)?;
        File::open(&path)?.sync_all()?;
        Ok(())
    }
}

/// Files every complete index directory holds.
pub fn required_files() -> Vec<String> {
    let mut files: Vec<String> = [
        MANIFEST_FILE,
        POSTINGS_FILE,
        POSTINGS_INDEX_FILE,
        VOCABULARY_FILE,
        DOC_SIZES_FILE,
        UNIQUE_TERMS_FILE,
        LABELS_FILE,
        LABEL_IDS_FILE,
        crate::metadata::SCHEMA_FILE,
        crate::metadata::DB_FILE,
        crate::metadata::INDEX_FILE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for derived in [
        vocabulary::inverse_path(Path::new(VOCABULARY_FILE)),
        string_list::index_path(Path::new(LABELS_FILE)),
    ] {
        files.push(derived.to_string_lossy().into_owned());
    }
    files
}

/// Whether `dir` holds a complete index of `kind` in the current format.
pub fn is_valid(dir: &Path, kind: IndexKind) -> bool {
    let manifest_ok = Manifest::read(dir)
        .map(|m| m.kind == kind && m.format_version == FORMAT_VERSION)
        .unwrap_or(false);
    manifest_ok && required_files().iter().all(|f| dir.join(f).is_file())
}

/// Sibling directory an index is built in before being renamed into place.
pub fn partial_path(index_path: &Path) -> PathBuf {
    let mut name = OsString::from(index_path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Per-document statistics gathered by workers.
#[derive(Debug)]
pub(crate) struct DocStats {
    pub id: DocId,
    pub length: u64,
    pub unique_terms: u64,
    pub label: Option<String>,
}

/// Builds inverted indexes.
pub struct IndexBuilder {
    config: Config,
    /// Fixed vocabulary; terms outside it are dropped.
    vocabulary: Option<Vec<String>>,
}

impl IndexBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            vocabulary: None,
        }
    }

    /// Restrict the index to `terms`, which must be sorted and unique. Term
    /// `k` of the list gets id `k`, whether or not it occurs.
    pub fn with_vocabulary(mut self, terms: Vec<String>) -> Result<Self> {
        if let Some(pair) = terms.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::usage(format!(
                "vocabulary must be sorted and unique: {:?} precedes {:?}",
                pair[0], pair[1]
            )));
        }
        self.vocabulary = Some(terms);
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the index unless a valid one already exists at the configured
    /// path, in which case it is opened instead.
    pub fn build<I>(&self, docs: I) -> Result<InvertedIndex>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        if is_valid(&self.config.index_path, IndexKind::Inverted) {
            info!(path = %self.config.index_path.display(), "index exists, opening");
            return InvertedIndex::open(&self.config);
        }
        self.rebuild(docs)
    }

    /// Build the index, replacing whatever is at the configured path.
    pub fn rebuild<I>(&self, docs: I) -> Result<InvertedIndex>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        self.config.validate()?;
        let index_path = &self.config.index_path;
        let partial = prepare_partial(index_path)?;

        let manifest = match self.build_into(&partial, docs) {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&partial) {
                    warn!(error = %cleanup, "failed to remove partial index");
                }
                return Err(e);
            }
        };

        install(&partial, index_path)?;
        info!(
            path = %index_path.display(),
            docs = manifest.doc_count,
            terms = manifest.term_count,
            total_terms = manifest.total_corpus_terms,
            "index built"
        );
        InvertedIndex::open(&self.config)
    }

    /// Build from the configured corpus descriptor.
    pub fn build_from_corpus(&self) -> Result<InvertedIndex> {
        let corpus = self
            .config
            .corpus
            .as_ref()
            .ok_or_else(|| Error::config("missing required key `corpus`"))?;
        let descriptor = CorpusDescriptor::from_file(corpus)?;
        self.build(descriptor.documents(&self.config.schema()?)?)
    }

    fn build_into<I>(&self, dir: &Path, docs: I) -> Result<Manifest>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let analyzer = self.config.analyzer.build();
        let metadata = MetadataWriter::create(dir, self.config.schema()?)?;
        let handler = ChunkHandler::<String, DocId>::new(
            dir.join(CHUNK_DIR),
            self.config.indexer_ram_budget,
        )?;
        let threads = self.config.num_threads();
        info!(threads, ram_budget = self.config.indexer_ram_budget, "tokenizing documents");

        let stats = self.ingest(docs, analyzer.as_ref(), &handler, &metadata, threads)?;
        let doc_count = metadata.finish()?;
        info!(docs = doc_count, chunks = handler.chunk_count(), "documents tokenized");

        let total_corpus_terms = write_document_files(dir, &stats)?;
        let term_count = self.write_postings(dir, &handler)?;
        fs::remove_dir_all(handler.dir())?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            kind: IndexKind::Inverted,
            doc_count,
            term_count,
            total_corpus_terms,
            vocab_block_size: self.config.vocab_block_size,
            analyzer: self.config.analyzer,
        };
        manifest.write(dir)?;
        Ok(manifest)
    }

    /// Feed documents to the worker pool. The first error from the source
    /// or any worker stops ingestion and is returned.
    fn ingest<I>(
        &self,
        docs: I,
        analyzer: &dyn Analyzer,
        handler: &ChunkHandler<String, DocId>,
        metadata: &MetadataWriter,
        threads: usize,
    ) -> Result<Vec<DocStats>>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let abort = AtomicBool::new(false);
        let fail = |e: Error| {
            abort.store(true, Ordering::SeqCst);
            first_error.lock().get_or_insert(e);
        };
        let (tx, rx) = bounded::<Document>(threads * CHANNEL_DEPTH);
        let pb = spinner("Tokenizing documents");

        let stats = thread::scope(|scope| {
            let workers: Vec<_> = (0..threads)
                .map(|_| {
                    let rx = rx.clone();
                    let fail = &fail;
                    let abort = &abort;
                    scope.spawn(move || {
                        let mut producer = handler.producer();
                        let mut stats = Vec::new();
                        for doc in rx.iter() {
                            if abort.load(Ordering::Relaxed) {
                                break;
                            }
                            match self.index_document(doc, analyzer, &mut producer, metadata) {
                                Ok(s) => stats.push(s),
                                Err(e) => {
                                    fail(e);
                                    break;
                                }
                            }
                        }
                        if let Err(e) = producer.finish() {
                            fail(e);
                        }
                        stats
                    })
                })
                .collect();
            drop(rx);

            for doc in docs {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                match doc {
                    Ok(doc) => {
                        if tx.send(doc).is_err() {
                            break;
                        }
                        pb.inc(1);
                    }
                    Err(e) => {
                        fail(e);
                        break;
                    }
                }
            }
            drop(tx);

            let mut all = Vec::new();
            for worker in workers {
                match worker.join() {
                    Ok(stats) => all.extend(stats),
                    Err(_) => fail(Error::Io(std::io::Error::other("indexing worker panicked"))),
                }
            }
            all
        });
        pb.finish_and_clear();

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    fn accepts(&self, term: &str) -> bool {
        match &self.vocabulary {
            Some(terms) => terms.binary_search_by(|t| t.as_str().cmp(term)).is_ok(),
            None => true,
        }
    }

    fn index_document(
        &self,
        doc: Document,
        analyzer: &dyn Analyzer,
        producer: &mut Producer<'_, String, DocId>,
        metadata: &MetadataWriter,
    ) -> Result<DocStats> {
        let mut counts: HashMap<String, Count> = match doc.content {
            Content::Text(text) => analyzer.analyze(&text),
            Content::Counts(pairs) => {
                let mut counts = HashMap::with_capacity(pairs.len());
                for (term, count) in pairs {
                    let entry = counts.entry(term).or_insert(0u32);
                    *entry = entry.saturating_add(count);
                }
                counts
            }
        };
        counts.retain(|term, count| *count > 0 && !term.is_empty() && self.accepts(term));

        let length: u64 = counts.values().map(|&c| u64::from(c)).sum();
        let unique_terms = counts.len() as u64;
        if length == 0 {
            warn!(doc = %doc.id, "document has no indexable terms");
        }
        metadata.write(doc.id, length, unique_terms, &doc.metadata)?;
        producer.add_counts(doc.id, counts)?;
        Ok(DocStats {
            id: doc.id,
            length,
            unique_terms,
            label: doc.label,
        })
    }

    /// Merge the chunks and write the vocabulary and postings files.
    /// Returns the number of terms.
    fn write_postings(&self, dir: &Path, handler: &ChunkHandler<String, DocId>) -> Result<u64> {
        let mut vocab =
            VocabularyMapWriter::create(dir.join(VOCABULARY_FILE), self.config.vocab_block_size)?;
        let mut postings = PostingsFileWriter::<TermId, DocId>::create(dir)?;
        if let Some(terms) = &self.vocabulary {
            for term in terms {
                vocab.insert(term)?;
            }
        }

        if let Some(chunk) = handler.merge_chunks()? {
            let mut reader = chunk.reader()?;
            let pb = progress_bar(reader.total_bytes(), "Compressing postings");
            while let Some(record) = reader.next_record()? {
                let id = match &self.vocabulary {
                    Some(terms) => terms
                        .binary_search(record.primary())
                        .map(|rank| TermId(rank as u64))
                        .map_err(|_| {
                            Error::corrupt(format!(
                                "merged run holds {:?}, which is not in the vocabulary",
                                record.primary()
                            ))
                        })?,
                    None => vocab.insert(record.primary())?,
                };
                postings.write(&record.rekey(id))?;
                pb.set_position(reader.bytes_read());
            }
            pb.finish_and_clear();
            drop(reader);
            chunk.remove()?;
        }

        let term_count = vocab.len();
        postings.finish(term_count)?;
        vocab.finish()?;
        debug!(terms = term_count, "wrote vocabulary and postings");
        Ok(term_count)
    }
}

/// Write document sizes, unique-term counts and labels. Label ids follow
/// sorted label order; unlabeled documents get the empty label. Returns the
/// total number of term occurrences.
pub(crate) fn write_document_files(dir: &Path, stats: &[DocStats]) -> Result<u64> {
    let n = stats.len();
    let mut sizes = DiskVectorMut::<u64>::create(dir.join(DOC_SIZES_FILE), n)?;
    let mut uniques = DiskVectorMut::<u64>::create(dir.join(UNIQUE_TERMS_FILE), n)?;
    let mut label_ids = DiskVectorMut::<u64>::create(dir.join(LABEL_IDS_FILE), n)?;

    let mut labels: BTreeMap<&str, u64> = stats
        .iter()
        .map(|s| (s.label.as_deref().unwrap_or(""), 0))
        .collect();
    let mut list = StringListWriter::create(dir.join(LABELS_FILE))?;
    for (label, id) in labels.iter_mut() {
        *id = list.push(label)?;
    }
    list.finish()?;

    let mut total = 0u64;
    for s in stats {
        let i = s.id.0 as usize;
        if i >= n {
            return Err(Error::usage(format!(
                "document id {} out of range for {} documents",
                s.id, n
            )));
        }
        sizes.set(i, s.length);
        uniques.set(i, s.unique_terms);
        label_ids.set(i, labels[s.label.as_deref().unwrap_or("")]);
        total += s.length;
    }
    sizes.finish()?;
    uniques.finish()?;
    label_ids.finish()?;
    Ok(total)
}

/// Create an empty `.partial` sibling of `index_path`, clearing any
/// leftover from an interrupted build.
pub(crate) fn prepare_partial(index_path: &Path) -> Result<PathBuf> {
    let partial = partial_path(index_path);
    if partial.exists() {
        warn!(path = %partial.display(), "removing leftover partial index");
        fs::remove_dir_all(&partial)?;
    }
    fs::create_dir_all(&partial)?;
    Ok(partial)
}

/// Replace `index_path` with the finished `partial` directory.
pub(crate) fn install(partial: &Path, index_path: &Path) -> Result<()> {
    if index_path.exists() {
        fs::remove_dir_all(index_path)?;
    }
    fs::rename(partial, index_path)?;
    sync_parent(index_path);
    Ok(())
}

/// Best-effort fsync of the directory containing `path`, making a rename
/// durable.
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|f| f.sync_all()) {
            debug!(error = %e, "directory fsync failed");
        }
    }
}

/// Open the configured index, building it from the corpus when it is
/// missing or cannot be opened.
pub fn make_index(config: &Config) -> Result<InvertedIndex> {
    if is_valid(&config.index_path, IndexKind::Inverted) {
        match InvertedIndex::open(config) {
            Ok(index) => return Ok(index),
            Err(e) if e.is_corrupt() => {
                warn!(path = %config.index_path.display(), error = %e, "index is corrupt, rebuilding");
            }
            Err(e) => return Err(e),
        }
    }
    let corpus = config
        .corpus
        .as_ref()
        .ok_or_else(|| Error::config("missing required key `corpus`"))?;
    let descriptor = CorpusDescriptor::from_file(corpus)?;
    IndexBuilder::new(config.clone()).rebuild(descriptor.documents(&config.schema()?)?)
}
