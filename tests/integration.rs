//! Integration tests for the lexdisk library.
//!
//! These tests build indexes on disk and check them through the public
//! reader, forward index and ranker APIs.

use lexdisk::vocabulary::{VocabularyMap, VocabularyMapWriter, DEFAULT_BLOCK_SIZE};
use lexdisk::{
    make_index, make_ranker, CacheType, Config, DocId, Document, Error, FieldInfo, FieldType,
    FieldValue, ForwardIndex, IndexBuilder, InvertedIndex, RankerRegistry, Result, TermId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn tiny_corpus() -> Vec<Result<Document>> {
    ["the cat sat", "the dog sat", "the cat ran"]
        .iter()
        .enumerate()
        .map(|(i, t)| Ok(Document::text(i as u64, *t)))
        .collect()
}

/// Random documents over a small vocabulary, with labels.
fn random_corpus(seed: u64, docs: usize) -> Vec<Document> {
    let mut rng = StdRng::seed_from_u64(seed);
    let words: Vec<String> = (0..60).map(|i| format!("w{:02}", i)).collect();
    (0..docs)
        .map(|i| {
            let len = rng.gen_range(0..40);
            let text: Vec<&str> = (0..len)
                // skew towards low word numbers
                .map(|_| words[rng.gen_range(0..60usize).min(rng.gen_range(0..60usize))].as_str())
                .collect();
            Document::text(i as u64, text.join(" ")).with_label(format!("class{}", i % 3))
        })
        .collect()
}

fn build(path: &Path, config: Config, docs: Vec<Result<Document>>) -> InvertedIndex {
    let config = Config {
        index_path: path.to_path_buf(),
        ..config
    };
    IndexBuilder::new(config).build(docs).unwrap()
}

/// Every file of `dir`, by name.
fn read_dir(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_tiny_corpus() {
    let tmp = TempDir::new().unwrap();
    let index = build(&tmp.path().join("idx"), Config::new(""), tiny_corpus());

    assert_eq!(index.doc_count(), 3);
    assert_eq!(index.total_corpus_terms(), 9);
    let id = |t: &str| index.term_id(t).unwrap();
    assert_eq!(index.doc_freq(id("the")).unwrap(), 3);
    assert_eq!(index.doc_freq(id("cat")).unwrap(), 2);
    assert_eq!(index.doc_freq(id("ran")).unwrap(), 1);
    assert_eq!(
        index.postings(id("cat")).unwrap().counts(),
        &[(DocId(0), 1), (DocId(2), 1)]
    );
}

#[test]
fn test_chunk_spill_is_byte_identical() {
    let tmp = TempDir::new().unwrap();
    let base = build(&tmp.path().join("a"), Config::new(""), tiny_corpus());
    let spilled = build(
        &tmp.path().join("b"),
        Config::new("").with_ram_budget(1),
        tiny_corpus(),
    );
    let threaded = build(
        &tmp.path().join("c"),
        Config::new("").with_ram_budget(1).with_threads(4),
        tiny_corpus(),
    );
    let expected = read_dir(base.dir());
    assert!(expected.contains_key("postings.bin"));
    assert_eq!(expected, read_dir(spilled.dir()));
    assert_eq!(expected, read_dir(threaded.dir()));
}

#[test]
fn test_random_corpus_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let docs = random_corpus(7, 300);
    let a = build(
        &tmp.path().join("a"),
        Config::new("").with_threads(1),
        docs.iter().cloned().map(Ok).collect(),
    );
    let b = build(
        &tmp.path().join("b"),
        Config::new("").with_threads(3).with_ram_budget(512),
        docs.into_iter().map(Ok).collect(),
    );
    assert_eq!(read_dir(a.dir()), read_dir(b.dir()));
}

#[test]
fn test_bm25_query() {
    let tmp = TempDir::new().unwrap();
    let index = build(&tmp.path().join("idx"), Config::new(""), tiny_corpus());
    let ranker = make_ranker(None).unwrap();
    let results = ranker.score_text(&index, "cat", 10).unwrap();
    let docs: Vec<DocId> = results.iter().map(|r| r.doc_id).collect();
    // d1 has no "cat" and contributes nothing
    assert_eq!(docs, vec![DocId(0), DocId(2)]);
    assert!(results[0].score > 0.0);
    assert_eq!(results[0].score, results[1].score);
}

#[test]
fn test_metadata_round_trip() {
    let tmp = TempDir::new().unwrap();
    let config = Config::new("").with_metadata(vec![FieldInfo::new("year", FieldType::UnsignedInt)]);
    let docs = tiny_corpus()
        .into_iter()
        .zip([2001u64, 2019, 1999])
        .map(|(doc, year)| doc.map(|d| d.with_metadata(vec![FieldValue::UnsignedInt(year)])))
        .collect();
    let index = build(&tmp.path().join("idx"), config, docs);
    let years: Vec<u64> = index
        .docs()
        .map(|d| index.metadata(d).unwrap().get_u64("year").unwrap())
        .collect();
    assert_eq!(years, vec![2001, 2019, 1999]);
    assert_eq!(index.metadata(DocId(1)).unwrap().get_u64("length"), Some(3));
}

#[test]
fn test_metadata_all_field_types() {
    let tmp = TempDir::new().unwrap();
    let config = Config::new("").with_metadata(vec![
        FieldInfo::new("delta", FieldType::SignedInt),
        FieldInfo::new("year", FieldType::UnsignedInt),
        FieldInfo::new("weight", FieldType::Double),
        FieldInfo::new("title", FieldType::String),
    ]);
    let values = |i: u64| {
        vec![
            FieldValue::SignedInt(-(i as i64) * 1000),
            FieldValue::UnsignedInt(u64::MAX - i),
            FieldValue::Double(i as f64 * 0.25),
            FieldValue::Str(format!("title {}", i)),
        ]
    };
    let docs = (0..50u64)
        .rev()
        .map(|i| Ok(Document::text(i, "a b c").with_metadata(values(i))))
        .collect();
    let index = build(&tmp.path().join("idx"), config.with_threads(4), docs);
    for i in 0..50u64 {
        assert_eq!(index.metadata(DocId(i)).unwrap().values(), values(i).as_slice());
    }
    let meta = index.metadata(DocId(9)).unwrap();
    assert_eq!(meta.get_i64("delta"), Some(-9000));
    assert_eq!(meta.get_f64("weight"), Some(2.25));
    assert_eq!(meta.get_str("title").as_deref(), Some("title 9"));
    assert_eq!(meta.get("missing"), None);
}

#[test]
fn test_vocabulary_boundary() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vocab");
    let mut rng = StdRng::seed_from_u64(42);
    let random_term = |rng: &mut StdRng| -> String {
        let len = rng.gen_range(3..16);
        (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
    };
    let mut terms = BTreeSet::new();
    while terms.len() < 10_000 {
        terms.insert(random_term(&mut rng));
    }

    let mut writer = VocabularyMapWriter::create(&path, DEFAULT_BLOCK_SIZE).unwrap();
    for term in &terms {
        writer.insert(term).unwrap();
    }
    writer.finish().unwrap();

    let map = VocabularyMap::open(&path, DEFAULT_BLOCK_SIZE).unwrap();
    assert_eq!(map.len(), 10_000);
    for (i, term) in terms.iter().enumerate() {
        assert_eq!(map.find(term), Some(TermId(i as u64)));
        assert_eq!(map.find_term(TermId(i as u64)).unwrap(), Some(term.as_str()));
    }
    let mut absent = 0;
    for _ in 0..11_000 {
        let missing = random_term(&mut rng);
        if !terms.contains(&missing) {
            assert_eq!(map.find(&missing), None);
            absent += 1;
        }
    }
    assert!(absent > 10_000);
}

#[test]
fn test_truncated_postings_index_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let config = Config::new(tmp.path().join("idx"));
    IndexBuilder::new(config.clone()).build(tiny_corpus()).unwrap();

    let path = config.index_path.join("postings.index");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
    let err = InvertedIndex::open(&config).unwrap_err();
    assert!(err.is_corrupt(), "{:?}", err);
}

#[test]
fn test_build_statistics_agree() {
    let tmp = TempDir::new().unwrap();
    let docs = random_corpus(3, 200);
    let expected: Vec<HashMap<&str, u32>> = docs
        .iter()
        .map(|d| match &d.content {
            lexdisk::Content::Text(t) => {
                let mut counts = HashMap::new();
                for w in t.split_whitespace() {
                    *counts.entry(w).or_insert(0) += 1;
                }
                counts
            }
            lexdisk::Content::Counts(_) => unreachable!(),
        })
        .collect();
    let index = build(
        &tmp.path().join("idx"),
        Config::new("").with_ram_budget(4096).with_cache(CacheType::NoEvict, 0),
        docs.iter().cloned().map(Ok).collect(),
    );

    let mut occurrences = 0;
    for t in 0..index.term_count() {
        let term = TermId(t);
        let postings = index.postings(term).unwrap();
        assert_eq!(index.doc_freq(term).unwrap(), postings.len() as u64);
        assert!(postings.counts().windows(2).all(|w| w[0].0 < w[1].0));
        let name = index.term(term).unwrap().unwrap();
        for &(doc, count) in postings.counts() {
            assert_eq!(expected[doc.0 as usize][name], count);
        }
        occurrences += index.total_num_occurrences(term).unwrap();
    }
    let sizes: u64 = index.docs().map(|d| index.doc_size(d)).sum();
    assert_eq!(occurrences, sizes);
    assert_eq!(sizes, index.total_corpus_terms());
    for doc in index.docs() {
        let counts = &expected[doc.0 as usize];
        assert_eq!(index.doc_unique_terms(doc), counts.len() as u64);
        assert_eq!(index.doc_size(doc), counts.values().map(|&c| u64::from(c)).sum::<u64>());
    }
    assert_eq!(index.labels().unwrap(), vec!["class0", "class1", "class2"]);
    assert_eq!(index.label(DocId(4)).unwrap().as_deref(), Some("class1"));
}

#[test]
fn test_forward_index_is_transpose() {
    let tmp = TempDir::new().unwrap();
    let docs = random_corpus(11, 120);
    let index = build(
        &tmp.path().join("inv"),
        Config::new(""),
        docs.into_iter().map(Ok).collect(),
    );
    let forward = ForwardIndex::build(&index, tmp.path().join("fwd"), 2048).unwrap();
    assert_eq!(forward.doc_count(), index.doc_count());

    let mut transposed: BTreeMap<DocId, Vec<(TermId, u32)>> = BTreeMap::new();
    for t in 0..index.term_count() {
        for &(doc, count) in index.postings(TermId(t)).unwrap().counts() {
            transposed.entry(doc).or_default().push((TermId(t), count));
        }
    }
    for doc in forward.docs() {
        let expected = transposed.remove(&doc).unwrap_or_default();
        assert_eq!(forward.postings(doc).unwrap().counts(), expected.as_slice());
        assert_eq!(forward.doc_size(doc), index.doc_size(doc));
        assert_eq!(forward.label(doc).unwrap(), index.label(doc).unwrap());
    }
    assert!(transposed.is_empty());
}

#[test]
fn test_rankers_from_config_file() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("docs.txt"), "the cat sat\nthe dog sat\nthe cat ran\n").unwrap();
    fs::write(tmp.path().join("labels.txt"), "a\nb\na\n").unwrap();
    fs::write(
        tmp.path().join("corpus.toml"),
        "type = \"line-corpus\"\npath = \"docs.txt\"\nlabels = \"labels.txt\"\n",
    )
    .unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        "index-path = \"idx\"\ncorpus = \"corpus.toml\"\n\n[ranker]\nmethod = \"dirichlet-prior\"\nmu = 10\n",
    )
    .unwrap();

    let config = Config::from_file(tmp.path().join("config.toml")).unwrap();
    let index = make_index(&config).unwrap();
    assert_eq!(index.label(DocId(1)).unwrap().as_deref(), Some("b"));

    let ranker = RankerRegistry::new().create(config.ranker.as_ref().unwrap()).unwrap();
    assert_eq!(ranker.id(), "dirichlet-prior");
    let results = ranker.score_text(&index, "dog sat", 2).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].doc_id, DocId(1));
}

#[test]
fn test_concurrent_queries() {
    let tmp = TempDir::new().unwrap();
    let docs = random_corpus(5, 150);
    let index = build(
        &tmp.path().join("idx"),
        Config::new("").with_cache(CacheType::Dblru, 8),
        docs.into_iter().map(Ok).collect(),
    );
    let ranker = make_ranker(None).unwrap();
    let expected = ranker.score_text(&index, "w01 w02 w07", 5).unwrap();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..20 {
                    let results = ranker.score_text(&index, "w01 w02 w07", 5).unwrap();
                    assert_eq!(results, expected);
                }
            });
        }
    });
}

#[test]
fn test_schema_mismatch_surfaces() {
    let tmp = TempDir::new().unwrap();
    let config = Config::new("").with_metadata(vec![FieldInfo::new("year", FieldType::UnsignedInt)]);
    let docs = vec![Ok(Document::text(0, "a"))];
    let config = Config {
        index_path: tmp.path().join("idx"),
        ..config
    };
    let err = IndexBuilder::new(config).build(docs).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));
}

fn feedback_corpus(tmp: &TempDir) -> (InvertedIndex, std::sync::Arc<ForwardIndex>) {
    let docs = ["cat dog", "cat dog", "dog bird", "fish bird", "fish"]
        .iter()
        .enumerate()
        .map(|(i, t)| Ok(Document::text(i as u64, *t)))
        .collect();
    let index = build(&tmp.path().join("inv"), Config::new(""), docs);
    let forward = ForwardIndex::make(&index, tmp.path().join("fwd"), 1 << 20).unwrap();
    (index, std::sync::Arc::new(forward))
}

fn doc_ids(results: &[lexdisk::SearchResult]) -> Vec<u64> {
    results.iter().map(|r| r.doc_id.0).collect()
}

#[test]
fn test_rocchio_expands_with_feedback_terms() {
    use lexdisk::ranker::Rocchio;
    use lexdisk::Ranker;

    let tmp = TempDir::new().unwrap();
    let (index, forward) = feedback_corpus(&tmp);
    let mut rocchio = Rocchio::new(forward);
    rocchio.k = 2;

    let query = index.tokenize("cat");
    let expanded = rocchio.expand(&index, &query, &|_| true).unwrap();
    let cat = index.term_id("cat").unwrap();
    let dog = index.term_id("dog").unwrap();
    let weights: HashMap<TermId, f64> = expanded.into_iter().collect();
    assert_eq!(weights.len(), 2);
    assert!((weights[&cat] - 1.8).abs() < 1e-9);
    assert!((weights[&dog] - 0.8).abs() < 1e-9);

    let results = rocchio.rank_text(&index, "cat", 10).unwrap();
    assert_eq!(doc_ids(&results), vec![0, 1, 2]);
    assert_eq!(results[0].score, results[1].score);
    assert!(results[1].score > results[2].score);

    let filtered = rocchio.rank(&index, &query, 10, &|doc| doc != DocId(1)).unwrap();
    assert_eq!(doc_ids(&filtered), vec![0, 2]);
}

#[test]
fn test_model_feedback_reaches_unmatched_documents() {
    use lexdisk::ranker::{KlDivergencePrf, OkapiBm25};
    use lexdisk::Ranker;

    let tmp = TempDir::new().unwrap();
    let (index, forward) = feedback_corpus(&tmp);
    let mut prf = KlDivergencePrf::new(forward.clone());
    prf.k = 2;

    let baseline = make_ranker(Some(&toml::from_str("method = \"dirichlet-prior\"").unwrap()))
        .unwrap()
        .score_text(&index, "cat", 10)
        .unwrap();
    assert_eq!(doc_ids(&baseline), vec![0, 1]);

    let results = prf.rank_text(&index, "cat", 10).unwrap();
    assert_eq!(doc_ids(&results), vec![0, 1, 2]);
    assert!(results.iter().all(|r| r.score.is_finite()));

    assert!(matches!(
        KlDivergencePrf::new(forward).with_initial(Box::new(OkapiBm25::default())),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_query_ranker_from_config() {
    use lexdisk::Ranker;

    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("docs.txt"), "cat dog\ncat dog\ndog bird\nfish\n").unwrap();
    fs::write(
        tmp.path().join("corpus.toml"),
        "type = \"line-corpus\"\npath = \"docs.txt\"\n",
    )
    .unwrap();
    let base = "index-path = \"idx\"\ncorpus = \"corpus.toml\"\n";
    let feedback = "[ranker]\nmethod = \"rocchio\"\nk = 2\n\n[ranker.feedback]\nmethod = \"pivoted-length\"\n";

    fs::write(tmp.path().join("bare.toml"), format!("{}{}", base, feedback)).unwrap();
    let config = Config::from_file(tmp.path().join("bare.toml")).unwrap();
    let index = make_index(&config).unwrap();
    assert!(matches!(
        lexdisk::make_query_ranker(&config, &index),
        Err(Error::Config(_))
    ));

    fs::write(
        tmp.path().join("config.toml"),
        format!("{}forward-index = \"fwd\"\n\n{}", base, feedback),
    )
    .unwrap();
    let config = Config::from_file(tmp.path().join("config.toml")).unwrap();
    let index = make_index(&config).unwrap();
    let ranker = lexdisk::make_query_ranker(&config, &index).unwrap();
    assert_eq!(ranker.id(), "rocchio");
    assert!(tmp.path().join("fwd").join("manifest.toml").exists());
    let results = ranker.rank_text(&index, "cat", 10).unwrap();
    assert_eq!(doc_ids(&results), vec![0, 1, 2]);

    let plain = Config {
        ranker: None,
        ..config
    };
    assert_eq!(lexdisk::make_query_ranker(&plain, &index).unwrap().id(), "bm25");
}
