//! Postings codec and vocabulary lookup benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lexdisk::bitstream::{BitReader, BitWriter};
use lexdisk::vocabulary::{VocabularyMap, VocabularyMapWriter, DEFAULT_BLOCK_SIZE};
use lexdisk::{DocId, InvertedPostings, TermId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn random_postings(size: usize) -> InvertedPostings {
    let mut rng = StdRng::seed_from_u64(size as u64);
    let mut doc = 0u64;
    let pairs = (0..size).map(|_| {
        doc += rng.gen_range(1..64);
        (DocId(doc), rng.gen_range(1..8))
    });
    InvertedPostings::from_pairs(TermId(0), pairs.collect::<Vec<_>>())
}

fn bench_postings_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_codec");
    for &size in &[1_000, 10_000, 100_000] {
        let postings = random_postings(size);
        let mut writer = BitWriter::new(Vec::new());
        postings.write_packed(&mut writer).unwrap();
        let encoded = writer.finish().unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &postings, |b, p| {
            b.iter(|| {
                let mut writer = BitWriter::new(Vec::with_capacity(encoded.len()));
                p.write_packed(&mut writer).unwrap();
                black_box(writer.finish().unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, data| {
            b.iter(|| {
                let mut reader = BitReader::new(data);
                black_box(InvertedPostings::read_packed(TermId(0), &mut reader).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_vocabulary_find(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vocab");
    let terms: Vec<String> = (0..100_000).map(|i| format!("term{:07}", i)).collect();
    let mut writer = VocabularyMapWriter::create(&path, DEFAULT_BLOCK_SIZE).unwrap();
    for term in &terms {
        writer.insert(term).unwrap();
    }
    writer.finish().unwrap();
    let map = VocabularyMap::open(&path, DEFAULT_BLOCK_SIZE).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let lookups: Vec<&str> = (0..1_000)
        .map(|_| terms[rng.gen_range(0..terms.len())].as_str())
        .collect();

    c.bench_function("vocabulary_find", |b| {
        b.iter(|| {
            for lookup in &lookups {
                black_box(map.find(lookup));
            }
        })
    });
}

criterion_group!(benches, bench_postings_codec, bench_vocabulary_find);
criterion_main!(benches);
