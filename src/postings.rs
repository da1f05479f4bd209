//! Postings aggregates: one primary key and its `(secondary key, count)`
//! pairs, with γ-coded serialization.
//!
//! A packed payload is `γ(n + 1)` followed, for each pair in ascending
//! secondary-key order, by `γ(gap + 1)` and `γ(count)`, where `gap` is the
//! difference from the previous secondary key (the first gap is measured
//! from zero). Chunk records prefix the payload with the encoded primary
//! key.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::types::{Count, DocId, TermId};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::io::Write;

/// Key a postings aggregate is grouped by.
pub trait PrimaryKey: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static {
    fn write_key<W: Write>(&self, out: &mut BitWriter<W>) -> Result<()>;

    fn read_key(input: &mut BitReader<'_>) -> Result<Self>;

    /// Heap bytes owned by the key, for memory accounting.
    fn heap_bytes(&self) -> usize {
        0
    }
}

/// Key of the individual entries within an aggregate.
pub trait SecondaryKey: Copy + Eq + Ord + Hash + Debug + Send + Sync + 'static {
    fn to_u64(self) -> u64;

    fn from_u64(value: u64) -> Self;
}

macro_rules! id_keys {
    ($($ty:ident),*) => {$(
        impl PrimaryKey for $ty {
            fn write_key<W: Write>(&self, out: &mut BitWriter<W>) -> Result<()> {
                out.write_gamma(self.0.checked_add(1).ok_or_else(|| {
                    Error::usage(format!("{} too large to encode", stringify!($ty)))
                })?)
            }

            fn read_key(input: &mut BitReader<'_>) -> Result<Self> {
                Ok($ty(input.read_gamma()? - 1))
            }
        }

        impl SecondaryKey for $ty {
            #[inline]
            fn to_u64(self) -> u64 {
                self.0
            }

            #[inline]
            fn from_u64(value: u64) -> Self {
                $ty(value)
            }
        }
    )*};
}

id_keys!(TermId, DocId);

/// Term strings are written as `γ(len + 1)` and then their raw bytes.
impl PrimaryKey for String {
    fn write_key<W: Write>(&self, out: &mut BitWriter<W>) -> Result<()> {
        out.write_gamma(self.len() as u64 + 1)?;
        for &b in self.as_bytes() {
            out.write_bits(u64::from(b), 8)?;
        }
        Ok(())
    }

    fn read_key(input: &mut BitReader<'_>) -> Result<Self> {
        let len = input.read_gamma()? - 1;
        if len > input.total_bits() / 8 {
            return Err(Error::corrupt(format!(
                "string key of {} bytes exceeds its stream",
                len
            )));
        }
        let mut bytes = Vec::with_capacity(len as usize);
        for _ in 0..len {
            bytes.push(input.read_bits(8)? as u8);
        }
        String::from_utf8(bytes).map_err(|e| Error::corrupt(format!("string key: {}", e)))
    }

    fn heap_bytes(&self) -> usize {
        self.capacity()
    }
}

/// Fixed per-aggregate bookkeeping charged by [`PostingsData::heap_bytes`].
const AGGREGATE_OVERHEAD: usize = 64;

/// A primary key's postings, sorted by secondary key. Zero counts are never
/// stored.
///
/// Equality, ordering and hashing consider the primary key only.
#[derive(Debug, Clone)]
pub struct PostingsData<P, S> {
    primary: P,
    counts: Vec<(S, Count)>,
}

/// Term to documents.
pub type InvertedPostings = PostingsData<TermId, DocId>;

/// Document to terms.
pub type ForwardPostings = PostingsData<DocId, TermId>;

impl<P: PrimaryKey, S: SecondaryKey> PostingsData<P, S> {
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            counts: Vec::new(),
        }
    }

    /// Build from pairs in any order; duplicate keys are summed.
    pub fn from_pairs(primary: P, pairs: impl IntoIterator<Item = (S, Count)>) -> Self {
        let mut pd = Self::new(primary);
        for (s, c) in pairs {
            pd.insert(s, c);
        }
        pd
    }

    #[inline]
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// Pairs in ascending secondary-key order.
    #[inline]
    pub fn counts(&self) -> &[(S, Count)] {
        &self.counts
    }

    pub fn into_counts(self) -> Vec<(S, Count)> {
        self.counts
    }

    /// The same postings under a different primary key.
    pub fn rekey<Q: PrimaryKey>(self, primary: Q) -> PostingsData<Q, S> {
        PostingsData {
            primary,
            counts: self.counts,
        }
    }

    /// Number of distinct secondary keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Count recorded for `key`, zero when absent.
    pub fn count(&self, key: S) -> Count {
        self.counts
            .binary_search_by(|(s, _)| s.cmp(&key))
            .map(|i| self.counts[i].1)
            .unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|&(_, c)| u64::from(c)).sum()
    }

    /// Add `count` occurrences of `key`.
    pub fn insert(&mut self, key: S, count: Count) {
        if count == 0 {
            return;
        }
        match self.counts.last_mut() {
            None => self.counts.push((key, count)),
            Some(last) if last.0 < key => self.counts.push((key, count)),
            Some(last) if last.0 == key => last.1 = last.1.saturating_add(count),
            Some(_) => match self.counts.binary_search_by(|(s, _)| s.cmp(&key)) {
                Ok(i) => self.counts[i].1 = self.counts[i].1.saturating_add(count),
                Err(i) => self.counts.insert(i, (key, count)),
            },
        }
    }

    /// Sum `other`'s counts into this aggregate. Both must share a primary
    /// key.
    pub fn merge_with(&mut self, other: PostingsData<P, S>) {
        debug_assert_eq!(self.primary, other.primary);
        if other.counts.is_empty() {
            return;
        }
        if self.counts.is_empty() {
            self.counts = other.counts;
            return;
        }
        let mine = std::mem::take(&mut self.counts);
        let mut merged = Vec::with_capacity(mine.len() + other.counts.len());
        let mut a = mine.into_iter().peekable();
        let mut b = other.counts.into_iter().peekable();
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(&x), Some(&y)) => match x.0.cmp(&y.0) {
                    Ordering::Less => a.next(),
                    Ordering::Greater => b.next(),
                    Ordering::Equal => {
                        a.next();
                        b.next();
                        Some((x.0, x.1.saturating_add(y.1)))
                    }
                },
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => None,
            };
            match next {
                Some(pair) => merged.push(pair),
                None => break,
            }
        }
        self.counts = merged;
    }

    /// Approximate heap footprint, used by chunk handlers to decide when to
    /// spill.
    pub fn heap_bytes(&self) -> usize {
        AGGREGATE_OVERHEAD
            + self.primary.heap_bytes()
            + self.counts.capacity() * std::mem::size_of::<(S, Count)>()
    }

    /// Encode the payload (everything but the primary key).
    pub fn write_packed<W: Write>(&self, out: &mut BitWriter<W>) -> Result<()> {
        out.write_gamma(self.counts.len() as u64 + 1)?;
        let mut prev = 0u64;
        for &(s, c) in &self.counts {
            let key = s.to_u64();
            out.write_gamma(key - prev + 1)?;
            out.write_gamma(u64::from(c))?;
            prev = key;
        }
        Ok(())
    }

    /// Decode a payload written by [`write_packed`](Self::write_packed).
    pub fn read_packed(primary: P, input: &mut BitReader<'_>) -> Result<Self> {
        let n = input.read_gamma()? - 1;
        // Every pair takes at least two bits.
        if n > input.total_bits() / 2 {
            return Err(Error::corrupt(format!(
                "postings for {:?} claim {} pairs at bit {}",
                primary,
                n,
                input.position()
            )));
        }
        let mut counts = Vec::with_capacity(n as usize);
        let mut prev = 0u64;
        for _ in 0..n {
            let key = prev
                .checked_add(input.read_gamma()? - 1)
                .ok_or_else(|| Error::corrupt(format!("postings for {:?} overflow", primary)))?;
            let count = input.read_gamma()?;
            let count = Count::try_from(count).map_err(|_| {
                Error::corrupt(format!("count {} for {:?} exceeds 32 bits", count, primary))
            })?;
            counts.push((S::from_u64(key), count));
            prev = key;
        }
        Ok(Self { primary, counts })
    }

    /// Encode primary key and payload.
    pub fn write_record<W: Write>(&self, out: &mut BitWriter<W>) -> Result<()> {
        self.primary.write_key(out)?;
        self.write_packed(out)
    }

    /// Decode a record written by [`write_record`](Self::write_record).
    pub fn read_record(input: &mut BitReader<'_>) -> Result<Self> {
        let primary = P::read_key(input)?;
        Self::read_packed(primary, input)
    }
}

impl<P: PartialEq, S> PartialEq for PostingsData<P, S> {
    fn eq(&self, other: &Self) -> bool {
        self.primary == other.primary
    }
}

impl<P: Eq, S> Eq for PostingsData<P, S> {}

impl<P: Ord, S> PartialOrd for PostingsData<P, S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord, S> Ord for PostingsData<P, S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary.cmp(&other.primary)
    }
}

impl<P: Hash, S> Hash for PostingsData<P, S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary.hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{BTreeMap, HashSet};

    fn encode<P: PrimaryKey, S: SecondaryKey>(pd: &PostingsData<P, S>) -> Vec<u8> {
        let mut out = BitWriter::new(Vec::new());
        pd.write_record(&mut out).unwrap();
        out.finish().unwrap()
    }

    #[test]
    fn test_insert_sums_and_sorts() {
        let mut pd = InvertedPostings::new(TermId(4));
        pd.insert(DocId(5), 1);
        pd.insert(DocId(2), 3);
        pd.insert(DocId(5), 2);
        pd.insert(DocId(9), 0);
        pd.insert(DocId(3), 1);
        assert_eq!(
            pd.counts(),
            &[(DocId(2), 3), (DocId(3), 1), (DocId(5), 3)]
        );
        assert_eq!(pd.count(DocId(5)), 3);
        assert_eq!(pd.count(DocId(9)), 0);
        assert_eq!(pd.total_count(), 7);
    }

    #[test]
    fn test_merge_with_sums_overlaps() {
        let mut a = InvertedPostings::from_pairs(TermId(1), [(DocId(0), 1), (DocId(4), 2)]);
        let b = InvertedPostings::from_pairs(TermId(1), [(DocId(1), 5), (DocId(4), 3)]);
        a.merge_with(b);
        assert_eq!(a.counts(), &[(DocId(0), 1), (DocId(1), 5), (DocId(4), 5)]);
    }

    #[test]
    fn test_packed_roundtrip_random() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut expected = BTreeMap::new();
            let mut pd = InvertedPostings::new(TermId(rng.gen_range(0..1000)));
            for _ in 0..rng.gen_range(0..200) {
                let doc = rng.gen_range(0..5_000u64);
                let count = rng.gen_range(1..20u32);
                pd.insert(DocId(doc), count);
                *expected.entry(DocId(doc)).or_insert(0) += count;
            }
            let bytes = encode(&pd);
            let decoded = InvertedPostings::read_record(&mut BitReader::new(&bytes)).unwrap();
            assert_eq!(decoded.primary(), pd.primary());
            assert_eq!(
                decoded.counts(),
                expected.into_iter().collect::<Vec<_>>().as_slice()
            );
        }
    }

    #[test]
    fn test_string_keys_roundtrip() {
        let pd = PostingsData::<String, DocId>::from_pairs("naïve".to_string(), [(DocId(0), 2)]);
        let empty = PostingsData::<String, DocId>::new(String::new());
        let mut out = BitWriter::new(Vec::new());
        pd.write_record(&mut out).unwrap();
        empty.write_record(&mut out).unwrap();
        let bytes = out.finish().unwrap();

        let mut reader = BitReader::new(&bytes);
        let first = PostingsData::<String, DocId>::read_record(&mut reader).unwrap();
        let second = PostingsData::<String, DocId>::read_record(&mut reader).unwrap();
        assert_eq!(first.primary(), "naïve");
        assert_eq!(first.counts(), &[(DocId(0), 2)]);
        assert_eq!(second.primary(), "");
        assert!(second.is_empty());
        assert!(!reader.has_next());
    }

    #[test]
    fn test_forward_postings_roundtrip() {
        let pd = ForwardPostings::from_pairs(DocId(3), [(TermId(10), 1), (TermId(0), 4)]);
        let bytes = encode(&pd);
        let decoded = ForwardPostings::read_record(&mut BitReader::new(&bytes)).unwrap();
        assert_eq!(decoded.counts(), &[(TermId(0), 4), (TermId(10), 1)]);
    }

    #[test]
    fn test_identity_is_primary_key() {
        let a = InvertedPostings::from_pairs(TermId(1), [(DocId(0), 1)]);
        let b = InvertedPostings::from_pairs(TermId(1), [(DocId(7), 9)]);
        let c = InvertedPostings::new(TermId(2));
        assert_eq!(a, b);
        assert!(a < c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let pd = InvertedPostings::from_pairs(TermId(0), (0..50).map(|d| (DocId(d * 3), 2)));
        let bytes = encode(&pd);
        let cut = &bytes[..bytes.len() / 2];
        let err = InvertedPostings::read_record(&mut BitReader::new(cut)).unwrap_err();
        assert!(err.is_corrupt());
    }
}
