//! Sorted on-disk runs of postings records.
//!
//! A chunk file is a γ-coded stream of `(primary key, payload)` records in
//! strictly ascending primary-key order. Chunks order by file size so a
//! min-heap of chunks always yields the cheapest pair to merge next.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use crate::postings::{PostingsData, PrimaryKey, SecondaryKey};
use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::BufWriter;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A sorted run on disk.
#[derive(Debug)]
pub struct Chunk<P, S> {
    path: PathBuf,
    size: u64,
    _marker: PhantomData<fn() -> (P, S)>,
}

impl<P: PrimaryKey, S: SecondaryKey> Chunk<P, S> {
    /// Wrap an existing chunk file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = fs::metadata(&path)?.len();
        Ok(Self {
            path,
            size,
            _marker: PhantomData,
        })
    }

    /// Write `records`, which must already be in ascending primary-key
    /// order, to a new chunk at `path`.
    pub fn write<'a, I>(path: impl Into<PathBuf>, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a PostingsData<P, S>>,
    {
        let path = path.into();
        let mut out = BitWriter::new(BufWriter::new(File::create(&path)?));
        let mut last: Option<&P> = None;
        for record in records {
            if last.is_some_and(|prev| prev >= record.primary()) {
                return Err(Error::usage(format!(
                    "chunk records out of order at {:?}",
                    record.primary()
                )));
            }
            record.write_record(&mut out)?;
            last = Some(record.primary());
        }
        out.finish()?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Stream the chunk's records.
    pub fn reader(&self) -> Result<ChunkReader<P, S>> {
        ChunkReader::open(&self.path)
    }

    /// Merge `other` into this chunk. Records with equal primary keys have
    /// their postings summed. The merged run replaces this chunk's file and
    /// `other`'s file is deleted.
    pub fn merge_with(&mut self, other: Chunk<P, S>) -> Result<()> {
        let temp = temp_path(&self.path);
        {
            let mut left = self.reader()?;
            let mut right = other.reader()?;
            let mut out = BitWriter::new(BufWriter::new(File::create(&temp)?));
            let mut a = left.next_record()?;
            let mut b = right.next_record()?;
            loop {
                let order = match (&a, &b) {
                    (Some(x), Some(y)) => x.primary().cmp(y.primary()),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => break,
                };
                match order {
                    Ordering::Less => {
                        if let Some(x) = a.take() {
                            x.write_record(&mut out)?;
                        }
                        a = left.next_record()?;
                    }
                    Ordering::Greater => {
                        if let Some(y) = b.take() {
                            y.write_record(&mut out)?;
                        }
                        b = right.next_record()?;
                    }
                    Ordering::Equal => {
                        if let (Some(mut x), Some(y)) = (a.take(), b.take()) {
                            x.merge_with(y);
                            x.write_record(&mut out)?;
                        }
                        a = left.next_record()?;
                        b = right.next_record()?;
                    }
                }
            }
            out.finish()?;
        }
        fs::rename(&temp, &self.path)?;
        fs::remove_file(&other.path)?;
        let before = self.size + other.size;
        self.size = fs::metadata(&self.path)?.len();
        debug!(
            path = %self.path.display(),
            inputs = before,
            merged = self.size,
            "merged chunks"
        );
        Ok(())
    }

    /// Delete the chunk file.
    pub fn remove(self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".merging");
    PathBuf::from(name)
}

impl<P, S> PartialEq for Chunk<P, S> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.path == other.path
    }
}

impl<P, S> Eq for Chunk<P, S> {}

impl<P, S> PartialOrd for Chunk<P, S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P, S> Ord for Chunk<P, S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Sequential reader over a chunk file.
pub struct ChunkReader<P, S> {
    file: MappedFile,
    bit_pos: u64,
    last: Option<P>,
    _marker: PhantomData<fn() -> S>,
}

impl<P: PrimaryKey, S: SecondaryKey> ChunkReader<P, S> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: MappedFile::open(path)?,
            bit_pos: 0,
            last: None,
            _marker: PhantomData,
        })
    }

    /// Size of the underlying file in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.file.len() as u64
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bit_pos.div_ceil(8)
    }

    /// Next record, or `None` at end of chunk.
    pub fn next_record(&mut self) -> Result<Option<PostingsData<P, S>>> {
        let mut reader = BitReader::at(self.file.as_slice(), self.bit_pos)?;
        if !reader.has_next() {
            return Ok(None);
        }
        let record = PostingsData::<P, S>::read_record(&mut reader)?;
        self.bit_pos = reader.position();
        if let Some(prev) = &self.last {
            if prev >= record.primary() {
                return Err(Error::corrupt(format!(
                    "{}: key {:?} follows {:?}",
                    self.file.path().display(),
                    record.primary(),
                    prev
                )));
            }
        }
        self.last = Some(record.primary().clone());
        Ok(Some(record))
    }
}
