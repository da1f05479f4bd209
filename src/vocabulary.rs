//! On-disk vocabulary: a static B-tree of fixed-size blocks mapping term
//! strings to term ids, plus an inverse table for id to string lookups.
//!
//! # Layout
//!
//! Every entry is the NUL-terminated term followed by a little-endian
//! `u64`. Entries never straddle blocks; unused block tails are NUL-filled.
//!
//! - Leaf blocks come first, holding `(term, term_id)` in sorted order. Ids
//!   are assigned by insertion order, so id `k` is the `k`-th smallest term.
//! - Each internal level holds `(head term, byte position)` for every block
//!   of the level below. Levels are appended until one block remains; that
//!   block, the last in the file, is the root.
//! - `<path>_inverse` is a `u64` disk vector with the byte offset of every
//!   leaf entry, indexed by term id.
//!
//! Keys compare byte-lexicographically, which matches comparing the
//! NUL-terminated forms since terms never contain NUL.

use crate::disk_vector::{DiskVector, DiskVectorWriter};
use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use crate::types::TermId;
use byteorder::{ByteOrder, LittleEndian};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Width of the value stored after each key.
const VALUE_WIDTH: usize = 8;

/// Path of the inverse table belonging to the map at `path`.
pub fn inverse_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_inverse");
    PathBuf::from(name)
}

/// Read-only vocabulary map.
#[derive(Debug)]
pub struct VocabularyMap {
    blob: MappedFile,
    inverse: DiskVector<u64>,
    block_size: usize,
    /// End of the leaf region; every block at or past it is internal.
    leaf_end: usize,
}

impl VocabularyMap {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let blob = MappedFile::open(path)?;
        let inverse = DiskVector::<u64>::open(inverse_path(path))?;
        if block_size <= VALUE_WIDTH + 1 || blob.len() % block_size != 0 {
            return Err(Error::corrupt(format!(
                "{} has {} bytes, not a whole number of {}-byte blocks",
                path.display(),
                blob.len(),
                block_size
            )));
        }
        let leaf_end = match inverse.len() {
            0 => 0,
            n => (inverse.get(n - 1) as usize / block_size + 1) * block_size,
        };
        if leaf_end > blob.len() || (inverse.is_empty() != blob.is_empty()) {
            return Err(Error::corrupt(format!(
                "{} disagrees with its inverse table",
                path.display()
            )));
        }
        Ok(Self {
            blob,
            inverse,
            block_size,
            leaf_end,
        })
    }

    /// Number of terms.
    #[inline]
    pub fn len(&self) -> usize {
        self.inverse.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Look up a term's id. Internal blocks are binary-searched for the
    /// last separator not above `term`; the leaf is binary-searched through
    /// the inverse table, since leaf ids are contiguous.
    pub fn find(&self, term: &str) -> Option<TermId> {
        if self.blob.is_empty() {
            return None;
        }
        let target = term.as_bytes();
        let mut pos = self.blob.len() - self.block_size;
        while pos >= self.leaf_end {
            let separators: Vec<(&[u8], u64)> = self.entries(pos).collect();
            let child = separators.partition_point(|&(key, _)| key <= target);
            let next = separators.get(child.checked_sub(1)?)?.1 as usize;
            if next >= pos || next % self.block_size != 0 {
                return None;
            }
            pos = next;
        }
        self.find_in_leaf(pos, target)
    }

    fn find_in_leaf(&self, pos: usize, target: &[u8]) -> Option<TermId> {
        let (_, first) = self.entries(pos).next()?;
        let next_leaf = pos + self.block_size;
        let end = if next_leaf < self.leaf_end {
            self.entries(next_leaf).next()?.1
        } else {
            self.len() as u64
        };
        let (mut lo, mut hi) = (first, end);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid)?.cmp(target) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Equal => return Some(TermId(mid)),
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Raw key of term `id`, without its NUL.
    fn key_at(&self, id: u64) -> Option<&[u8]> {
        let offset = self.inverse.try_get(id as usize)? as usize;
        let rest = self.blob.as_slice().get(offset..)?;
        rest.iter().position(|&b| b == 0).map(|n| &rest[..n])
    }

    /// Look up the term with id `id`.
    pub fn find_term(&self, id: TermId) -> Result<Option<&str>> {
        let Some(offset) = self.inverse.try_get(id.0 as usize) else {
            return Ok(None);
        };
        let bytes = self
            .blob
            .as_slice()
            .get(offset as usize..)
            .and_then(|rest| rest.iter().position(|&b| b == 0).map(|n| &rest[..n]))
            .ok_or_else(|| {
                Error::corrupt(format!("term {} points outside the vocabulary blob", id))
            })?;
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::corrupt(format!("term {} is not UTF-8: {}", id, e)))
    }

    /// Entries of the block starting at `pos`.
    fn entries(&self, pos: usize) -> BlockEntries<'_> {
        BlockEntries {
            block: &self.blob.as_slice()[pos..pos + self.block_size],
            offset: 0,
        }
    }
}

struct BlockEntries<'a> {
    block: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for BlockEntries<'a> {
    type Item = (&'a [u8], u64);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.block.get(self.offset..)?;
        if rest.first().map_or(true, |&b| b == 0) {
            return None;
        }
        let len = rest.iter().position(|&b| b == 0)?;
        let value = rest.get(len + 1..len + 1 + VALUE_WIDTH)?;
        self.offset += len + 1 + VALUE_WIDTH;
        Some((&rest[..len], LittleEndian::read_u64(value)))
    }
}

/// Writes a vocabulary map from terms inserted in strictly ascending order.
pub struct VocabularyMapWriter {
    out: BufWriter<File>,
    inverse: DiskVectorWriter<u64>,
    block_size: usize,
    block_used: usize,
    position: u64,
    /// Head key and position of every block in the level being written.
    heads: Vec<(Vec<u8>, u64)>,
    last_term: Option<String>,
}

impl VocabularyMapWriter {
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        if block_size <= VALUE_WIDTH + 1 {
            return Err(Error::config(format!(
                "vocabulary block size {} is too small",
                block_size
            )));
        }
        let path = path.as_ref();
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            inverse: DiskVectorWriter::create(inverse_path(path))?,
            block_size,
            block_used: 0,
            position: 0,
            heads: Vec::new(),
            last_term: None,
        })
    }

    /// Append the next term and return its id.
    pub fn insert(&mut self, term: &str) -> Result<TermId> {
        if term.is_empty() {
            return Err(Error::usage("vocabulary terms cannot be empty"));
        }
        if term.as_bytes().contains(&0) {
            return Err(Error::usage(format!("term {:?} contains NUL", term)));
        }
        if let Some(last) = &self.last_term {
            if last.as_str() >= term {
                return Err(Error::usage(format!(
                    "term {:?} inserted after {:?}; terms must be unique and ascending",
                    term, last
                )));
            }
        }
        let id = TermId(self.inverse.len());
        let offset = self.write_entry(term.as_bytes(), id.0)?;
        self.inverse.push(offset)?;
        self.last_term = Some(term.to_string());
        Ok(id)
    }

    /// Number of terms inserted so far.
    pub fn len(&self) -> u64 {
        self.inverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }

    /// Write one entry, starting a new block when it does not fit. Returns
    /// the entry's byte offset.
    fn write_entry(&mut self, key: &[u8], value: u64) -> Result<u64> {
        let len = key.len() + 1 + VALUE_WIDTH;
        if len > self.block_size {
            return Err(Error::corrupt(format!(
                "term of {} bytes does not fit a {}-byte vocabulary block",
                key.len(),
                self.block_size
            )));
        }
        if self.block_used + len > self.block_size {
            self.pad_block()?;
        }
        if self.block_used == 0 {
            self.heads.push((key.to_vec(), self.position));
        }
        let offset = self.position;
        let mut value_bytes = [0u8; VALUE_WIDTH];
        LittleEndian::write_u64(&mut value_bytes, value);
        self.out.write_all(key)?;
        self.out.write_all(&[0])?;
        self.out.write_all(&value_bytes)?;
        self.block_used += len;
        self.position += len as u64;
        Ok(offset)
    }

    fn pad_block(&mut self) -> Result<()> {
        if self.block_used > 0 {
            let padding = self.block_size - self.block_used;
            self.out.write_all(&vec![0u8; padding])?;
            self.position += padding as u64;
            self.block_used = 0;
        }
        Ok(())
    }

    /// Close the leaf level, write every internal level up to the root and
    /// fsync. Returns the number of terms.
    pub fn finish(mut self) -> Result<u64> {
        self.pad_block()?;
        while self.heads.len() > 1 {
            let level = std::mem::take(&mut self.heads);
            for (key, position) in level {
                self.write_entry(&key, position)?;
            }
            self.pad_block()?;
        }
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        self.inverse.finish()
    }
}
