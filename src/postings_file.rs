//! Random-access postings storage.
//!
//! `postings.bin` is a γ-coded stream of packed payloads, one per primary
//! key in key order. `postings.index` is a `u64` disk vector holding the bit
//! offset of each key's payload.

use crate::bitstream::{BitReader, BitWriter};
use crate::disk_vector::{DiskVector, DiskVectorWriter};
use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use crate::postings::{PostingsData, PrimaryKey, SecondaryKey};
use std::fs::File;
use std::io::BufWriter;
use std::marker::PhantomData;
use std::path::Path;

pub const POSTINGS_FILE: &str = "postings.bin";
pub const POSTINGS_INDEX_FILE: &str = "postings.index";

/// Keys that address a dense range of postings entries.
pub trait DenseKey: PrimaryKey + Copy + From<u64> + Into<u64> {}

impl<T: PrimaryKey + Copy + From<u64> + Into<u64>> DenseKey for T {}

/// Read-only postings file.
#[derive(Debug)]
pub struct PostingsFile<P, S> {
    data: MappedFile,
    offsets: DiskVector<u64>,
    _marker: PhantomData<fn() -> (P, S)>,
}

impl<P: DenseKey, S: SecondaryKey> PostingsFile<P, S> {
    /// Open `postings.bin` and `postings.index` in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let data = MappedFile::open(dir.join(POSTINGS_FILE))?;
        let offsets = DiskVector::<u64>::open(dir.join(POSTINGS_INDEX_FILE))?;
        let total_bits = data.len() as u64 * 8;
        if let Some(last) = offsets.len().checked_sub(1).map(|i| offsets.get(i)) {
            if last >= total_bits {
                return Err(Error::corrupt(format!(
                    "{} points at bit {} past the {}-bit postings stream",
                    POSTINGS_INDEX_FILE, last, total_bits
                )));
            }
        }
        Ok(Self {
            data,
            offsets,
            _marker: PhantomData,
        })
    }

    /// Number of primary keys with an entry.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Decode the postings of `key`. Keys past the end have no postings.
    pub fn find(&self, key: P) -> Result<PostingsData<P, S>> {
        let index: u64 = key.into();
        match self.offsets.try_get(index as usize) {
            Some(offset) => {
                let mut reader = BitReader::at(self.data.as_slice(), offset)?;
                PostingsData::read_packed(key, &mut reader)
            }
            None => Ok(PostingsData::new(key)),
        }
    }
}

/// Writes postings entries in ascending key order.
pub struct PostingsFileWriter<P, S> {
    out: BitWriter<BufWriter<File>>,
    offsets: DiskVectorWriter<u64>,
    next_key: u64,
    _marker: PhantomData<fn() -> (P, S)>,
}

impl<P: DenseKey, S: SecondaryKey> PostingsFileWriter<P, S> {
    pub fn create(dir: &Path) -> Result<Self> {
        Ok(Self {
            out: BitWriter::new(BufWriter::new(File::create(dir.join(POSTINGS_FILE))?)),
            offsets: DiskVectorWriter::create(dir.join(POSTINGS_INDEX_FILE))?,
            next_key: 0,
            _marker: PhantomData,
        })
    }

    /// Append `postings`. Keys skipped since the last call get empty
    /// entries.
    pub fn write(&mut self, postings: &PostingsData<P, S>) -> Result<()> {
        let key: u64 = (*postings.primary()).into();
        if key < self.next_key {
            return Err(Error::usage(format!(
                "postings for key {} written after key {}",
                key,
                self.next_key - 1
            )));
        }
        self.fill_to(key)?;
        self.offsets.push(self.out.bit_position())?;
        postings.write_packed(&mut self.out)?;
        self.next_key = key + 1;
        Ok(())
    }

    fn fill_to(&mut self, key: u64) -> Result<()> {
        while self.next_key < key {
            self.offsets.push(self.out.bit_position())?;
            PostingsData::<P, S>::new(P::from(self.next_key)).write_packed(&mut self.out)?;
            self.next_key += 1;
        }
        Ok(())
    }

    /// Pad with empty entries up to `num_keys`, flush and fsync.
    pub fn finish(mut self, num_keys: u64) -> Result<()> {
        self.fill_to(num_keys)?;
        let file = self
            .out
            .finish()?
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()?;
        self.offsets.finish()?;
        Ok(())
    }
}
