//! Fixed-width little-endian arrays backed by memory-mapped files.
//!
//! The file layout is header-less: element `i` lives at byte
//! `i * T::WIDTH`. [`DiskVector`] is the read-only view used by index
//! readers, [`DiskVectorWriter`] appends sequentially during a build, and
//! [`DiskVectorMut`] allows random-access writes into a preallocated file.

use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

/// A primitive that can be stored in a disk vector.
pub trait DiskScalar: Copy + Default + Send + Sync + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! disk_scalar {
    ($ty:ty, $width:expr, $read:ident, $write:ident) => {
        impl DiskScalar for $ty {
            const WIDTH: usize = $width;

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                LittleEndian::$read(bytes)
            }

            #[inline]
            fn write_le(self, bytes: &mut [u8]) {
                LittleEndian::$write(bytes, self)
            }
        }
    };
}

disk_scalar!(u32, 4, read_u32, write_u32);
disk_scalar!(u64, 8, read_u64, write_u64);
disk_scalar!(i64, 8, read_i64, write_i64);
disk_scalar!(f64, 8, read_f64, write_f64);

/// Read-only disk vector.
#[derive(Debug)]
pub struct DiskVector<T: DiskScalar> {
    file: MappedFile,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: DiskScalar> DiskVector<T> {
    /// Map an existing file. Fails with `CorruptFormat` when the file size
    /// is not a multiple of the element width.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = MappedFile::open(path)?;
        if file.len() % T::WIDTH != 0 {
            return Err(Error::corrupt(format!(
                "{} has {} bytes, not a multiple of {}",
                file.path().display(),
                file.len(),
                T::WIDTH
            )));
        }
        let len = file.len() / T::WIDTH;
        Ok(Self {
            file,
            len,
            _marker: PhantomData,
        })
    }

    /// Element `index`. Panics when out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        let start = index * T::WIDTH;
        T::read_le(&self.file.as_slice()[start..start + T::WIDTH])
    }

    /// Element `index`, or `None` when out of bounds.
    #[inline]
    pub fn try_get(&self, index: usize) -> Option<T> {
        (index < self.len).then(|| self.get(index))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

/// Sequential disk vector writer.
pub struct DiskVectorWriter<T: DiskScalar> {
    out: BufWriter<File>,
    len: u64,
    _marker: PhantomData<T>,
}

impl<T: DiskScalar> DiskVectorWriter<T> {
    /// Create (or truncate) `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            len: 0,
            _marker: PhantomData,
        })
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        let mut buf = [0u8; 8];
        value.write_le(&mut buf[..T::WIDTH]);
        self.out.write_all(&buf[..T::WIDTH])?;
        self.len += 1;
        Ok(())
    }

    /// Number of elements written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush and fsync. Returns the element count.
    pub fn finish(self) -> Result<u64> {
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(self.len)
    }
}

/// Write a whole slice to a new disk vector file.
pub fn write_all<T: DiskScalar>(path: impl AsRef<Path>, values: &[T]) -> Result<()> {
    let mut writer = DiskVectorWriter::create(path)?;
    for &v in values {
        writer.push(v)?;
    }
    writer.finish()?;
    Ok(())
}

/// Disk vector with random-access writes over a preallocated, zero-filled
/// file.
pub struct DiskVectorMut<T: DiskScalar> {
    file: File,
    mmap: Option<MmapMut>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: DiskScalar> DiskVectorMut<T> {
    /// Create `path` holding `len` zeroed elements.
    pub fn create(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((len * T::WIDTH) as u64)?;
        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: the file was just created by us and is not shared.
            Some(unsafe { MmapMut::map_mut(&file)? })
        };
        Ok(Self {
            file,
            mmap,
            len,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set element `index`. Panics when out of bounds.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        assert!(index < self.len, "disk vector index {} out of bounds", index);
        let start = index * T::WIDTH;
        if let Some(mmap) = self.mmap.as_mut() {
            value.write_le(&mut mmap[start..start + T::WIDTH]);
        }
    }

    /// Element `index`. Panics when out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.len, "disk vector index {} out of bounds", index);
        let start = index * T::WIDTH;
        match self.mmap.as_ref() {
            Some(mmap) => T::read_le(&mmap[start..start + T::WIDTH]),
            None => T::default(),
        }
    }

    /// Flush the mapping and fsync the file.
    pub fn finish(self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        self.file.sync_all()?;
        Ok(())
    }
}
