//! Append-only list of NUL-terminated strings.
//!
//! Stored as two files: the blob at `path` and a `u64` disk vector of byte
//! offsets at `path` + `_index`, holding one entry per string plus a final
//! sentinel equal to the blob length.

use crate::disk_vector::{DiskVector, DiskVectorWriter};
use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Path of the offsets file belonging to the blob at `path`.
pub fn index_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_index");
    PathBuf::from(name)
}

/// Read-only string list.
#[derive(Debug)]
pub struct StringList {
    blob: MappedFile,
    offsets: DiskVector<u64>,
}

impl StringList {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let blob = MappedFile::open(path)?;
        let offsets = DiskVector::<u64>::open(index_path(path))?;
        if offsets.is_empty() || offsets.get(offsets.len() - 1) != blob.len() as u64 {
            return Err(Error::corrupt(format!(
                "{} does not end at its recorded sentinel",
                path.display()
            )));
        }
        Ok(Self { blob, offsets })
    }

    /// Number of strings.
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// String `index`. Panics when out of bounds.
    pub fn at(&self, index: usize) -> Result<&str> {
        assert!(index < self.len(), "string list index {} out of bounds", index);
        let start = self.offsets.get(index) as usize;
        let end = self.offsets.get(index + 1) as usize;
        let bytes = self
            .blob
            .as_slice()
            .get(start..end.saturating_sub(1))
            .filter(|_| end > start)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "string {} spans invalid range {}..{} in {}",
                    index,
                    start,
                    end,
                    self.blob.path().display()
                ))
            })?;
        std::str::from_utf8(bytes).map_err(|e| Error::corrupt(format!("string {}: {}", index, e)))
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<&str>> + '_ {
        (0..self.len()).map(move |i| self.at(i))
    }
}

/// Appends strings and their offsets.
pub struct StringListWriter {
    blob: BufWriter<File>,
    offsets: DiskVectorWriter<u64>,
    position: u64,
}

impl StringListWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut offsets = DiskVectorWriter::create(index_path(path))?;
        offsets.push(0)?;
        Ok(Self {
            blob: BufWriter::new(File::create(path)?),
            offsets,
            position: 0,
        })
    }

    /// Append `value`, returning its index.
    pub fn push(&mut self, value: &str) -> Result<u64> {
        if value.as_bytes().contains(&0) {
            return Err(Error::usage(format!(
                "string list entries cannot contain NUL: {:?}",
                value
            )));
        }
        let index = self.offsets.len() - 1;
        self.blob.write_all(value.as_bytes())?;
        self.blob.write_all(&[0])?;
        self.position += value.len() as u64 + 1;
        self.offsets.push(self.position)?;
        Ok(index)
    }

    /// Flush and fsync both files. Returns the number of strings.
    pub fn finish(self) -> Result<u64> {
        let file = self.blob.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(self.offsets.finish()? - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("labels.labels");
        let mut writer = StringListWriter::create(&path).unwrap();
        assert_eq!(writer.push("pets").unwrap(), 0);
        assert_eq!(writer.push("").unwrap(), 1);
        assert_eq!(writer.push("wild animals").unwrap(), 2);
        assert_eq!(writer.finish().unwrap(), 3);

        let list = StringList::open(&path).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.at(0).unwrap(), "pets");
        assert_eq!(list.at(1).unwrap(), "");
        assert_eq!(list.at(2).unwrap(), "wild animals");
        let all: Vec<&str> = list.iter().collect::<Result<_>>().unwrap();
        assert_eq!(all, vec!["pets", "", "wild animals"]);
    }

    #[test]
    fn test_empty_list() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty");
        StringListWriter::create(&path).unwrap().finish().unwrap();
        let list = StringList::open(&path).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("names");
        let mut writer = StringListWriter::create(&path).unwrap();
        writer.push("alpha").unwrap();
        writer.finish().unwrap();
        std::fs::write(&path, b"alp").unwrap();
        assert!(StringList::open(&path).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_nul_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = StringListWriter::create(tmp.path().join("x")).unwrap();
        assert!(matches!(writer.push("a\0"), Err(Error::Usage(_))));
    }
}
