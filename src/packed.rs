//! Byte-aligned packed encoding for metadata records.
//!
//! Unsigned integers are 7-bit varints (low group first, high bit set on
//! every byte but the last), signed integers are zig-zag mapped first,
//! doubles are their IEEE-754 bit pattern as 8 little-endian bytes, and
//! strings are NUL-terminated UTF-8.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;

/// Write an unsigned varint. Returns the number of bytes written.
pub fn write_u64<W: Write>(out: &mut W, mut value: u64) -> Result<usize> {
    let mut written = 0;
    loop {
        let low = (value & 0x7f) as u8;
        value >>= 7;
        written += 1;
        if value == 0 {
            out.write_u8(low)?;
            return Ok(written);
        }
        out.write_u8(low | 0x80)?;
    }
}

/// Write a signed integer as a zig-zag varint.
pub fn write_i64<W: Write>(out: &mut W, value: i64) -> Result<usize> {
    write_u64(out, ((value << 1) ^ (value >> 63)) as u64)
}

/// Write a double as 8 little-endian bytes.
pub fn write_f64<W: Write>(out: &mut W, value: f64) -> Result<usize> {
    out.write_f64::<LittleEndian>(value)?;
    Ok(8)
}

/// Write a NUL-terminated string.
pub fn write_str<W: Write>(out: &mut W, value: &str) -> Result<usize> {
    if value.as_bytes().contains(&0) {
        return Err(Error::usage(format!(
            "packed strings cannot contain NUL: {:?}",
            value
        )));
    }
    out.write_all(value.as_bytes())?;
    out.write_u8(0)?;
    Ok(value.len() + 1)
}

/// Cursor over a packed byte slice.
#[derive(Debug, Clone)]
pub struct PackedReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PackedReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Byte offset of the next value.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn truncated(&self, what: &str) -> Error {
        Error::corrupt(format!("packed {} truncated at byte {}", what, self.pos))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self.data.get(self.pos).ok_or_else(|| self.truncated("varint"))?;
            self.pos += 1;
            if shift > 63 {
                return Err(Error::corrupt(format!(
                    "packed varint overflows 64 bits at byte {}",
                    self.pos
                )));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let raw = self.read_u64()?;
        Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let end = self.pos + 8;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| self.truncated("double"))?;
        self.pos = end;
        Ok(LittleEndian::read_f64(bytes))
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.truncated("string"))?;
        let s = std::str::from_utf8(&rest[..len])
            .map_err(|e| Error::corrupt(format!("packed string is not UTF-8: {}", e)))?;
        self.pos += len + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_bytes() {
        let mut buf = Vec::new();
        assert_eq!(write_u64(&mut buf, 0).unwrap(), 1);
        assert_eq!(write_u64(&mut buf, 127).unwrap(), 1);
        assert_eq!(write_u64(&mut buf, 300).unwrap(), 2);
        assert_eq!(buf, vec![0x00, 0x7f, 0xac, 0x02]);
        assert_eq!(write_u64(&mut Vec::new(), u64::MAX).unwrap(), 10);
    }

    #[test]
    fn test_mixed_values() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 2019).unwrap();
        write_i64(&mut buf, -42).unwrap();
        write_i64(&mut buf, i64::MIN).unwrap();
        write_f64(&mut buf, 3.25).unwrap();
        write_str(&mut buf, "héllo").unwrap();
        write_str(&mut buf, "").unwrap();

        let mut reader = PackedReader::new(&buf);
        assert_eq!(reader.read_u64().unwrap(), 2019);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert_eq!(reader.read_i64().unwrap(), i64::MIN);
        assert_eq!(reader.read_f64().unwrap(), 3.25);
        assert_eq!(reader.read_str().unwrap(), "héllo");
        assert_eq!(reader.read_str().unwrap(), "");
        assert_eq!(reader.position(), buf.len());
    }

    #[test]
    fn test_zigzag_small_values_are_short() {
        let mut buf = Vec::new();
        assert_eq!(write_i64(&mut buf, -1).unwrap(), 1);
        assert_eq!(buf, vec![0x01]);
    }

    #[test]
    fn test_truncation_is_corrupt() {
        let mut reader = PackedReader::new(&[0x80]);
        assert!(reader.read_u64().unwrap_err().is_corrupt());
        let mut reader = PackedReader::new(b"abc");
        assert!(reader.read_str().unwrap_err().is_corrupt());
        let mut reader = PackedReader::new(&[0u8; 4]);
        assert!(reader.read_f64().unwrap_err().is_corrupt());
    }

    #[test]
    fn test_nul_in_string_rejected() {
        assert!(matches!(
            write_str(&mut Vec::new(), "a\0b"),
            Err(Error::Usage(_))
        ));
    }
}
