//! Bit-level integer streams.
//!
//! [`BitWriter`] appends Elias-γ coded integers (and raw fixed-width bit
//! fields) to any [`Write`] sink, buffering whole bytes and flushing them in
//! batches. [`BitReader`] decodes the same stream from a byte slice, usually
//! a memory-mapped file, and can seek to any bit offset in O(1).
//!
//! Bits are packed MSB-first within each byte. γ-coding writes
//! `floor(log2(v))` zero bits, then the significant bits of `v` starting
//! with its leading one, so `v` costs `2 * floor(log2(v)) + 1` bits. Zero is
//! not representable; callers that need it store `v + 1`.

use crate::error::{Error, Result};
use std::io::{self, Write};

/// Bytes buffered before the writer flushes to its sink.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Writes γ-coded integers to an underlying sink.
pub struct BitWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    current: u8,
    bits_in_current: u8,
    bit_pos: u64,
}

impl<W: Write> BitWriter<W> {
    /// Create a writer positioned at bit zero.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(WRITE_BUFFER_SIZE),
            current: 0,
            bits_in_current: 0,
            bit_pos: 0,
        }
    }

    /// Number of bits written so far.
    #[inline]
    pub fn bit_position(&self) -> u64 {
        self.bit_pos
    }

    /// Append a single bit.
    pub fn write_bit(&mut self, bit: bool) -> io::Result<()> {
        if bit {
            self.current |= 0x80 >> self.bits_in_current;
        }
        self.bits_in_current += 1;
        self.bit_pos += 1;
        if self.bits_in_current == 8 {
            self.buffer.push(self.current);
            self.current = 0;
            self.bits_in_current = 0;
            if self.buffer.len() >= WRITE_BUFFER_SIZE {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    /// Append the low `count` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, count: u8) -> io::Result<()> {
        debug_assert!(count <= 64);
        for shift in (0..count).rev() {
            self.write_bit((value >> shift) & 1 == 1)?;
        }
        Ok(())
    }

    /// Append `value` in Elias-γ code. `value` must be at least one.
    pub fn write_gamma(&mut self, value: u64) -> Result<()> {
        if value == 0 {
            return Err(Error::usage("gamma code cannot represent zero"));
        }
        let width = 63 - value.leading_zeros() as u8;
        for _ in 0..width {
            self.write_bit(false)?;
        }
        self.write_bits(value, width + 1)?;
        Ok(())
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Pad the final partial byte with zeros, flush everything and return
    /// the sink.
    pub fn finish(mut self) -> io::Result<W> {
        if self.bits_in_current > 0 {
            self.buffer.push(self.current);
            self.current = 0;
            self.bits_in_current = 0;
        }
        self.flush_buffer()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Decodes γ-coded integers from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: u64,
}

impl<'a> BitReader<'a> {
    /// Create a reader positioned at bit zero.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a reader positioned at `bit_pos`.
    pub fn at(data: &'a [u8], bit_pos: u64) -> Result<Self> {
        let mut reader = Self::new(data);
        reader.seek(bit_pos)?;
        Ok(reader)
    }

    /// Total number of bits in the underlying slice.
    #[inline]
    pub fn total_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    /// Current bit offset.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move to an absolute bit offset.
    pub fn seek(&mut self, bit_pos: u64) -> Result<()> {
        if bit_pos > self.total_bits() {
            return Err(Error::corrupt(format!(
                "bit offset {} out of range ({} bits available)",
                bit_pos,
                self.total_bits()
            )));
        }
        self.pos = bit_pos;
        Ok(())
    }

    /// Whether another encoded value follows. Writers only ever leave fewer
    /// than eight zero padding bits at the end of a stream.
    pub fn has_next(&self) -> bool {
        let remaining = self.total_bits().saturating_sub(self.pos);
        if remaining == 0 {
            return false;
        }
        if remaining >= 8 {
            return true;
        }
        let last = self.data[self.data.len() - 1];
        let mask = (1u16 << remaining) as u8;
        last & mask.wrapping_sub(1) != 0
    }

    /// Read one bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.pos >= self.total_bits() {
            return Err(Error::corrupt(format!(
                "read past end of bit stream at bit {}",
                self.pos
            )));
        }
        let byte = self.data[(self.pos / 8) as usize];
        let bit = byte & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Ok(bit)
    }

    /// Read `count` bits as an unsigned integer, most significant first.
    pub fn read_bits(&mut self, count: u8) -> Result<u64> {
        debug_assert!(count <= 64);
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Read one Elias-γ coded value.
    pub fn read_gamma(&mut self) -> Result<u64> {
        let mut width = 0u8;
        while !self.read_bit()? {
            width += 1;
            if width > 63 {
                return Err(Error::corrupt(format!(
                    "gamma prefix longer than 63 bits ending at bit {}",
                    self.pos
                )));
            }
        }
        let rest = self.read_bits(width)?;
        Ok((1u64 << width) | rest)
    }
}
