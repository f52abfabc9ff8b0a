//! Growable big-endian byte buffer used by the wire codec.
//!
//! A [`ByteBuffer`] keeps two independent cursors: a write cursor advanced by the
//! `write_*` family and a read cursor advanced by the `read_*` family. Every
//! primitive also has a random-access variant (`*_at`) that neither reads nor
//! moves the cursors. The *filled size* is the high-water mark of everything
//! written so far; reads past it fail with [`WireError::Truncated`].

use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::message::WireError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    filled: usize,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Wraps already encoded bytes; the read cursor starts at the beginning and
    /// the write cursor at the end.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let data = bytes.into();
        let filled = data.len();
        Self {
            data,
            filled,
            read_pos: 0,
            write_pos: filled,
        }
    }

    pub fn read_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    /// Persists the filled bytes, regardless of the cursor positions.
    pub fn write_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.as_slice())
    }

    pub fn filled_size(&self) -> usize {
        self.filled
    }

    /// Bytes left between the read cursor and the filled size.
    pub fn remaining(&self) -> usize {
        self.filled.saturating_sub(self.read_pos)
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    pub fn seek_read(&mut self, offset: usize) {
        self.read_pos = offset;
    }

    pub fn seek_write(&mut self, offset: usize) {
        self.write_pos = offset;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    pub fn into_bytes(mut self) -> Bytes {
        self.data.truncate(self.filled);
        Bytes::from(self.data)
    }

    fn span(&self, offset: usize, len: usize) -> Result<&[u8], WireError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.filled => Ok(&self.data[offset..end]),
            _ => Err(WireError::Truncated {
                offset,
                needed: len,
                filled: self.filled,
            }),
        }
    }

    fn span_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let end = offset + len;
        if end > self.data.len() {
            let grown = end.max(self.data.len() * 2);
            self.data.resize(grown, 0);
        }
        self.filled = self.filled.max(end);
        &mut self.data[offset..end]
    }

    pub fn read_i8_at(&self, offset: usize) -> Result<i8, WireError> {
        Ok(self.span(offset, 1)?[0] as i8)
    }

    pub fn read_i16_at(&self, offset: usize) -> Result<i16, WireError> {
        Ok(BigEndian::read_i16(self.span(offset, 2)?))
    }

    pub fn read_i32_at(&self, offset: usize) -> Result<i32, WireError> {
        Ok(BigEndian::read_i32(self.span(offset, 4)?))
    }

    pub fn read_i64_at(&self, offset: usize) -> Result<i64, WireError> {
        Ok(BigEndian::read_i64(self.span(offset, 8)?))
    }

    pub fn read_f32_at(&self, offset: usize) -> Result<f32, WireError> {
        Ok(BigEndian::read_f32(self.span(offset, 4)?))
    }

    /// Reads a string at `offset`, returning it with the number of bytes it
    /// occupied (length prefix included).
    pub fn read_string_at(&self, offset: usize) -> Result<(String, usize), WireError> {
        let units = self.read_i32_at(offset)?;
        let units = usize::try_from(units).map_err(|_| WireError::NegativeLength(units))?;
        let raw = self.span(offset + 4, units * 2)?;
        let code_units: Vec<u16> = raw.chunks_exact(2).map(BigEndian::read_u16).collect();
        let string = String::from_utf16(&code_units).map_err(|_| WireError::InvalidUtf16)?;
        Ok((string, 4 + units * 2))
    }

    pub fn write_i8_at(&mut self, offset: usize, value: i8) {
        self.span_mut(offset, 1)[0] = value as u8;
    }

    pub fn write_i16_at(&mut self, offset: usize, value: i16) {
        BigEndian::write_i16(self.span_mut(offset, 2), value);
    }

    pub fn write_i32_at(&mut self, offset: usize, value: i32) {
        BigEndian::write_i32(self.span_mut(offset, 4), value);
    }

    pub fn write_i64_at(&mut self, offset: usize, value: i64) {
        BigEndian::write_i64(self.span_mut(offset, 8), value);
    }

    pub fn write_f32_at(&mut self, offset: usize, value: f32) {
        BigEndian::write_f32(self.span_mut(offset, 4), value);
    }

    /// Writes `value` as UTF-16 code units behind an i32 unit count and returns
    /// the number of bytes written.
    pub fn write_string_at(&mut self, offset: usize, value: &str) -> Result<usize, WireError> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let count = i32::try_from(units.len()).map_err(|_| WireError::TooLong(units.len()))?;
        self.write_i32_at(offset, count);
        let body = self.span_mut(offset + 4, units.len() * 2);
        for (chunk, unit) in body.chunks_exact_mut(2).zip(&units) {
            BigEndian::write_u16(chunk, *unit);
        }
        Ok(4 + units.len() * 2)
    }

    pub fn read_i8(&mut self) -> Result<i8, WireError> {
        let value = self.read_i8_at(self.read_pos)?;
        self.read_pos += 1;
        Ok(value)
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        let value = self.read_i16_at(self.read_pos)?;
        self.read_pos += 2;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let value = self.read_i32_at(self.read_pos)?;
        self.read_pos += 4;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let value = self.read_i64_at(self.read_pos)?;
        self.read_pos += 8;
        Ok(value)
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let value = self.read_f32_at(self.read_pos)?;
        self.read_pos += 4;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let (value, len) = self.read_string_at(self.read_pos)?;
        self.read_pos += len;
        Ok(value)
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_i8_at(self.write_pos, value);
        self.write_pos += 1;
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_i16_at(self.write_pos, value);
        self.write_pos += 2;
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_i32_at(self.write_pos, value);
        self.write_pos += 4;
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_i64_at(self.write_pos, value);
        self.write_pos += 8;
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_f32_at(self.write_pos, value);
        self.write_pos += 4;
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        let len = self.write_string_at(self.write_pos, value)?;
        self.write_pos += len;
        Ok(())
    }
}
