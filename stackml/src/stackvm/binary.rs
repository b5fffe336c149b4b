//! Little-endian wire helpers shared by the instruction and module encoders.

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[inline]
pub fn write_u8(buf: &mut Vec<u8>, val: u8) {
    buf.push(val);
}

#[inline]
pub fn write_u32_le(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

#[inline]
pub fn write_i32_le(buf: &mut Vec<u8>, val: i32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

#[inline]
pub fn write_u64_le(buf: &mut Vec<u8>, val: u64) {
    buf.extend_from_slice(&val.to_le_bytes());
}

#[inline]
pub fn write_f32_le(buf: &mut Vec<u8>, val: f32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// `u32` length prefix followed by the bytes.
pub fn write_blob(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::program(format!("blob of {} bytes is too large", bytes.len())))?;
    write_u32_le(buf, len);
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Checked narrowing for operands that are encoded as `u32`.
pub fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::program(format!("{what} {value} does not fit in u32")))
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Cursor over an encoded byte stream. Every read is bounds-checked and fails
/// with `InvalidProgram` on truncation.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self
            .pos
            .checked_add(len)
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or_else(|| {
                Error::program(format!(
                    "unexpected end of stream: {len} bytes wanted at offset {}, {} left",
                    self.pos,
                    self.remaining()
                ))
            })?;
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        self.read_array().map(f32::from_le_bytes)
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32_le()? as usize;
        self.read_bytes(len)
    }
}
