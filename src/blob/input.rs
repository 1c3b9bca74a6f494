//! Byte cursor over an encoded snapshot or delta section.

use eyre::{ensure, eyre, Result};
use zerocopy::little_endian::U64;
use zerocopy::FromBytes;

use crate::encoding::varint::decode_varint;

/// Forward-only cursor over a borrowed byte buffer. All reads are length
/// checked; a short buffer surfaces as a truncated-stream error, never a
/// panic, so malformed input can be rejected mid-decode.
pub struct BlobInput<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlobInput<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Reads one varint and advances past it.
    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, used) = decode_varint(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    /// Reads a varint that must fit a collection length on this host.
    pub fn read_len(&mut self) -> Result<usize> {
        let value = self.read_varint()?;
        usize::try_from(value).map_err(|_| eyre!("length {} exceeds address space", value))
    }

    /// Borrows the next `len` bytes and advances past them.
    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            self.remaining() >= len,
            "truncated stream: need {} bytes, have {}",
            len,
            self.remaining()
        );
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Borrows the next `count` little-endian words and advances past
    /// them.
    pub fn read_words(&mut self, count: usize) -> Result<&'a [U64]> {
        let byte_len = count
            .checked_mul(8)
            .ok_or_else(|| eyre!("word count {} overflows byte length", count))?;
        let bytes = self.read_exact(byte_len)?;
        // INVARIANT: U64 is unaligned and byte_len is a multiple of 8, so the cast cannot fail.
        <[U64]>::ref_from_bytes(bytes).map_err(|_| eyre!("word buffer cast failed"))
    }

    /// Skips `len` bytes without inspecting them.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        ensure!(
            self.remaining() >= len,
            "truncated stream: cannot skip {} bytes, have {}",
            len,
            self.remaining()
        );
        self.pos += len;
        Ok(())
    }
}
