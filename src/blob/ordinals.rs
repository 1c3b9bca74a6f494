//! Wire form of the populated-ordinals bitmap.
//!
//! Snapshots end with one bitmap per type marking which ordinals hold
//! live records. The encoding is the bitset's own word array: a varint
//! word count followed by that many little-endian `u64` words, so decode
//! adopts the words without conversion.

use eyre::{eyre, Result};

use crate::blob::BlobInput;
use crate::encoding::varint::put_varint;
use crate::encoding::OrdinalBitSet;

pub fn write_populated_ordinals(bits: &OrdinalBitSet, out: &mut Vec<u8>) {
    let words = bits.words();
    put_varint(words.len() as u64, out);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

pub fn read_populated_ordinals(input: &mut BlobInput<'_>) -> Result<OrdinalBitSet> {
    let count = input.read_len()?;
    let words = input.read_words(count)?;
    Ok(OrdinalBitSet::from_words(words.iter().map(|w| w.get()).collect()))
}

/// Skips a bitmap without materializing it.
pub fn discard_populated_ordinals(input: &mut BlobInput<'_>) -> Result<()> {
    let count = input.read_len()?;
    let byte_len = count
        .checked_mul(8)
        .ok_or_else(|| eyre!("word count {} overflows byte length", count))?;
    input.skip(byte_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_round_trips() {
        let mut bits = OrdinalBitSet::new();
        for ordinal in [0, 57, 63, 64, 511] {
            bits.set(ordinal);
        }

        let mut out = Vec::new();
        write_populated_ordinals(&bits, &mut out);

        let mut input = BlobInput::new(&out);
        let decoded = read_populated_ordinals(&mut input).unwrap();
        assert!(input.is_exhausted());

        assert_eq!(decoded.cardinality(), 5);
        for ordinal in [0, 57, 63, 64, 511] {
            assert!(decoded.contains(ordinal));
        }
        assert!(!decoded.contains(1));
    }

    #[test]
    fn empty_bitmap_round_trips() {
        let bits = OrdinalBitSet::new();
        let mut out = Vec::new();
        write_populated_ordinals(&bits, &mut out);

        let mut input = BlobInput::new(&out);
        let decoded = read_populated_ordinals(&mut input).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn discard_leaves_cursor_after_bitmap() {
        let mut bits = OrdinalBitSet::new();
        bits.set(100);

        let mut out = Vec::new();
        write_populated_ordinals(&bits, &mut out);
        out.push(0xEE);

        let mut input = BlobInput::new(&out);
        discard_populated_ordinals(&mut input).unwrap();
        assert_eq!(input.read_exact(1).unwrap(), &[0xEE]);
    }

    #[test]
    fn truncated_bitmap_errors() {
        let mut bits = OrdinalBitSet::new();
        bits.set(64);
        let mut out = Vec::new();
        write_populated_ordinals(&bits, &mut out);
        out.truncate(out.len() - 1);

        let mut input = BlobInput::new(&out);
        assert!(read_populated_ordinals(&mut input).is_err());
    }
}
