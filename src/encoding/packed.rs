//! # Bit-Packed Element Storage
//!
//! Fixed-width element storage over a flat `u64` word buffer. Records pack
//! their fields back to back at arbitrary bit offsets, so an element of
//! width `w` may straddle a word boundary:
//!
//! ```text
//! words:   [ ....HHHH HHHHLLLL ]  element bits split across two words
//!                word k+1  word k
//! offset = record_ordinal * bits_per_record + field_bit_offset
//! ```
//!
//! The backing buffer always carries one guard word past the last
//! addressable bit. Straddling reads can therefore always touch
//! `words[k + 1]` without a branch; the guard is never addressed by any
//! in-range element and stays zero.
//!
//! ## Thread Safety
//!
//! A `PackedArray` is immutable after construction in all published
//! storage (readers share it behind `Arc`); `set` and `copy_bits` are
//! used only while a private buffer is being assembled by the update
//! thread.

/// All-ones mask covering the low `width` bits. `width` must be 1..=64.
pub const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Bits needed to represent `pattern`; at least 1.
pub const fn bits_for(pattern: u64) -> u32 {
    let bits = 64 - pattern.leading_zeros();
    if bits == 0 {
        1
    } else {
        bits
    }
}

/// Flat bit buffer holding fixed-width elements, with a trailing guard
/// word so straddling reads never branch.
pub struct PackedArray {
    words: Vec<u64>,
}

impl std::fmt::Debug for PackedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedArray")
            .field("words", &self.words.len())
            .finish()
    }
}

impl PackedArray {
    /// Number of backing words (guard included) needed to address `bits`.
    pub fn backing_len(bits: u64) -> usize {
        (bits.div_ceil(64) + 1) as usize
    }

    /// A zeroed array addressable up to `bits`.
    pub fn with_bit_capacity(bits: u64) -> Self {
        Self {
            words: vec![0; Self::backing_len(bits)],
        }
    }

    /// Wraps an already-sized, zero-filled backing buffer (typically from
    /// the recycler). The buffer length must come from [`backing_len`]
    /// so the guard word is present.
    ///
    /// [`backing_len`]: PackedArray::backing_len
    pub fn from_backing(words: Vec<u64>) -> Self {
        debug_assert!(!words.is_empty());
        Self { words }
    }

    /// Reads `width` bits starting at absolute bit `offset`.
    pub fn get(&self, offset: u64, width: u32) -> u64 {
        debug_assert!((1..=64).contains(&width));
        let word = (offset >> 6) as usize;
        let shift = (offset & 63) as u32;
        let low = self.words[word] >> shift;
        let value = if shift == 0 {
            low
        } else {
            low | (self.words[word + 1] << (64 - shift))
        };
        value & mask(width)
    }

    /// Writes the low `width` bits of `value` at absolute bit `offset`.
    /// Bits outside the element are preserved.
    pub fn set(&mut self, offset: u64, width: u32, value: u64) {
        debug_assert!((1..=64).contains(&width));
        let word = (offset >> 6) as usize;
        let shift = (offset & 63) as u32;
        let m = mask(width);
        let v = value & m;

        self.words[word] = (self.words[word] & !(m << shift)) | (v << shift);
        if shift + width > 64 {
            let spill = shift + width - 64;
            let high_mask = mask(spill);
            self.words[word + 1] = (self.words[word + 1] & !high_mask) | (v >> (64 - shift));
        }
    }

    /// Copies `len` bits from `src` starting at `src_offset` into `self`
    /// starting at `dst_offset`. Used by resharding to move whole records
    /// between identically-laid-out buffers.
    pub fn copy_bits(&mut self, mut dst_offset: u64, src: &PackedArray, mut src_offset: u64, mut len: u64) {
        while len >= 64 {
            self.set(dst_offset, 64, src.get(src_offset, 64));
            dst_offset += 64;
            src_offset += 64;
            len -= 64;
        }
        if len > 0 {
            self.set(dst_offset, len as u32, src.get(src_offset, len as u32));
        }
    }

    /// Backing words, guard included.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Consumes the array, releasing the backing buffer for recycling.
    pub fn into_backing(self) -> Vec<u64> {
        self.words
    }

    pub fn heap_bytes(&self) -> usize {
        self.words.capacity() * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_widths() {
        assert_eq!(mask(1), 1);
        assert_eq!(mask(7), 0x7F);
        assert_eq!(mask(63), u64::MAX >> 1);
        assert_eq!(mask(64), u64::MAX);
    }

    #[test]
    fn bits_for_patterns() {
        assert_eq!(bits_for(0), 1);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(255), 8);
        assert_eq!(bits_for(256), 9);
        assert_eq!(bits_for(u64::MAX), 64);
    }

    #[test]
    fn set_get_within_one_word() {
        let mut arr = PackedArray::with_bit_capacity(256);
        arr.set(3, 11, 0b101_1100_1010);
        assert_eq!(arr.get(3, 11), 0b101_1100_1010);
        assert_eq!(arr.get(0, 3), 0);
        assert_eq!(arr.get(14, 8), 0);
    }

    #[test]
    fn set_get_straddles_word_boundary() {
        let mut arr = PackedArray::with_bit_capacity(256);
        arr.set(60, 17, 0x1_ABCD);
        assert_eq!(arr.get(60, 17), 0x1_ABCD);

        arr.set(120, 64, u64::MAX);
        assert_eq!(arr.get(120, 64), u64::MAX);
        assert_eq!(arr.get(60, 17), 0x1_ABCD, "neighbor write must not clobber");
    }

    #[test]
    fn full_width_at_odd_offsets() {
        let mut arr = PackedArray::with_bit_capacity(1024);
        for i in 0..8u64 {
            arr.set(i * 64 + 13, 64, 0xDEAD_BEEF_0000_0000 | i);
        }
        for i in 0..8u64 {
            assert_eq!(arr.get(i * 64 + 13, 64), 0xDEAD_BEEF_0000_0000 | i);
        }
    }

    #[test]
    fn overwrite_preserves_neighbors() {
        let mut arr = PackedArray::with_bit_capacity(128);
        arr.set(0, 5, 0b10101);
        arr.set(5, 5, 0b11111);
        arr.set(10, 5, 0b01010);

        arr.set(5, 5, 0b00001);

        assert_eq!(arr.get(0, 5), 0b10101);
        assert_eq!(arr.get(5, 5), 0b00001);
        assert_eq!(arr.get(10, 5), 0b01010);
    }

    #[test]
    fn last_element_read_uses_guard_word() {
        let bits = 64 * 3;
        let mut arr = PackedArray::with_bit_capacity(bits);
        assert_eq!(arr.words().len(), 4);

        arr.set(bits - 7, 7, 0x55);
        assert_eq!(arr.get(bits - 7, 7), 0x55);
    }

    #[test]
    fn copy_bits_moves_unaligned_ranges() {
        let mut src = PackedArray::with_bit_capacity(512);
        for i in 0..16u64 {
            src.set(i * 21, 21, (i * 0x1F3F) & mask(21));
        }

        let mut dst = PackedArray::with_bit_capacity(512);
        dst.copy_bits(100, &src, 0, 21 * 16);

        for i in 0..16u64 {
            assert_eq!(dst.get(100 + i * 21, 21), (i * 0x1F3F) & mask(21));
        }
    }

    #[test]
    fn copy_bits_exact_word_multiples() {
        let mut src = PackedArray::with_bit_capacity(256);
        src.set(0, 64, 0x0123_4567_89AB_CDEF);
        src.set(64, 64, 0xFEDC_BA98_7654_3210);

        let mut dst = PackedArray::with_bit_capacity(256);
        dst.copy_bits(64, &src, 0, 128);

        assert_eq!(dst.get(64, 64), 0x0123_4567_89AB_CDEF);
        assert_eq!(dst.get(128, 64), 0xFEDC_BA98_7654_3210);
    }
}
