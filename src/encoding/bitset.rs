//! # Ordinal Bitsets
//!
//! Dense `u64`-word bitset over the ordinal space. Tracks which ordinals
//! of a type are populated: the snapshot wire format carries one of these
//! per type, delta listeners maintain one incrementally, and checksum and
//! hole-cost walks restrict themselves to its set bits.
//!
//! The word array is also the wire representation (little-endian words,
//! see `blob::ordinals`), so no conversion happens at either edge.

/// Growable bitset addressed by non-negative ordinals.
#[derive(Debug, Default, Clone)]
pub struct OrdinalBitSet {
    words: Vec<u64>,
}

impl OrdinalBitSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Pre-sizes the backing words to cover `0..=max_ordinal`.
    pub fn with_max_ordinal(max_ordinal: i32) -> Self {
        let words = if max_ordinal < 0 {
            Vec::new()
        } else {
            vec![0; (max_ordinal as usize / 64) + 1]
        };
        Self { words }
    }

    /// Adopts wire words directly.
    pub fn from_words(words: Vec<u64>) -> Self {
        Self { words }
    }

    pub fn set(&mut self, ordinal: i32) {
        debug_assert!(ordinal >= 0);
        let idx = ordinal as usize / 64;
        if idx >= self.words.len() {
            self.words.resize(idx + 1, 0);
        }
        self.words[idx] |= 1u64 << (ordinal as usize % 64);
    }

    pub fn clear(&mut self, ordinal: i32) {
        if ordinal < 0 {
            return;
        }
        let idx = ordinal as usize / 64;
        if idx < self.words.len() {
            self.words[idx] &= !(1u64 << (ordinal as usize % 64));
        }
    }

    pub fn contains(&self, ordinal: i32) -> bool {
        if ordinal < 0 {
            return false;
        }
        let idx = ordinal as usize / 64;
        idx < self.words.len() && (self.words[idx] >> (ordinal as usize % 64)) & 1 == 1
    }

    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, &word)| {
            let base = (idx * 64) as i32;
            std::iter::successors(
                if word == 0 { None } else { Some(word) },
                |w| {
                    let next = w & (w - 1);
                    (next != 0).then_some(next)
                },
            )
            .map(move |w| base + w.trailing_zeros() as i32)
        })
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn heap_bytes(&self) -> usize {
        self.words.capacity() * 8
    }
}
