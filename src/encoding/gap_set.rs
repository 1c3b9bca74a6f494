//! # Gap-Encoded Ordinal Sets
//!
//! A strictly increasing sequence of non-negative ordinals stored as
//! varint-encoded gaps: the first gap is the first ordinal itself, each
//! later gap is the distance to the predecessor. Removal and addition
//! sets in delta streams use this form because consecutive ordinals
//! collapse to single-byte gaps.
//!
//! ```text
//! ordinals  [3, 7, 8, 31]
//! gaps      [3, 4, 1, 23]     (each varint-encoded)
//! ```
//!
//! ## Invariants
//!
//! Every constructor either validates or preserves the encoding
//! invariants (gaps after the first are >= 1, the running sum stays
//! within `i32`), so [`iter`] can decode infallibly. `combine` assumes
//! its inputs already satisfy them; it is the caller's responsibility
//! not to feed it hand-built buffers.
//!
//! [`iter`]: OrdinalGapSet::iter

use eyre::{ensure, Result};

use crate::encoding::varint::{decode_varint, put_varint};
use crate::memory::SegmentRecycler;

/// Gap-encoded set of strictly increasing non-negative ordinals.
#[derive(Debug, Default)]
pub struct OrdinalGapSet {
    gaps: Vec<u8>,
    count: usize,
}

impl OrdinalGapSet {
    /// The empty set. Allocation-free; the common case for deltas with
    /// no removals.
    pub const fn new() -> Self {
        Self {
            gaps: Vec::new(),
            count: 0,
        }
    }

    /// Builds a set from already-sorted ordinals, validating strict
    /// monotonicity.
    pub fn from_sorted<I>(ordinals: I) -> Result<Self>
    where
        I: IntoIterator<Item = i32>,
    {
        let mut gaps = Vec::new();
        let mut prev = 0i64;
        let mut count = 0usize;
        for ordinal in ordinals {
            ensure!(ordinal >= 0, "negative ordinal {} in gap set", ordinal);
            let ordinal = ordinal as i64;
            if count > 0 {
                ensure!(
                    ordinal > prev,
                    "ordinals must be strictly increasing: {} after {}",
                    ordinal,
                    prev
                );
            }
            put_varint((ordinal - prev) as u64, &mut gaps);
            prev = ordinal;
            count += 1;
        }
        Ok(Self { gaps, count })
    }

    /// Adopts a raw gap buffer (typically sliced out of a delta stream),
    /// validating every gap before accepting it.
    pub fn from_gap_buffer(gaps: Vec<u8>) -> Result<Self> {
        let count = scan_gaps(&gaps)?;
        Ok(Self { gaps, count })
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Iterates the ordinals in increasing order. Restartable: each call
    /// yields a fresh iterator over the same set.
    pub fn iter(&self) -> GapSetIter<'_> {
        GapSetIter {
            bytes: &self.gaps,
            pos: 0,
            prev: 0,
        }
    }

    /// Sorted union of two sets. Duplicates collapse. The output buffer
    /// comes from the recycler so update cycles reuse segments.
    pub fn combine(a: &Self, b: &Self, recycler: &mut SegmentRecycler) -> Self {
        let mut gaps = recycler.acquire_bytes();
        let mut count = 0usize;
        let mut prev = 0i64;

        let mut left = a.iter();
        let mut right = b.iter();
        let mut x = left.next();
        let mut y = right.next();

        while x.is_some() || y.is_some() {
            let next = match (x, y) {
                (Some(l), Some(r)) => {
                    if l < r {
                        x = left.next();
                        l
                    } else if r < l {
                        y = right.next();
                        r
                    } else {
                        x = left.next();
                        y = right.next();
                        l
                    }
                }
                (Some(l), None) => {
                    x = left.next();
                    l
                }
                (None, Some(r)) => {
                    y = right.next();
                    r
                }
                (None, None) => break,
            };
            put_varint((next as i64 - prev) as u64, &mut gaps);
            prev = next as i64;
            count += 1;
        }

        Self { gaps, count }
    }

    /// Appends the wire form: varint byte length, then the gap bytes.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        put_varint(self.gaps.len() as u64, out);
        out.extend_from_slice(&self.gaps);
    }

    /// Returns the backing buffer to the recycler.
    pub fn recycle_into(self, recycler: &mut SegmentRecycler) {
        recycler.recycle_bytes(self.gaps);
    }

    pub fn heap_bytes(&self) -> usize {
        self.gaps.capacity()
    }
}

/// Validates a gap buffer and returns the element count.
fn scan_gaps(bytes: &[u8]) -> Result<usize> {
    let mut pos = 0usize;
    let mut count = 0usize;
    let mut value = 0i64;
    while pos < bytes.len() {
        let (gap, used) = decode_varint(&bytes[pos..])?;
        ensure!(
            count == 0 || gap >= 1,
            "zero gap after first element in gap set"
        );
        ensure!(gap <= i32::MAX as u64, "gap {} overflows ordinal range", gap);
        value += gap as i64;
        ensure!(
            value <= i32::MAX as i64,
            "gap set ordinal {} overflows i32",
            value
        );
        pos += used;
        count += 1;
    }
    Ok(count)
}

pub struct GapSetIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    prev: i64,
}

impl Iterator for GapSetIter<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        // INVARIANT: constructors validated the buffer, so decode cannot fail here.
        let Ok((gap, used)) = decode_varint(&self.bytes[self.pos..]) else {
            debug_assert!(false, "gap set buffer failed mid-iteration");
            self.pos = self.bytes.len();
            return None;
        };
        self.pos += used;
        self.prev += gap as i64;
        Some(self.prev as i32)
    }
}
