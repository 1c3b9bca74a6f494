//! # State Checksums
//!
//! Order-insensitive digest over the populated records of a type. Each
//! record contributes a CRC of its global ordinal and field contents;
//! the fold combines contributions with commutative operations only, so
//! two states holding the same records checksum equal no matter how the
//! records are distributed across shards. Splitting or joining shards
//! is therefore directly assertable as checksum-preserving.

use crc::{Crc, CRC_32_ISCSI};

/// Record digests and var-payload hashes use CRC-32/iSCSI.
pub(crate) const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Running checksum of a record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateChecksum {
    sum: u64,
    xor: u64,
    count: u64,
}

impl StateChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record in. Commutative, so fold order cannot affect
    /// [`value`].
    ///
    /// [`value`]: StateChecksum::value
    pub fn fold(&mut self, record_digest: u32, global_ordinal: i32) {
        let mixed = mix64(((global_ordinal as u32 as u64) << 32) | record_digest as u64);
        self.sum = self.sum.wrapping_add(mixed);
        self.xor ^= mixed;
        self.count += 1;
    }

    /// Records folded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Final digest over everything folded so far.
    pub fn value(&self) -> u64 {
        mix64(self.sum ^ mix64(self.xor ^ mix64(self.count)))
    }
}

/// 64-bit finalizer with full avalanche, so near-identical inputs land
/// far apart before the commutative fold flattens them.
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_order_does_not_matter() {
        let records = [(0xAAAA_0001u32, 0), (0xBBBB_0002, 57), (0xCCCC_0003, 99)];

        let mut forward = StateChecksum::new();
        for &(digest, ordinal) in &records {
            forward.fold(digest, ordinal);
        }

        let mut backward = StateChecksum::new();
        for &(digest, ordinal) in records.iter().rev() {
            backward.fold(digest, ordinal);
        }

        assert_eq!(forward, backward);
        assert_eq!(forward.value(), backward.value());
        assert_eq!(forward.count(), 3);
    }

    #[test]
    fn different_sets_diverge() {
        let mut a = StateChecksum::new();
        a.fold(1, 0);
        a.fold(2, 1);

        let mut b = StateChecksum::new();
        b.fold(1, 0);
        b.fold(3, 1);

        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn ordinal_binds_the_record() {
        let mut a = StateChecksum::new();
        a.fold(7, 0);

        let mut b = StateChecksum::new();
        b.fold(7, 1);

        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn empty_checksums_agree() {
        assert_eq!(StateChecksum::new().value(), StateChecksum::new().value());
        assert_eq!(StateChecksum::new().count(), 0);
    }
}
