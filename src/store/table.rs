//! # Shard Table
//!
//! Routes global ordinals to shards. The shard count is always a power
//! of two, so routing is two register operations:
//!
//! ```text
//! shard index = ordinal & shard_mask        (low bits)
//! local       = ordinal >> ordinal_shift    (high bits)
//! global      = (local << ordinal_shift) | shard index
//! ```
//!
//! A table is immutable; resharding builds a new table and swaps it in
//! whole, so a reader never mixes routing parameters from two layouts.

use std::sync::Arc;

use crate::memory::SegmentRecycler;
use crate::store::shard::Shard;

pub(crate) struct ShardTable {
    shards: Vec<Shard>,
    shard_mask: u32,
    ordinal_shift: u32,
}

impl ShardTable {
    /// Builds a table over `shards`. The count must be a nonzero power
    /// of two; construction sites validate before calling.
    pub(crate) fn new(shards: Vec<Shard>) -> Self {
        debug_assert!(shards.len().is_power_of_two());
        let shard_mask = shards.len() as u32 - 1;
        let ordinal_shift = shard_mask.count_ones();
        Self {
            shards,
            shard_mask,
            ordinal_shift,
        }
    }

    pub(crate) fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub(crate) fn shard(&self, index: usize) -> &Shard {
        &self.shards[index]
    }

    /// Shard index and shard-local ordinal for a nonnegative global.
    pub(crate) fn route(&self, ordinal: i32) -> (usize, i32) {
        debug_assert!(ordinal >= 0);
        (
            (ordinal as u32 & self.shard_mask) as usize,
            ordinal >> self.ordinal_shift,
        )
    }

    pub(crate) fn shard_for(&self, ordinal: i32) -> (&Shard, i32) {
        let (index, local) = self.route(ordinal);
        (&self.shards[index], local)
    }

    /// Reassembles a global ordinal from a shard index and local.
    pub(crate) fn global_ordinal(&self, shard_index: usize, local: i32) -> i32 {
        (local << self.ordinal_shift) | shard_index as i32
    }

    /// Recycles every shard's buffers once the table is unreferenced.
    /// A table still pinned by readers is left for them to drop.
    pub(crate) fn reclaim(table: Arc<ShardTable>, recycler: &mut SegmentRecycler) {
        if let Ok(table) = Arc::try_unwrap(table) {
            for shard in table.shards {
                shard.reclaim(recycler);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldKind, Schema};
    use crate::store::generation::Generation;

    fn empty_table(count: usize) -> ShardTable {
        let schema = Arc::new(
            Schema::new("Row", vec![FieldDef::new("v", FieldKind::Int)]).unwrap(),
        );
        ShardTable::new(
            (0..count)
                .map(|_| Shard::stable(Generation::empty(Arc::clone(&schema))))
                .collect(),
        )
    }

    #[test]
    fn single_shard_routes_identity() {
        let table = empty_table(1);
        assert_eq!(table.route(0), (0, 0));
        assert_eq!(table.route(77), (0, 77));
        assert_eq!(table.global_ordinal(0, 77), 77);
    }

    #[test]
    fn four_shards_split_low_bits() {
        let table = empty_table(4);
        assert_eq!(table.route(0), (0, 0));
        assert_eq!(table.route(1), (1, 0));
        assert_eq!(table.route(2), (2, 0));
        assert_eq!(table.route(3), (3, 0));
        assert_eq!(table.route(4), (0, 1));
        assert_eq!(table.route(23), (3, 5));
    }

    #[test]
    fn routing_round_trips_through_global() {
        let table = empty_table(8);
        for ordinal in [0, 1, 7, 8, 63, 64, 1_000_003, i32::MAX] {
            let (index, local) = table.route(ordinal);
            assert_eq!(table.global_ordinal(index, local), ordinal);
        }
    }
}
