//! # Shards
//!
//! One horizontal partition of a type's ordinal space. A shard is a
//! single atomically-swappable (mapping, generation) pair: readers load
//! the pair once per call and see a consistent view even while the
//! update thread is publishing a successor.
//!
//! ## Split staging
//!
//! While a shard count is doubling, the staged shards alias the
//! pre-split generation through a parity mapping: staged local ordinal
//! `L` addresses pre-split local `2L + parity`. Publishing the physical
//! halves later replaces the mapping and the generation in one swap, so
//! no reader can pair a staged mapping with post-split data.

use std::sync::Arc;

use arc_swap::ArcSwap;
use eyre::{ensure, Result};

use crate::checksum::CASTAGNOLI;
use crate::memory::SegmentRecycler;
use crate::store::generation::Generation;

/// How shard-local ordinals map onto the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShardMapping {
    Stable,
    Splitting { parity: i32 },
}

impl ShardMapping {
    fn translate(self, local: i32) -> i32 {
        match self {
            ShardMapping::Stable => local,
            ShardMapping::Splitting { parity } => 2 * local + parity,
        }
    }

    /// Highest local ordinal visible through this mapping.
    fn visible_max(self, generation_max: i32) -> i32 {
        match self {
            ShardMapping::Stable => generation_max,
            ShardMapping::Splitting { parity } => {
                if generation_max < parity {
                    -1
                } else {
                    (generation_max - parity) / 2
                }
            }
        }
    }
}

/// The published state of a shard. Immutable once built.
#[derive(Debug)]
pub(crate) struct ShardState {
    mapping: ShardMapping,
    data: Generation,
}

impl ShardState {
    pub(crate) fn mapping(&self) -> ShardMapping {
        self.mapping
    }

    pub(crate) fn data(&self) -> &Generation {
        &self.data
    }

    /// Local ordinal resolved to a generation ordinal, bounds checked.
    fn locate(&self, local: i32) -> Result<i32> {
        ensure!(
            local >= 0 && local <= self.mapping.visible_max(self.data.max_ordinal()),
            "ordinal beyond shard maximum {}",
            self.mapping.visible_max(self.data.max_ordinal())
        );
        Ok(self.mapping.translate(local))
    }
}

pub(crate) struct Shard {
    state: ArcSwap<ShardState>,
}

impl Shard {
    pub(crate) fn stable(data: Generation) -> Self {
        Self {
            state: ArcSwap::from_pointee(ShardState {
                mapping: ShardMapping::Stable,
                data,
            }),
        }
    }

    pub(crate) fn staged(parity: i32, data: Generation) -> Self {
        Self {
            state: ArcSwap::from_pointee(ShardState {
                mapping: ShardMapping::Splitting { parity },
                data,
            }),
        }
    }

    /// Atomically replaces this shard's state with a stable mapping over
    /// `data`. The superseded state stays alive for in-flight readers.
    pub(crate) fn publish_stable(&self, data: Generation) {
        self.state.store(Arc::new(ShardState {
            mapping: ShardMapping::Stable,
            data,
        }));
    }

    /// The current state, pinned for the writer to inspect.
    pub(crate) fn current(&self) -> Arc<ShardState> {
        self.state.load_full()
    }

    /// Recycles the state's buffers if this shard held the last
    /// reference; otherwise the last in-flight reader frees them.
    pub(crate) fn reclaim(self, recycler: &mut SegmentRecycler) {
        if let Ok(state) = Arc::try_unwrap(self.state.into_inner()) {
            state.data.recycle_into(recycler);
        }
    }

    /// Recycles a writer-held state handle once it is unreferenced.
    pub(crate) fn reclaim_state(state: Arc<ShardState>, recycler: &mut SegmentRecycler) {
        if let Ok(state) = Arc::try_unwrap(state) {
            state.data.recycle_into(recycler);
        }
    }

    pub(crate) fn is_null(&self, local: i32, field: usize) -> Result<bool> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.is_null(at, field))
    }

    pub(crate) fn read_int(&self, local: i32, field: usize) -> Result<Option<i32>> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.read_int(at, field))
    }

    pub(crate) fn read_long(&self, local: i32, field: usize) -> Result<Option<i64>> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.read_long(at, field))
    }

    pub(crate) fn read_float(&self, local: i32, field: usize) -> Result<Option<f32>> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.read_float(at, field))
    }

    pub(crate) fn read_double(&self, local: i32, field: usize) -> Result<Option<f64>> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.read_double(at, field))
    }

    pub(crate) fn read_bool(&self, local: i32, field: usize) -> Result<Option<bool>> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.read_bool(at, field))
    }

    pub(crate) fn read_ordinal(&self, local: i32, field: usize) -> Result<i32> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.read_ordinal(at, field))
    }

    /// Owned copy of a var-length payload, `None` for null.
    pub(crate) fn read_var(&self, local: i32, field: usize) -> Result<Option<Vec<u8>>> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.var_payload(at, field)?.map(<[u8]>::to_vec))
    }

    /// Zero-copy payload comparison. Null never equals.
    pub(crate) fn is_var_equal(&self, local: i32, field: usize, test: &[u8]) -> Result<bool> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(state.data.var_payload(at, field)? == Some(test))
    }

    /// Payload hash, or -1 for null.
    pub(crate) fn var_hash(&self, local: i32, field: usize) -> Result<i32> {
        let state = self.state.load();
        let at = state.locate(local)?;
        Ok(match state.data.var_payload(at, field)? {
            None => -1,
            Some(payload) => CASTAGNOLI.checksum(payload) as i32,
        })
    }

    /// Content digest of one record, see `Generation::record_digest`.
    pub(crate) fn record_digest(&self, local: i32, global: i32, fields: &[usize]) -> Result<u32> {
        let state = self.state.load();
        let at = state.locate(local)?;
        state.data.record_digest(at, global, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::packed::PackedArray;
    use crate::encoding::OrdinalGapSet;
    use crate::schema::{FieldDef, FieldKind, Schema};
    use crate::store::generation::RecordLayout;

    /// Five records of a single int field, values 0..=4 at width 4.
    fn five_ints() -> Generation {
        let schema = Arc::new(
            Schema::new("Num", vec![FieldDef::new("v", FieldKind::Int)]).unwrap(),
        );
        let layout = RecordLayout::new([4]);
        let mut fixed = PackedArray::with_bit_capacity(5 * layout.bits_per_record());
        for ordinal in 0..5 {
            fixed.set(
                layout.offset_of(ordinal, 0),
                4,
                crate::encoding::zigzag::zigzag32(ordinal) as u64,
            );
        }
        Generation::from_parts(schema, layout, fixed, vec![], 4, OrdinalGapSet::new())
    }

    #[test]
    fn stable_mapping_reads_directly() {
        let shard = Shard::stable(five_ints());
        assert_eq!(shard.read_int(0, 0).unwrap(), Some(0));
        assert_eq!(shard.read_int(4, 0).unwrap(), Some(4));
        assert!(shard.read_int(5, 0).is_err());
        assert!(shard.read_int(-1, 0).is_err());
    }

    #[test]
    fn staged_mapping_aliases_by_parity() {
        let even = Shard::staged(0, five_ints());
        let odd = Shard::staged(1, five_ints());

        // locals address pre-split ordinals 2L + parity
        assert_eq!(even.read_int(0, 0).unwrap(), Some(0));
        assert_eq!(even.read_int(1, 0).unwrap(), Some(2));
        assert_eq!(even.read_int(2, 0).unwrap(), Some(4));
        assert!(even.read_int(3, 0).is_err());

        assert_eq!(odd.read_int(0, 0).unwrap(), Some(1));
        assert_eq!(odd.read_int(1, 0).unwrap(), Some(3));
        assert!(odd.read_int(2, 0).is_err());
    }

    #[test]
    fn publish_replaces_mapping_and_data_together() {
        let shard = Shard::staged(1, five_ints());
        assert_eq!(shard.read_int(0, 0).unwrap(), Some(1));

        shard.publish_stable(five_ints());
        assert_eq!(shard.read_int(0, 0).unwrap(), Some(0));
        assert_eq!(shard.current().mapping(), ShardMapping::Stable);
    }

    #[test]
    fn visible_max_shrinks_under_staging() {
        assert_eq!(ShardMapping::Stable.visible_max(4), 4);
        assert_eq!(ShardMapping::Splitting { parity: 0 }.visible_max(4), 2);
        assert_eq!(ShardMapping::Splitting { parity: 1 }.visible_max(4), 1);
        assert_eq!(ShardMapping::Splitting { parity: 0 }.visible_max(-1), -1);
        assert_eq!(ShardMapping::Splitting { parity: 1 }.visible_max(0), -1);
    }
}
