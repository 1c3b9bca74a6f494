//! # Update Listeners
//!
//! Hooks invoked by the update thread as state transitions land. A
//! snapshot reports the full populated bitmap; a delta reports each
//! shard's exact removal and addition sets in shard-local terms, with
//! enough routing context to reconstruct global ordinals.
//!
//! Callbacks run on the update thread. A slow listener stalls the
//! cycle, not the readers.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::encoding::{OrdinalBitSet, OrdinalGapSet};

/// Observes snapshot loads and delta applications for one type.
pub trait UpdateListener: Send + Sync {
    /// A snapshot replaced all prior state. `populated` holds every
    /// live global ordinal.
    fn on_snapshot(&self, populated: &OrdinalBitSet, max_ordinal: i32);

    /// One shard's delta chunk was applied. Ordinals in both sets are
    /// shard-local; `(local << shard_count.trailing_zeros()) | shard_index`
    /// recovers the global ordinal.
    fn on_delta(
        &self,
        removed: &OrdinalGapSet,
        added: &OrdinalGapSet,
        shard_index: usize,
        shard_count: usize,
    );
}

/// Maintains the global populated-ordinal bitmap across updates.
///
/// The bitmap is republished whole after each change, so readers can
/// pin a consistent copy with [`populated`] while updates continue.
///
/// [`populated`]: PopulatedOrdinalsListener::populated
#[derive(Default)]
pub struct PopulatedOrdinalsListener {
    populated: ArcSwap<OrdinalBitSet>,
}

impl PopulatedOrdinalsListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bitmap as of the last completed update.
    pub fn populated(&self) -> Arc<OrdinalBitSet> {
        self.populated.load_full()
    }

    pub fn is_populated(&self, ordinal: i32) -> bool {
        self.populated.load().contains(ordinal)
    }

    pub fn cardinality(&self) -> usize {
        self.populated.load().cardinality()
    }
}

impl UpdateListener for PopulatedOrdinalsListener {
    fn on_snapshot(&self, populated: &OrdinalBitSet, _max_ordinal: i32) {
        self.populated.store(Arc::new(populated.clone()));
    }

    fn on_delta(
        &self,
        removed: &OrdinalGapSet,
        added: &OrdinalGapSet,
        shard_index: usize,
        shard_count: usize,
    ) {
        let shift = shard_count.trailing_zeros();
        let mut next = OrdinalBitSet::clone(&self.populated.load());
        for local in removed.iter() {
            next.clear((local << shift) | shard_index as i32);
        }
        for local in added.iter() {
            next.set((local << shift) | shard_index as i32);
        }
        self.populated.store(Arc::new(next));
    }
}
