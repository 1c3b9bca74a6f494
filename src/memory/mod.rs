//! # Memory Reuse
//!
//! Buffer pooling for the update path. Every snapshot load, delta merge,
//! and resharding copy builds word and byte buffers sized to a shard's
//! data; the recycler keeps superseded buffers around so the next shard
//! in the same cycle reuses their capacity instead of allocating.
//!
//! Published storage never borrows from the recycler: buffers handed to
//! a storage generation are owned by it, and only return to the pool
//! once the generation is provably unreferenced (see `store::table`
//! reclamation).

mod recycler;

pub use recycler::SegmentRecycler;
