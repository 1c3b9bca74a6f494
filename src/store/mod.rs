//! # Record Store
//!
//! Sharded, bit-packed, in-memory storage for the records of one type.
//!
//! ```text
//!                 ReadState
//!                     |
//!              ShardTable (ArcSwap)
//!              /       |        \
//!          Shard     Shard     Shard      each state ArcSwap'd
//!            |         |         |
//!        Generation Generation Generation  immutable buffers
//! ```
//!
//! Records are addressed by ordinal. The low bits of an ordinal pick
//! the shard, the high bits the slot within it, so the shard count must
//! be a power of two. Every level publishes by atomic pointer swap:
//! readers take no locks and see each update step wholly or not at all.

mod generation;
mod listener;
mod read_state;
mod sampling;
mod shard;
mod table;

pub use listener::{PopulatedOrdinalsListener, UpdateListener};
pub use read_state::{discard_delta, discard_snapshot, ReadState};
pub use sampling::{DisabledSampler, FieldAccessCounter, FieldAccessSampler};

/// The ordinal that refers to no record.
pub const ORDINAL_NONE: i32 = -1;
