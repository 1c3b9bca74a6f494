//! # StrataDB - Sharded In-Memory Record Store
//!
//! StrataDB holds every record of a type in bit-packed columnar shards
//! and advances them through versioned snapshot and delta streams. This
//! implementation prioritizes:
//!
//! - **Lock-free reads**: Accessors take two atomic loads, never a lock
//! - **Bit-level packing**: Each field spans exactly the bits its widest
//!   value needs, straddling word boundaries freely
//! - **Cheap removal**: A removal-only delta publishes a new generation
//!   that shares every record buffer with its predecessor
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratadb::{FieldDef, FieldKind, ReadState, Schema, SegmentRecycler, WriteState};
//! use stratadb::BlobInput;
//!
//! let schema = || Schema::new("Movie", vec![
//!     FieldDef::new("title", FieldKind::String),
//!     FieldDef::new("year", FieldKind::Int),
//! ]).unwrap();
//!
//! let mut writer = WriteState::new(schema());
//! let mut rec = writer.new_record();
//! rec.set_string("title", "Heat")?;
//! rec.set_int("year", 1995)?;
//! writer.add(&rec)?;
//!
//! let mut blob = Vec::new();
//! writer.write_snapshot(1, &mut blob)?;
//!
//! let state = ReadState::new(schema(), 1)?;
//! let mut recycler = SegmentRecycler::default();
//! state.read_snapshot(&mut BlobInput::new(&blob), &mut recycler)?;
//! assert_eq!(state.read_int(0, 1)?, 1995);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │    Typed read API (ReadState)       │
//! ├─────────────────────────────────────┤
//! │  Shard routing (ordinal low bits)   │
//! ├─────────────────────────────────────┤
//! │  Generations: packed words + var    │
//! │  buffers + pending removal sets     │
//! ├─────────────────────────────────────┤
//! │  Encoding: varints, gap sets,       │
//! │  zig-zag, packed bit arrays         │
//! └─────────────────────────────────────┘
//! ```
//!
//! Every layer publishes by atomic pointer swap. The update thread
//! decodes off to the side, swaps a pointer, then recycles whatever the
//! last reader lets go of.
//!
//! ## Module Overview
//!
//! - [`store`]: Read state, shards, generations, listeners, sampling
//! - [`write`]: Producer-side staging and stream serialization
//! - [`encoding`]: Packed arrays, gap sets, varints, zig-zag
//! - [`blob`]: Stream cursor and populated-ordinal sections
//! - [`memory`]: Segment recycling across update cycles
//! - [`schema`]: Record type definitions and projections

pub mod blob;
pub mod checksum;
pub mod encoding;
pub mod memory;
pub mod schema;
pub mod store;
pub mod write;

pub use blob::BlobInput;
pub use checksum::StateChecksum;
pub use encoding::{OrdinalBitSet, OrdinalGapSet};
pub use memory::SegmentRecycler;
pub use schema::{FieldDef, FieldKind, Schema};
pub use store::{
    discard_delta, discard_snapshot, DisabledSampler, FieldAccessCounter, FieldAccessSampler,
    PopulatedOrdinalsListener, ReadState, UpdateListener, ORDINAL_NONE,
};
pub use write::{WriteRecord, WriteState};
