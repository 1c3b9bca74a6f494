//! Fuzz testing for snapshot and delta stream decoding.
//!
//! Points a reader at arbitrary bytes. A malformed stream must surface
//! as an error with bounded allocation and the published state intact,
//! and any stream the full decoder accepts must also be accepted by the
//! skip variant, with both cursors stopping at the same position.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use stratadb::{
    discard_delta, discard_snapshot, BlobInput, FieldDef, FieldKind, PopulatedOrdinalsListener,
    ReadState, Schema, SegmentRecycler, StateChecksum, UpdateListener,
};

#[derive(Debug, Arbitrary)]
struct StreamInput {
    shards: FuzzShardCount,
    delta_shards: FuzzShardCount,
    filtered: bool,
    snapshot: Vec<u8>,
    delta: Vec<u8>,
}

#[derive(Debug, Arbitrary, Clone, Copy)]
enum FuzzShardCount {
    One,
    Two,
    Four,
}

impl From<FuzzShardCount> for usize {
    fn from(count: FuzzShardCount) -> usize {
        match count {
            FuzzShardCount::One => 1,
            FuzzShardCount::Two => 2,
            FuzzShardCount::Four => 4,
        }
    }
}

fn wire_schema() -> Schema {
    Schema::new(
        "Telemetry",
        vec![
            FieldDef::new("id", FieldKind::Long),
            FieldDef::new("host", FieldKind::String),
            FieldDef::new("value", FieldKind::Double),
            FieldDef::new("flags", FieldKind::Int),
            FieldDef::new("live", FieldKind::Boolean),
            FieldDef::new("payload", FieldKind::Bytes),
            FieldDef::new("ratio", FieldKind::Float),
            FieldDef::reference("origin", "Origin"),
        ],
    )
    .unwrap()
}

fn projected_schema() -> Schema {
    Schema::new(
        "Telemetry",
        vec![
            FieldDef::new("id", FieldKind::Long),
            FieldDef::new("value", FieldKind::Double),
            FieldDef::new("payload", FieldKind::Bytes),
        ],
    )
    .unwrap()
}

/// Reads through whatever state the stream produced. Holes and kind
/// mismatches surface as errors, which is all the probe asks of them.
fn probe(state: &ReadState, listener: &PopulatedOrdinalsListener) {
    for ordinal in 0..=state.max_ordinal().min(255) {
        let _ = state.is_null(ordinal, 0);
        let _ = state.read_long(ordinal, 0);
        let _ = state.read_string(ordinal, 1);
        let _ = state.read_double(ordinal, 2);
    }
    let _ = state.approximate_heap_footprint();

    let populated = listener.populated();
    if populated.cardinality() <= 4096 {
        let mut checksum = StateChecksum::new();
        let _ = state.apply_to_checksum(&mut checksum, state.schema(), &populated);
        let _ = state.approximate_hole_cost(&populated);
    }
}

fuzz_target!(|input: StreamInput| {
    if input.snapshot.len() > 1 << 16 || input.delta.len() > 1 << 16 {
        return;
    }

    let shards: usize = input.shards.into();
    let state = if input.filtered {
        ReadState::with_filtered_schema(projected_schema(), wire_schema(), shards)
    } else {
        ReadState::new(wire_schema(), shards)
    }
    .unwrap();
    let listener = Arc::new(PopulatedOrdinalsListener::new());
    state.add_listener(Arc::clone(&listener) as Arc<dyn UpdateListener>);
    let mut recycler = SegmentRecycler::default();

    let mut cursor = BlobInput::new(&input.snapshot);
    if state.read_snapshot(&mut cursor, &mut recycler).is_ok() {
        let mut skip = BlobInput::new(&input.snapshot);
        discard_snapshot(&mut skip, state.wire_schema(), shards).unwrap();
        assert_eq!(skip.position(), cursor.position());
        probe(&state, &listener);
    }

    let declared: usize = input.delta_shards.into();
    let mut cursor = BlobInput::new(&input.delta);
    if state.apply_delta(&mut cursor, declared, &mut recycler).is_ok() {
        let mut skip = BlobInput::new(&input.delta);
        discard_delta(&mut skip, state.wire_schema(), declared).unwrap();
        assert_eq!(skip.position(), cursor.position());
        probe(&state, &listener);
    }
});
