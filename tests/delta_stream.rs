//! # Delta Stream Tests
//!
//! Exercises the delta pipeline between a producer and a consumer that
//! stay in lockstep across cycles: removal-only fast paths, general
//! merges that rebuild shard storage, listener accounting, and the
//! failure behavior of malformed streams.

use parking_lot::Mutex;
use std::sync::Arc;
use stratadb::{
    BlobInput, FieldDef, FieldKind, OrdinalGapSet, PopulatedOrdinalsListener, ReadState, Schema,
    SegmentRecycler, StateChecksum, UpdateListener, WriteState,
};

fn inventory_schema() -> Schema {
    Schema::new(
        "Item",
        vec![
            FieldDef::new("sku", FieldKind::Long),
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("stock", FieldKind::Int),
        ],
    )
    .unwrap()
}

fn add_item(writer: &mut WriteState, sku: i64, name: &str, stock: i32) -> i32 {
    let mut rec = writer.new_record();
    rec.set_long("sku", sku).unwrap();
    rec.set_string("name", name).unwrap();
    rec.set_int("stock", stock).unwrap();
    writer.add(&rec).unwrap()
}

/// Producer with `count` items, plus a consumer loaded from its
/// snapshot at the given shard count.
fn paired(count: usize, num_shards: usize) -> (WriteState, ReadState, SegmentRecycler) {
    let mut writer = WriteState::new(inventory_schema());
    for i in 0..count {
        add_item(&mut writer, 1000 + i as i64, &format!("item-{i}"), i as i32);
    }
    let mut blob = Vec::new();
    writer.write_snapshot(num_shards, &mut blob).unwrap();
    let state = ReadState::new(inventory_schema(), num_shards).unwrap();
    let mut recycler = SegmentRecycler::default();
    state
        .read_snapshot(&mut BlobInput::new(&blob), &mut recycler)
        .unwrap();
    (writer, state, recycler)
}

fn apply(writer: &mut WriteState, state: &ReadState, shards: usize, recycler: &mut SegmentRecycler) {
    let mut blob = Vec::new();
    writer.write_delta(shards, &mut blob).unwrap();
    state
        .apply_delta(&mut BlobInput::new(&blob), shards, recycler)
        .unwrap();
}

/// Listener that records every delta callback it receives.
#[derive(Default)]
struct RecordingListener {
    deltas: Mutex<Vec<(Vec<i32>, Vec<i32>, usize, usize)>>,
}

impl UpdateListener for RecordingListener {
    fn on_snapshot(&self, _populated: &stratadb::OrdinalBitSet, _max_ordinal: i32) {}

    fn on_delta(
        &self,
        removed: &OrdinalGapSet,
        added: &OrdinalGapSet,
        shard_index: usize,
        shard_count: usize,
    ) {
        self.deltas.lock().push((
            removed.iter().collect(),
            added.iter().collect(),
            shard_index,
            shard_count,
        ));
    }
}

#[test]
fn removal_only_delta_takes_the_fast_path() {
    let (mut writer, state, mut recycler) = paired(10, 1);
    let footprint_before = state.approximate_heap_footprint();

    writer.remove(3).unwrap();
    writer.remove(7).unwrap();
    apply(&mut writer, &state, 1, &mut recycler);

    // slots survive until the next merge, so doomed ordinals still read
    assert_eq!(state.read_string(3, 1).unwrap().as_deref(), Some("item-3"));
    assert_eq!(state.read_long(7, 0).unwrap(), 1007);
    assert_eq!(state.max_ordinal(), 9);
    // no record storage was rebuilt; only the pending set was allocated
    let growth = state.approximate_heap_footprint() - footprint_before;
    assert!(growth <= 64, "fast path rebuilt storage, grew {growth} bytes");
}

#[test]
fn general_delta_compacts_removed_payloads() {
    let (mut writer, state, mut recycler) = paired(10, 1);

    writer.remove(3).unwrap();
    writer.remove(7).unwrap();
    apply(&mut writer, &state, 1, &mut recycler);

    // a later cycle with additions folds the pending removals in
    let fresh = add_item(&mut writer, 9999, "restock", 55);
    apply(&mut writer, &state, 1, &mut recycler);

    assert_eq!(fresh, 10);
    assert_eq!(state.max_ordinal(), 10);
    assert_eq!(state.read_string(10, 1).unwrap().as_deref(), Some("restock"));
    assert_eq!(state.read_int(10, 2).unwrap(), 55);
    // the holes left by the removals now read as null strings
    assert_eq!(state.read_string(3, 1).unwrap(), None);
    assert_eq!(state.read_string(7, 1).unwrap(), None);
    // survivors kept their exact values
    assert_eq!(state.read_string(4, 1).unwrap().as_deref(), Some("item-4"));
    assert_eq!(state.read_long(9, 0).unwrap(), 1009);
}

#[test]
fn listener_receives_shard_local_sets() {
    let (mut writer, state, mut recycler) = paired(8, 2);
    let listener = Arc::new(RecordingListener::default());
    state.add_listener(Arc::clone(&listener) as Arc<dyn UpdateListener>);

    // globals 2 and 5: shard 0 local 1, shard 1 local 2
    writer.remove(2).unwrap();
    writer.remove(5).unwrap();
    let added_global = add_item(&mut writer, 2000, "new", 1);
    assert_eq!(added_global, 8); // shard 0, local 4
    apply(&mut writer, &state, 2, &mut recycler);

    let deltas = listener.deltas.lock();
    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0], (vec![1], vec![4], 0, 2));
    assert_eq!(deltas[1], (vec![2], vec![], 1, 2));
}

#[test]
fn populated_listener_stays_consistent_with_writer() {
    let (mut writer, state, mut recycler) = paired(12, 4);
    let listener = Arc::new(PopulatedOrdinalsListener::new());
    listener.on_snapshot(&writer.populated_ordinals(), writer.max_ordinal());
    state.add_listener(Arc::clone(&listener) as Arc<dyn UpdateListener>);

    for ordinal in [1, 6, 11] {
        writer.remove(ordinal).unwrap();
    }
    add_item(&mut writer, 5000, "a", 1);
    add_item(&mut writer, 5001, "b", 2);
    apply(&mut writer, &state, 4, &mut recycler);

    let expected = writer.populated_ordinals();
    let tracked = listener.populated();
    assert_eq!(tracked.cardinality(), expected.cardinality());
    for ordinal in 0..=state.max_ordinal() {
        assert_eq!(tracked.contains(ordinal), expected.contains(ordinal));
    }
}

#[test]
fn checksum_follows_content_across_cycles() {
    let (mut writer, state, mut recycler) = paired(20, 2);

    let sum_of = |state: &ReadState, writer: &WriteState| {
        let mut sum = StateChecksum::new();
        state
            .apply_to_checksum(&mut sum, state.schema(), &writer.populated_ordinals())
            .unwrap();
        (sum.value(), sum.count())
    };

    let (baseline, count) = sum_of(&state, &writer);
    assert_eq!(count, 20);

    writer.remove(4).unwrap();
    apply(&mut writer, &state, 2, &mut recycler);
    let (after_removal, count) = sum_of(&state, &writer);
    assert_eq!(count, 19);
    assert_ne!(after_removal, baseline);

    // a state rebuilt from scratch with the same content agrees
    let mut blob = Vec::new();
    writer.write_snapshot(2, &mut blob).unwrap();
    let rebuilt = ReadState::new(inventory_schema(), 2).unwrap();
    let mut fresh_recycler = SegmentRecycler::default();
    rebuilt
        .read_snapshot(&mut BlobInput::new(&blob), &mut fresh_recycler)
        .unwrap();
    let (rebuilt_sum, _) = sum_of(&rebuilt, &writer);
    assert_eq!(rebuilt_sum, after_removal);
}

#[test]
fn max_ordinal_follows_the_stream_marker() {
    let (mut writer, state, mut recycler) = paired(9, 2);
    assert_eq!(state.max_ordinal(), 8);

    // removing the top record shrinks the type maximum in the marker
    writer.remove(8).unwrap();
    apply(&mut writer, &state, 2, &mut recycler);
    assert_eq!(state.max_ordinal(), 7);

    add_item(&mut writer, 42, "back", 1);
    apply(&mut writer, &state, 2, &mut recycler);
    assert_eq!(state.max_ordinal(), 9);
}

#[test]
fn malformed_delta_is_an_error() {
    let (mut writer, state, mut recycler) = paired(6, 1);

    writer.remove(2).unwrap();
    let mut blob = Vec::new();
    writer.write_delta(1, &mut blob).unwrap();
    blob.truncate(2);
    assert!(state
        .apply_delta(&mut BlobInput::new(&blob), 1, &mut recycler)
        .is_err());

    // prior state still serves
    assert_eq!(state.read_string(2, 1).unwrap().as_deref(), Some("item-2"));
    assert_eq!(state.max_ordinal(), 5);
}

#[test]
fn delta_removing_everything_leaves_an_empty_type() {
    let (mut writer, state, mut recycler) = paired(5, 1);
    for ordinal in 0..5 {
        writer.remove(ordinal).unwrap();
    }
    apply(&mut writer, &state, 1, &mut recycler);

    // fast path: slots remain but the populated view is empty
    assert_eq!(writer.live_count(), 0);
    assert_eq!(writer.populated_ordinals().cardinality(), 0);
    let mut sum = StateChecksum::new();
    state
        .apply_to_checksum(&mut sum, state.schema(), &writer.populated_ordinals())
        .unwrap();
    assert_eq!(sum.count(), 0);
}
