//! Shard splits and joins driven by the declared shard count of a
//! delta stream.
//!
//! A consumer resizes by exactly a factor of two per cycle. Records
//! keep their global ordinals across every resize, and the state
//! checksum is shard-count-invariant, so an evolved state can always
//! be checked against a freshly loaded one.

use stratadb::{
    BlobInput, FieldDef, FieldKind, OrdinalBitSet, ReadState, Schema, SegmentRecycler,
    StateChecksum, WriteState,
};

fn sensor_schema() -> Schema {
    Schema::new(
        "Sensor",
        vec![
            FieldDef::new("device", FieldKind::Long),
            FieldDef::new("label", FieldKind::String),
            FieldDef::new("reading", FieldKind::Double),
            FieldDef::new("active", FieldKind::Boolean),
            FieldDef::reference("site", "Site"),
        ],
    )
    .unwrap()
}

/// Stages the sensor whose fields are all derived from its ordinal, so
/// any reader can be checked without carrying expected values around.
fn add_sensor(writer: &mut WriteState, i: i32) {
    let mut rec = writer.new_record();
    rec.set_long("device", 977 * i as i64 + 11).unwrap();
    if i % 11 != 7 {
        rec.set_string("label", format!("sensor-{i:03}")).unwrap();
    }
    rec.set_double("reading", i as f64 * 0.25 - 3.0).unwrap();
    rec.set_bool("active", i % 3 == 0).unwrap();
    rec.set_reference("site", i % 5).unwrap();
    assert_eq!(writer.add(&rec).unwrap(), i);
}

fn assert_sensor(state: &ReadState, i: i32) {
    assert_eq!(
        state.read_long(i, 0).unwrap(),
        977 * i as i64 + 11,
        "device of {i}"
    );
    let label = (i % 11 != 7).then(|| format!("sensor-{i:03}"));
    assert_eq!(state.read_string(i, 1).unwrap(), label, "label of {i}");
    assert_eq!(
        state.read_double(i, 2).unwrap(),
        i as f64 * 0.25 - 3.0,
        "reading of {i}"
    );
    assert_eq!(state.read_bool(i, 3).unwrap(), i % 3 == 0, "active of {i}");
    assert_eq!(state.read_ordinal(i, 4).unwrap(), i % 5, "site of {i}");
}

fn load(writer: &mut WriteState, shards: usize) -> (ReadState, SegmentRecycler) {
    let mut bytes = Vec::new();
    writer.write_snapshot(shards, &mut bytes).unwrap();
    let state = ReadState::new(sensor_schema(), shards).unwrap();
    let mut recycler = SegmentRecycler::default();
    state
        .read_snapshot(&mut BlobInput::new(&bytes), &mut recycler)
        .unwrap();
    (state, recycler)
}

fn apply(writer: &mut WriteState, state: &ReadState, recycler: &mut SegmentRecycler, shards: usize) {
    let mut bytes = Vec::new();
    writer.write_delta(shards, &mut bytes).unwrap();
    state
        .apply_delta(&mut BlobInput::new(&bytes), shards, recycler)
        .unwrap();
}

fn checksum_of(state: &ReadState, populated: &OrdinalBitSet) -> u64 {
    let mut sum = StateChecksum::new();
    state
        .apply_to_checksum(&mut sum, state.schema(), populated)
        .unwrap();
    sum.value()
}

#[test]
fn split_keeps_every_read_stable() {
    let mut writer = WriteState::new(sensor_schema());
    for i in 0..48 {
        add_sensor(&mut writer, i);
    }
    let (state, mut recycler) = load(&mut writer, 2);
    let populated = writer.populated_ordinals();
    let before = checksum_of(&state, &populated);

    // a content-free delta declared for four shards forces the split
    apply(&mut writer, &state, &mut recycler, 4);
    assert_eq!(state.num_shards(), 4);
    assert_eq!(state.max_ordinal(), 47);
    for i in 0..48 {
        assert_sensor(&state, i);
    }
    assert_eq!(checksum_of(&state, &populated), before);

    // a state freshly loaded at four shards agrees with the evolved one
    let (fresh, _) = load(&mut writer, 4);
    assert_eq!(checksum_of(&fresh, &populated), before);
    // split halves inherit the parent widths, never narrower ones
    let evolved = state.bits_required_for_field("device").unwrap();
    let packed = fresh.bits_required_for_field("device").unwrap();
    assert!(evolved >= packed, "evolved {evolved} narrower than {packed}");
}

#[test]
fn join_steps_back_down_the_ladder() {
    let mut writer = WriteState::new(sensor_schema());
    for i in 0..48 {
        add_sensor(&mut writer, i);
    }
    let (state, mut recycler) = load(&mut writer, 4);
    let populated = writer.populated_ordinals();
    let reference = checksum_of(&state, &populated);

    apply(&mut writer, &state, &mut recycler, 2);
    assert_eq!(state.num_shards(), 2);
    for i in 0..48 {
        assert_sensor(&state, i);
    }
    assert_eq!(checksum_of(&state, &populated), reference);

    apply(&mut writer, &state, &mut recycler, 1);
    assert_eq!(state.num_shards(), 1);
    assert_eq!(state.max_ordinal(), 47);
    for i in 0..48 {
        assert_sensor(&state, i);
    }
    assert_eq!(checksum_of(&state, &populated), reference);
}

#[test]
fn reshard_and_edit_in_one_cycle() {
    let mut writer = WriteState::new(sensor_schema());
    for i in 0..12 {
        add_sensor(&mut writer, i);
    }
    let (state, mut recycler) = load(&mut writer, 1);

    writer.remove(5).unwrap();
    add_sensor(&mut writer, 12);
    add_sensor(&mut writer, 13);
    apply(&mut writer, &state, &mut recycler, 2);

    assert_eq!(state.num_shards(), 2);
    assert_eq!(state.max_ordinal(), 13);
    assert_sensor(&state, 12);
    assert_sensor(&state, 13);
    for i in 0..12 {
        if i != 5 {
            assert_sensor(&state, i);
        }
    }
    // ordinal 5 landed in a shard that merged, so its slot is a hole
    assert!(state.is_null(5, 0).unwrap());
    assert_eq!(state.read_string(5, 1).unwrap(), None);

    let populated = writer.populated_ordinals();
    let (fresh, _) = load(&mut writer, 2);
    assert_eq!(checksum_of(&state, &populated), checksum_of(&fresh, &populated));
}

#[test]
fn shard_ladder_with_edits_converges() {
    let mut writer = WriteState::new(sensor_schema());
    for i in 0..16 {
        add_sensor(&mut writer, i);
    }
    let (state, mut recycler) = load(&mut writer, 1);

    // up to two shards with an edit in the same cycle
    writer.remove(2).unwrap();
    add_sensor(&mut writer, 16);
    apply(&mut writer, &state, &mut recycler, 2);
    assert_eq!(state.num_shards(), 2);

    // up to four, removing a record whose shard sees no additions
    writer.remove(7).unwrap();
    add_sensor(&mut writer, 17);
    add_sensor(&mut writer, 18);
    apply(&mut writer, &state, &mut recycler, 4);
    assert_eq!(state.num_shards(), 4);
    // ordinal 7's shard took the fast path, so the slot still resolves
    assert_eq!(state.read_long(7, 0).unwrap(), 977 * 7 + 11);

    // back down to two; the pending removal rides through the join
    add_sensor(&mut writer, 19);
    apply(&mut writer, &state, &mut recycler, 2);
    assert_eq!(state.num_shards(), 2);
    assert!(state.is_null(7, 0).unwrap());

    // and to one, with a removal-only cycle
    writer.remove(4).unwrap();
    writer.remove(9).unwrap();
    apply(&mut writer, &state, &mut recycler, 1);
    assert_eq!(state.num_shards(), 1);
    assert_eq!(state.max_ordinal(), 19);

    for i in 0..20 {
        match i {
            2 | 7 => assert!(state.is_null(i, 0).unwrap(), "ordinal {i} should be a hole"),
            4 | 9 => assert_eq!(state.read_long(i, 0).unwrap(), 977 * i as i64 + 11),
            _ => assert_sensor(&state, i),
        }
    }

    let populated = writer.populated_ordinals();
    assert_eq!(populated.cardinality(), 16);
    let (fresh, _) = load(&mut writer, 1);
    assert_eq!(checksum_of(&state, &populated), checksum_of(&fresh, &populated));
}

#[test]
fn shard_count_may_only_double_or_halve() {
    let mut writer = WriteState::new(sensor_schema());
    for i in 0..8 {
        add_sensor(&mut writer, i);
    }
    let (state, mut recycler) = load(&mut writer, 1);

    let mut bytes = Vec::new();
    writer.write_delta(4, &mut bytes).unwrap();
    let err = state
        .apply_delta(&mut BlobInput::new(&bytes), 4, &mut recycler)
        .unwrap_err();
    assert!(err.to_string().contains("invalid shard resizing"));

    // the failed jump left the single-shard state untouched
    assert_eq!(state.num_shards(), 1);
    for i in 0..8 {
        assert_sensor(&state, i);
    }
}
