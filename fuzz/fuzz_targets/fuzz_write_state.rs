//! Fuzz testing for the producer and consumer in lockstep.
//!
//! Drives a write state through arbitrary add, remove, and emit
//! operations while a read state applies every stream it produces. A
//! stream built by the writer must always apply, the consumer's
//! populated bitmap must match the writer's, every live record must
//! read back field for field, and a fresh snapshot reload must land on
//! the same state checksum as the delta-evolved state.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use stratadb::{
    BlobInput, FieldDef, FieldKind, PopulatedOrdinalsListener, ReadState, Schema, SegmentRecycler,
    StateChecksum, UpdateListener, WriteState,
};

#[derive(Debug, Arbitrary)]
struct Plan {
    start: FuzzShardCount,
    ops: Vec<FuzzOp>,
}

#[derive(Debug, Arbitrary)]
enum FuzzOp {
    Add(FuzzRecord),
    Remove(u16),
    EmitDelta,
    EmitDeltaSplit,
    EmitDeltaJoin,
    EmitSnapshot,
}

#[derive(Debug, Arbitrary)]
struct FuzzRecord {
    id: i64,
    title: Option<String>,
    year: Option<i32>,
    rating: Option<f64>,
    active: Option<bool>,
    studio: u8,
    poster: Option<Vec<u8>>,
    score: Option<f32>,
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

/// What the writer was actually asked to store, after the setters'
/// reserved patterns are steered away from.
#[derive(Debug)]
struct Stored {
    id: i64,
    title: Option<String>,
    year: Option<i32>,
    rating: Option<f64>,
    active: Option<bool>,
    studio: i32,
    poster: Option<Vec<u8>>,
    score: Option<f32>,
}

fn movie_schema() -> Schema {
    Schema::new(
        "Movie",
        vec![
            FieldDef::new("id", FieldKind::Long),
            FieldDef::new("title", FieldKind::String),
            FieldDef::new("year", FieldKind::Int),
            FieldDef::new("rating", FieldKind::Double),
            FieldDef::new("active", FieldKind::Boolean),
            FieldDef::reference("studio", "Studio"),
            FieldDef::new("poster", FieldKind::Bytes),
            FieldDef::new("score", FieldKind::Float),
        ],
    )
    .unwrap()
}

fn stage(writer: &mut WriteState, mirror: &mut Vec<Option<Stored>>, fuzz: &FuzzRecord) {
    let stored = Stored {
        id: if fuzz.id == i64::MIN { 0 } else { fuzz.id },
        title: fuzz.title.clone(),
        year: fuzz.year,
        rating: fuzz.rating.filter(|r| r.to_bits() != u64::MAX),
        active: fuzz.active,
        studio: i32::from(fuzz.studio),
        poster: fuzz.poster.clone(),
        score: fuzz.score.filter(|s| s.to_bits() != u32::MAX),
    };

    let mut rec = writer.new_record();
    rec.set_long("id", stored.id).unwrap();
    if let Some(title) = &stored.title {
        rec.set_string("title", title.as_str()).unwrap();
    }
    if let Some(year) = stored.year {
        rec.set_int("year", year).unwrap();
    }
    if let Some(rating) = stored.rating {
        rec.set_double("rating", rating).unwrap();
    }
    if let Some(active) = stored.active {
        rec.set_bool("active", active).unwrap();
    }
    rec.set_reference("studio", stored.studio).unwrap();
    if let Some(poster) = &stored.poster {
        rec.set_bytes("poster", poster.clone()).unwrap();
    }
    if let Some(score) = stored.score {
        rec.set_float("score", score).unwrap();
    }

    let ordinal = writer.add(&rec).unwrap();
    assert_eq!(ordinal as usize, mirror.len());
    mirror.push(Some(stored));
}

fn cycle(
    writer: &mut WriteState,
    state: &ReadState,
    recycler: &mut SegmentRecycler,
    target: usize,
    snapshot: bool,
) {
    let mut buf = Vec::new();
    if snapshot {
        writer.write_snapshot(target, &mut buf).unwrap();
        state
            .read_snapshot(&mut BlobInput::new(&buf), recycler)
            .expect("snapshot from the writer must load");
    } else {
        writer.write_delta(target, &mut buf).unwrap();
        state
            .apply_delta(&mut BlobInput::new(&buf), target, recycler)
            .expect("delta from the writer must apply");
    }
    assert_eq!(state.num_shards(), target);
}

fn check_record(state: &ReadState, ordinal: i32, stored: &Stored) {
    assert_eq!(state.read_long(ordinal, 0).unwrap(), stored.id);
    assert_eq!(state.read_string(ordinal, 1).unwrap(), stored.title);
    assert_eq!(state.read_int_opt(ordinal, 2).unwrap(), stored.year);
    let rating = state.read_double_opt(ordinal, 3).unwrap();
    assert_eq!(rating.map(f64::to_bits), stored.rating.map(f64::to_bits));
    assert_eq!(state.read_bool_opt(ordinal, 4).unwrap(), stored.active);
    assert_eq!(state.read_ordinal(ordinal, 5).unwrap(), stored.studio);
    assert_eq!(state.read_bytes(ordinal, 6).unwrap(), stored.poster);
    let score = state.read_float_opt(ordinal, 7).unwrap();
    assert_eq!(score.map(f32::to_bits), stored.score.map(f32::to_bits));
}

fn verify(
    state: &ReadState,
    listener: &PopulatedOrdinalsListener,
    writer: &WriteState,
    mirror: &[Option<Stored>],
) {
    let populated = listener.populated();
    assert_eq!(populated.cardinality(), writer.live_count());
    for (index, slot) in mirror.iter().enumerate() {
        let ordinal = index as i32;
        assert_eq!(populated.contains(ordinal), slot.is_some());
        match slot {
            Some(stored) => check_record(state, ordinal, stored),
            // Removed slots read as ghosts until a merge turns them
            // into holes, so only the calls are exercised.
            None => {
                let _ = state.is_null(ordinal, 0);
                let _ = state.read_long(ordinal, 0);
            }
        }
    }
}

fuzz_target!(|plan: Plan| {
    if plan.ops.len() > 64 {
        return;
    }

    let mut writer = WriteState::new(movie_schema());
    let mut shards: usize = plan.start.into();
    let state = ReadState::new(movie_schema(), shards).unwrap();
    let listener = Arc::new(PopulatedOrdinalsListener::new());
    state.add_listener(Arc::clone(&listener) as Arc<dyn UpdateListener>);
    let mut recycler = SegmentRecycler::default();
    let mut mirror: Vec<Option<Stored>> = Vec::new();

    for op in &plan.ops {
        match op {
            FuzzOp::Add(record) => stage(&mut writer, &mut mirror, record),
            FuzzOp::Remove(raw) => {
                if mirror.is_empty() {
                    continue;
                }
                let index = *raw as usize % mirror.len();
                if mirror[index].take().is_some() {
                    writer.remove(index as i32).unwrap();
                } else {
                    assert!(writer.remove(index as i32).is_err());
                }
            }
            FuzzOp::EmitDelta => {
                cycle(&mut writer, &state, &mut recycler, shards, false);
                verify(&state, &listener, &writer, &mirror);
            }
            FuzzOp::EmitDeltaSplit => {
                shards = (shards * 2).min(8);
                cycle(&mut writer, &state, &mut recycler, shards, false);
                verify(&state, &listener, &writer, &mirror);
            }
            FuzzOp::EmitDeltaJoin => {
                shards = (shards / 2).max(1);
                cycle(&mut writer, &state, &mut recycler, shards, false);
                verify(&state, &listener, &writer, &mirror);
            }
            FuzzOp::EmitSnapshot => {
                cycle(&mut writer, &state, &mut recycler, shards, true);
                verify(&state, &listener, &writer, &mirror);
            }
        }
    }

    // Drain whatever is still pending, then reload from scratch and
    // compare checksums over the live records.
    cycle(&mut writer, &state, &mut recycler, shards, false);
    verify(&state, &listener, &writer, &mirror);

    let mut snap = Vec::new();
    writer.write_snapshot(shards, &mut snap).unwrap();
    let fresh = ReadState::new(movie_schema(), shards).unwrap();
    fresh
        .read_snapshot(&mut BlobInput::new(&snap), &mut recycler)
        .expect("snapshot from the writer must load");

    let populated = writer.populated_ordinals();
    let mut evolved = StateChecksum::new();
    state
        .apply_to_checksum(&mut evolved, state.schema(), &populated)
        .unwrap();
    let mut loaded = StateChecksum::new();
    fresh
        .apply_to_checksum(&mut loaded, fresh.schema(), &populated)
        .unwrap();
    assert_eq!(evolved.value(), loaded.value());
});
