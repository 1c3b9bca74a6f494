//! # Read State
//!
//! The per-type entry point: routes typed field reads to shards,
//! consumes snapshot and delta streams, and drives shard splits and
//! joins. One value serves any number of reader threads plus a single
//! update thread.
//!
//! ## Thread Safety
//!
//! Readers never lock. Each accessor loads the shard table once, then
//! the routed shard's state once; both are `ArcSwap` loads, so a read
//! observes either the state before an update step or the state after
//! it, never a mix. The update methods (`read_snapshot`, `apply_delta`,
//! `invalidate`) require external serialization: exactly one thread may
//! call them, which the `&mut SegmentRecycler` argument enforces at the
//! call site.
//!
//! ## Update Ordering
//!
//! A delta with additions publishes the merged generation before
//! listeners run, so a listener already sees the new records. A
//! removal-only delta notifies first and then adopts the removal set,
//! keeping a window where listeners know of the removals while readers
//! still resolve the doomed ordinals.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapAny};
use eyre::{bail, ensure, eyre, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::blob::{ordinals, BlobInput};
use crate::checksum::StateChecksum;
use crate::encoding::{OrdinalBitSet, OrdinalGapSet};
use crate::memory::SegmentRecycler;
use crate::schema::{FieldKind, Schema};
use crate::store::generation::{self, DeltaChunk, Generation};
use crate::store::shard::{Shard, ShardMapping};
use crate::store::table::ShardTable;
use crate::store::{
    DisabledSampler, FieldAccessSampler, UpdateListener, ORDINAL_NONE,
};

/// Shard indexes occupy the low bits of an `i32` ordinal, so the count
/// stays far below the ordinal width.
const MAX_SHARD_COUNT: usize = 1 << 16;

type SamplerSlot = ArcSwapAny<Arc<Arc<dyn FieldAccessSampler>>>;

/// Sharded, bit-packed storage for every record of one type.
pub struct ReadState {
    schema: Arc<Schema>,
    wire_schema: Arc<Schema>,
    table: ArcSwap<ShardTable>,
    max_ordinal: AtomicI32,
    sampler: SamplerSlot,
    listeners: RwLock<Vec<Arc<dyn UpdateListener>>>,
}

impl ReadState {
    /// A state that stores every field the stream carries.
    pub fn new(schema: Schema, num_shards: usize) -> Result<Self> {
        let schema = Arc::new(schema);
        Self::build(Arc::clone(&schema), schema, num_shards)
    }

    /// A state that stores only `schema`, a projection of the
    /// `wire_schema` the stream was written with. Excluded fields are
    /// skipped during decode and never buffered.
    pub fn with_filtered_schema(
        schema: Schema,
        wire_schema: Schema,
        num_shards: usize,
    ) -> Result<Self> {
        ensure!(
            schema.is_projection_of(&wire_schema),
            "schema for type {} is not a projection of the wire schema",
            schema.type_name()
        );
        let mut last = None;
        for field in schema.fields() {
            let wire_index = wire_schema
                .field_index(field.name())
                .ok_or_else(|| eyre!("field {} missing from wire schema", field.name()))?;
            if let Some(prev) = last {
                ensure!(
                    wire_index > prev,
                    "filtered schema reorders field {} relative to the wire schema",
                    field.name()
                );
            }
            last = Some(wire_index);
        }
        Self::build(Arc::new(schema), Arc::new(wire_schema), num_shards)
    }

    fn build(schema: Arc<Schema>, wire_schema: Arc<Schema>, num_shards: usize) -> Result<Self> {
        validate_shard_count(num_shards)?;
        let shards = (0..num_shards)
            .map(|_| Shard::stable(Generation::empty(Arc::clone(&schema))))
            .collect();
        Ok(Self {
            schema,
            wire_schema,
            table: ArcSwap::from_pointee(ShardTable::new(shards)),
            max_ordinal: AtomicI32::new(ORDINAL_NONE),
            sampler: ArcSwapAny::new(Arc::new(
                Arc::new(DisabledSampler) as Arc<dyn FieldAccessSampler>
            )),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn wire_schema(&self) -> &Schema {
        &self.wire_schema
    }

    /// Highest ordinal of the current state, `ORDINAL_NONE` when empty.
    pub fn max_ordinal(&self) -> i32 {
        self.max_ordinal.load(Ordering::Acquire)
    }

    pub fn num_shards(&self) -> usize {
        self.table.load().num_shards()
    }

    // ------------------------------------------------------------------
    // update path
    // ------------------------------------------------------------------

    /// Replaces all state with a decoded snapshot. The table swaps in
    /// only after the whole stream decodes, so a malformed snapshot
    /// leaves the prior state untouched.
    pub fn read_snapshot(
        &self,
        input: &mut BlobInput<'_>,
        recycler: &mut SegmentRecycler,
    ) -> Result<()> {
        let shard_count = self.table.load().num_shards();
        let marker_max = read_max_ordinal_marker(input, shard_count)?;

        let mut generations = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            generations.push(Generation::read_snapshot(
                input,
                &self.schema,
                &self.wire_schema,
                recycler,
            )?);
            recycler.swap();
        }
        let populated = ordinals::read_populated_ordinals(input)?;

        let type_max = marker_max.unwrap_or_else(|| generations[0].max_ordinal());
        let table = Arc::new(ShardTable::new(
            generations.into_iter().map(Shard::stable).collect(),
        ));
        let old = self.table.swap(table);
        ShardTable::reclaim(old, recycler);
        self.max_ordinal.store(type_max, Ordering::Release);
        recycler.swap();

        debug!(
            type_name = %self.schema.type_name(),
            shards = shard_count,
            max_ordinal = type_max,
            populated = populated.cardinality(),
            "snapshot loaded"
        );
        for listener in self.listeners.read().iter() {
            listener.on_snapshot(&populated, type_max);
        }
        Ok(())
    }

    /// Applies one delta cycle. `declared_shards` is the shard count the
    /// stream was written for; when it differs from the current count by
    /// exactly a factor of two the state splits or joins first, without
    /// blocking readers. Shards then advance one at a time, each behind
    /// its own atomic publish.
    ///
    /// A malformed chunk aborts the cycle: shards already published keep
    /// their new generation, the rest keep the prior one.
    pub fn apply_delta(
        &self,
        input: &mut BlobInput<'_>,
        declared_shards: usize,
        recycler: &mut SegmentRecycler,
    ) -> Result<()> {
        validate_shard_count(declared_shards)?;
        let mut table = self.table.load_full();
        if declared_shards != table.num_shards() {
            table = self.reshard(table, declared_shards, recycler)?;
        }
        let shard_count = table.num_shards();
        let marker_max = read_max_ordinal_marker(input, shard_count)?;

        for index in 0..shard_count {
            let chunk = DeltaChunk::decode(input, &self.schema, &self.wire_schema, recycler)?;
            let shard = table.shard(index);
            let state = shard.current();
            debug_assert_eq!(state.mapping(), ShardMapping::Stable);

            if chunk.has_additions() {
                let next = Generation::apply_delta(state.data(), &chunk, recycler)?;
                shard.publish_stable(next);
                self.notify_delta(chunk.removals(), chunk.additions(), index, shard_count);
                chunk.recycle_into(recycler);
            } else {
                self.notify_delta(chunk.removals(), chunk.additions(), index, shard_count);
                let next = if state.data().removals().is_empty() {
                    state.data().with_removals(chunk.into_removals(recycler))
                } else {
                    let merged =
                        OrdinalGapSet::combine(state.data().removals(), chunk.removals(), recycler);
                    chunk.recycle_into(recycler);
                    state.data().with_removals(merged)
                };
                shard.publish_stable(next);
            }
            Shard::reclaim_state(state, recycler);
            recycler.swap();
        }

        let type_max = match marker_max {
            Some(max) => max,
            None => table.shard(0).current().data().max_ordinal(),
        };
        self.max_ordinal.store(type_max, Ordering::Release);
        debug!(
            type_name = %self.schema.type_name(),
            shards = shard_count,
            max_ordinal = type_max,
            "delta applied"
        );
        Ok(())
    }

    fn reshard(
        &self,
        current: Arc<ShardTable>,
        target: usize,
        recycler: &mut SegmentRecycler,
    ) -> Result<Arc<ShardTable>> {
        let from = current.num_shards();
        if target == from * 2 {
            self.split_shards(current, recycler)
        } else if from == target * 2 {
            self.join_shards(current, recycler)
        } else {
            bail!(
                "invalid shard resizing from {} to {} shards, the count can only double or halve",
                from,
                target
            );
        }
    }

    /// Doubles the shard count. First a staging table swaps in whose
    /// shards alias the pre-split generations through parity mappings,
    /// making the new routing valid immediately. Then each original
    /// shard's records are physically copied into two halves, published
    /// pairwise. Readers see every record at its unchanged global
    /// ordinal throughout.
    fn split_shards(
        &self,
        pre: Arc<ShardTable>,
        recycler: &mut SegmentRecycler,
    ) -> Result<Arc<ShardTable>> {
        let from = pre.num_shards();
        info!(
            type_name = %self.schema.type_name(),
            from,
            to = from * 2,
            "splitting shards"
        );

        let mut staged = Vec::with_capacity(from * 2);
        for index in 0..from * 2 {
            let source = pre.shard(index % from).current();
            staged.push(Shard::staged((index / from) as i32, source.data().clone()));
        }
        let table = Arc::new(ShardTable::new(staged));
        let old = self.table.swap(Arc::clone(&table));
        ShardTable::reclaim(old, recycler);

        for index in 0..from {
            let low = table.shard(index).current();
            let high = table.shard(index + from).current();
            let even = low.data().split(0, recycler)?;
            let odd = low.data().split(1, recycler)?;
            table.shard(index).publish_stable(even);
            table.shard(index + from).publish_stable(odd);
            Shard::reclaim_state(low, recycler);
            Shard::reclaim_state(high, recycler);
            recycler.swap();
        }
        Ok(table)
    }

    /// Halves the shard count. Each shard pair pre-merges into one
    /// interleaved generation off to the side; the single table swap at
    /// the end retires the old routing and the old generations together.
    fn join_shards(
        &self,
        pre: Arc<ShardTable>,
        recycler: &mut SegmentRecycler,
    ) -> Result<Arc<ShardTable>> {
        let from = pre.num_shards();
        let to = from / 2;
        info!(
            type_name = %self.schema.type_name(),
            from,
            to,
            "joining shards"
        );

        let mut joined = Vec::with_capacity(to);
        for index in 0..to {
            let even = pre.shard(index).current();
            let odd = pre.shard(index + to).current();
            joined.push(Shard::stable(Generation::join(
                even.data(),
                odd.data(),
                recycler,
            )?));
            recycler.swap();
        }
        let table = Arc::new(ShardTable::new(joined));
        let old = self.table.swap(Arc::clone(&table));
        ShardTable::reclaim(old, recycler);
        recycler.swap();
        Ok(table)
    }

    /// Empties the state and detaches every listener. Readers holding
    /// stale ordinals get errors, not stale records.
    pub fn invalidate(&self, recycler: &mut SegmentRecycler) {
        self.listeners.write().clear();
        let empty = ShardTable::new(vec![Shard::stable(Generation::empty(Arc::clone(
            &self.schema,
        )))]);
        let old = self.table.swap(Arc::new(empty));
        ShardTable::reclaim(old, recycler);
        self.max_ordinal.store(ORDINAL_NONE, Ordering::Release);
        info!(type_name = %self.schema.type_name(), "state invalidated");
    }

    // ------------------------------------------------------------------
    // read path
    // ------------------------------------------------------------------

    pub fn is_null(&self, ordinal: i32, field: usize) -> Result<bool> {
        ensure!(
            field < self.schema.field_count(),
            "field index {} out of range for type {}",
            field,
            self.schema.type_name()
        );
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.is_null(local, field)
    }

    pub fn read_int_opt(&self, ordinal: i32, field: usize) -> Result<Option<i32>> {
        self.check_field(field, FieldKind::Int)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_int(local, field)
    }

    /// Like [`read_int_opt`] with null mapped to `0`.
    ///
    /// [`read_int_opt`]: ReadState::read_int_opt
    pub fn read_int(&self, ordinal: i32, field: usize) -> Result<i32> {
        Ok(self.read_int_opt(ordinal, field)?.unwrap_or(0))
    }

    pub fn read_long_opt(&self, ordinal: i32, field: usize) -> Result<Option<i64>> {
        self.check_field(field, FieldKind::Long)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_long(local, field)
    }

    pub fn read_long(&self, ordinal: i32, field: usize) -> Result<i64> {
        Ok(self.read_long_opt(ordinal, field)?.unwrap_or(0))
    }

    pub fn read_float_opt(&self, ordinal: i32, field: usize) -> Result<Option<f32>> {
        self.check_field(field, FieldKind::Float)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_float(local, field)
    }

    pub fn read_float(&self, ordinal: i32, field: usize) -> Result<f32> {
        Ok(self.read_float_opt(ordinal, field)?.unwrap_or(0.0))
    }

    pub fn read_double_opt(&self, ordinal: i32, field: usize) -> Result<Option<f64>> {
        self.check_field(field, FieldKind::Double)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_double(local, field)
    }

    pub fn read_double(&self, ordinal: i32, field: usize) -> Result<f64> {
        Ok(self.read_double_opt(ordinal, field)?.unwrap_or(0.0))
    }

    pub fn read_bool_opt(&self, ordinal: i32, field: usize) -> Result<Option<bool>> {
        self.check_field(field, FieldKind::Boolean)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_bool(local, field)
    }

    pub fn read_bool(&self, ordinal: i32, field: usize) -> Result<bool> {
        Ok(self.read_bool_opt(ordinal, field)?.unwrap_or(false))
    }

    /// The ordinal a reference field points at, `ORDINAL_NONE` for null.
    pub fn read_ordinal(&self, ordinal: i32, field: usize) -> Result<i32> {
        self.check_field(field, FieldKind::Reference)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_ordinal(local, field)
    }

    pub fn read_string(&self, ordinal: i32, field: usize) -> Result<Option<String>> {
        self.check_field(field, FieldKind::String)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        match shard.read_var(local, field)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|_| {
                eyre!(
                    "string field {} of type {} holds invalid utf-8",
                    field,
                    self.schema.type_name()
                )
            })?)),
        }
    }

    pub fn read_bytes(&self, ordinal: i32, field: usize) -> Result<Option<Vec<u8>>> {
        self.check_field(field, FieldKind::Bytes)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.read_var(local, field)
    }

    /// Compares a string field against `test` without materializing the
    /// stored value. Null never matches.
    pub fn is_string_field_equal(&self, ordinal: i32, field: usize, test: &str) -> Result<bool> {
        self.check_field(field, FieldKind::String)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.is_var_equal(local, field, test.as_bytes())
    }

    /// Content hash of a var-length field's payload, `-1` for null.
    pub fn var_length_field_hash(&self, ordinal: i32, field: usize) -> Result<i32> {
        self.check_var_field(field)?;
        self.check_ordinal(ordinal)?;
        self.sample(field);
        let table = self.table.load();
        let (shard, local) = table.shard_for(ordinal);
        shard.var_hash(local, field)
    }

    fn check_field(&self, field: usize, expected: FieldKind) -> Result<()> {
        match self.schema.field_kind(field) {
            Some(kind) if kind == expected => Ok(()),
            Some(kind) => bail!(
                "field {} of type {} is {:?}, not {:?}",
                field,
                self.schema.type_name(),
                kind,
                expected
            ),
            None => bail!(
                "field index {} out of range for type {}",
                field,
                self.schema.type_name()
            ),
        }
    }

    fn check_var_field(&self, field: usize) -> Result<()> {
        match self.schema.field_kind(field) {
            Some(kind) if kind.is_var_length() => Ok(()),
            Some(kind) => bail!(
                "field {} of type {} is {:?}, not var-length",
                field,
                self.schema.type_name(),
                kind
            ),
            None => bail!(
                "field index {} out of range for type {}",
                field,
                self.schema.type_name()
            ),
        }
    }

    fn check_ordinal(&self, ordinal: i32) -> Result<()> {
        ensure!(ordinal >= 0, "negative ordinal {}", ordinal);
        Ok(())
    }

    // ------------------------------------------------------------------
    // instrumentation
    // ------------------------------------------------------------------

    pub fn set_sampler(&self, sampler: Arc<dyn FieldAccessSampler>) {
        self.sampler.store(Arc::new(sampler));
    }

    fn sample(&self, field: usize) {
        self.sampler.load().record_field_access(field);
    }

    pub fn add_listener(&self, listener: Arc<dyn UpdateListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn UpdateListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn notify_delta(
        &self,
        removed: &OrdinalGapSet,
        added: &OrdinalGapSet,
        shard_index: usize,
        shard_count: usize,
    ) {
        for listener in self.listeners.read().iter() {
            listener.on_delta(removed, added, shard_index, shard_count);
        }
    }

    // ------------------------------------------------------------------
    // inspection
    // ------------------------------------------------------------------

    /// Folds every populated record into `checksum`, restricted to the
    /// fields of `with_schema`. The fold is order-insensitive and keyed
    /// by global ordinal, so states holding the same records agree
    /// regardless of shard count.
    pub fn apply_to_checksum(
        &self,
        checksum: &mut StateChecksum,
        with_schema: &Schema,
        populated: &OrdinalBitSet,
    ) -> Result<()> {
        ensure!(
            with_schema.type_name() == self.schema.type_name(),
            "checksum schema is for type {}, state holds {}",
            with_schema.type_name(),
            self.schema.type_name()
        );
        ensure!(
            with_schema.is_projection_of(&self.schema),
            "checksum schema is not a projection of type {}",
            self.schema.type_name()
        );
        let mut fields = Vec::with_capacity(with_schema.field_count());
        for field in with_schema.fields() {
            fields.push(self.schema.field_index(field.name()).ok_or_else(|| {
                eyre!(
                    "field {} missing from type {}",
                    field.name(),
                    self.schema.type_name()
                )
            })?);
        }

        let table = self.table.load();
        for global in populated.iter() {
            let (shard, local) = table.shard_for(global);
            checksum.fold(shard.record_digest(local, global, &fields)?, global);
        }
        Ok(())
    }

    /// Bytes held across all shard buffers. Approximate: a shard mid
    /// split counts its staging alias at full size.
    pub fn approximate_heap_footprint(&self) -> usize {
        let table = self.table.load();
        table
            .shards()
            .iter()
            .map(|shard| shard.current().data().heap_bytes())
            .sum()
    }

    /// Bytes locked up by unpopulated ordinals below each shard's
    /// maximum, judged against `populated`.
    pub fn approximate_hole_cost(&self, populated: &OrdinalBitSet) -> usize {
        let table = self.table.load();
        let mut live = vec![0usize; table.num_shards()];
        for global in populated.iter() {
            live[table.route(global).0] += 1;
        }
        let mut bytes = 0u64;
        for (index, shard) in table.shards().iter().enumerate() {
            let state = shard.current();
            let slots = (state.data().max_ordinal() + 1) as usize;
            let holes = slots.saturating_sub(live[index]) as u64;
            bytes += holes * state.data().bits_per_record() / 8;
        }
        bytes as usize
    }

    /// Widest packed width of `name` across shards, which is the bit
    /// count needed to re-encode the field without loss.
    pub fn bits_required_for_field(&self, name: &str) -> Result<u32> {
        let field = self
            .schema
            .field_index(name)
            .ok_or_else(|| eyre!("type {} has no field {}", self.schema.type_name(), name))?;
        let table = self.table.load();
        Ok(table
            .shards()
            .iter()
            .map(|shard| shard.current().data().field_width(field))
            .fold(0, u32::max))
    }
}

/// Decodes the leading type-maximum marker carried by multi-shard
/// streams. Single-shard streams omit it.
fn read_max_ordinal_marker(input: &mut BlobInput<'_>, shard_count: usize) -> Result<Option<i32>> {
    if shard_count <= 1 {
        return Ok(None);
    }
    let max_plus_one = input.read_varint()?;
    ensure!(
        max_plus_one <= i32::MAX as u64,
        "type maximum {} exceeds ordinal space",
        max_plus_one
    );
    Ok(Some(max_plus_one as i32 - 1))
}

fn validate_shard_count(count: usize) -> Result<()> {
    ensure!(
        count >= 1 && count.is_power_of_two(),
        "shard count {} is not a power of two",
        count
    );
    ensure!(
        count <= MAX_SHARD_COUNT,
        "shard count {} exceeds the {} shard limit",
        count,
        MAX_SHARD_COUNT
    );
    Ok(())
}

/// Skips a whole snapshot for a type the consumer does not track.
pub fn discard_snapshot(
    input: &mut BlobInput<'_>,
    wire_schema: &Schema,
    num_shards: usize,
) -> Result<()> {
    validate_shard_count(num_shards)?;
    if num_shards > 1 {
        input.read_varint()?;
    }
    for _ in 0..num_shards {
        generation::discard_shard_snapshot(input, wire_schema)?;
    }
    ordinals::discard_populated_ordinals(input)
}

/// Skips a whole delta for a type the consumer does not track.
pub fn discard_delta(
    input: &mut BlobInput<'_>,
    wire_schema: &Schema,
    num_shards: usize,
) -> Result<()> {
    validate_shard_count(num_shards)?;
    if num_shards > 1 {
        input.read_varint()?;
    }
    for _ in 0..num_shards {
        generation::discard_shard_delta(input, wire_schema)?;
    }
    Ok(())
}
