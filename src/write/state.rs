//! # Write State
//!
//! The producer half of the stream pipeline. Records accumulate in an
//! append-only ordinal space; `write_snapshot` serializes the full
//! state, `write_delta` serializes only the changes since the last
//! call, each sharded for whatever shard count the caller declares.
//!
//! The same state can emit consecutive streams at different shard
//! counts. Shard assignment is a pure function of the global ordinal,
//! so a consumer that splits or joins its shards keeps every ordinal
//! stable while applying the next delta.
//!
//! ## Encoding
//!
//! Per-field bit widths are recomputed from the live records of each
//! shard on every emit. A width always leaves the all-ones pattern free
//! for the null sentinel: when the largest packed value would collide
//! with it, the field gets one more bit.

use std::sync::Arc;

use eyre::{ensure, eyre, Result};

use crate::blob::ordinals::write_populated_ordinals;
use crate::encoding::packed::{bits_for, mask, PackedArray};
use crate::encoding::{put_varint, OrdinalBitSet, OrdinalGapSet};
use crate::schema::{FieldKind, Schema};
use crate::write::record::{FieldValue, WriteRecord};

type StagedRecord = Vec<FieldValue>;

/// Staged records for one type, plus the change sets of the current
/// cycle.
pub struct WriteState {
    schema: Arc<Schema>,
    records: Vec<Option<StagedRecord>>,
    added: Vec<i32>,
    removed: Vec<i32>,
}

impl WriteState {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
            records: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// A reusable record bound to this state's schema.
    pub fn new_record(&self) -> WriteRecord {
        WriteRecord::new(Arc::clone(&self.schema))
    }

    /// Copies the record into the next free ordinal and returns it.
    pub fn add(&mut self, record: &WriteRecord) -> Result<i32> {
        ensure!(
            Arc::ptr_eq(record.schema(), &self.schema),
            "record was built for a different write state"
        );
        ensure!(
            self.records.len() < i32::MAX as usize,
            "ordinal space exhausted"
        );
        let ordinal = self.records.len() as i32;
        self.records.push(Some(record.values().to_vec()));
        self.added.push(ordinal);
        Ok(ordinal)
    }

    /// Removes a populated ordinal. Removing a record added in the same
    /// cycle cancels the addition instead of emitting both.
    pub fn remove(&mut self, ordinal: i32) -> Result<()> {
        let slot = usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.records.get_mut(i))
            .ok_or_else(|| eyre!("ordinal {} out of range", ordinal))?;
        ensure!(slot.is_some(), "ordinal {} is not populated", ordinal);
        *slot = None;
        if let Some(at) = self.added.iter().position(|&a| a == ordinal) {
            self.added.remove(at);
        } else {
            self.removed.push(ordinal);
        }
        Ok(())
    }

    pub fn is_populated(&self, ordinal: i32) -> bool {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.records.get(i))
            .is_some_and(Option::is_some)
    }

    pub fn live_count(&self) -> usize {
        self.records.iter().flatten().count()
    }

    /// Highest populated ordinal, -1 when empty.
    pub fn max_ordinal(&self) -> i32 {
        self.records
            .iter()
            .rposition(Option::is_some)
            .map_or(-1, |i| i as i32)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Bitmap of every populated ordinal, as a consumer-side listener
    /// would track it.
    pub fn populated_ordinals(&self) -> OrdinalBitSet {
        let mut populated = OrdinalBitSet::new();
        for (ordinal, record) in self.records.iter().enumerate() {
            if record.is_some() {
                populated.set(ordinal as i32);
            }
        }
        populated
    }

    /// Serializes the complete state for `num_shards` and marks every
    /// pending change emitted.
    pub fn write_snapshot(&mut self, num_shards: usize, out: &mut Vec<u8>) -> Result<()> {
        let (mask_bits, shift) = shard_routing(num_shards)?;
        if num_shards > 1 {
            put_varint((self.max_ordinal() + 1) as u64, out);
        }
        for shard in 0..num_shards {
            let slots = self.shard_slots(shard, mask_bits, shift);
            let widths = compute_widths(&self.schema, &slots);
            put_varint(slots.len() as u64, out);
            encode_record_block(&self.schema, &widths, &slots, out);
        }
        write_populated_ordinals(&self.populated_ordinals(), out);
        self.added.clear();
        self.removed.clear();
        Ok(())
    }

    /// Serializes the changes since the last emit for `num_shards` and
    /// clears the pending sets.
    pub fn write_delta(&mut self, num_shards: usize, out: &mut Vec<u8>) -> Result<()> {
        let (mask_bits, shift) = shard_routing(num_shards)?;
        if num_shards > 1 {
            put_varint((self.max_ordinal() + 1) as u64, out);
        }
        self.removed.sort_unstable();

        for shard in 0..num_shards {
            let slots = self.shard_slots(shard, mask_bits, shift);
            put_varint(slots.len() as u64, out);

            let in_shard = |&g: &i32| (g as u32 & mask_bits) as usize == shard;
            let removed_locals = self.removed.iter().copied().filter(in_shard).map(|g| g >> shift);
            OrdinalGapSet::from_sorted(removed_locals)?.encode_into(out);
            let added_locals = self.added.iter().copied().filter(in_shard).map(|g| g >> shift);
            OrdinalGapSet::from_sorted(added_locals)?.encode_into(out);

            let mut dense = Vec::new();
            for global in self.added.iter().copied().filter(in_shard) {
                let values = self.records[global as usize]
                    .as_deref()
                    .ok_or_else(|| eyre!("staged addition {} has no record", global))?;
                dense.push(Some(values));
            }
            let widths = compute_widths(&self.schema, &slots);
            encode_record_block(&self.schema, &widths, &dense, out);
        }
        self.added.clear();
        self.removed.clear();
        Ok(())
    }

    /// Slot array for one shard: `Some` for live locals, `None` for
    /// holes, truncated after the highest live local.
    fn shard_slots(&self, shard: usize, mask_bits: u32, shift: u32) -> Vec<Option<&[FieldValue]>> {
        let mut slots: Vec<Option<&[FieldValue]>> = Vec::new();
        for (global, record) in self.records.iter().enumerate() {
            if (global as u32 & mask_bits) as usize != shard {
                continue;
            }
            if let Some(values) = record {
                let local = global >> shift;
                if slots.len() <= local {
                    slots.resize(local + 1, None);
                }
                slots[local] = Some(values.as_slice());
            }
        }
        slots
    }
}

fn shard_routing(num_shards: usize) -> Result<(u32, u32)> {
    ensure!(
        num_shards >= 1 && num_shards.is_power_of_two(),
        "shard count {} is not a power of two",
        num_shards
    );
    let mask_bits = num_shards as u32 - 1;
    Ok((mask_bits, mask_bits.count_ones()))
}

/// Per-field widths for the live records in `slots`. Fixed-kind widths
/// grow by one when the widest value would collide with the all-ones
/// sentinel; var-length widths cover the shard's total payload bytes
/// plus the null flag bit.
fn compute_widths(schema: &Schema, slots: &[Option<&[FieldValue]>]) -> Vec<u32> {
    let mut max_raw = vec![0u64; schema.field_count()];
    let mut var_totals = vec![0u64; schema.var_field_count()];
    for values in slots.iter().flatten() {
        let mut var_slot = 0;
        for (field, def) in schema.fields().iter().enumerate() {
            if def.kind().is_var_length() {
                if let Some(payload) = values[field].var_payload() {
                    var_totals[var_slot] += payload.len() as u64;
                }
                var_slot += 1;
            } else if let Some(raw) = values[field].raw_bits() {
                max_raw[field] = max_raw[field].max(raw);
            }
        }
    }

    let mut var_slot = 0;
    schema
        .fields()
        .iter()
        .enumerate()
        .map(|(field, def)| match def.kind() {
            FieldKind::Float => 32,
            FieldKind::Double => 64,
            FieldKind::Boolean => 2,
            FieldKind::String | FieldKind::Bytes => {
                let width = bits_for(var_totals[var_slot]) + 1;
                var_slot += 1;
                width
            }
            FieldKind::Int | FieldKind::Long | FieldKind::Reference => {
                let mut width = bits_for(max_raw[field]);
                if max_raw[field] == mask(width) {
                    width += 1;
                }
                width
            }
        })
        .collect()
}

/// Packs `slots` at the given widths and emits the record block: width
/// varints, the fixed word section, then each var buffer.
fn encode_record_block(
    schema: &Schema,
    widths: &[u32],
    slots: &[Option<&[FieldValue]>],
    out: &mut Vec<u8>,
) {
    let mut offsets = Vec::with_capacity(widths.len());
    let mut bits_per_record = 0u64;
    for &width in widths {
        offsets.push(bits_per_record);
        bits_per_record += width as u64;
    }

    let total_bits = slots.len() as u64 * bits_per_record;
    let mut packed = PackedArray::with_bit_capacity(total_bits);
    let mut var_bufs: Vec<Vec<u8>> = vec![Vec::new(); schema.var_field_count()];

    for (local, slot) in slots.iter().enumerate() {
        let base = local as u64 * bits_per_record;
        let mut var_slot = 0;
        for (field, def) in schema.fields().iter().enumerate() {
            let width = widths[field];
            let offset = base + offsets[field];
            if def.kind().is_var_length() {
                let payload = slot.and_then(|values| values[field].var_payload());
                let (end, null) = match payload {
                    Some(payload) => {
                        var_bufs[var_slot].extend_from_slice(payload);
                        (var_bufs[var_slot].len() as u64, false)
                    }
                    None => (var_bufs[var_slot].len() as u64, true),
                };
                debug_assert!(end <= mask(width - 1));
                packed.set(offset, width, end | (null as u64) << (width - 1));
                var_slot += 1;
            } else {
                let raw = slot
                    .and_then(|values| values[field].raw_bits())
                    .unwrap_or_else(|| mask(width));
                packed.set(offset, width, raw);
            }
        }
    }

    for &width in widths {
        put_varint(width as u64, out);
    }
    let words = total_bits.div_ceil(64) as usize;
    put_varint(words as u64, out);
    for word in &packed.words()[..words] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    for buf in var_bufs {
        put_varint(buf.len() as u64, out);
        out.extend_from_slice(&buf);
    }
}
