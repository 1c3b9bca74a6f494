//! # Storage Generations
//!
//! One immutable snapshot of a shard's records. All fixed-width field
//! slots pack back to back into a single bit buffer; each var-length
//! field owns a side buffer of concatenated payloads addressed by end
//! offsets stored in the fixed slots.
//!
//! ```text
//! fixed bits, record r:  | f0 | f1 | ... | fn |   stride = bits_per_record
//! var buffer, field f:   [payload 0][payload 1][payload 2]...
//!                         slot(r) = end offset of payload r
//!                         start(r) = slot(r - 1), or 0 for record 0
//! ```
//!
//! ## Null encoding
//!
//! Every fixed slot of width `w` reserves the all-ones pattern for null:
//! integers and references store values below the sentinel (widths grow
//! one bit when the largest value would collide), floats and doubles
//! reserve the all-ones NaN pattern, booleans use 3. Var-length slots
//! instead carry a null flag in their top bit and keep the running end
//! offset in the low bits so later records still chain correctly.
//!
//! ## Wire form
//!
//! One shard's snapshot section, and the trailing block of a delta
//! chunk, share a layout (all integers varint, words little-endian):
//!
//! ```text
//! snapshot section:  record_count, bits-per-field*, word_count, words,
//!                    { byte_len, payload bytes } per var field
//! delta chunk:       new_max+1, removals gap set, additions gap set,
//!                    then a record block holding only the added records
//! ```
//!
//! Delta chunk widths describe the post-delta state, so the merged
//! generation adopts them directly. Decoding against a projected schema
//! keeps only the projected fields: unwanted var buffers are skipped in
//! place and fixed slots are repacked at the narrower stride.

use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use smallvec::SmallVec;

use crate::blob::BlobInput;
use crate::checksum::CASTAGNOLI;
use crate::encoding::packed::{bits_for, mask, PackedArray};
use crate::encoding::{OrdinalBitSet, OrdinalGapSet};
use crate::memory::SegmentRecycler;
use crate::schema::{FieldKind, Schema};

/// Bit widths and offsets of one record, derived from per-field widths.
#[derive(Debug, Clone)]
pub(crate) struct RecordLayout {
    widths: SmallVec<[u32; 16]>,
    offsets: SmallVec<[u64; 16]>,
    bits_per_record: u64,
}

impl RecordLayout {
    pub(crate) fn new<I>(widths: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let widths: SmallVec<[u32; 16]> = widths.into_iter().collect();
        let mut offsets = SmallVec::with_capacity(widths.len());
        let mut bits = 0u64;
        for &w in &widths {
            offsets.push(bits);
            bits += w as u64;
        }
        Self {
            widths,
            offsets,
            bits_per_record: bits,
        }
    }

    pub(crate) fn width(&self, field: usize) -> u32 {
        self.widths[field]
    }

    pub(crate) fn bits_per_record(&self) -> u64 {
        self.bits_per_record
    }

    /// Absolute bit offset of `field` in record `ordinal`.
    pub(crate) fn offset_of(&self, ordinal: i32, field: usize) -> u64 {
        ordinal as u64 * self.bits_per_record + self.offsets[field]
    }
}

/// Concatenated var-length payloads for one field.
#[derive(Debug, Default)]
pub(crate) struct VarBuffer {
    bytes: Vec<u8>,
}

impl VarBuffer {
    pub(crate) fn from_backing(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub(crate) fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Appends a payload and returns the new end offset.
    pub(crate) fn append(&mut self, payload: &[u8]) -> u64 {
        self.bytes.extend_from_slice(payload);
        self.bytes.len() as u64
    }

    /// Length-checked payload slice.
    pub(crate) fn range(&self, start: u64, end: u64) -> Result<&[u8]> {
        ensure!(
            start <= end && end <= self.bytes.len() as u64,
            "var payload range {}..{} outside buffer of {} bytes",
            start,
            end,
            self.bytes.len()
        );
        Ok(&self.bytes[start as usize..end as usize])
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn into_backing(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.bytes.capacity()
    }
}

/// Immutable record storage for one shard. Buffers sit behind `Arc` so a
/// removal-only update can publish a successor generation sharing them.
#[derive(Debug)]
pub(crate) struct Generation {
    schema: Arc<Schema>,
    layout: RecordLayout,
    fixed: Arc<PackedArray>,
    var: Arc<Vec<VarBuffer>>,
    max_ordinal: i32,
    removals: Arc<OrdinalGapSet>,
}

impl Generation {
    pub(crate) fn from_parts(
        schema: Arc<Schema>,
        layout: RecordLayout,
        fixed: PackedArray,
        var: Vec<VarBuffer>,
        max_ordinal: i32,
        removals: OrdinalGapSet,
    ) -> Self {
        debug_assert_eq!(var.len(), schema.var_field_count());
        Self {
            schema,
            layout,
            fixed: Arc::new(fixed),
            var: Arc::new(var),
            max_ordinal,
            removals: Arc::new(removals),
        }
    }

    /// A generation holding no records, used before the first snapshot
    /// and after invalidation.
    pub(crate) fn empty(schema: Arc<Schema>) -> Self {
        let widths = schema.fields().iter().map(|f| match f.kind() {
            FieldKind::Float => 32,
            FieldKind::Double => 64,
            FieldKind::Boolean => 2,
            FieldKind::String | FieldKind::Bytes => 2,
            FieldKind::Int | FieldKind::Long | FieldKind::Reference => 1,
        });
        let layout = RecordLayout::new(widths);
        let var = (0..schema.var_field_count()).map(|_| VarBuffer::default()).collect();
        Self::from_parts(
            schema,
            layout,
            PackedArray::with_bit_capacity(0),
            var,
            -1,
            OrdinalGapSet::new(),
        )
    }

    /// Decodes one shard's snapshot section.
    pub(crate) fn read_snapshot(
        input: &mut BlobInput<'_>,
        schema: &Arc<Schema>,
        wire_schema: &Schema,
        recycler: &mut SegmentRecycler,
    ) -> Result<Self> {
        let records = input.read_len()?;
        ensure!(
            records <= i32::MAX as usize,
            "record count {} exceeds ordinal space",
            records
        );
        let (layout, fixed, var) = decode_record_block(input, schema, wire_schema, records, recycler)?;
        Ok(Self::from_parts(
            Arc::clone(schema),
            layout,
            fixed,
            var,
            records as i32 - 1,
            OrdinalGapSet::new(),
        ))
    }

    /// Successor generation sharing every buffer, with a new pending
    /// removal set. The removal-only delta fast path publishes this.
    pub(crate) fn with_removals(&self, removals: OrdinalGapSet) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            layout: self.layout.clone(),
            fixed: Arc::clone(&self.fixed),
            var: Arc::clone(&self.var),
            max_ordinal: self.max_ordinal,
            removals: Arc::new(removals),
        }
    }

    /// Merges `old` with a decoded delta chunk into a wholly new
    /// generation laid out at the chunk's post-delta widths. Pending and
    /// delta removals become holes; the result carries no pending set.
    pub(crate) fn apply_delta(
        old: &Generation,
        chunk: &DeltaChunk,
        recycler: &mut SegmentRecycler,
    ) -> Result<Self> {
        let layout = chunk.added.layout.clone();
        let new_max = chunk.max_ordinal;
        let schema = Arc::clone(&old.schema);

        let mut removed = OrdinalBitSet::with_max_ordinal(old.max_ordinal);
        for r in old.removals.iter() {
            removed.set(r);
        }
        for r in chunk.removals.iter() {
            ensure!(
                r <= old.max_ordinal,
                "delta removes ordinal {} beyond maximum {}",
                r,
                old.max_ordinal
            );
            removed.set(r);
        }

        // The merged buffer is sized from the declared maximum, so bound
        // it by what the stream can legitimately produce.
        let top_addition = chunk.additions.iter().last().unwrap_or(-1);
        ensure!(
            new_max <= old.max_ordinal.max(top_addition),
            "post-delta maximum {} exceeds prior maximum {} and highest addition {}",
            new_max,
            old.max_ordinal,
            top_addition
        );

        let total_bits = (new_max + 1) as u64 * layout.bits_per_record();
        let mut fixed = PackedArray::from_backing(recycler.acquire_words(PackedArray::backing_len(total_bits)));
        let mut var: Vec<VarBuffer> = (0..schema.var_field_count())
            .map(|_| VarBuffer::from_backing(recycler.acquire_bytes()))
            .collect();

        let mut additions = chunk.additions.iter().peekable();
        let mut add_row = 0i32;
        for target in 0..=new_max {
            if additions.peek() == Some(&target) {
                additions.next();
                copy_record(&chunk.added, add_row, &layout, &mut fixed, &mut var, target)?;
                add_row += 1;
            } else if target <= old.max_ordinal && !removed.contains(target) {
                copy_record(old, target, &layout, &mut fixed, &mut var, target)?;
            } else {
                write_hole(&schema, &layout, &mut fixed, &var, target);
            }
        }
        ensure!(
            additions.next().is_none(),
            "delta addition beyond post-delta maximum {}",
            new_max
        );

        Ok(Self::from_parts(schema, layout, fixed, var, new_max, OrdinalGapSet::new()))
    }

    /// Extracts the records whose local ordinal has the given parity,
    /// producing one half of a shard split. Layout is unchanged; var
    /// payloads compact into fresh buffers. Pending removals partition
    /// along with the records.
    pub(crate) fn split(&self, parity: u32, recycler: &mut SegmentRecycler) -> Result<Self> {
        debug_assert!(parity < 2);
        let p = parity as i32;
        let new_max = if self.max_ordinal < p {
            -1
        } else {
            (self.max_ordinal - p) / 2
        };

        let layout = self.layout.clone();
        let stride = layout.bits_per_record();
        let total_bits = (new_max + 1) as u64 * stride;
        let mut fixed = PackedArray::from_backing(recycler.acquire_words(PackedArray::backing_len(total_bits)));
        let mut var: Vec<VarBuffer> = (0..self.schema.var_field_count())
            .map(|_| VarBuffer::from_backing(recycler.acquire_bytes()))
            .collect();

        if self.schema.var_field_count() == 0 {
            for local in 0..=new_max {
                let source = (2 * local + p) as u64 * stride;
                fixed.copy_bits(local as u64 * stride, &self.fixed, source, stride);
            }
        } else {
            for local in 0..=new_max {
                copy_record(self, 2 * local + p, &layout, &mut fixed, &mut var, local)?;
            }
        }

        let removals = OrdinalGapSet::from_sorted(
            self.removals.iter().filter(|r| r % 2 == p).map(|r| (r - p) / 2),
        )?;

        Ok(Self::from_parts(
            Arc::clone(&self.schema),
            layout,
            fixed,
            var,
            new_max,
            removals,
        ))
    }

    /// Interleaves two generations back into one: even joined ordinals
    /// come from `even`, odd from `odd`. The inverse of [`split`].
    ///
    /// [`split`]: Generation::split
    pub(crate) fn join(
        even: &Generation,
        odd: &Generation,
        recycler: &mut SegmentRecycler,
    ) -> Result<Self> {
        let schema = Arc::clone(&even.schema);
        let limit = (i32::MAX - 2) / 2;
        ensure!(
            even.max_ordinal <= limit && odd.max_ordinal <= limit,
            "joined ordinal space overflows"
        );

        let mut var_slot = 0;
        let widths = (0..schema.field_count()).map(|field| {
            let kind = schema.fields()[field].kind();
            if kind.is_var_length() {
                let total = even.var[var_slot].len() + odd.var[var_slot].len();
                var_slot += 1;
                bits_for(total) + 1
            } else {
                even.layout.width(field).max(odd.layout.width(field))
            }
        });
        let layout = RecordLayout::new(widths);

        let even_top = if even.max_ordinal >= 0 { 2 * even.max_ordinal } else { -1 };
        let odd_top = if odd.max_ordinal >= 0 { 2 * odd.max_ordinal + 1 } else { -1 };
        let new_max = even_top.max(odd_top);

        let total_bits = (new_max + 1) as u64 * layout.bits_per_record();
        let mut fixed = PackedArray::from_backing(recycler.acquire_words(PackedArray::backing_len(total_bits)));
        let mut var: Vec<VarBuffer> = (0..schema.var_field_count())
            .map(|_| VarBuffer::from_backing(recycler.acquire_bytes()))
            .collect();

        for joined in 0..=new_max {
            let (source, local) = if joined % 2 == 0 {
                (even, joined / 2)
            } else {
                (odd, (joined - 1) / 2)
            };
            if local <= source.max_ordinal {
                copy_record(source, local, &layout, &mut fixed, &mut var, joined)?;
            } else {
                write_hole(&schema, &layout, &mut fixed, &var, joined);
            }
        }

        let from_even = OrdinalGapSet::from_sorted(even.removals.iter().map(|r| 2 * r))?;
        let from_odd = OrdinalGapSet::from_sorted(odd.removals.iter().map(|r| 2 * r + 1))?;
        let removals = OrdinalGapSet::combine(&from_even, &from_odd, recycler);

        Ok(Self::from_parts(schema, layout, fixed, var, new_max, removals))
    }

    pub(crate) fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub(crate) fn max_ordinal(&self) -> i32 {
        self.max_ordinal
    }

    pub(crate) fn removals(&self) -> &OrdinalGapSet {
        &self.removals
    }

    pub(crate) fn field_width(&self, field: usize) -> u32 {
        self.layout.width(field)
    }

    pub(crate) fn bits_per_record(&self) -> u64 {
        self.layout.bits_per_record()
    }

    /// True when this generation's fixed buffer is the same allocation
    /// as `other`'s. Fast-path updates preserve this.
    #[cfg(test)]
    pub(crate) fn shares_buffers_with(&self, other: &Generation) -> bool {
        Arc::ptr_eq(&self.fixed, &other.fixed) && Arc::ptr_eq(&self.var, &other.var)
    }

    fn raw(&self, ordinal: i32, field: usize) -> u64 {
        debug_assert!(ordinal >= 0 && ordinal <= self.max_ordinal);
        self.fixed.get(self.layout.offset_of(ordinal, field), self.layout.width(field))
    }

    /// Null check with per-kind semantics. `ordinal` must be in range.
    pub(crate) fn is_null(&self, ordinal: i32, field: usize) -> bool {
        let w = self.layout.width(field);
        let raw = self.raw(ordinal, field);
        if self.schema.fields()[field].kind().is_var_length() {
            raw >> (w - 1) & 1 == 1
        } else {
            raw == mask(w)
        }
    }

    pub(crate) fn read_int(&self, ordinal: i32, field: usize) -> Option<i32> {
        let w = self.layout.width(field);
        let raw = self.raw(ordinal, field);
        (raw != mask(w)).then(|| crate::encoding::zigzag::unzigzag32(raw))
    }

    pub(crate) fn read_long(&self, ordinal: i32, field: usize) -> Option<i64> {
        let w = self.layout.width(field);
        let raw = self.raw(ordinal, field);
        (raw != mask(w)).then(|| crate::encoding::zigzag::unzigzag64(raw))
    }

    pub(crate) fn read_float(&self, ordinal: i32, field: usize) -> Option<f32> {
        let raw = self.raw(ordinal, field);
        (raw != mask(32)).then(|| f32::from_bits(raw as u32))
    }

    pub(crate) fn read_double(&self, ordinal: i32, field: usize) -> Option<f64> {
        let raw = self.raw(ordinal, field);
        (raw != mask(64)).then(|| f64::from_bits(raw))
    }

    pub(crate) fn read_bool(&self, ordinal: i32, field: usize) -> Option<bool> {
        let raw = self.raw(ordinal, field);
        (raw != 3).then(|| raw == 1)
    }

    /// Referenced ordinal, or -1 for a null reference.
    pub(crate) fn read_ordinal(&self, ordinal: i32, field: usize) -> i32 {
        let w = self.layout.width(field);
        let raw = self.raw(ordinal, field);
        if raw == mask(w) {
            -1
        } else {
            raw as i32
        }
    }

    fn var_bounds(&self, ordinal: i32, field: usize) -> (u64, u64, bool) {
        let w = self.layout.width(field);
        let raw = self.raw(ordinal, field);
        let null = raw >> (w - 1) & 1 == 1;
        let end = raw & mask(w - 1);
        let start = if ordinal == 0 {
            0
        } else {
            self.raw(ordinal - 1, field) & mask(w - 1)
        };
        (start, end, null)
    }

    /// Var-length payload slice, `None` for null. Fails on offsets that
    /// point outside the buffer (malformed input).
    pub(crate) fn var_payload(&self, ordinal: i32, field: usize) -> Result<Option<&[u8]>> {
        let slot = self
            .schema
            .var_slot(field)
            .ok_or_else(|| eyre!("field {} is not var-length", field))?;
        let (start, end, null) = self.var_bounds(ordinal, field);
        if null {
            return Ok(None);
        }
        self.var[slot].range(start, end).map(Some)
    }

    /// Content digest of one record over the given fields, independent
    /// of field widths and shard placement. `global` is the record's
    /// ordinal in the unsharded space.
    pub(crate) fn record_digest(&self, local: i32, global: i32, fields: &[usize]) -> Result<u32> {
        let mut digest = CASTAGNOLI.digest();
        digest.update(&global.to_le_bytes());
        for &field in fields {
            if self.schema.fields()[field].kind().is_var_length() {
                match self.var_payload(local, field)? {
                    None => digest.update(&[0]),
                    Some(payload) => {
                        digest.update(&[1]);
                        digest.update(&(payload.len() as u64).to_le_bytes());
                        digest.update(payload);
                    }
                }
            } else {
                let w = self.layout.width(field);
                let raw = self.raw(local, field);
                if raw == mask(w) {
                    digest.update(&[0]);
                } else {
                    digest.update(&[1]);
                    digest.update(&raw.to_le_bytes());
                }
            }
        }
        Ok(digest.finalize())
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.fixed.heap_bytes()
            + self.var.iter().map(VarBuffer::heap_bytes).sum::<usize>()
            + self.removals.heap_bytes()
    }

    /// Returns buffers to the recycler when this was the last reference;
    /// otherwise in-flight readers free them on their own drop.
    pub(crate) fn recycle_into(self, recycler: &mut SegmentRecycler) {
        if let Ok(fixed) = Arc::try_unwrap(self.fixed) {
            recycler.recycle_words(fixed.into_backing());
        }
        if let Ok(var) = Arc::try_unwrap(self.var) {
            for buffer in var {
                recycler.recycle_bytes(buffer.into_backing());
            }
        }
        if let Ok(removals) = Arc::try_unwrap(self.removals) {
            removals.recycle_into(recycler);
        }
    }
}

impl Clone for Generation {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            layout: self.layout.clone(),
            fixed: Arc::clone(&self.fixed),
            var: Arc::clone(&self.var),
            max_ordinal: self.max_ordinal,
            removals: Arc::clone(&self.removals),
        }
    }
}

/// One shard's decoded delta: the exact removal and addition sets plus
/// a dense mini-generation holding only the added records, laid out at
/// the post-delta widths.
#[derive(Debug)]
pub(crate) struct DeltaChunk {
    added: Generation,
    removals: OrdinalGapSet,
    additions: OrdinalGapSet,
    max_ordinal: i32,
}

impl DeltaChunk {
    pub(crate) fn decode(
        input: &mut BlobInput<'_>,
        schema: &Arc<Schema>,
        wire_schema: &Schema,
        recycler: &mut SegmentRecycler,
    ) -> Result<Self> {
        let max_plus_one = input.read_varint()?;
        ensure!(
            max_plus_one <= i32::MAX as u64,
            "post-delta maximum {} exceeds ordinal space",
            max_plus_one
        );
        let max_ordinal = max_plus_one as i32 - 1;

        let removals = read_gap_section(input, recycler)?;
        let additions = read_gap_section(input, recycler)?;
        let rows = additions.count();
        ensure!(
            rows <= i32::MAX as usize,
            "addition count {} exceeds ordinal space",
            rows
        );

        let (layout, fixed, var) = decode_record_block(input, schema, wire_schema, rows, recycler)?;
        let added = Generation::from_parts(
            Arc::clone(schema),
            layout,
            fixed,
            var,
            rows as i32 - 1,
            OrdinalGapSet::new(),
        );

        Ok(Self {
            added,
            removals,
            additions,
            max_ordinal,
        })
    }

    pub(crate) fn has_additions(&self) -> bool {
        !self.additions.is_empty()
    }

    pub(crate) fn removals(&self) -> &OrdinalGapSet {
        &self.removals
    }

    pub(crate) fn additions(&self) -> &OrdinalGapSet {
        &self.additions
    }

    /// Consumes the chunk, moving the removal set out (the fast path
    /// adopts it) and recycling everything else.
    pub(crate) fn into_removals(self, recycler: &mut SegmentRecycler) -> OrdinalGapSet {
        self.added.recycle_into(recycler);
        self.additions.recycle_into(recycler);
        self.removals
    }

    pub(crate) fn recycle_into(self, recycler: &mut SegmentRecycler) {
        self.added.recycle_into(recycler);
        self.additions.recycle_into(recycler);
        self.removals.recycle_into(recycler);
    }
}

fn read_gap_section(input: &mut BlobInput<'_>, recycler: &mut SegmentRecycler) -> Result<OrdinalGapSet> {
    let len = input.read_len()?;
    let bytes = input.read_exact(len)?;
    let mut buf = recycler.acquire_bytes();
    buf.extend_from_slice(bytes);
    OrdinalGapSet::from_gap_buffer(buf)
}

/// Upper bound checks for a wire width, per field kind.
fn validate_wire_width(kind: FieldKind, width: u64) -> Result<u32> {
    let ok = match kind {
        FieldKind::Float => width == 32,
        FieldKind::Double => width == 64,
        FieldKind::Boolean => width == 2,
        FieldKind::Int => (1..=33).contains(&width),
        FieldKind::Reference => (1..=32).contains(&width),
        FieldKind::Long => (1..=64).contains(&width),
        FieldKind::String | FieldKind::Bytes => (2..=64).contains(&width),
    };
    ensure!(ok, "bit width {} invalid for {:?} field", width, kind);
    Ok(width as u32)
}

/// Decodes widths, fixed words, and var buffers for `rows` records,
/// projecting the wire schema down to `schema`.
fn decode_record_block(
    input: &mut BlobInput<'_>,
    schema: &Schema,
    wire_schema: &Schema,
    rows: usize,
    recycler: &mut SegmentRecycler,
) -> Result<(RecordLayout, PackedArray, Vec<VarBuffer>)> {
    let mut wire_widths: SmallVec<[u32; 16]> = SmallVec::with_capacity(wire_schema.field_count());
    for field in wire_schema.fields() {
        let width = input.read_varint()?;
        wire_widths.push(validate_wire_width(field.kind(), width)?);
    }
    let wire_layout = RecordLayout::new(wire_widths.iter().copied());

    let total_bits = rows as u64 * wire_layout.bits_per_record();
    let expected_words = total_bits.div_ceil(64);
    let declared_words = input.read_varint()?;
    ensure!(
        declared_words == expected_words,
        "fixed buffer holds {} words, expected {} for {} records",
        declared_words,
        expected_words,
        rows
    );
    let word_count = usize::try_from(expected_words)
        .map_err(|_| eyre!("fixed buffer of {} words exceeds address space", expected_words))?;
    let words = input.read_words(word_count)?;

    let mut kept_var: Vec<VarBuffer> = Vec::with_capacity(schema.var_field_count());
    for &wire_field in wire_schema.var_field_indices() {
        let name = wire_schema.fields()[wire_field].name();
        let len = input.read_len()?;
        if schema.field_index(name).is_some() {
            let payload = input.read_exact(len)?;
            let mut buf = recycler.acquire_bytes();
            buf.extend_from_slice(payload);
            kept_var.push(VarBuffer::from_backing(buf));
        } else {
            input.skip(len)?;
        }
    }

    if schema.field_count() == wire_schema.field_count() {
        // Projection validation guarantees identical field order, so the
        // full-width case can adopt the wire layout as-is.
        let mut backing = recycler.acquire_words(PackedArray::backing_len(total_bits));
        for (i, word) in words.iter().enumerate() {
            backing[i] = word.get();
        }
        return Ok((wire_layout, PackedArray::from_backing(backing), kept_var));
    }

    // Repack only the projected fields at the narrower stride.
    let mut keep: SmallVec<[usize; 16]> = SmallVec::with_capacity(schema.field_count());
    for field in schema.fields() {
        let wire_idx = wire_schema
            .field_index(field.name())
            .ok_or_else(|| eyre!("field {} missing from wire schema", field.name()))?;
        keep.push(wire_idx);
    }
    let layout = RecordLayout::new(keep.iter().map(|&wi| wire_widths[wi]));

    let mut wire_backing = recycler.acquire_words(PackedArray::backing_len(total_bits));
    for (i, word) in words.iter().enumerate() {
        wire_backing[i] = word.get();
    }
    let wire_fixed = PackedArray::from_backing(wire_backing);

    let filtered_bits = rows as u64 * layout.bits_per_record();
    let mut fixed = PackedArray::from_backing(recycler.acquire_words(PackedArray::backing_len(filtered_bits)));
    for row in 0..rows as i32 {
        for (dst_field, &src_field) in keep.iter().enumerate() {
            let value = wire_fixed.get(wire_layout.offset_of(row, src_field), wire_widths[src_field]);
            fixed.set(layout.offset_of(row, dst_field), wire_widths[src_field], value);
        }
    }
    recycler.recycle_words(wire_fixed.into_backing());

    Ok((layout, fixed, kept_var))
}

/// Copies one record between generations of the same schema, translating
/// field widths and compacting var payloads into the target buffers.
fn copy_record(
    src: &Generation,
    src_ordinal: i32,
    dst_layout: &RecordLayout,
    dst_fixed: &mut PackedArray,
    dst_var: &mut [VarBuffer],
    dst_ordinal: i32,
) -> Result<()> {
    let schema = &src.schema;
    let mut var_slot = 0;
    for field in 0..schema.field_count() {
        let src_width = src.layout.width(field);
        let dst_width = dst_layout.width(field);
        let raw = src.raw(src_ordinal, field);
        let dst_offset = dst_layout.offset_of(dst_ordinal, field);

        if schema.fields()[field].kind().is_var_length() {
            let null = raw >> (src_width - 1) & 1 == 1;
            let end = if null {
                dst_var[var_slot].len()
            } else {
                let (start, src_end, _) = src.var_bounds(src_ordinal, field);
                let payload = src.var[var_slot].range(start, src_end)?;
                dst_var[var_slot].append(payload)
            };
            debug_assert!(end <= mask(dst_width - 1));
            dst_fixed.set(dst_offset, dst_width, end | (null as u64) << (dst_width - 1));
            var_slot += 1;
        } else {
            let value = if raw == mask(src_width) { mask(dst_width) } else { raw };
            debug_assert!(value <= mask(dst_width));
            dst_fixed.set(dst_offset, dst_width, value);
        }
    }
    Ok(())
}

/// Fills the var-length slots of an unpopulated ordinal so later records
/// still chain to the right payload start. Numeric slots stay zero.
fn write_hole(
    schema: &Schema,
    layout: &RecordLayout,
    fixed: &mut PackedArray,
    var: &[VarBuffer],
    ordinal: i32,
) {
    for (slot, &field) in schema.var_field_indices().iter().enumerate() {
        let w = layout.width(field);
        let end = var[slot].len();
        fixed.set(layout.offset_of(ordinal, field), w, end | 1 << (w - 1));
    }
}

/// Skips one shard's snapshot section without materializing it.
pub(crate) fn discard_shard_snapshot(input: &mut BlobInput<'_>, wire_schema: &Schema) -> Result<()> {
    input.read_varint()?;
    skip_record_block(input, wire_schema)
}

/// Skips one shard's delta chunk without materializing it.
pub(crate) fn discard_shard_delta(input: &mut BlobInput<'_>, wire_schema: &Schema) -> Result<()> {
    input.read_varint()?;
    for _ in 0..2 {
        let len = input.read_len()?;
        input.skip(len)?;
    }
    skip_record_block(input, wire_schema)
}

fn skip_record_block(input: &mut BlobInput<'_>, wire_schema: &Schema) -> Result<()> {
    for _ in 0..wire_schema.field_count() {
        input.read_varint()?;
    }
    let words = input.read_len()?;
    let byte_len = words
        .checked_mul(8)
        .ok_or_else(|| eyre!("word count {} overflows byte length", words))?;
    input.skip(byte_len)?;
    for _ in 0..wire_schema.var_field_count() {
        let len = input.read_len()?;
        input.skip(len)?;
    }
    Ok(())
}
