//! # Segment Recycler
//!
//! Bounded pool of reusable `u64` and `u8` segments for the update path.
//! Snapshot and delta decoding, delta merging, and resharding all build
//! large transient buffers; pooling them keeps one update cycle from
//! allocating per shard.
//!
//! ## Cycle discipline
//!
//! Segments recycled during a shard's update are parked in a pending
//! list and only become acquirable after [`swap`] runs, which the engine
//! calls once per shard after publishing that shard's state. A segment
//! can therefore never be handed out again while the state that released
//! it is still being replaced.
//!
//! ## Thread Safety
//!
//! Not synchronized. All methods take `&mut self`; the single update
//! thread owns the recycler and threads it through every update entry
//! point. Readers never touch it.
//!
//! [`swap`]: SegmentRecycler::swap

/// Pooled segments per kind before recycled buffers are dropped instead.
const DEFAULT_SEGMENT_LIMIT: usize = 64;

/// Bounded pool of reusable word and byte segments.
pub struct SegmentRecycler {
    segment_limit: usize,
    free_words: Vec<Vec<u64>>,
    free_bytes: Vec<Vec<u8>>,
    pending_words: Vec<Vec<u64>>,
    pending_bytes: Vec<Vec<u8>>,
}

impl Default for SegmentRecycler {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_LIMIT)
    }
}

impl SegmentRecycler {
    pub fn new(segment_limit: usize) -> Self {
        Self {
            segment_limit,
            free_words: Vec::new(),
            free_bytes: Vec::new(),
            pending_words: Vec::new(),
            pending_bytes: Vec::new(),
        }
    }

    /// A zero-filled word segment of exactly `len` words, reusing pooled
    /// capacity when available.
    pub fn acquire_words(&mut self, len: usize) -> Vec<u64> {
        match self.free_words.pop() {
            Some(mut words) => {
                words.clear();
                words.resize(len, 0);
                words
            }
            None => vec![0; len],
        }
    }

    /// An empty byte segment, reusing pooled capacity when available.
    pub fn acquire_bytes(&mut self) -> Vec<u8> {
        match self.free_bytes.pop() {
            Some(mut bytes) => {
                bytes.clear();
                bytes
            }
            None => Vec::new(),
        }
    }

    /// Parks a word segment for reuse after the next [`swap`].
    ///
    /// [`swap`]: SegmentRecycler::swap
    pub fn recycle_words(&mut self, words: Vec<u64>) {
        if self.pooled_words() < self.segment_limit {
            self.pending_words.push(words);
        }
    }

    /// Parks a byte segment for reuse after the next [`swap`].
    ///
    /// [`swap`]: SegmentRecycler::swap
    pub fn recycle_bytes(&mut self, bytes: Vec<u8>) {
        if self.pooled_bytes() < self.segment_limit {
            self.pending_bytes.push(bytes);
        }
    }

    /// Makes segments recycled since the previous swap acquirable.
    pub fn swap(&mut self) {
        self.free_words.append(&mut self.pending_words);
        self.free_bytes.append(&mut self.pending_bytes);
    }

    fn pooled_words(&self) -> usize {
        self.free_words.len() + self.pending_words.len()
    }

    fn pooled_bytes(&self) -> usize {
        self.free_bytes.len() + self.pending_bytes.len()
    }

    /// Word segments acquirable right now.
    pub fn available_words(&self) -> usize {
        self.free_words.len()
    }

    /// Byte segments acquirable right now.
    pub fn available_bytes(&self) -> usize {
        self.free_bytes.len()
    }
}
