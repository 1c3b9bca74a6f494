//! # Encoding Module
//!
//! Bit- and byte-level building blocks for record storage, including:
//!
//! - **Varint encoding**: Variable-length integer encoding for counts, widths, and gaps
//! - **Packed arrays**: Fixed-bit-width element storage readable at arbitrary bit offsets
//! - **Gap sets**: Gap-encoded strictly-increasing ordinal sets for delta bookkeeping
//! - **Bitsets**: Dense word bitsets tracking populated ordinals
//! - **Zig-zag**: signed-to-unsigned value mapping for packed integer fields

pub mod bitset;
pub mod gap_set;
pub mod packed;
pub mod varint;
pub mod zigzag;

pub use bitset::OrdinalBitSet;
pub use gap_set::OrdinalGapSet;
pub use packed::PackedArray;
pub use varint::{decode_varint, put_varint, varint_len};
