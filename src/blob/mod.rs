//! # Blob Streams
//!
//! Transport-facing pieces of the wire format: the byte cursor every
//! decoder reads through, and the populated-ordinals bitmap that closes
//! a snapshot. The per-shard record sections themselves are encoded and
//! decoded by `store::generation`; this module only moves bytes.

mod input;
pub mod ordinals;

pub use input::BlobInput;
