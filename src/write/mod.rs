//! # Producer Side
//!
//! Builds the snapshot and delta streams the [`store`] consumes. Meant
//! for producers and test fixtures; the staged representation favors
//! clarity over footprint.
//!
//! [`store`]: crate::store

mod record;
mod state;

pub use record::WriteRecord;
pub use state::WriteState;
