//! # Field Access Sampling
//!
//! Read-path instrumentation. Every typed accessor reports the field it
//! touched to the installed sampler before routing; the default sampler
//! is a no-op the optimizer erases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives one call per typed field access.
pub trait FieldAccessSampler: Send + Sync {
    fn record_field_access(&self, field: usize);
}

/// Sampler that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSampler;

impl FieldAccessSampler for DisabledSampler {
    fn record_field_access(&self, _field: usize) {}
}

/// Per-field access counters with relaxed atomics.
#[derive(Debug)]
pub struct FieldAccessCounter {
    counts: Vec<AtomicU64>,
}

impl FieldAccessCounter {
    pub fn new(field_count: usize) -> Self {
        Self {
            counts: (0..field_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn count(&self, field: usize) -> u64 {
        self.counts.get(field).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }
}

impl FieldAccessSampler for FieldAccessCounter {
    fn record_field_access(&self, field: usize) {
        if let Some(count) = self.counts.get(field) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }
}
