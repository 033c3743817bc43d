//! Wrapping counters for record populations.

use std::sync::atomic::{AtomicU64, Ordering};

/// A shared counter of items in some pool.
///
/// Arithmetic wraps: decrementing past zero yields `u64::MAX`, so an
/// unbalanced decrement is visible rather than lost.
#[derive(Debug, Default)]
pub struct ItemCounter(AtomicU64);

impl ItemCounter {
    pub const fn new() -> Self {
        ItemCounter(AtomicU64::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
