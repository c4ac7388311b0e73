use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default, Debug)]
pub struct Counters {
    pub cycles: Arc<AtomicU64>,
    pub cycles_failed: Arc<AtomicU64>,

    // per-cycle skips and deferrals
    pub records_skipped: Arc<AtomicU64>,
    pub families_skipped: Arc<AtomicU64>,
    pub listings_deferred: Arc<AtomicU64>,

    pub rows_written: Arc<AtomicU64>,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
