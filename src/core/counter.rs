use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide count of real pulses observed by any task.
///
/// Diagnostics only: nothing in the scheduler reads it back.
#[derive(Clone, Debug, Default)]
pub struct PulseCounter(Arc<AtomicU64>);

impl PulseCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
