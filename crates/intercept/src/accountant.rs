//! Per-process resource counters.
//!
//! Mutated only by the wrapper success paths, read by the admission
//! fallback when neither the shared region nor the kernel probe can
//! answer. The canonical reader of per-process usage is the shared
//! region; these counters are the low-latency local mirror.

use std::sync::Mutex;

use common::ResourceUsage;

#[derive(Default)]
pub struct Accountant {
    counters: Mutex<ResourceUsage>,
}

impl Accountant {
    pub fn snapshot(&self) -> ResourceUsage {
        *self.counters.lock().expect("accountant mutex")
    }

    /// Records an admitted QP creation; returns the updated triple for
    /// pushing into the shared region.
    pub fn qp_created(&self) -> ResourceUsage {
        let mut counters = self.counters.lock().expect("accountant mutex");
        counters.qp_count += 1;
        *counters
    }

    pub fn qp_destroyed(&self) -> ResourceUsage {
        let mut counters = self.counters.lock().expect("accountant mutex");
        counters.qp_count = counters.qp_count.saturating_sub(1);
        *counters
    }

    pub fn mr_registered(&self, length: u64) -> ResourceUsage {
        let mut counters = self.counters.lock().expect("accountant mutex");
        counters.mr_count += 1;
        counters.memory_used += length;
        *counters
    }

    pub fn mr_deregistered(&self, length: u64) -> ResourceUsage {
        let mut counters = self.counters.lock().expect("accountant mutex");
        counters.mr_count = counters.mr_count.saturating_sub(1);
        counters.memory_used = counters.memory_used.saturating_sub(length);
        *counters
    }
}
