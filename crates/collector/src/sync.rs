//! The kernel probe → shared memory synchronizer.
//!
//! Runs on a fixed tick. The kernel is ground truth for everything it
//! observes: the singleton global entry overwrites the region's global
//! triple, and every per-PID entry overwrites that process's slot. The
//! shim's direct writes are the low-latency fast path in between ticks;
//! this copy is the eventual-consistency anchor. Failures are logged and
//! retried on the next tick, and no entries are ever invented.

use log::warn;
use probes::ProbeMaps;
use shmem::SharedState;

/// One synchronizer tick.
pub fn sync_once(state: &SharedState, probes: &ProbeMaps) {
    match probes.global_usage() {
        Ok(Some(usage)) => state.update_global(usage),
        Ok(None) => {}
        Err(err) => warn!("read kernel global counters: {}", err),
    }

    match probes.process_entries() {
        Ok(entries) => {
            for (pid, usage) in entries {
                if let Err(err) = state.update_process(pid as i32, usage) {
                    warn!("sync counters for pid {}: {}", pid, err);
                }
            }
        }
        Err(err) => warn!("walk kernel process counters: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use common::ResourceUsage;
    use shmem::SharedRegion;

    #[test]
    fn absent_probe_maps_leave_the_region_alone() -> Result<()> {
        let name = format!("/rdma_sync_test_{}", std::process::id());
        let region = SharedRegion::open(&name).context("open scratch region")?;
        region.state().update_global(ResourceUsage::new(5, 1, 64));

        let probes = ProbeMaps::open_at("/sys/fs/bpf/nope_proc", "/sys/fs/bpf/nope_global");
        sync_once(region.state(), &probes);

        // No kernel data, no invented entries, no overwrites.
        assert_eq!(region.state().global(), ResourceUsage::new(5, 1, 64));

        SharedRegion::unlink(&name)?;
        Ok(())
    }
}
