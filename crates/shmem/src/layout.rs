//! In-memory layout of the shared region and the typed accessors over it.
//!
//! `SharedState` is a plain `repr(C)` layout owned by no single process.
//! Every counter is a naturally aligned atomic, so an unlocked reader can
//! observe a mid-update snapshot across fields but never a torn value
//! within one field.

use std::hint;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use common::ResourceUsage;

use crate::error::{Result, ShmemError};

/// Capacity of the fixed process table.
pub const MAX_PROCESSES: usize = 1024;

/// Caps written at first initialization; the coordinator usually
/// overwrites them right away via [`SharedState::set_global_limits`].
const DEFAULT_MAX_GLOBAL_QP: u32 = 1000;
const DEFAULT_MAX_GLOBAL_MR: u32 = 1000;
const DEFAULT_MAX_GLOBAL_MEMORY: u64 = 1024 * 1024 * 1024;

/// Host-wide resource caps stored next to the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalCaps {
    pub max_qp: u32,
    pub max_mr: u32,
    pub max_memory: u64,
}

/// One `ResourceUsage` triple stored as individually atomic fields.
#[repr(C)]
pub(crate) struct UsageCell {
    qp_count: AtomicU32,
    mr_count: AtomicU32,
    memory_used: AtomicU64,
}

impl UsageCell {
    fn load(&self) -> ResourceUsage {
        ResourceUsage {
            qp_count: self.qp_count.load(Ordering::Relaxed),
            mr_count: self.mr_count.load(Ordering::Relaxed),
            memory_used: self.memory_used.load(Ordering::Relaxed),
        }
    }

    fn store(&self, usage: ResourceUsage) {
        self.qp_count.store(usage.qp_count, Ordering::Relaxed);
        self.mr_count.store(usage.mr_count, Ordering::Relaxed);
        self.memory_used.store(usage.memory_used, Ordering::Relaxed);
    }
}

/// One entry of the process table. `pid == 0` marks a free slot.
#[repr(C)]
pub(crate) struct ProcessSlot {
    pid: AtomicI32,
    usage: UsageCell,
}

/// The full contents of the shared memory object.
///
/// Field order matters: it is the cross-process ABI of the region.
#[repr(C)]
pub struct SharedState {
    global: UsageCell,
    processes: [ProcessSlot; MAX_PROCESSES],
    max_global_qp: AtomicU32,
    max_global_mr: AtomicU32,
    max_global_memory: AtomicU64,
    lock: AtomicU32,
    version: AtomicU64,
    last_update_time_ns: AtomicU64,
}

/// Holds the region spinlock; released on drop.
struct MutationGuard<'a> {
    state: &'a SharedState,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.state.lock.store(0, Ordering::Release);
    }
}

impl SharedState {
    /// Test-and-set acquire. Hold times are a handful of field writes, so
    /// spinning is acceptable; the lock is not robust across a holder
    /// crashing.
    fn acquire(&self) -> MutationGuard<'_> {
        while self
            .lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        MutationGuard { state: self }
    }

    /// Records a mutation. Must only be called with the lock held.
    fn touch(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
        self.last_update_time_ns
            .store(monotonic_now_ns(), Ordering::Relaxed);
    }

    /// First-attacher initialization. A freshly created object is all
    /// zeroes (`ftruncate` guarantees that), so `version == 0` identifies
    /// a region nobody has set up yet.
    pub(crate) fn init_if_fresh(&self) {
        let _guard = self.acquire();
        if self.version.load(Ordering::Relaxed) == 0 {
            self.max_global_qp
                .store(DEFAULT_MAX_GLOBAL_QP, Ordering::Relaxed);
            self.max_global_mr
                .store(DEFAULT_MAX_GLOBAL_MR, Ordering::Relaxed);
            self.max_global_memory
                .store(DEFAULT_MAX_GLOBAL_MEMORY, Ordering::Relaxed);
            self.touch();
        }
    }

    /// Unlocked read of the global triple.
    pub fn global(&self) -> ResourceUsage {
        self.global.load()
    }

    /// Unlocked linear scan. An absent PID reads as all zeroes, which is
    /// not an error.
    pub fn process(&self, pid: i32) -> ResourceUsage {
        for slot in &self.processes {
            if slot.pid.load(Ordering::Relaxed) == pid {
                return slot.usage.load();
            }
        }
        ResourceUsage::default()
    }

    pub fn caps(&self) -> GlobalCaps {
        GlobalCaps {
            max_qp: self.max_global_qp.load(Ordering::Relaxed),
            max_mr: self.max_global_mr.load(Ordering::Relaxed),
            max_memory: self.max_global_memory.load(Ordering::Relaxed),
        }
    }

    /// Monotonically increasing mutation counter. Two identical samples
    /// around a multi-field read bracket a consistent snapshot.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn last_update_time_ns(&self) -> u64 {
        self.last_update_time_ns.load(Ordering::Relaxed)
    }

    /// Locked overwrite of the global triple.
    pub fn update_global(&self, usage: ResourceUsage) {
        let _guard = self.acquire();
        self.global.store(usage);
        self.touch();
    }

    /// Locked read-modify-write of the global triple. The closure also
    /// receives the current caps so admission arithmetic can happen
    /// inside one critical section.
    pub fn with_global_mut<R>(&self, f: impl FnOnce(&mut ResourceUsage, &GlobalCaps) -> R) -> R {
        let _guard = self.acquire();
        let mut usage = self.global.load();
        let caps = GlobalCaps {
            max_qp: self.max_global_qp.load(Ordering::Relaxed),
            max_mr: self.max_global_mr.load(Ordering::Relaxed),
            max_memory: self.max_global_memory.load(Ordering::Relaxed),
        };
        let out = f(&mut usage, &caps);
        self.global.store(usage);
        self.touch();
        out
    }

    /// Locked write of one process slot. An unknown PID claims the first
    /// free slot; a full table is reported to the caller, who keeps
    /// accounting locally and retries on its next update.
    pub fn update_process(&self, pid: i32, usage: ResourceUsage) -> Result<()> {
        let _guard = self.acquire();

        let mut free = None;
        for slot in &self.processes {
            let owner = slot.pid.load(Ordering::Relaxed);
            if owner == pid {
                slot.usage.store(usage);
                self.touch();
                return Ok(());
            }
            if owner == 0 && free.is_none() {
                free = Some(slot);
            }
        }

        match free {
            Some(slot) => {
                slot.pid.store(pid, Ordering::Relaxed);
                slot.usage.store(usage);
                self.touch();
                Ok(())
            }
            None => Err(ShmemError::TableFull(pid)),
        }
    }

    /// Locked write of the host-wide caps.
    pub fn set_global_limits(&self, max_qp: u32, max_mr: u32, max_memory: u64) {
        let _guard = self.acquire();
        self.max_global_qp.store(max_qp, Ordering::Relaxed);
        self.max_global_mr.store(max_mr, Ordering::Relaxed);
        self.max_global_memory.store(max_memory, Ordering::Relaxed);
        self.touch();
    }
}

fn monotonic_now_ns() -> u64 {
    match nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_the_cross_process_abi() {
        // 16-byte global triple, 24 bytes per slot, caps, lock word and
        // two u64 trailers. Changing this breaks every attached process.
        assert_eq!(std::mem::size_of::<UsageCell>(), 16);
        assert_eq!(std::mem::size_of::<ProcessSlot>(), 24);
        assert_eq!(
            std::mem::size_of::<SharedState>(),
            16 + MAX_PROCESSES * 24 + 16 + 24
        );
        assert_eq!(std::mem::align_of::<SharedState>(), 8);
    }
}
