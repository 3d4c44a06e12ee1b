//! Creating and attaching the named POSIX shared memory object.

use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::ptr::NonNull;

use log::debug;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::error::{Result, ShmemError};
use crate::layout::SharedState;

/// An attached mapping of the host's shared accounting region.
///
/// Attaching is idempotent: the first process creates and initializes the
/// object, later ones map the same pages. The mapping lives until drop;
/// the object itself survives process exit and is only removed by
/// [`SharedRegion::unlink`].
pub struct SharedRegion {
    ptr: NonNull<SharedState>,
    name: String,
}

// All access to the pointee goes through atomics or the embedded
// spinlock, which is exactly the contract the region has with foreign
// processes as well.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Creates or attaches the named region and initializes it if this
    /// process is the first to see it.
    pub fn open(name: &str) -> Result<Self> {
        let size = std::mem::size_of::<SharedState>();

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|source| ShmemError::Open {
            name: name.to_owned(),
            source,
        })?;
        // Owning the fd as a File closes it on every exit path below; the
        // mapping stays valid without it.
        let file = unsafe { File::from_raw_fd(fd) };

        ftruncate(file.as_raw_fd(), size as i64).map_err(|source| ShmemError::Resize {
            name: name.to_owned(),
            source,
        })?;

        let length = NonZeroUsize::new(size).expect("shared state layout is not zero sized");
        let raw = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        }
        .map_err(|source| ShmemError::Map {
            name: name.to_owned(),
            source,
        })?;

        let ptr = NonNull::new(raw.cast::<SharedState>()).ok_or(ShmemError::Map {
            name: name.to_owned(),
            source: nix::Error::EINVAL,
        })?;

        let region = Self {
            ptr,
            name: name.to_owned(),
        };
        region.state().init_if_fresh();
        debug!("attached shared region {} ({} bytes)", region.name, size);

        Ok(region)
    }

    /// Typed view of the mapped state.
    pub fn state(&self) -> &SharedState {
        // Valid for the lifetime of the mapping owned by self.
        unsafe { self.ptr.as_ref() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the named object from the host. Existing mappings keep
    /// working; new attachers will create a fresh region.
    pub fn unlink(name: &str) -> Result<()> {
        shm_unlink(name).map_err(|source| ShmemError::Open {
            name: name.to_owned(),
            source,
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let size = std::mem::size_of::<SharedState>();
        if let Err(err) = unsafe { munmap(self.ptr.as_ptr().cast(), size) } {
            debug!("unmap shared region {}: {}", self.name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use common::ResourceUsage;
    use std::sync::Arc;
    use std::thread;

    struct Scratch(String);

    impl Scratch {
        fn new(tag: &str) -> Self {
            Scratch(format!("/rdma_shmem_test_{}_{}", tag, std::process::id()))
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = SharedRegion::unlink(&self.0);
        }
    }

    #[test]
    fn first_attacher_writes_default_caps() -> Result<()> {
        let scratch = Scratch::new("defaults");
        let region = SharedRegion::open(&scratch.0).context("open scratch region")?;

        let caps = region.state().caps();
        assert_eq!(caps.max_qp, 1000);
        assert_eq!(caps.max_mr, 1000);
        assert_eq!(caps.max_memory, 1024 * 1024 * 1024);
        assert!(region.state().version() >= 1);
        assert!(region.state().global().is_zero());

        Ok(())
    }

    #[test]
    fn attach_is_idempotent() -> Result<()> {
        let scratch = Scratch::new("idempotent");
        let first = SharedRegion::open(&scratch.0)?;
        first.state().update_global(ResourceUsage::new(7, 1, 64));

        let second = SharedRegion::open(&scratch.0)?;
        assert_eq!(second.state().global(), ResourceUsage::new(7, 1, 64));
        // Re-attaching must not re-run first-time initialization.
        assert_eq!(second.state().caps(), first.state().caps());

        Ok(())
    }

    #[test]
    fn process_slots_roundtrip_and_absent_reads_zero() -> Result<()> {
        let scratch = Scratch::new("slots");
        let region = SharedRegion::open(&scratch.0)?;
        let state = region.state();

        assert!(state.process(4242).is_zero());

        state.update_process(4242, ResourceUsage::new(2, 3, 4096))?;
        state.update_process(4243, ResourceUsage::new(1, 0, 0))?;
        assert_eq!(state.process(4242), ResourceUsage::new(2, 3, 4096));
        assert_eq!(state.process(4243), ResourceUsage::new(1, 0, 0));

        // Overwrite reuses the claimed slot.
        state.update_process(4242, ResourceUsage::new(3, 3, 4096))?;
        assert_eq!(state.process(4242).qp_count, 3);

        Ok(())
    }

    #[test]
    fn full_table_rejects_new_pids() -> Result<()> {
        let scratch = Scratch::new("full");
        let region = SharedRegion::open(&scratch.0)?;
        let state = region.state();

        for pid in 1..=crate::MAX_PROCESSES as i32 {
            state.update_process(pid, ResourceUsage::new(1, 0, 0))?;
        }

        let overflow = state.update_process(1_000_000, ResourceUsage::default());
        assert!(matches!(overflow, Err(crate::ShmemError::TableFull(_))));

        // Known PIDs still update fine.
        state.update_process(1, ResourceUsage::new(9, 0, 0))?;
        assert_eq!(state.process(1).qp_count, 9);

        Ok(())
    }

    #[test]
    fn every_mutation_bumps_version() -> Result<()> {
        let scratch = Scratch::new("version");
        let region = SharedRegion::open(&scratch.0)?;
        let state = region.state();

        let start = state.version();
        state.update_global(ResourceUsage::new(1, 0, 0));
        state.update_process(99, ResourceUsage::new(1, 0, 0))?;
        state.set_global_limits(10, 10, 10);
        assert_eq!(state.version(), start + 3);
        assert!(state.last_update_time_ns() > 0);

        Ok(())
    }

    #[test]
    fn concurrent_global_mutation_loses_no_updates() -> Result<()> {
        let scratch = Scratch::new("storm");
        let region = Arc::new(SharedRegion::open(&scratch.0)?);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    for _ in 0..100 {
                        region.state().with_global_mut(|usage, _caps| {
                            usage.qp_count += 1;
                        });
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().expect("mutator thread panicked");
        }

        assert_eq!(region.state().global().qp_count, 800);

        Ok(())
    }
}
