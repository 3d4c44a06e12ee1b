//! Typed access to the two pinned resource maps.

use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd};

use common::{names, ResourceUsage};
use log::warn;

use crate::sys;
use crate::{ProbeError, Result};

/// One pinned map, opened read-only for the lifetime of the handle.
#[derive(Debug)]
pub struct ProbeMap {
    file: File,
    path: String,
}

impl ProbeMap {
    pub fn open(path: &str) -> Result<Self> {
        let fd = sys::obj_get(path).map_err(|source| ProbeError::Open {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self {
            // Wrapping the fd closes it with the handle.
            file: unsafe { File::from_raw_fd(fd) },
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reads the value for `key`; `None` when the key is absent.
    pub fn lookup(&self, key: u32) -> Result<Option<ResourceUsage>> {
        let mut usage = ResourceUsage::default();
        let found = sys::map_lookup(self.file.as_raw_fd(), key, &mut usage)
            .map_err(ProbeError::Lookup)?;
        Ok(if found { Some(usage) } else { None })
    }

    /// Snapshot of every key/value pair via the next-key protocol. Entries
    /// deleted mid-walk are skipped, never invented.
    pub fn entries(&self) -> Result<Vec<(u32, ResourceUsage)>> {
        let fd = self.file.as_raw_fd();
        let mut entries = Vec::new();
        let mut cursor = None;
        let mut next = 0u32;

        while sys::map_next_key(fd, cursor, &mut next).map_err(ProbeError::Iterate)? {
            if let Some(usage) = self.lookup(next)? {
                entries.push((next, usage));
            }
            cursor = Some(next);
        }

        Ok(entries)
    }
}

/// The pair of maps the probe backend publishes. Either may be missing,
/// e.g. when the probe is not loaded on this host; callers degrade
/// gracefully instead of failing startup.
#[derive(Default)]
pub struct ProbeMaps {
    process: Option<ProbeMap>,
    global: Option<ProbeMap>,
}

impl ProbeMaps {
    /// Attaches whatever is pinned at the well-known paths.
    pub fn open() -> Self {
        Self::open_at(names::PROCESS_RESOURCES_MAP, names::GLOBAL_RESOURCES_MAP)
    }

    /// Attach with explicit pin paths.
    pub fn open_at(process_path: &str, global_path: &str) -> Self {
        let process = match ProbeMap::open(process_path) {
            Ok(map) => Some(map),
            Err(err) => {
                warn!("kernel probe unavailable: {}", err);
                None
            }
        };
        let global = match ProbeMap::open(global_path) {
            Ok(map) => Some(map),
            Err(err) => {
                warn!("kernel probe unavailable: {}", err);
                None
            }
        };
        Self { process, global }
    }

    pub fn available(&self) -> bool {
        self.process.is_some() || self.global.is_some()
    }

    /// Kernel-observed usage of one process; `None` when the map is not
    /// attached or holds no entry for the PID.
    pub fn process_usage(&self, pid: u32) -> Result<Option<ResourceUsage>> {
        match &self.process {
            Some(map) => map.lookup(pid),
            None => Ok(None),
        }
    }

    /// Kernel-observed host totals from the singleton entry.
    pub fn global_usage(&self) -> Result<Option<ResourceUsage>> {
        match &self.global {
            Some(map) => map.lookup(0),
            None => Ok(None),
        }
    }

    /// Snapshot of every tracked PID.
    pub fn process_entries(&self) -> Result<Vec<(u32, ResourceUsage)>> {
        match &self.process {
            Some(map) => map.entries(),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pins_degrade_to_empty_maps() {
        let maps = ProbeMaps::open_at(
            "/sys/fs/bpf/no_such_process_map",
            "/sys/fs/bpf/no_such_global_map",
        );

        assert!(!maps.available());
        assert!(maps.process_usage(1).unwrap().is_none());
        assert!(maps.global_usage().unwrap().is_none());
        assert!(maps.process_entries().unwrap().is_empty());
    }

    #[test]
    fn open_reports_the_pin_path() {
        let err = ProbeMap::open("/sys/fs/bpf/no_such_map").unwrap_err();
        assert!(err.to_string().contains("/sys/fs/bpf/no_such_map"));
    }
}
