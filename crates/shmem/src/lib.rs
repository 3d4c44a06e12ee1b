//! The shared memory region (SMR) holding the host-wide RDMA resource
//! accounting state.
//!
//! Exactly one region exists per host, backed by a named POSIX shared
//! memory object. Any process may attach read/write; mutation is
//! serialized by a test-and-set spinlock stored inside the region itself,
//! because the region is shared with processes that may not run a Rust
//! runtime at all. Readers are lock-free and tolerate staleness on the
//! order of one producer update.

pub mod error;
mod layout;
mod region;

pub use error::{Result, ShmemError};
pub use layout::{GlobalCaps, SharedState, MAX_PROCESSES};
pub use region::SharedRegion;
