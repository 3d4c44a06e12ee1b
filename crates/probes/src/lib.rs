//! Consumer side of the kernel probe feed.
//!
//! The probe backend (out of scope here) counts QP/MR create and destroy
//! events at the kernel's verbs entry points and exposes two pinned maps:
//! per-PID counters and a singleton global counter. We only ever read
//! them, over the raw `bpf(2)` syscall so the shim does not drag a BPF
//! loader library into every RDMA process.

mod maps;
mod sys;

pub use maps::{ProbeMap, ProbeMaps};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("open pinned map {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("lookup in pinned map: {0}")]
    Lookup(#[source] std::io::Error),
    #[error("iterate pinned map: {0}")]
    Iterate(#[source] std::io::Error),
}
