//! The in-process policy store for the interposer shim.
//!
//! Policy is loaded once at shim initialization from a line-oriented
//! `key = value` file plus `RDMA_INTERCEPT_*` environment variables.
//! The environment is applied after the file, so the environment wins.
//! Parsing is tolerant: an invalid line or value is logged at WARN and
//! skipped, it never fails the load.

mod config;
pub mod error;

pub use config::{LogLevel, PolicyConfig, PolicyConfigBuilder, QpType};
pub use error::{PolicyError, Result};
