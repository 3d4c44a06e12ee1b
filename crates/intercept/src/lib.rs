//! Interposition shim for the RDMA verbs resource entry points.
//!
//! Loaded into an RDMA process via `LD_PRELOAD`, the shim exports the
//! resource-affecting subset of the verbs surface with provider-identical
//! signatures. Each wrapper lazily initializes one process-wide context,
//! decides admission for the gated creation calls, dispatches to the real
//! provider entry point and mirrors successful mutations into the local
//! accountant and the shared accounting region.
//!
//! The shim is deliberately not a security boundary: a caller that
//! resolves provider symbols itself bypasses it. It also never touches
//! the data path; posted work requests and completions flow untouched.

pub mod accountant;
pub mod admission;
pub mod context;
pub mod hooks;
pub mod limiter;
pub mod provider;
pub mod verbs;
