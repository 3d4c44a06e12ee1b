//! The coordinator daemon and its legacy line protocol.
//!
//! Exactly one collector runs per host. It owns the shared accounting
//! region: it creates the region, applies the host-wide caps, copies the
//! kernel probe counters into it on a fixed tick, and answers the
//! line-oriented protocol on a Unix stream socket for legacy clients and
//! tests. The interposer shim reads the region directly; the socket is a
//! compatibility facade, not the admission fast path.

pub mod client;
pub mod config;
pub mod proto;
pub mod server;
pub mod sync;

pub use client::{CollectorClient, GlobalStats, IpcError};
pub use config::Config;
pub use server::Collector;
