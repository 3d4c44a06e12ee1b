//! Well-known host-local names and environment variables.
//!
//! Every process on the host has to agree on these, so they live in one
//! place instead of being repeated across the shim and the daemon.

/// POSIX shared memory object backing the host-wide accounting state.
pub const SHM_OBJECT: &str = "/rdma_intercept_shm";

/// Unix stream socket the coordinator daemon listens on.
pub const COLLECTOR_SOCKET: &str = "/tmp/rdma_collector.sock";

/// Pinned kernel probe map of per-PID resource counters.
pub const PROCESS_RESOURCES_MAP: &str = "/sys/fs/bpf/process_resources";

/// Pinned kernel probe map holding the singleton global counter.
pub const GLOBAL_RESOURCES_MAP: &str = "/sys/fs/bpf/global_resources";

/// Configuration file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/rdma_intercept.conf";

/// Environment variables understood by the shim and the daemon.
pub mod env {
    /// "1" enables interposition; anything else makes every wrapper a pure
    /// passthrough.
    pub const ENABLE: &str = "RDMA_INTERCEPT_ENABLE";
    /// Overrides the configuration file path.
    pub const CONFIG: &str = "RDMA_INTERCEPT_CONFIG";
    pub const ENABLE_QP_CONTROL: &str = "RDMA_INTERCEPT_ENABLE_QP_CONTROL";
    pub const MAX_QP_PER_PROCESS: &str = "RDMA_INTERCEPT_MAX_QP_PER_PROCESS";
    pub const MAX_SEND_WR_LIMIT: &str = "RDMA_INTERCEPT_MAX_SEND_WR_LIMIT";
    pub const MAX_RECV_WR_LIMIT: &str = "RDMA_INTERCEPT_MAX_RECV_WR_LIMIT";
    pub const ALLOW_RC_QP: &str = "RDMA_INTERCEPT_ALLOW_RC_QP";
    pub const ALLOW_UC_QP: &str = "RDMA_INTERCEPT_ALLOW_UC_QP";
    pub const ALLOW_UD_QP: &str = "RDMA_INTERCEPT_ALLOW_UD_QP";
    /// Hard override for the dynamic per-process QP ceiling.
    pub const LOCAL_QP_LIMIT: &str = "RDMA_INTERCEPT_LOCAL_QP_LIMIT";
    pub const MAX_GLOBAL_QP: &str = "RDMA_INTERCEPT_MAX_GLOBAL_QP";
    pub const MAX_GLOBAL_MEMORY: &str = "RDMA_INTERCEPT_MAX_GLOBAL_MEMORY";
}
