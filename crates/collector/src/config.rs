//! Configuration related structures
use clap::Parser;
use getset::{CopyGetters, Getters};
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Clone, CopyGetters, Getters, Debug)]
#[command(
    name = "rdma-collector",
    about = "Host-local coordinator for RDMA resource metering",
    version
)]
pub struct Config {
    #[get_copy = "pub"]
    #[arg(
        default_value("info"),
        env("RDMA_COLLECTOR_LOG_LEVEL"),
        long("log-level"),
        short('l'),
        value_name("LEVEL"),
        value_parser(parse_level)
    )]
    /// The logging level of the daemon
    log_level: LevelFilter,

    #[get = "pub"]
    #[arg(
        default_value("/tmp/rdma_collector.sock"),
        env("RDMA_COLLECTOR_SOCK_PATH"),
        long("sock-path")
    )]
    /// The path to the unix socket serving the line protocol
    sock_path: PathBuf,

    #[get = "pub"]
    #[arg(default_value("/rdma_intercept_shm"), long("shm-name"))]
    /// Name of the POSIX shared memory object holding the accounting state
    shm_name: String,

    #[get_copy = "pub"]
    #[arg(default_value("100"), long("sync-interval-ms"), value_name("MILLIS"))]
    /// Period of the kernel probe to shared memory synchronizer
    sync_interval_ms: u64,

    #[get_copy = "pub"]
    #[arg(env("RDMA_INTERCEPT_MAX_GLOBAL_QP"), long("max-global-qp"))]
    /// Host-wide cap on live QPs
    max_global_qp: Option<u32>,

    #[get_copy = "pub"]
    #[arg(long("max-global-mr"))]
    /// Host-wide cap on live MRs
    max_global_mr: Option<u32>,

    #[get_copy = "pub"]
    #[arg(
        env("RDMA_INTERCEPT_MAX_GLOBAL_MEMORY"),
        long("max-global-memory"),
        value_name("BYTES")
    )]
    /// Host-wide cap on registered memory
    max_global_memory: Option<u64>,
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse::<LevelFilter>()
        .map_err(|err| format!("{}: {}", value, err))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn default_config() {
        let config = Config::parse_from(["rdma-collector"]);

        assert_eq!(config.log_level(), LevelFilter::Info);
        assert_eq!(config.sock_path(), &PathBuf::from("/tmp/rdma_collector.sock"));
        assert_eq!(config.shm_name(), "/rdma_intercept_shm");
        assert_eq!(config.sync_interval_ms(), 100);
        assert_eq!(config.max_global_qp(), None);
    }

    #[test]
    fn caps_from_flags() -> Result<()> {
        let config = Config::try_parse_from([
            "rdma-collector",
            "--max-global-qp",
            "5",
            "--max-global-memory",
            "1048576",
            "--sock-path",
            "/run/rdma/collector.sock",
        ])?;

        assert_eq!(config.max_global_qp(), Some(5));
        assert_eq!(config.max_global_memory(), Some(1_048_576));
        assert_eq!(config.sock_path(), &PathBuf::from("/run/rdma/collector.sock"));

        Ok(())
    }
}
