//! Blocking client half of the line protocol.
//!
//! Every call opens one connection, writes one request line and reads
//! the reply until end-of-stream, mirroring the serial server. This is
//! the compatibility facade for legacy tooling and the integration
//! tests; the shim's admission path reads the shared region directly and
//! never goes through here.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use common::{names, ResourceUsage};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpcError>;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("collector unreachable: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected collector response `{0}`")]
    UnexpectedResponse(String),
}

/// The `GET_STATS` reply, parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub total_qp: u32,
    pub max_qp: u32,
    pub total_mr: u32,
    pub memory_used: u64,
    pub max_memory: u64,
}

#[derive(Clone)]
pub struct CollectorClient {
    sock_path: PathBuf,
}

impl Default for CollectorClient {
    fn default() -> Self {
        Self::new(names::COLLECTOR_SOCKET)
    }
}

impl CollectorClient {
    pub fn new(sock_path: impl Into<PathBuf>) -> Self {
        Self {
            sock_path: sock_path.into(),
        }
    }

    fn request(&self, line: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.sock_path)?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.shutdown(Shutdown::Write)?;

        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        Ok(response)
    }

    pub fn get_stats(&self) -> Result<GlobalStats> {
        let response = self.request("GET_STATS")?;
        parse_stats(&response).ok_or(IpcError::UnexpectedResponse(response))
    }

    pub fn get_proc_stats(&self, pid: i32) -> Result<ResourceUsage> {
        let response = self.request(&format!("GET_PROC_STATS:{}", pid))?;
        parse_proc_stats(&response).ok_or(IpcError::UnexpectedResponse(response))
    }

    /// Asks the collector to admit one QP. `false` means the global cap
    /// refused it.
    pub fn create_qp(&self) -> Result<bool> {
        self.admission("QP_CREATE", "Error: QP limit reached")
    }

    pub fn destroy_qp(&self) -> Result<()> {
        self.expect_success("QP_DESTROY")
    }

    pub fn create_mr(&self, length: u64) -> Result<bool> {
        self.admission(&format!("MR_CREATE {}", length), "Error: Memory limit reached")
    }

    /// Admission probe without reserving anything.
    pub fn check_memory(&self, length: u64) -> Result<bool> {
        self.admission(
            &format!("CHECK_MEMORY {}", length),
            "Error: Memory limit reached",
        )
    }

    pub fn destroy_mr(&self, length: u64) -> Result<()> {
        self.expect_success(&format!("MR_DESTROY {}", length))
    }

    fn admission(&self, line: &str, deny: &str) -> Result<bool> {
        let response = self.request(line)?;
        if response.starts_with("Success") {
            Ok(true)
        } else if response.trim_end() == deny {
            Ok(false)
        } else {
            Err(IpcError::UnexpectedResponse(response))
        }
    }

    fn expect_success(&self, line: &str) -> Result<()> {
        let response = self.request(line)?;
        if response.starts_with("Success") {
            Ok(())
        } else {
            Err(IpcError::UnexpectedResponse(response))
        }
    }
}

fn parse_stats(response: &str) -> Option<GlobalStats> {
    let mut stats = GlobalStats::default();
    let mut seen = 0;
    for line in response.lines() {
        if let Some(value) = line.strip_prefix("Total QP: ") {
            stats.total_qp = value.trim().parse().ok()?;
            seen += 1;
        } else if let Some(value) = line.strip_prefix("Max QP: ") {
            stats.max_qp = value.trim().parse().ok()?;
            seen += 1;
        } else if let Some(value) = line.strip_prefix("Total MR: ") {
            stats.total_mr = value.trim().parse().ok()?;
            seen += 1;
        } else if let Some(value) = line.strip_prefix("Total Memory Used: ") {
            stats.memory_used = parse_bytes(value)?;
            seen += 1;
        } else if let Some(value) = line.strip_prefix("Max Memory: ") {
            stats.max_memory = parse_bytes(value)?;
            seen += 1;
        }
    }
    if seen == 5 {
        Some(stats)
    } else {
        None
    }
}

/// "NNN bytes" → NNN
fn parse_bytes(value: &str) -> Option<u64> {
    value.trim().split(' ').next()?.parse().ok()
}

/// "QP:U,MR:U,Memory:U" → ResourceUsage
fn parse_proc_stats(response: &str) -> Option<ResourceUsage> {
    let mut usage = ResourceUsage::default();
    for field in response.trim().split(',') {
        let (key, value) = field.split_once(':')?;
        match key {
            "QP" => usage.qp_count = value.parse().ok()?,
            "MR" => usage.mr_count = value.parse().ok()?,
            "Memory" => usage.memory_used = value.parse().ok()?,
            _ => return None,
        }
    }
    Some(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_stats_reply() {
        let stats = parse_stats(
            "Total QP: 3\nMax QP: 10\nTotal MR: 2\nTotal Memory Used: 4096 bytes\nMax Memory: 1073741824 bytes\n",
        )
        .expect("well-formed reply");

        assert_eq!(
            stats,
            GlobalStats {
                total_qp: 3,
                max_qp: 10,
                total_mr: 2,
                memory_used: 4096,
                max_memory: 1 << 30,
            }
        );
    }

    #[test]
    fn rejects_truncated_stats_replies() {
        assert!(parse_stats("Total QP: 3\nMax QP: 10\n").is_none());
        assert!(parse_stats("").is_none());
    }

    #[test]
    fn parses_a_proc_stats_reply() {
        assert_eq!(
            parse_proc_stats("QP:1,MR:2,Memory:300"),
            Some(ResourceUsage::new(1, 2, 300))
        );
        assert!(parse_proc_stats("nonsense").is_none());
        assert!(parse_proc_stats("QP:x,MR:2,Memory:3").is_none());
    }

    #[test]
    fn unreachable_socket_is_an_io_error() {
        let client = CollectorClient::new("/tmp/no_collector_here.sock");
        assert!(matches!(client.get_stats(), Err(IpcError::Io(_))));
    }
}
