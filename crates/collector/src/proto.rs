//! The legacy line protocol: one request per connection, newline or
//! end-of-stream terminated, fixed textual responses.

use shmem::SharedState;

/// A parsed request line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    GetStats,
    GetProcStats(i32),
    QpCreate,
    QpDestroy,
    MrCreate(u64),
    CheckMemory(u64),
    MrDestroy(u64),
}

/// A request the parser refused, mapped onto its canned `Error:` reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidMrCreate,
    InvalidCheckMemory,
    InvalidMrDestroy,
    Unknown,
}

impl ProtocolError {
    pub fn response(self) -> &'static str {
        match self {
            ProtocolError::InvalidMrCreate => "Error: Invalid MR_CREATE request\n",
            ProtocolError::InvalidCheckMemory => "Error: Invalid CHECK_MEMORY request\n",
            ProtocolError::InvalidMrDestroy => "Error: Invalid MR_DESTROY request\n",
            ProtocolError::Unknown => "Error: Unknown request\n",
        }
    }
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("GET_PROC_STATS:") {
            // Historical clients sometimes send garbage PIDs; those read
            // as PID 0, which reports zeroes further down.
            return Ok(Request::GetProcStats(rest.trim().parse().unwrap_or(0)));
        }
        if let Some(rest) = line.strip_prefix("MR_CREATE ") {
            return rest
                .trim()
                .parse()
                .map(Request::MrCreate)
                .map_err(|_| ProtocolError::InvalidMrCreate);
        }
        if let Some(rest) = line.strip_prefix("CHECK_MEMORY ") {
            return rest
                .trim()
                .parse()
                .map(Request::CheckMemory)
                .map_err(|_| ProtocolError::InvalidCheckMemory);
        }
        if let Some(rest) = line.strip_prefix("MR_DESTROY ") {
            return rest
                .trim()
                .parse()
                .map(Request::MrDestroy)
                .map_err(|_| ProtocolError::InvalidMrDestroy);
        }

        match line {
            "GET_STATS" => Ok(Request::GetStats),
            "QP_CREATE" => Ok(Request::QpCreate),
            "QP_DESTROY" => Ok(Request::QpDestroy),
            _ => Err(ProtocolError::Unknown),
        }
    }
}

/// Parses and answers one request line against the shared state.
///
/// Direct mutations (`QP_CREATE` and friends) apply to the global triple
/// under the region lock, so replies reflect the last synchronizer tick
/// plus every socket mutation since. A cap of zero reads as unlimited,
/// matching the shim's admission stance.
pub fn handle(state: &SharedState, line: &str) -> String {
    match Request::parse(line) {
        Err(err) => err.response().to_owned(),
        Ok(request) => respond(state, request),
    }
}

fn respond(state: &SharedState, request: Request) -> String {
    match request {
        Request::GetStats => {
            let usage = state.global();
            let caps = state.caps();
            format!(
                "Total QP: {}\nMax QP: {}\nTotal MR: {}\nTotal Memory Used: {} bytes\nMax Memory: {} bytes\n",
                usage.qp_count, caps.max_qp, usage.mr_count, usage.memory_used, caps.max_memory
            )
        }
        Request::GetProcStats(pid) => state.process(pid).to_string(),
        Request::QpCreate => {
            let admitted = state.with_global_mut(|usage, caps| {
                if caps.max_qp > 0 && usage.qp_count >= caps.max_qp {
                    false
                } else {
                    usage.qp_count += 1;
                    true
                }
            });
            if admitted {
                "Success: QP created\n".to_owned()
            } else {
                "Error: QP limit reached\n".to_owned()
            }
        }
        Request::QpDestroy => {
            state.with_global_mut(|usage, _caps| {
                usage.qp_count = usage.qp_count.saturating_sub(1);
            });
            "Success: QP destroyed\n".to_owned()
        }
        Request::MrCreate(length) => {
            let admitted = state.with_global_mut(|usage, caps| {
                if caps.max_memory > 0 && usage.memory_used + length > caps.max_memory {
                    false
                } else {
                    usage.mr_count += 1;
                    usage.memory_used += length;
                    true
                }
            });
            if admitted {
                "Success: MR created\n".to_owned()
            } else {
                "Error: Memory limit reached\n".to_owned()
            }
        }
        Request::CheckMemory(length) => {
            let usage = state.global();
            let caps = state.caps();
            if caps.max_memory > 0 && usage.memory_used + length > caps.max_memory {
                "Error: Memory limit reached\n".to_owned()
            } else {
                "Success: Memory check passed\n".to_owned()
            }
        }
        Request::MrDestroy(length) => {
            state.with_global_mut(|usage, _caps| {
                usage.mr_count = usage.mr_count.saturating_sub(1);
                usage.memory_used = usage.memory_used.saturating_sub(length);
            });
            "Success: MR destroyed\n".to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use common::ResourceUsage;
    use shmem::SharedRegion;

    struct Scratch {
        region: SharedRegion,
        name: String,
    }

    impl Scratch {
        fn new(tag: &str) -> Result<Self> {
            let name = format!("/rdma_proto_test_{}_{}", tag, std::process::id());
            let region = SharedRegion::open(&name).context("open scratch region")?;
            Ok(Self { region, name })
        }

        fn state(&self) -> &SharedState {
            self.region.state()
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = SharedRegion::unlink(&self.name);
        }
    }

    #[test]
    fn parses_the_full_request_table() {
        assert_eq!(Request::parse("GET_STATS"), Ok(Request::GetStats));
        assert_eq!(Request::parse("GET_PROC_STATS:42"), Ok(Request::GetProcStats(42)));
        assert_eq!(Request::parse("GET_PROC_STATS:junk"), Ok(Request::GetProcStats(0)));
        assert_eq!(Request::parse("QP_CREATE"), Ok(Request::QpCreate));
        assert_eq!(Request::parse("QP_DESTROY"), Ok(Request::QpDestroy));
        assert_eq!(Request::parse("MR_CREATE 4096"), Ok(Request::MrCreate(4096)));
        assert_eq!(Request::parse("CHECK_MEMORY 1"), Ok(Request::CheckMemory(1)));
        assert_eq!(Request::parse("MR_DESTROY 4096"), Ok(Request::MrDestroy(4096)));

        assert_eq!(Request::parse("MR_CREATE nope"), Err(ProtocolError::InvalidMrCreate));
        assert_eq!(Request::parse("CHECK_MEMORY"), Err(ProtocolError::Unknown));
        assert_eq!(Request::parse("MR_DESTROY -1"), Err(ProtocolError::InvalidMrDestroy));
        assert_eq!(Request::parse("FLUSH_ALL"), Err(ProtocolError::Unknown));
    }

    #[test]
    fn stats_reflect_state_and_caps() -> Result<()> {
        let scratch = Scratch::new("stats")?;
        scratch.state().set_global_limits(10, 20, 1 << 30);
        scratch.state().update_global(ResourceUsage::new(3, 2, 4096));

        let response = handle(scratch.state(), "GET_STATS");
        assert_eq!(
            response,
            "Total QP: 3\nMax QP: 10\nTotal MR: 2\nTotal Memory Used: 4096 bytes\nMax Memory: 1073741824 bytes\n"
        );

        Ok(())
    }

    #[test]
    fn proc_stats_report_zeroes_for_unknown_pids() -> Result<()> {
        let scratch = Scratch::new("proc")?;
        scratch
            .state()
            .update_process(77, ResourceUsage::new(1, 2, 300))?;

        assert_eq!(handle(scratch.state(), "GET_PROC_STATS:77"), "QP:1,MR:2,Memory:300");
        assert_eq!(handle(scratch.state(), "GET_PROC_STATS:78"), "QP:0,MR:0,Memory:0");

        Ok(())
    }

    #[test]
    fn qp_create_stops_at_the_cap() -> Result<()> {
        let scratch = Scratch::new("qpcap")?;
        scratch.state().set_global_limits(3, 1000, 1 << 30);

        for _ in 0..3 {
            assert_eq!(handle(scratch.state(), "QP_CREATE"), "Success: QP created\n");
        }
        assert_eq!(handle(scratch.state(), "QP_CREATE"), "Error: QP limit reached\n");
        assert_eq!(scratch.state().global().qp_count, 3);

        assert_eq!(handle(scratch.state(), "QP_DESTROY"), "Success: QP destroyed\n");
        assert_eq!(handle(scratch.state(), "QP_CREATE"), "Success: QP created\n");

        Ok(())
    }

    #[test]
    fn qp_destroy_saturates_at_zero() -> Result<()> {
        let scratch = Scratch::new("qpzero")?;

        assert_eq!(handle(scratch.state(), "QP_DESTROY"), "Success: QP destroyed\n");
        assert_eq!(scratch.state().global().qp_count, 0);

        Ok(())
    }

    #[test]
    fn memory_accounting_over_the_socket() -> Result<()> {
        let scratch = Scratch::new("memory")?;
        scratch.state().set_global_limits(10, 10, 8192);

        assert_eq!(handle(scratch.state(), "MR_CREATE 4096"), "Success: MR created\n");
        assert_eq!(handle(scratch.state(), "CHECK_MEMORY 4096"), "Success: Memory check passed\n");
        assert_eq!(handle(scratch.state(), "CHECK_MEMORY 4097"), "Error: Memory limit reached\n");
        // The failed check reserved nothing.
        assert_eq!(scratch.state().global().memory_used, 4096);

        assert_eq!(handle(scratch.state(), "MR_CREATE 8192"), "Error: Memory limit reached\n");
        assert_eq!(handle(scratch.state(), "MR_DESTROY 4096"), "Success: MR destroyed\n");
        assert_eq!(scratch.state().global(), ResourceUsage::new(0, 0, 0));

        Ok(())
    }

    #[test]
    fn malformed_lines_get_error_replies() -> Result<()> {
        let scratch = Scratch::new("bad")?;

        assert_eq!(handle(scratch.state(), "MR_CREATE lots"), "Error: Invalid MR_CREATE request\n");
        assert_eq!(
            handle(scratch.state(), "CHECK_MEMORY nan"),
            "Error: Invalid CHECK_MEMORY request\n"
        );
        assert_eq!(
            handle(scratch.state(), "MR_DESTROY nan"),
            "Error: Invalid MR_DESTROY request\n"
        );
        assert_eq!(handle(scratch.state(), "HELLO"), "Error: Unknown request\n");

        Ok(())
    }
}
