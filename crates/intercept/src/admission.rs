//! Admission decisions for the gated creation calls.
//!
//! The checks are pure over their inputs; the wrappers gather those from
//! the counter sources in fixed priority order (shared region, kernel
//! probe, local accountant) and hand them in. Any refusal maps to the
//! provider's canonical permission-denied error with no side effects on
//! counters.

use std::fmt;

use common::ResourceUsage;
use policy::{PolicyConfig, QpType};
use shmem::GlobalCaps;

use crate::limiter::DynamicLimiter;

/// Which tier supplied the per-process counters for a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterSource {
    SharedRegion,
    KernelProbe,
    Local,
}

/// Why a creation call was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    QpTypeDisallowed(QpType),
    SendWrExceeded { requested: u32, limit: u32 },
    RecvWrExceeded { requested: u32, limit: u32 },
    DynamicCeiling { local_qp: u32, ceiling: u32 },
    ProcessQpCap { current: u32, limit: u32 },
    GlobalQpCap { current: u32, limit: u32 },
    ProcessMrCap { current: u32, limit: u32 },
    ProcessMemoryCap { used: u64, requested: u64, limit: u64 },
    GlobalMemoryCap { used: u64, requested: u64, limit: u64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::QpTypeDisallowed(qp_type) => {
                write!(f, "{} QP creation denied by policy", qp_type)
            }
            DenyReason::SendWrExceeded { requested, limit } => {
                write!(f, "send WR limit {} exceeded (requested {})", limit, requested)
            }
            DenyReason::RecvWrExceeded { requested, limit } => {
                write!(f, "recv WR limit {} exceeded (requested {})", limit, requested)
            }
            DenyReason::DynamicCeiling { local_qp, ceiling } => {
                write!(f, "dynamic QP ceiling reached: {}/{}", local_qp, ceiling)
            }
            DenyReason::ProcessQpCap { current, limit } => {
                write!(f, "would exceed max QP per process {} (current {})", limit, current)
            }
            DenyReason::GlobalQpCap { current, limit } => {
                write!(f, "global QP limit {} reached (current {})", limit, current)
            }
            DenyReason::ProcessMrCap { current, limit } => {
                write!(f, "max MR per process {} reached (current {})", limit, current)
            }
            DenyReason::ProcessMemoryCap { used, requested, limit } => write!(
                f,
                "max memory per process {} exceeded (current {}, requested {})",
                limit, used, requested
            ),
            DenyReason::GlobalMemoryCap { used, requested, limit } => write!(
                f,
                "global memory limit {} exceeded (current {}, requested {})",
                limit, used, requested
            ),
        }
    }
}

/// Full QP creation gate.
///
/// `proc_usage` is the most authoritative per-process view obtainable;
/// `local_qp` is always the local accountant's count, which is what the
/// dynamic ceiling is defined over. The global pair is absent when the
/// shared region is unreachable, in which case the global check is
/// skipped rather than denied.
#[allow(clippy::too_many_arguments)]
pub fn check_create_qp(
    policy: &PolicyConfig,
    qp_type: QpType,
    send_wr: u32,
    recv_wr: u32,
    proc_usage: ResourceUsage,
    local_qp: u32,
    limiter: &mut DynamicLimiter,
    global: Option<(ResourceUsage, GlobalCaps)>,
) -> Result<(), DenyReason> {
    if !policy.enable_qp_control() {
        return Ok(());
    }

    if !policy.allows(qp_type) {
        return Err(DenyReason::QpTypeDisallowed(qp_type));
    }

    if send_wr > policy.max_send_wr_limit() {
        return Err(DenyReason::SendWrExceeded {
            requested: send_wr,
            limit: policy.max_send_wr_limit(),
        });
    }
    if recv_wr > policy.max_recv_wr_limit() {
        return Err(DenyReason::RecvWrExceeded {
            requested: recv_wr,
            limit: policy.max_recv_wr_limit(),
        });
    }

    if !limiter.admits(local_qp, global) {
        return Err(DenyReason::DynamicCeiling {
            local_qp,
            ceiling: limiter.current_ceiling(),
        });
    }

    if proc_usage.qp_count + 1 > policy.max_qp_per_process() {
        return Err(DenyReason::ProcessQpCap {
            current: proc_usage.qp_count,
            limit: policy.max_qp_per_process(),
        });
    }

    if let Some((global_usage, caps)) = global {
        if caps.max_qp > 0 && global_usage.qp_count >= caps.max_qp {
            return Err(DenyReason::GlobalQpCap {
                current: global_usage.qp_count,
                limit: caps.max_qp,
            });
        }
    }

    Ok(())
}

/// MR registration gate: per-process count and bytes, then the global
/// byte cap. The per-process checks are behind `enable_mr_control`; the
/// global cap, being host policy, applies whenever the shared region is
/// reachable.
pub fn check_reg_mr(
    policy: &PolicyConfig,
    length: u64,
    proc_usage: ResourceUsage,
    global: Option<(ResourceUsage, GlobalCaps)>,
) -> Result<(), DenyReason> {
    if policy.enable_mr_control() {
        if proc_usage.mr_count >= policy.max_mr_per_process() {
            return Err(DenyReason::ProcessMrCap {
                current: proc_usage.mr_count,
                limit: policy.max_mr_per_process(),
            });
        }
        if proc_usage.memory_used + length > policy.max_memory_per_process() {
            return Err(DenyReason::ProcessMemoryCap {
                used: proc_usage.memory_used,
                requested: length,
                limit: policy.max_memory_per_process(),
            });
        }
    }

    if let Some((global_usage, caps)) = global {
        if caps.max_memory > 0 && global_usage.memory_used + length > caps.max_memory {
            return Err(DenyReason::GlobalMemoryCap {
                used: global_usage.memory_used,
                requested: length,
                limit: caps.max_memory,
            });
        }
    }

    Ok(())
}
