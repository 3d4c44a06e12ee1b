//! Dynamic per-process QP ceiling.
//!
//! The ceiling tightens as host-wide QP utilization grows; it never
//! loosens the hard `max_qp_per_process` cap. Recomputation is
//! rate-limited to once per five seconds of wall clock, and the
//! `RDMA_INTERCEPT_LOCAL_QP_LIMIT` environment override, when present,
//! wins unconditionally.

use std::env;
use std::time::{Duration, Instant};

use common::{names, ResourceUsage};
use log::info;
use shmem::GlobalCaps;

const ADJUST_INTERVAL: Duration = Duration::from_secs(5);

/// Ceiling while global utilization is below 30 %.
const ABUNDANT_CEILING: u32 = 200;
/// Ceiling between 30 % and 70 %.
const MODERATE_CEILING: u32 = 100;
/// Ceiling at or above 70 %.
const SCARCE_CEILING: u32 = 50;

pub struct DynamicLimiter {
    ceiling: u32,
    last_adjust: Option<Instant>,
    env_override: Option<u32>,
}

impl DynamicLimiter {
    /// Reads the environment override once; process environments do not
    /// change under us.
    pub fn from_env() -> Self {
        let env_override = env::var(names::env::LOCAL_QP_LIMIT)
            .ok()
            .and_then(|value| value.trim().parse::<u32>().ok())
            .filter(|limit| *limit > 0);
        Self::with_override(env_override)
    }

    pub fn with_override(env_override: Option<u32>) -> Self {
        Self {
            ceiling: MODERATE_CEILING,
            last_adjust: None,
            env_override,
        }
    }

    /// The admission test: may this process grow past `local_qp` QPs?
    pub fn admits(
        &mut self,
        local_qp: u32,
        global: Option<(ResourceUsage, GlobalCaps)>,
    ) -> bool {
        local_qp < self.ceiling_at(Instant::now(), global)
    }

    pub fn current_ceiling(&self) -> u32 {
        self.env_override.unwrap_or(self.ceiling)
    }

    fn ceiling_at(&mut self, now: Instant, global: Option<(ResourceUsage, GlobalCaps)>) -> u32 {
        if let Some(limit) = self.env_override {
            return limit;
        }

        let due = match self.last_adjust {
            None => true,
            Some(at) => now.duration_since(at) >= ADJUST_INTERVAL,
        };
        if due {
            // No global view or no configured cap keeps the last ceiling;
            // the next call retries instead of burning the rate budget.
            if let Some((usage, caps)) = global {
                if caps.max_qp > 0 {
                    let utilization = f64::from(usage.qp_count) / f64::from(caps.max_qp);
                    let ceiling = tier(utilization);
                    if ceiling != self.ceiling {
                        info!(
                            "dynamic QP ceiling adjusted to {} (global utilization {:.0}%)",
                            ceiling,
                            utilization * 100.0
                        );
                    }
                    self.ceiling = ceiling;
                    self.last_adjust = Some(now);
                }
            }
        }

        self.ceiling
    }
}

fn tier(utilization: f64) -> u32 {
    if utilization < 0.3 {
        ABUNDANT_CEILING
    } else if utilization < 0.7 {
        MODERATE_CEILING
    } else {
        SCARCE_CEILING
    }
}
