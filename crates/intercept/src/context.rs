//! The process-wide interposition context.
//!
//! The original design kept all of this in module-scope mutable state;
//! here it is an explicitly constructed value behind a one-time handle.
//! Resolution happens on the first intercepted call, on whichever caller
//! thread gets there first.
//!
//! Two independent one-shots exist on purpose: the provider table is
//! needed even when interposition is disabled (the wrappers still have to
//! pass calls through), while the control state only exists when
//! `RDMA_INTERCEPT_ENABLE=1` selected the shim. When control is off, no
//! policy is loaded, no log file is created and the shared region is
//! never attached.

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use common::{names, ResourceUsage};
use lazy_static::lazy_static;
use log::{info, warn};
use policy::PolicyConfig;
use probes::ProbeMaps;
use shmem::{GlobalCaps, SharedRegion};

use crate::accountant::Accountant;
use crate::admission::CounterSource;
use crate::limiter::DynamicLimiter;
use crate::provider::Provider;

lazy_static! {
    static ref PROVIDER: Option<Provider> = match Provider::open() {
        Ok(provider) => Some(provider),
        Err(err) => {
            eprintln!("[rdma-intercept] {}", err);
            None
        }
    };
    static ref CONTEXT: Option<InterceptContext> = InterceptContext::bootstrap();
}

/// The resolved provider table, or `None` when the library is absent.
pub fn provider() -> Option<&'static Provider> {
    PROVIDER.as_ref()
}

/// The control state, or `None` when interposition is disabled.
pub fn context() -> Option<&'static InterceptContext> {
    CONTEXT.as_ref()
}

pub struct InterceptContext {
    policy: PolicyConfig,
    accountant: Accountant,
    limiter: Mutex<DynamicLimiter>,
    shared: Option<SharedRegion>,
    probes: ProbeMaps,
    pid: i32,
}

impl InterceptContext {
    fn bootstrap() -> Option<Self> {
        let enabled = env::var(names::env::ENABLE)
            .map(|value| value == "1")
            .unwrap_or(false);
        if !enabled {
            return None;
        }

        let policy = PolicyConfig::load(None);
        if !policy.enable_intercept() {
            return None;
        }
        init_logging(&policy);

        let shared = match SharedRegion::open(names::SHM_OBJECT) {
            Ok(region) => Some(region),
            Err(err) => {
                warn!("shared accounting region unavailable, falling back: {}", err);
                None
            }
        };
        let probes = ProbeMaps::open();

        let pid = std::process::id() as i32;
        info!(
            "interposition active: pid {}, shared region {}, kernel probe {}",
            pid,
            if shared.is_some() { "attached" } else { "unavailable" },
            if probes.available() { "attached" } else { "unavailable" }
        );

        Some(Self {
            policy,
            accountant: Accountant::default(),
            limiter: Mutex::new(DynamicLimiter::from_env()),
            shared,
            probes,
            pid,
        })
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn accountant(&self) -> &Accountant {
        &self.accountant
    }

    pub fn limiter(&self) -> &Mutex<DynamicLimiter> {
        &self.limiter
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// The most authoritative per-process counters obtainable, in fixed
    /// priority order: shared region, kernel probe, local accountant.
    /// An attached region answers even with zeroes; absence of a slot is
    /// a valid answer, not a miss.
    pub fn process_usage(&self) -> (ResourceUsage, CounterSource) {
        if let Some(region) = &self.shared {
            return (region.state().process(self.pid), CounterSource::SharedRegion);
        }
        match self.probes.process_usage(self.pid as u32) {
            Ok(Some(usage)) => return (usage, CounterSource::KernelProbe),
            Ok(None) => {}
            Err(err) => warn!("kernel probe read failed: {}", err),
        }
        (self.accountant.snapshot(), CounterSource::Local)
    }

    /// Global usage plus caps, both from the shared region. The caps only
    /// live there, so without the region the global checks are skipped.
    pub fn global_view(&self) -> Option<(ResourceUsage, GlobalCaps)> {
        let region = self.shared.as_ref()?;
        let state = region.state();
        Some((state.global(), state.caps()))
    }

    /// Mirrors a local accountant snapshot into this process's slot.
    /// A full table keeps accounting local; the write is retried on the
    /// next update anyway.
    pub fn push_process_usage(&self, usage: ResourceUsage) {
        if let Some(region) = &self.shared {
            if let Err(err) = region.state().update_process(self.pid, usage) {
                warn!("shared region update failed, staying local: {}", err);
            }
        }
    }
}

/// Configures the process logger from the policy: threshold from
/// `log_level`, output appended to `log_file_path` when set, stderr
/// otherwise. Initialization is best-effort; the host application may
/// already own a logger.
fn init_logging(policy: &PolicyConfig) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(policy.log_level().to_level_filter());
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [pid {} {:?}] {}",
            record.level(),
            std::process::id(),
            std::thread::current().id(),
            record.args()
        )
    });

    if !policy.log_file_path().as_os_str().is_empty() {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(policy.log_file_path())
        {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!(
                "[rdma-intercept] cannot open log file {}: {}",
                policy.log_file_path().display(),
                err
            ),
        }
    }

    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use common::names;

    #[test]
    fn unset_enable_environment_disables_control() {
        // The test binary runs without RDMA_INTERCEPT_ENABLE; the one-shot
        // must resolve to "no control state", which is what turns every
        // wrapper into a pure passthrough.
        std::env::remove_var(names::env::ENABLE);
        assert!(super::context().is_none());
    }
}
