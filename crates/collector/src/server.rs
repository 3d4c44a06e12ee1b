//! The daemon itself: startup, the accept loop and shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use probes::ProbeMaps;
use shmem::{SharedRegion, SharedState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::{fs, time};

use crate::config::Config;
use crate::proto;
use crate::sync;

/// Collector is the single host-local coordinator instance.
pub struct Collector {
    config: Config,
}

impl Collector {
    /// Create a new collector instance
    pub fn new(config: Config) -> Self {
        Collector { config }
    }

    /// Runs until SIGINT/SIGTERM. Returns an error (exit code 1) only
    /// for startup failures; a signal is a clean shutdown.
    pub async fn start(self) -> Result<()> {
        self.init_logging()?;

        let region = Arc::new(
            SharedRegion::open(self.config.shm_name())
                .context("initialize shared accounting region")?,
        );
        self.apply_caps(region.state());

        let probes = ProbeMaps::open();
        if !probes.available() {
            warn!("kernel probe maps are not pinned; counters only move via direct socket events until the probe loads");
        }

        let sock_path = self.config.sock_path();
        if sock_path.exists() {
            fs::remove_file(sock_path)
                .await
                .with_context(|| format!("remove stale socket {}", sock_path.display()))?;
        } else if let Some(sock_dir) = sock_path.parent() {
            fs::create_dir_all(sock_dir)
                .await
                .with_context(|| format!("create socket dir {}", sock_dir.display()))?;
        }
        let listener = UnixListener::bind(sock_path)
            .with_context(|| format!("bind {}", sock_path.display()))?;
        info!("collector listening on {}", sock_path.display());

        // Handle shutdown based on signals
        let mut shutdown_terminate = signal(SignalKind::terminate())?;
        let mut shutdown_interrupt = signal(SignalKind::interrupt())?;

        let period = Duration::from_millis(self.config.sync_interval_ms());
        tokio::select! {
            res = serve(&listener, &region) => {
                res.context("serve line protocol")?
            }
            _ = synchronize(&region, &probes, period) => {}
            _ = shutdown_interrupt.recv() => {
                info!("got interrupt signal, shutting down");
            }
            _ = shutdown_terminate.recv() => {
                info!("got termination signal, shutting down");
            }
        }

        self.cleanup().await
    }

    fn init_logging(&self) -> Result<()> {
        env_logger::Builder::new()
            .filter_level(self.config.log_level())
            .try_init()
            .context("init env logger")
    }

    /// Environment/flag caps override whatever the region carries;
    /// unset ones keep the stored values.
    fn apply_caps(&self, state: &SharedState) {
        let caps = state.caps();
        let max_qp = self.config.max_global_qp().unwrap_or(caps.max_qp);
        let max_mr = self.config.max_global_mr().unwrap_or(caps.max_mr);
        let max_memory = self.config.max_global_memory().unwrap_or(caps.max_memory);
        state.set_global_limits(max_qp, max_mr, max_memory);
        info!(
            "global caps: {} QPs, {} MRs, {} bytes of registered memory",
            max_qp, max_mr, max_memory
        );
    }

    async fn cleanup(self) -> Result<()> {
        debug!("cleaning up collector");
        fs::remove_file(self.config.sock_path())
            .await
            .with_context(|| format!("remove socket {}", self.config.sock_path().display()))
    }
}

/// Single-accept, serial per-connection: one request, one reply, close.
/// Public so test harnesses can run the loop against a scratch region.
pub async fn serve(listener: &UnixListener, region: &Arc<SharedRegion>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("accept client")?;
        if let Err(err) = handle_client(stream, region.state()).await {
            warn!("client connection failed: {}", common::error::chain(&err));
        }
    }
}

/// Reads one request (newline or end-of-stream terminated) and writes the
/// reply. Legacy clients do not always send a trailing newline, so the
/// contract is a single read of the first chunk, first line wins.
async fn handle_client(mut stream: UnixStream, state: &SharedState) -> Result<()> {
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.context("read request")?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let line = request.lines().next().unwrap_or("");

    let response = proto::handle(state, line);
    stream
        .write_all(response.as_bytes())
        .await
        .context("write response")?;

    Ok(())
}

async fn synchronize(region: &Arc<SharedRegion>, probes: &ProbeMaps, period: Duration) {
    let mut ticker = time::interval(period);
    loop {
        ticker.tick().await;
        sync::sync_once(region.state(), probes);
    }
}
