use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use collector::{server, CollectorClient, GlobalStats};
use common::ResourceUsage;
use log::info;
use shmem::{SharedRegion, SharedState};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

static INIT: Once = Once::new();

/// System under test: an in-process collector accept loop over a scratch
/// shared region and a scratch socket, plus a blocking protocol client.
pub struct Sut {
    region: Arc<SharedRegion>,
    client: CollectorClient,
    shm_name: String,
    server: JoinHandle<()>,
    _test_dir: TempDir,
}

impl Sut {
    pub async fn start(tag: &str) -> Result<Sut> {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });

        let shm_name = format!("/rdma_it_{}_{}", tag, std::process::id());
        let region = Arc::new(SharedRegion::open(&shm_name).context("open scratch region")?);

        let test_dir = TempDir::new().context("prepare test directory")?;
        let sock_path = test_dir.path().join("collector.sock");
        let listener = UnixListener::bind(&sock_path)
            .with_context(|| format!("bind {}", sock_path.display()))?;
        info!("test collector listening on {}", sock_path.display());

        let serve_region = Arc::clone(&region);
        let server = tokio::spawn(async move {
            if let Err(err) = server::serve(&listener, &serve_region).await {
                panic!("test collector failed: {}", err);
            }
        });

        Ok(Sut {
            region,
            client: CollectorClient::new(&sock_path),
            shm_name,
            server,
            _test_dir: test_dir,
        })
    }

    pub fn state(&self) -> &SharedState {
        self.region.state()
    }

    /// A client handle usable from `spawn_blocking`.
    pub fn client(&self) -> CollectorClient {
        self.client.clone()
    }

    pub async fn get_stats(&self) -> Result<GlobalStats> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.get_stats()).await??)
    }

    pub async fn get_proc_stats(&self, pid: i32) -> Result<ResourceUsage> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.get_proc_stats(pid)).await??)
    }

    pub async fn create_qp(&self) -> Result<bool> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.create_qp()).await??)
    }

    pub async fn destroy_qp(&self) -> Result<()> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.destroy_qp()).await??)
    }

    pub async fn create_mr(&self, length: u64) -> Result<bool> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.create_mr(length)).await??)
    }

    pub async fn check_memory(&self, length: u64) -> Result<bool> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.check_memory(length)).await??)
    }

    pub async fn destroy_mr(&self, length: u64) -> Result<()> {
        let client = self.client();
        Ok(tokio::task::spawn_blocking(move || client.destroy_mr(length)).await??)
    }

    pub fn cleanup(self) -> Result<()> {
        info!("stopping test collector for {}", self.shm_name);
        self.server.abort();
        SharedRegion::unlink(&self.shm_name).context("unlink scratch region")
    }
}
