use anyhow::Result;
use std::net::SocketAddr;
use tokio::sync::watch;

use fleetscope::config::Config;
use fleetscope::coordinator::CoordinatorServer;
use fleetscope::metrics;

use super::runtime::{self, ResumeParams};

#[derive(Debug, Clone, Default)]
pub struct MasterParams {
    /// Resume this job or checkpoint instead of starting a new job
    pub resume: Option<ResumeParams>,

    /// Override `coordinator.bind_address`
    pub bind: Option<SocketAddr>,
}

/// Serve the coordinator protocol to remote workers
pub async fn master(config: Config, params: MasterParams) -> Result<()> {
    metrics::init_metrics().map_err(|e| anyhow::anyhow!("Failed to initialise metrics: {e}"))?;

    let coordinator = match &params.resume {
        Some(resume) => runtime::resume_job(&config, resume).await?,
        None => runtime::new_job(&config).await?,
    };

    let mut server = CoordinatorServer::new(coordinator.clone())?;
    if let Some(addr) = params.bind {
        server = server.with_bind_address(addr);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = coordinator.clone().spawn_sweeper(shutdown_rx.clone());

    let watcher = {
        let coordinator = coordinator.clone();
        let linger = config.coordinator.heartbeat_interval() * 2;
        tokio::spawn(async move {
            if runtime::until_finished_or_interrupted(&coordinator).await {
                runtime::pause_if_running(&coordinator).await;
            } else {
                // Let workers observe the final status before the server goes away
                tracing::info!(?linger, "Job finished, draining workers");
                tokio::time::sleep(linger).await;
            }
            shutdown_tx.send_replace(true);
        })
    };

    let mut server_shutdown = shutdown_rx;
    server
        .start_with_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    watcher.abort();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task failed");
    }

    runtime::print_report(&coordinator.status().await)
}
