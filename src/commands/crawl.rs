use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

use fleetscope::config::Config;
use fleetscope::coordinator::Coordinator;

use super::runtime::{self, ResumeParams};

/// Options for a single-process crawl
#[derive(Debug, Clone)]
pub struct CrawlParams {
    /// In-process workers to run
    pub workers: usize,
}

/// Run a new job with a local coordinator and local workers
pub async fn crawl(config: Config, params: CrawlParams) -> Result<()> {
    let coordinator = runtime::new_job(&config).await?;
    drive(&config, coordinator, params).await
}

/// Continue a checkpointed job with local workers
pub async fn resume(config: Config, resume: ResumeParams, params: CrawlParams) -> Result<()> {
    let coordinator = runtime::resume_job(&config, &resume).await?;
    drive(&config, coordinator, params).await
}

async fn drive(config: &Config, coordinator: Arc<Coordinator>, params: CrawlParams) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = coordinator.clone().spawn_sweeper(shutdown_rx.clone());
    let workers = runtime::spawn_local_workers(config, &coordinator, params.workers.max(1), &shutdown_rx)?;

    let job = coordinator.job().await;
    tracing::info!(job_id = %job.id, workers = params.workers.max(1), "Crawl running");

    let interrupted = runtime::until_finished_or_interrupted(&coordinator).await;

    // Workers report their current batch before stopping
    shutdown_tx.send_replace(true);
    runtime::join_workers(workers).await;
    if interrupted {
        runtime::pause_if_running(&coordinator).await;
    }

    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task failed");
    }

    let report = coordinator.status().await;
    tracing::info!(
        job_id = %report.job_id,
        status = %report.status,
        done = report.frontier.done,
        failed = report.frontier.failed,
        pending = report.frontier.pending,
        "Crawl finished"
    );
    runtime::print_report(&report)
}
