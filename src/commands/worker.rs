use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use fleetscope::config::Config;
use fleetscope::coordinator::{ClientConfig, CoordinatorClient};
use fleetscope::crawler::{CrawlWorker, HttpFetcher, WorkSource};
use fleetscope::models::WorkerId;

#[derive(Debug, Clone, Default)]
pub struct WorkerParams {
    /// Stable worker identity; generated when absent
    pub id: Option<String>,

    /// Override `worker.coordinator_url`
    pub coordinator_url: Option<String>,
}

/// Run one remote worker until the job ends or Ctrl-C
pub async fn worker(config: Config, params: WorkerParams) -> Result<()> {
    config.validate()?;

    let id = match params.id {
        Some(id) => WorkerId::new(id)?,
        None => WorkerId::new(format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]))?,
    };
    let url = params
        .coordinator_url
        .unwrap_or_else(|| config.worker.coordinator_url.clone());

    let client = CoordinatorClient::new(ClientConfig::new(url.clone()))
        .context("Failed to create coordinator client")?;
    let health = client
        .health_check()
        .await
        .with_context(|| format!("Coordinator at {url} is not reachable"))?;
    tracing::info!(worker = %id, coordinator = %url, version = %health.version, "Coordinator reachable");

    let source: Arc<dyn WorkSource> = Arc::new(client);
    let fetcher = Arc::new(HttpFetcher::new(&config.worker.fetcher)?);
    let worker = CrawlWorker::new(id, source, fetcher, config.worker.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let summary = tokio::select! {
        joined = &mut run => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, finishing current batch");
            shutdown_tx.send_replace(true);
            run.await?
        }
    }?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
