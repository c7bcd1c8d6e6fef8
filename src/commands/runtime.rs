//! Component wiring shared by the commands

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use fleetscope::config::Config;
use fleetscope::coordinator::{Coordinator, JobReport};
use fleetscope::crawler::{CrawlWorker, HttpFetcher, WorkSource, WorkerSummary};
use fleetscope::frontier::FrontierStore;
use fleetscope::models::{CrawlJob, JobId, JobStatus, WorkerId};
use fleetscope::notifications::NotificationManager;
use fleetscope::scope::{ScopeConfig, ScopeEngine};
use fleetscope::storage::{
    self, parse_checkpoint_name, CheckpointManager, FileCheckpointStore, RestoreOptions,
};

/// How a resumed job treats the scope recorded in its checkpoint
#[derive(Debug, Clone, Default)]
pub struct ResumeParams {
    /// Job ID (latest valid checkpoint) or a checkpoint name
    pub target: String,
    pub scope_from_config: bool,
    pub allow_scope_change: bool,
}

pub fn notifications(config: &Config) -> Result<NotificationManager> {
    NotificationManager::from_config(&config.notifications)
        .map_err(anyhow::Error::msg)
        .context("Invalid notification configuration")
}

pub fn checkpoint_manager(
    config: &Config,
    notifications: &NotificationManager,
) -> Result<Arc<CheckpointManager>> {
    let store = FileCheckpointStore::new(&config.checkpoint.dir).with_context(|| {
        format!(
            "Failed to open checkpoint directory {}",
            config.checkpoint.dir.display()
        )
    })?;

    Ok(Arc::new(
        CheckpointManager::new(Arc::new(store), config.checkpoint.keep_last)
            .with_notifications(notifications.clone()),
    ))
}

fn assemble(
    config: &Config,
    job: CrawlJob,
    frontier: FrontierStore,
    notifications: NotificationManager,
    checkpoints: Option<Arc<CheckpointManager>>,
) -> Arc<Coordinator> {
    let mut coordinator =
        Coordinator::new(config.coordinator.clone(), job, frontier).with_notifications(notifications);

    if let Some(manager) = checkpoints {
        let interval = (config.checkpoint.interval_secs > 0)
            .then(|| Duration::from_secs(config.checkpoint.interval_secs));
        coordinator = coordinator.with_checkpoints(manager, interval);
    }

    Arc::new(coordinator)
}

/// Coordinator for a new job, seeds already enqueued
pub async fn new_job(config: &Config) -> Result<Arc<Coordinator>> {
    config.validate_new_job()?;

    let job_id = config.job.job_id()?;
    let job = CrawlJob::new(
        job_id.clone(),
        config.scope.clone(),
        config.job.max_depth,
        config.job.seeds.clone(),
    );

    let engine = ScopeEngine::new(&job.scope, &job.seeds).context("Invalid scope configuration")?;
    let backend = storage::open_backend(&config.storage).await?;
    let frontier = FrontierStore::start_fresh(
        job_id.clone(),
        Arc::new(engine),
        job.max_depth,
        config.frontier.clone(),
        backend,
    )
    .await?
    .with_commit_retry(config.storage.commit_retry());

    let notifications = notifications(config)?;
    let checkpoints = if config.checkpoint.enabled {
        Some(checkpoint_manager(config, &notifications)?)
    } else {
        None
    };

    let coordinator = assemble(config, job, frontier, notifications, checkpoints);
    let counts = coordinator.seed().await?;
    tracing::info!(
        job_id = %job_id,
        accepted = counts.accepted,
        rejected = counts.total() - counts.accepted,
        "Job seeded"
    );

    Ok(coordinator)
}

/// Coordinator rebuilt from a checkpoint
pub async fn resume_job(config: &Config, params: &ResumeParams) -> Result<Arc<Coordinator>> {
    config.validate()?;

    let notifications = notifications(config)?;
    let manager = checkpoint_manager(config, &notifications)?;

    let checkpoint = if parse_checkpoint_name(&params.target).is_some() {
        manager.load(&params.target).await?
    } else {
        let job_id = JobId::new(params.target.clone())?;
        manager
            .latest_valid(&job_id)
            .await?
            .with_context(|| format!("No valid checkpoint for job {job_id}"))?
    };

    tracing::info!(
        checkpoint = %checkpoint.name(),
        entries = checkpoint.frontier.entries.len(),
        "Resuming from checkpoint"
    );

    let options = RestoreOptions {
        scope: params.scope_from_config.then(|| config.scope.clone()),
        allow_scope_change: params.allow_scope_change,
    };
    let backend = storage::open_backend(&config.storage).await?;
    let restored = manager
        .restore(
            &checkpoint,
            &options,
            &config.frontier,
            backend,
            config.storage.commit_retry(),
        )
        .await?;

    let checkpoints = config.checkpoint.enabled.then_some(manager);
    let coordinator = assemble(config, restored.job, restored.store, notifications, checkpoints);
    coordinator.announce_resume().await;
    Ok(coordinator)
}

/// Scope engine as configured, for diagnostics
pub fn scope_engine(scope: &ScopeConfig, seeds: &[String]) -> Result<ScopeEngine> {
    ScopeEngine::new(scope, seeds).context("Invalid scope configuration")
}

/// Start `count` in-process workers against `coordinator`
pub fn spawn_local_workers(
    config: &Config,
    coordinator: &Arc<Coordinator>,
    count: usize,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<fleetscope::Result<WorkerSummary>>>> {
    let mut handles = Vec::with_capacity(count);

    for index in 0..count {
        let id = WorkerId::new(format!("local-{index}"))?;
        let fetcher = Arc::new(HttpFetcher::new(&config.worker.fetcher)?);
        let source: Arc<dyn WorkSource> = coordinator.clone();
        let worker = CrawlWorker::new(id, source, fetcher, config.worker.clone());
        let shutdown = shutdown.clone();

        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    Ok(handles)
}

/// Resolve on Ctrl-C or when the job reaches a terminal status
pub async fn until_finished_or_interrupted(coordinator: &Coordinator) -> bool {
    let mut status = coordinator.watch_status();

    let finished = async {
        loop {
            if status.borrow_and_update().is_terminal() {
                return;
            }
            if status.changed().await.is_err() {
                return;
            }
        }
    };

    tokio::select! {
        _ = finished => false,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
            true
        }
    }
}

/// Pause a still-running job so a checkpoint captures its state
pub async fn pause_if_running(coordinator: &Coordinator) {
    if coordinator.job_status().await == JobStatus::Running {
        if let Err(e) = coordinator.pause().await {
            tracing::error!(error = %e, "Failed to pause job");
        }
    }
}

pub async fn join_workers(handles: Vec<JoinHandle<fleetscope::Result<WorkerSummary>>>) {
    for handle in handles {
        match handle.await {
            Ok(Ok(summary)) => tracing::debug!(?summary, "Local worker finished"),
            Ok(Err(e)) => tracing::error!(error = %e, "Local worker failed"),
            Err(e) => tracing::error!(error = %e, "Local worker panicked"),
        }
    }
}

pub fn print_report(report: &JobReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
