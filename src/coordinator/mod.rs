//! Coordinator for distributed crawling
//!
//! The coordinator owns one crawl job: its frontier, its worker registry and its
//! checkpoint lineage. Workers never touch the frontier directly; every lease and
//! completion goes through here.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │            Coordinator              │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │       Worker Registry        │  │
//! │  │  - Registration / rejoin     │  │
//! │  │  - Heartbeat tracking        │  │
//! │  │  - Disconnect / eviction     │  │
//! │  └──────────────────────────────┘  │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │       Frontier Store         │  │
//! │  │  - Leases / completions      │  │
//! │  │  - Expiry sweep              │  │
//! │  └──────────────────────────────┘  │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │        REST API              │  │
//! │  │  GET  /api/health            │  │
//! │  │  POST /api/workers/register  │  │
//! │  │  POST /api/workers/heartbeat │  │
//! │  │  POST /api/lease             │  │
//! │  │  POST /api/complete          │  │
//! │  │  GET  /api/job               │  │
//! │  │  GET  /api/workers           │  │
//! │  │  GET  /metrics               │  │
//! │  └──────────────────────────────┘  │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetscope::coordinator::{Coordinator, CoordinatorConfig, CoordinatorServer};
//!
//! let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default(), job, frontier));
//! coordinator.seed().await?;
//! let sweeper = coordinator.clone().spawn_sweeper(shutdown_rx);
//! CoordinatorServer::new(coordinator)?.start().await?;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod registry;
pub mod server;

pub use client::{ClientConfig, ClientError, CoordinatorClient};
pub use config::{ConfigError, CoordinatorConfig, CoordinatorConfigBuilder};
pub use registry::{
    HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse, RegistryError,
    RegistryStats, WorkerInfo, WorkerRegistry, WorkerStatus,
};
pub use server::CoordinatorServer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::crawler::WorkSource;
use crate::frontier::{
    CompletionReport, EnqueueCounts, FrontierEntry, FrontierError, FrontierStats, FrontierStore,
    LeaseOutcome,
};
use crate::metrics;
use crate::models::{CrawlJob, JobId, JobStatus, WorkerId};
use crate::notifications::{JobEvent, JobEventKind, NotificationManager};
use crate::storage::{Checkpoint, CheckpointError, CheckpointManager};

// ============================================================================
// Protocol
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: WorkerId,
    pub count: usize,
}

/// A URL handed to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub url: String,
    pub depth: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<FrontierEntry> for Lease {
    fn from(entry: FrontierEntry) -> Self {
        Self {
            url: entry.url,
            depth: entry.depth,
            expires_at: entry.lease_expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub job_status: JobStatus,
    pub leases: Vec<Lease>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: WorkerId,
    pub url: String,
    pub outcome: LeaseOutcome,
    #[serde(default)]
    pub links: Vec<String>,
    /// Page details kept on the entry once it is done
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

pub type CompleteResponse = CompletionReport;

/// Point-in-time view of the job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub max_depth: u32,
    pub frontier: FrontierStats,
    pub workers: RegistryStats,
    pub last_checkpoint: Option<u64>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What one background sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    pub disconnected: usize,
    pub evicted: usize,
    pub checkpoint: Option<u64>,
    pub completed: bool,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Frontier(#[from] FrontierError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Cannot {action} a job that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: JobStatus,
    },

    #[error("Job already finished with status {0}")]
    JobFinished(JobStatus),

    #[error("Checkpoints are disabled for this job")]
    CheckpointsDisabled,
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct Coordinator {
    config: CoordinatorConfig,
    job: RwLock<CrawlJob>,
    frontier: Arc<FrontierStore>,
    registry: WorkerRegistry,
    checkpoints: Option<Arc<CheckpointManager>>,
    /// Periodic checkpoint cadence, `None` disables periodic checkpoints
    checkpoint_interval: Option<Duration>,
    notifications: NotificationManager,
    status_tx: watch::Sender<JobStatus>,
    /// When the frontier was first seen drained with every worker idle
    idle_since: Mutex<Option<Instant>>,
    last_checkpoint_at: Mutex<Instant>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, job: CrawlJob, frontier: FrontierStore) -> Self {
        let (status_tx, _) = watch::channel(job.status);
        Self {
            registry: WorkerRegistry::new(config.max_workers),
            config,
            job: RwLock::new(job),
            frontier: Arc::new(frontier),
            checkpoints: None,
            checkpoint_interval: None,
            notifications: NotificationManager::new(),
            status_tx,
            idle_since: Mutex::new(None),
            last_checkpoint_at: Mutex::new(Instant::now()),
        }
    }

    /// Enable checkpoints; `interval` of `None` keeps only pause/completion checkpoints
    pub fn with_checkpoints(mut self, manager: Arc<CheckpointManager>, interval: Option<Duration>) -> Self {
        self.checkpoints = Some(manager);
        self.checkpoint_interval = interval.filter(|i| !i.is_zero());
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationManager) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn frontier(&self) -> &Arc<FrontierStore> {
        &self.frontier
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub async fn job(&self) -> CrawlJob {
        self.job.read().await.clone()
    }

    pub async fn job_status(&self) -> JobStatus {
        self.job.read().await.status
    }

    /// Receiver that observes every job status change
    pub fn watch_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    // ------------------------------------------------------------------------
    // Job lifecycle
    // ------------------------------------------------------------------------

    /// Enqueue the job's seeds and announce the start
    pub async fn seed(&self) -> Result<EnqueueCounts, CoordinatorError> {
        let job = self.job().await;
        let counts = self.guard(self.frontier.enqueue_seeds(&job.seeds).await).await?;

        self.notifications.notify(
            JobEvent::new(
                JobEventKind::JobStarted,
                &job.id,
                format!("Job started with {} seed(s)", counts.accepted),
            )
            .with_metadata("max_depth", job.max_depth)
            .with_metadata("rejected", counts.total() - counts.accepted),
        );
        Ok(counts)
    }

    /// Announce a resumed job; the frontier already holds its state
    pub async fn announce_resume(&self) {
        let job = self.job().await;
        let stats = self.frontier.stats().await;
        self.notifications.notify(
            JobEvent::new(JobEventKind::JobStarted, &job.id, "Job resumed from checkpoint")
                .with_metadata("pending", stats.pending)
                .with_metadata("last_checkpoint", job.last_checkpoint.unwrap_or(0)),
        );
    }

    /// Running → Paused. Leases stop being granted and a checkpoint is taken.
    pub async fn pause(&self) -> Result<(), CoordinatorError> {
        self.transition("pause", JobStatus::Running, JobStatus::Paused).await?;

        let sequence = match self.checkpoint().await {
            Ok(checkpoint) => Some(checkpoint.sequence),
            Err(CoordinatorError::CheckpointsDisabled) => None,
            Err(e) => {
                tracing::error!(error = %e, "Checkpoint on pause failed");
                None
            }
        };

        let job = self.job().await;
        let mut event = JobEvent::new(JobEventKind::JobPaused, &job.id, "Job paused");
        if let Some(sequence) = sequence {
            event = event.with_metadata("checkpoint", sequence);
        }
        self.notifications.notify(event);
        Ok(())
    }

    /// Paused → Running
    pub async fn resume(&self) -> Result<(), CoordinatorError> {
        self.transition("resume", JobStatus::Paused, JobStatus::Running).await?;
        tracing::info!("Job resumed");
        Ok(())
    }

    /// Mark the job Failed. No-op if it already finished.
    pub async fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let job = {
            let mut job = self.job.write().await;
            if job.status.is_terminal() {
                return;
            }
            job.mark_failed(reason.clone());
            job.clone()
        };
        self.status_tx.send_replace(job.status);

        tracing::error!(
            job_id = %job.id,
            reason = %reason,
            last_checkpoint = ?job.last_checkpoint,
            "Job failed"
        );

        let last = job
            .last_checkpoint
            .map_or_else(|| "none".to_string(), |seq| seq.to_string());
        self.notifications.notify(
            JobEvent::new(JobEventKind::JobFailed, &job.id, format!("Job failed: {reason}"))
                .with_metadata("last_checkpoint", last),
        );
    }

    async fn transition(
        &self,
        action: &'static str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), CoordinatorError> {
        let mut job = self.job.write().await;
        if job.status != from {
            return Err(CoordinatorError::InvalidTransition {
                action,
                status: job.status,
            });
        }
        job.set_status(to);
        self.status_tx.send_replace(to);
        tracing::info!(job_id = %job.id, status = %to, "Job status changed");
        Ok(())
    }

    async fn complete_job(&self) -> bool {
        let job = {
            let mut job = self.job.write().await;
            if job.status != JobStatus::Running {
                return false;
            }
            job.set_status(JobStatus::Completed);
            job.clone()
        };

        if let Err(e) = self.checkpoint().await {
            if !matches!(e, CoordinatorError::CheckpointsDisabled) {
                tracing::warn!(error = %e, "Final checkpoint failed");
            }
        }
        self.status_tx.send_replace(JobStatus::Completed);

        let stats = self.frontier.stats().await;
        tracing::info!(
            job_id = %job.id,
            done = stats.done,
            failed = stats.failed,
            visited = stats.visited,
            "Job completed"
        );
        self.notifications.notify(
            JobEvent::new(JobEventKind::JobCompleted, &job.id, "Job completed")
                .with_metadata("done", stats.done)
                .with_metadata("failed", stats.failed)
                .with_metadata("visited", stats.visited),
        );
        true
    }

    /// A persistence failure fails the whole job
    async fn guard<T>(&self, result: Result<T, FrontierError>) -> Result<T, CoordinatorError> {
        match result {
            Err(FrontierError::Storage(e)) => {
                self.fail(format!("persistence failure: {e}")).await;
                Err(FrontierError::Storage(e).into())
            }
            other => Ok(other?),
        }
    }

    // ------------------------------------------------------------------------
    // Worker protocol
    // ------------------------------------------------------------------------

    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, CoordinatorError> {
        let info = self.registry.register(request).await?;
        let job = self.job.read().await;

        Ok(RegisterResponse {
            message: format!("Worker {} registered", info.id),
            worker_id: info.id,
            job_id: job.id.clone(),
            job_status: job.status,
            heartbeat_interval_secs: self.config.heartbeat_interval_secs,
            lease_duration_secs: self.frontier.config().lease_duration_secs,
        })
    }

    pub async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse, CoordinatorError> {
        let info = self.registry.heartbeat(&request).await?;
        metrics::record_heartbeat();

        let leases_held = self.frontier.leases_held_by(&request.worker_id).await;
        if request.in_flight > leases_held {
            tracing::warn!(
                worker = %request.worker_id,
                in_flight = request.in_flight,
                leases_held,
                "Worker is fetching URLs whose leases have lapsed"
            );
        }

        Ok(HeartbeatResponse {
            job_status: self.job_status().await,
            worker_status: info.status,
            leases_held,
        })
    }

    /// Hand out up to `count` Pending URLs. Only a Running job grants leases.
    pub async fn lease(&self, request: LeaseRequest) -> Result<LeaseResponse, CoordinatorError> {
        self.registry.ensure_live(&request.worker_id).await?;

        let job_status = self.job_status().await;
        if job_status != JobStatus::Running || request.count == 0 {
            return Ok(LeaseResponse {
                job_status,
                leases: Vec::new(),
            });
        }

        let entries = self
            .guard(
                self.frontier
                    .lease_batch(&request.worker_id, request.count, self.frontier.config().lease_duration())
                    .await,
            )
            .await?;

        Ok(LeaseResponse {
            job_status: self.job_status().await,
            leases: entries.into_iter().map(Lease::from).collect(),
        })
    }

    /// Record a worker's result for a leased URL
    pub async fn complete(&self, request: CompleteRequest) -> Result<CompleteResponse, CoordinatorError> {
        let status = self.job_status().await;
        if status.is_terminal() {
            return Err(CoordinatorError::JobFinished(status));
        }
        self.registry.ensure_live(&request.worker_id).await?;

        let success = matches!(request.outcome, LeaseOutcome::Success);
        let report = self
            .guard(
                self.frontier
                    .complete_lease_with(
                        &request.worker_id,
                        &request.url,
                        request.outcome,
                        &request.links,
                        request.metadata,
                    )
                    .await,
            )
            .await?;

        self.registry.record_result(&request.worker_id, success).await;
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Checkpoints and reporting
    // ------------------------------------------------------------------------

    pub async fn checkpoint(&self) -> Result<Checkpoint, CoordinatorError> {
        let manager = self
            .checkpoints
            .as_ref()
            .ok_or(CoordinatorError::CheckpointsDisabled)?;

        let job = self.job().await;
        let checkpoint = manager.snapshot(&job, &self.frontier).await?;

        self.job.write().await.last_checkpoint = Some(checkpoint.sequence);
        *self.last_checkpoint_at.lock().await = Instant::now();
        Ok(checkpoint)
    }

    pub async fn status(&self) -> JobReport {
        let frontier = self.frontier.stats().await;
        let workers = self.registry.stats().await;
        let job = self.job.read().await;

        JobReport {
            job_id: job.id.clone(),
            status: job.status,
            max_depth: job.max_depth,
            frontier,
            workers,
            last_checkpoint: job.last_checkpoint,
            failure_reason: job.failure_reason.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }

    pub async fn workers(&self) -> Vec<WorkerInfo> {
        self.registry.all().await
    }

    // ------------------------------------------------------------------------
    // Background sweep
    // ------------------------------------------------------------------------

    /// One maintenance pass: expire leases, update worker liveness, detect
    /// completion and take a periodic checkpoint when due.
    pub async fn sweep(&self) -> Result<SweepReport, CoordinatorError> {
        let mut report = SweepReport::default();
        if self.job_status().await.is_terminal() {
            return Ok(report);
        }

        let expired = self.guard(self.frontier.release_expired_leases().await).await?;
        report.requeued = expired.requeued.len();
        report.failed = expired.failed.len();

        let changes = self
            .registry
            .update_statuses(self.config.heartbeat_timeout(), self.config.eviction_timeout())
            .await;
        report.disconnected = changes.disconnected.len();
        report.evicted = changes.evicted.len();

        self.registry
            .sync_in_flight(&self.frontier.leases_by_worker().await)
            .await;
        let workers = self.registry.stats().await;
        metrics::update_worker_metrics(workers.active, workers.disconnected);

        report.completed = self.check_completion().await;
        if report.completed {
            return Ok(report);
        }

        if self.checkpoint_due().await {
            match self.checkpoint().await {
                Ok(checkpoint) => report.checkpoint = Some(checkpoint.sequence),
                Err(e) => tracing::error!(error = %e, "Periodic checkpoint failed"),
            }
        }

        Ok(report)
    }

    async fn check_completion(&self) -> bool {
        let drained = self.frontier.stats().await.is_drained() && self.registry.all_idle().await;
        let running = self.job_status().await == JobStatus::Running;

        let mut idle_since = self.idle_since.lock().await;
        if !(drained && running) {
            *idle_since = None;
            return false;
        }

        let since = *idle_since.get_or_insert_with(Instant::now);
        if since.elapsed() < self.config.completion_grace() {
            return false;
        }
        drop(idle_since);

        self.complete_job().await
    }

    async fn checkpoint_due(&self) -> bool {
        let Some(interval) = self.checkpoint_interval else {
            return false;
        };
        self.job_status().await == JobStatus::Running
            && self.last_checkpoint_at.lock().await.elapsed() >= interval
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until shutdown or the
    /// job finishes
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Sweeper shutting down");
                            break;
                        }
                        continue;
                    }
                }

                match self.sweep().await {
                    Ok(report) if report != SweepReport::default() => {
                        tracing::debug!(?report, "Sweep finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Sweep failed"),
                }

                if self.job_status().await.is_terminal() {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl WorkSource for Coordinator {
    async fn register(&self, request: RegisterRequest) -> crate::Result<RegisterResponse> {
        Ok(Coordinator::register(self, request).await?)
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> crate::Result<HeartbeatResponse> {
        Ok(Coordinator::heartbeat(self, request).await?)
    }

    async fn lease(&self, request: LeaseRequest) -> crate::Result<LeaseResponse> {
        Ok(Coordinator::lease(self, request).await?)
    }

    async fn complete(&self, request: CompleteRequest) -> crate::Result<CompleteResponse> {
        Ok(Coordinator::complete(self, request).await?)
    }
}

// ============================================================================
// Tests
// ============================================================================
