//! Worker registry
//!
//! Tracks every worker that joined the job and its liveness:
//! `Active → Disconnected → (rejoin) Active | Evicted`. An Evicted worker has to
//! register again before it may lease work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{JobId, JobStatus, WorkerId};

// ============================================================================
// Worker Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Heartbeats arriving on time
    #[default]
    Active,

    /// Missed heartbeats past the heartbeat timeout
    Disconnected,

    /// Missed heartbeats past the eviction timeout
    Evicted,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disconnected => "disconnected",
            Self::Evicted => "evicted",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Worker Info
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,

    pub status: WorkerStatus,

    /// First registration
    pub registered_at: DateTime<Utc>,

    /// Last heartbeat, registration or lease request
    pub last_heartbeat: DateTime<Utc>,

    /// Leases currently held, refreshed by the coordinator sweep
    pub in_flight: usize,

    /// URLs reported done
    pub completed: u64,

    /// URLs reported failed
    pub failed: u64,

    /// Version of the worker software
    pub version: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl WorkerInfo {
    pub fn new(id: WorkerId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: WorkerStatus::Active,
            registered_at: now,
            last_heartbeat: now,
            in_flight: 0,
            completed: 0,
            failed: 0,
            version: None,
            metadata: HashMap::new(),
        }
    }

    /// Record liveness; a Disconnected worker becomes Active again
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
        if self.status == WorkerStatus::Disconnected {
            self.status = WorkerStatus::Active;
        }
    }

    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }
}

// ============================================================================
// Registration Request/Response
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RegisterRequest {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: WorkerId,
    pub job_id: JobId,
    pub job_status: JobStatus,
    pub heartbeat_interval_secs: u64,
    pub lease_duration_secs: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: WorkerId,
    /// URLs the worker is fetching right now
    #[serde(default)]
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub job_status: JobStatus,
    pub worker_status: WorkerStatus,
    /// Leases the frontier still records for the worker. Fewer than
    /// `in_flight` means some fetches will end in stale completions.
    #[serde(default)]
    pub leases_held: usize,
}

// ============================================================================
// Worker Registry
// ============================================================================

pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerInfo>>,
    max_workers: usize,
}

/// Workers whose status changed during one status update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChanges {
    pub disconnected: Vec<WorkerId>,
    pub evicted: Vec<WorkerId>,
}

impl WorkerRegistry {
    pub fn new(max_workers: usize) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            max_workers,
        }
    }

    /// Register or rejoin a worker. Evicted workers count as new registrations.
    pub async fn register(&self, request: RegisterRequest) -> Result<WorkerInfo, RegistryError> {
        let mut workers = self.workers.write().await;

        let live = workers
            .values()
            .filter(|w| w.status != WorkerStatus::Evicted && w.id != request.worker_id)
            .count();
        let rejoining = workers
            .get(&request.worker_id)
            .is_some_and(|w| w.status != WorkerStatus::Evicted);

        if !rejoining && live >= self.max_workers {
            return Err(RegistryError::CapacityExceeded {
                current: live,
                max: self.max_workers,
            });
        }

        let info = workers
            .entry(request.worker_id.clone())
            .or_insert_with(|| WorkerInfo::new(request.worker_id.clone()));

        if info.status == WorkerStatus::Evicted {
            info.registered_at = Utc::now();
        }
        info.status = WorkerStatus::Active;
        info.last_heartbeat = Utc::now();
        info.version = request.version;
        info.metadata = request.metadata;

        tracing::info!(worker = %info.id, rejoin = rejoining, "Worker registered");
        Ok(info.clone())
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<WorkerInfo, RegistryError> {
        let info = self.ensure_live(&request.worker_id).await?;
        tracing::trace!(worker = %info.id, in_flight = request.in_flight, "Heartbeat");
        Ok(info)
    }

    /// Refresh liveness of a worker making a request. Unknown and Evicted
    /// workers are refused.
    pub async fn ensure_live(&self, worker: &WorkerId) -> Result<WorkerInfo, RegistryError> {
        let mut workers = self.workers.write().await;

        let info = workers
            .get_mut(worker)
            .ok_or_else(|| RegistryError::WorkerNotFound(worker.clone()))?;

        if info.status == WorkerStatus::Evicted {
            return Err(RegistryError::Evicted(worker.clone()));
        }

        if info.status == WorkerStatus::Disconnected {
            tracing::info!(worker = %worker, "Worker rejoined");
        }
        info.touch();
        Ok(info.clone())
    }

    pub async fn record_result(&self, worker: &WorkerId, success: bool) {
        if let Some(info) = self.workers.write().await.get_mut(worker) {
            if success {
                info.completed += 1;
            } else {
                info.failed += 1;
            }
        }
    }

    pub async fn get(&self, worker: &WorkerId) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker).cloned()
    }

    /// All workers, ordered by id
    pub async fn all(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Copy the per-worker lease counts in
    pub async fn sync_in_flight(&self, leases: &HashMap<WorkerId, usize>) {
        for info in self.workers.write().await.values_mut() {
            info.in_flight = leases.get(&info.id).copied().unwrap_or(0);
        }
    }

    /// Every non-evicted worker holds no leases
    pub async fn all_idle(&self) -> bool {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| w.status != WorkerStatus::Evicted)
            .all(WorkerInfo::is_idle)
    }

    pub async fn update_statuses(
        &self,
        heartbeat_timeout: Duration,
        eviction_timeout: Duration,
    ) -> StatusChanges {
        self.update_statuses_at(Utc::now(), heartbeat_timeout, eviction_timeout)
            .await
    }

    /// Apply heartbeat and eviction timeouts as of `now`
    pub async fn update_statuses_at(
        &self,
        now: DateTime<Utc>,
        heartbeat_timeout: Duration,
        eviction_timeout: Duration,
    ) -> StatusChanges {
        let mut changes = StatusChanges::default();
        let mut workers = self.workers.write().await;

        for info in workers.values_mut() {
            let silence = info.silence(now);

            match info.status {
                WorkerStatus::Evicted => {}
                _ if silence > eviction_timeout => {
                    info.status = WorkerStatus::Evicted;
                    tracing::warn!(worker = %info.id, silent_secs = silence.as_secs(), "Worker evicted");
                    changes.evicted.push(info.id.clone());
                }
                WorkerStatus::Active if silence > heartbeat_timeout => {
                    info.status = WorkerStatus::Disconnected;
                    tracing::warn!(worker = %info.id, silent_secs = silence.as_secs(), "Worker disconnected");
                    changes.disconnected.push(info.id.clone());
                }
                _ => {}
            }
        }

        changes
    }

    pub async fn stats(&self) -> RegistryStats {
        let workers = self.workers.read().await;

        let mut stats = RegistryStats {
            total_workers: workers.len(),
            ..RegistryStats::default()
        };

        for info in workers.values() {
            match info.status {
                WorkerStatus::Active => stats.active += 1,
                WorkerStatus::Disconnected => stats.disconnected += 1,
                WorkerStatus::Evicted => stats.evicted += 1,
            }
            stats.in_flight += info.in_flight;
            stats.completed += info.completed;
            stats.failed += info.failed;
        }

        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_workers: usize,
    pub active: usize,
    pub disconnected: usize,
    pub evicted: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Worker not registered: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Worker {0} was evicted and must register again")]
    Evicted(WorkerId),

    #[error("Registry at capacity: {current}/{max}")]
    CapacityExceeded { current: usize, max: usize },
}

// ============================================================================
// Tests
// ============================================================================
