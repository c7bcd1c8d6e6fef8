//! Checkpoint system for resumable crawling
//!
//! A checkpoint is a consistent copy of one job's frontier (every entry plus the
//! visited set) together with the scope configuration, depth limit and seeds it
//! was taken under. Sequence numbers strictly increase per job and a SHA-256
//! checksum over the content decides validity on load.
//!
//! Checkpoint names have the form `<job id>-<sequence:08>`.
//!
//! # Example
//!
//! ```no_run
//! use fleetscope::storage::checkpoint::{CheckpointManager, FileCheckpointStore};
//! use std::sync::Arc;
//!
//! # async fn example(job: &fleetscope::models::CrawlJob, store: &fleetscope::frontier::FrontierStore) -> anyhow::Result<()> {
//! let manager = CheckpointManager::new(Arc::new(FileCheckpointStore::new("./checkpoints")?), 5);
//!
//! let checkpoint = manager.snapshot(job, store).await?;
//! println!("saved {}", checkpoint.name());
//!
//! if let Some(latest) = manager.latest_valid(&job.id).await? {
//!     println!("resume point: {}", latest.name());
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::{FrontierBackend, StorageError};
use crate::frontier::{
    EntryState, FrontierConfig, FrontierError, FrontierSnapshot, FrontierStore,
};
use crate::metrics;
use crate::models::{CrawlJob, JobId};
use crate::notifications::{JobEvent, JobEventKind, NotificationManager};
use crate::scope::{ScopeConfig, ScopeEngine, ScopeError};
use crate::utils::retry::RetryConfig;

const FILE_SUFFIX: &str = ".checkpoint.json";

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("No valid checkpoint for job {0}")]
    NoValidCheckpoint(JobId),

    #[error("Invalid checkpoint name: {0}")]
    InvalidName(String),

    #[error("Checkpoint {name} failed checksum verification")]
    Corrupt { name: String },

    #[error(
        "Checkpoint {name} was taken with a different scope configuration; \
         resume with an explicit scope override to continue"
    )]
    ScopeMismatch { name: String },

    #[error("Checkpoint scope is invalid: {0}")]
    Scope(#[from] ScopeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] FrontierError),
}

// ============================================================================
// Checkpoint
// ============================================================================

/// Build the canonical checkpoint name
pub fn checkpoint_name(job_id: &JobId, sequence: u64) -> String {
    format!("{job_id}-{sequence:08}")
}

/// Split a checkpoint name into job id and sequence
pub fn parse_checkpoint_name(name: &str) -> Option<(JobId, u64)> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| Regex::new(r"^(.+)-(\d{8})$").expect("Invalid regex pattern"));

    let caps = re.captures(name)?;
    let job_id = JobId::new(caps.get(1)?.as_str()).ok()?;
    let sequence = caps.get(2)?.as_str().parse().ok()?;
    Some((job_id, sequence))
}

/// Persisted frontier state of one job at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,

    /// Strictly increasing per job
    pub sequence: u64,

    pub created_at: DateTime<Utc>,

    /// Scope configuration the frontier was built under
    pub scope: ScopeConfig,

    /// Fingerprint of `scope`
    pub scope_fingerprint: String,

    pub max_depth: u32,

    pub seeds: Vec<String>,

    pub frontier: FrontierSnapshot,

    /// SHA-256 over everything above
    pub checksum: String,
}

impl Checkpoint {
    pub fn new(job: &CrawlJob, sequence: u64, frontier: FrontierSnapshot) -> Result<Self, CheckpointError> {
        let mut checkpoint = Self {
            job_id: job.id.clone(),
            sequence,
            created_at: Utc::now(),
            scope: job.scope.clone(),
            scope_fingerprint: job.scope.fingerprint(),
            max_depth: job.max_depth,
            seeds: job.seeds.clone(),
            frontier,
            checksum: String::new(),
        };
        checkpoint.checksum = checkpoint.compute_checksum()?;
        Ok(checkpoint)
    }

    pub fn name(&self) -> String {
        checkpoint_name(&self.job_id, self.sequence)
    }

    fn compute_checksum(&self) -> Result<String, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(self.job_id.as_str().as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        hasher.update(serde_json::to_vec(&self.scope)?);
        hasher.update(self.scope_fingerprint.as_bytes());
        hasher.update(self.max_depth.to_be_bytes());
        hasher.update(serde_json::to_vec(&self.seeds)?);
        hasher.update(serde_json::to_vec(&self.frontier)?);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Checksum matches the content
    pub fn verify(&self) -> bool {
        self.compute_checksum()
            .map(|sum| sum == self.checksum)
            .unwrap_or(false)
    }

    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            name: self.name(),
            job_id: self.job_id.clone(),
            sequence: self.sequence,
            created_at: Some(self.created_at),
            entries: self.frontier.entries.len(),
            pending: self.frontier.count(EntryState::Pending)
                + self.frontier.count(EntryState::Leased),
            done: self.frontier.count(EntryState::Done),
            failed: self.frontier.count(EntryState::Failed),
            visited: self.frontier.visited.len(),
            valid: self.verify(),
        }
    }
}

/// Listing row for one checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub name: String,
    pub job_id: JobId,
    pub sequence: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub entries: usize,
    /// Pending after restore (Leased entries included)
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
    pub visited: usize,
    pub valid: bool,
}

impl CheckpointInfo {
    fn unreadable(job_id: &JobId, sequence: u64) -> Self {
        Self {
            name: checkpoint_name(job_id, sequence),
            job_id: job_id.clone(),
            sequence,
            created_at: None,
            entries: 0,
            pending: 0,
            done: 0,
            failed: 0,
            visited: 0,
            valid: false,
        }
    }
}

// ============================================================================
// Checkpoint stores
// ============================================================================

/// Where checkpoints live
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Load and parse; does not verify the checksum
    async fn load(&self, name: &str) -> Result<Checkpoint, CheckpointError>;

    /// Sequence numbers stored for the job, ascending
    async fn list(&self, job_id: &JobId) -> Result<Vec<u64>, CheckpointError>;

    async fn delete(&self, name: &str) -> Result<(), CheckpointError>;
}

/// JSON files in a directory, written to a temp file then renamed
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{FILE_SUFFIX}"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let filepath = self.path_for(&checkpoint.name());
        let temp_path = self.dir.join(format!("{}{FILE_SUFFIX}.tmp", checkpoint.name()));

        let data = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&temp_path, data).await?;
        tokio::fs::rename(&temp_path, &filepath).await?;

        tracing::debug!(path = %filepath.display(), "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        let filepath = self.path_for(name);

        let data = match tokio::fs::read(&filepath).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let checkpoint = serde_json::from_slice(&data)?;
        tracing::debug!(path = %filepath.display(), "Checkpoint loaded");
        Ok(checkpoint)
    }

    async fn list(&self, job_id: &JobId) -> Result<Vec<u64>, CheckpointError> {
        let mut sequences = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(FILE_SUFFIX)) else {
                continue;
            };
            if let Some((job, sequence)) = parse_checkpoint_name(name) {
                if &job == job_id {
                    sequences.push(sequence);
                }
            }
        }

        sequences.sort_unstable();
        Ok(sequences)
    }

    async fn delete(&self, name: &str) -> Result<(), CheckpointError> {
        let filepath = self.path_for(name);

        match tokio::fs::remove_file(&filepath).await {
            Ok(()) => {
                tracing::debug!(path = %filepath.display(), "Checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serialized checkpoints kept in memory (tests, ephemeral runs)
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under a name, bypassing serialization
    pub async fn insert_raw(&self, name: impl Into<String>, raw: impl Into<String>) {
        self.data.write().await.insert(name.into(), raw.into());
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let raw = serde_json::to_string(checkpoint)?;
        self.data.write().await.insert(checkpoint.name(), raw);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        let data = self.data.read().await;
        let raw = data
            .get(name)
            .ok_or_else(|| CheckpointError::NotFound(name.to_string()))?;
        Ok(serde_json::from_str(raw)?)
    }

    async fn list(&self, job_id: &JobId) -> Result<Vec<u64>, CheckpointError> {
        let mut sequences: Vec<u64> = self
            .data
            .read()
            .await
            .keys()
            .filter_map(|name| parse_checkpoint_name(name))
            .filter(|(job, _)| job == job_id)
            .map(|(_, seq)| seq)
            .collect();
        sequences.sort_unstable();
        Ok(sequences)
    }

    async fn delete(&self, name: &str) -> Result<(), CheckpointError> {
        self.data.write().await.remove(name);
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Take checkpoints at all
    pub enabled: bool,

    /// Directory for checkpoint files
    pub dir: PathBuf,

    /// Seconds between periodic checkpoints (0 disables periodic checkpoints)
    pub interval_secs: u64,

    /// Checkpoints kept per job after garbage collection
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("checkpoints"),
            interval_secs: 300,
            keep_last: 5,
        }
    }
}

// ============================================================================
// Checkpoint Manager
// ============================================================================

/// How a restore treats the scope stored in the checkpoint
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Scope the caller wants to resume with; `None` reuses the checkpoint's
    pub scope: Option<ScopeConfig>,

    /// Accept a scope that differs from the checkpoint's
    pub allow_scope_change: bool,
}

/// A job and frontier rebuilt from a checkpoint
pub struct RestoredJob {
    pub job: CrawlJob,
    pub store: FrontierStore,
}

/// Creates, selects, restores and prunes checkpoints
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    keep_last: usize,
    notifications: Option<NotificationManager>,
    /// Serializes snapshots so sequence numbers never collide
    snapshot_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, keep_last: usize) -> Self {
        Self {
            store,
            keep_last: keep_last.max(1),
            notifications: None,
            snapshot_lock: Mutex::new(()),
        }
    }

    pub fn with_notifications(mut self, notifications: NotificationManager) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Persist the frontier of `job` as the next checkpoint in its lineage
    pub async fn snapshot(
        &self,
        job: &CrawlJob,
        frontier: &FrontierStore,
    ) -> Result<Checkpoint, CheckpointError> {
        let _guard = self.snapshot_lock.lock().await;

        let sequence = self
            .store
            .list(&job.id)
            .await?
            .last()
            .map_or(1, |last| last + 1);

        let checkpoint = Checkpoint::new(job, sequence, frontier.snapshot().await)?;
        self.store.save(&checkpoint).await?;

        tracing::info!(
            job_id = %job.id,
            sequence,
            entries = checkpoint.frontier.entries.len(),
            visited = checkpoint.frontier.visited.len(),
            "Checkpoint created"
        );
        metrics::record_checkpoint();

        if let Err(e) = self.gc(&job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Checkpoint garbage collection failed");
        }

        if let Some(notifications) = &self.notifications {
            notifications.notify(
                JobEvent::new(
                    JobEventKind::CheckpointCreated,
                    &job.id,
                    format!("Checkpoint {} created", checkpoint.name()),
                )
                .with_metadata("sequence", sequence)
                .with_metadata("entries", checkpoint.frontier.entries.len())
                .with_metadata("visited", checkpoint.frontier.visited.len()),
            );
        }

        Ok(checkpoint)
    }

    /// Load a checkpoint by name and verify it
    pub async fn load(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        parse_checkpoint_name(name).ok_or_else(|| CheckpointError::InvalidName(name.to_string()))?;

        let checkpoint = self.store.load(name).await?;
        if !checkpoint.verify() || checkpoint.name() != name {
            return Err(CheckpointError::Corrupt {
                name: name.to_string(),
            });
        }
        Ok(checkpoint)
    }

    /// Highest-numbered checkpoint that parses and verifies
    pub async fn latest_valid(&self, job_id: &JobId) -> Result<Option<Checkpoint>, CheckpointError> {
        for sequence in self.store.list(job_id).await?.into_iter().rev() {
            let name = checkpoint_name(job_id, sequence);
            match self.load(&name).await {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    tracing::warn!(checkpoint = %name, error = %e, "Skipping invalid checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Summaries of every stored checkpoint of a job, oldest first
    pub async fn list(&self, job_id: &JobId) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut infos = Vec::new();
        for sequence in self.store.list(job_id).await? {
            let name = checkpoint_name(job_id, sequence);
            let info = match self.store.load(&name).await {
                Ok(checkpoint) => checkpoint.info(),
                Err(_) => CheckpointInfo::unreadable(job_id, sequence),
            };
            infos.push(info);
        }
        Ok(infos)
    }

    /// Delete all but the newest `keep_last` checkpoints. Returns the number removed.
    pub async fn gc(&self, job_id: &JobId) -> Result<usize, CheckpointError> {
        let sequences = self.store.list(job_id).await?;
        if sequences.len() <= self.keep_last {
            return Ok(0);
        }

        let excess = sequences.len() - self.keep_last;
        for sequence in &sequences[..excess] {
            self.store.delete(&checkpoint_name(job_id, *sequence)).await?;
        }

        tracing::debug!(job_id = %job_id, removed = excess, "Old checkpoints removed");
        Ok(excess)
    }

    /// Rebuild a job and its frontier from a checkpoint.
    ///
    /// Leased entries come back Pending and the backend is overwritten with the
    /// restored state. A scope that differs from the checkpoint's is refused
    /// unless `allow_scope_change` is set; with the override, Pending entries
    /// the new scope rejects are marked Failed.
    pub async fn restore(
        &self,
        checkpoint: &Checkpoint,
        options: &RestoreOptions,
        frontier_config: &FrontierConfig,
        backend: Arc<dyn FrontierBackend>,
        commit_retry: RetryConfig,
    ) -> Result<RestoredJob, CheckpointError> {
        let mut scope = checkpoint.scope.clone();
        let mut scope_changed = false;

        if let Some(requested) = &options.scope {
            if requested.fingerprint() != checkpoint.scope_fingerprint {
                if !options.allow_scope_change {
                    return Err(CheckpointError::ScopeMismatch {
                        name: checkpoint.name(),
                    });
                }
                tracing::warn!(
                    checkpoint = %checkpoint.name(),
                    previous = %checkpoint.scope_fingerprint,
                    current = %requested.fingerprint(),
                    "Resuming with a different scope configuration"
                );
                scope = requested.clone();
                scope_changed = true;
            }
        }

        let engine = Arc::new(ScopeEngine::new(&scope, &checkpoint.seeds)?);
        let mut snapshot = checkpoint.frontier.clone();

        if scope_changed {
            let mut dropped = 0;
            for entry in &mut snapshot.entries {
                let open = matches!(entry.state, EntryState::Pending | EntryState::Leased);
                if open && !engine.is_in_scope(&entry.url) {
                    entry.state = EntryState::Failed;
                    entry.clear_lease();
                    entry.last_error = Some("out of scope after scope change".to_string());
                    dropped += 1;
                }
            }
            if dropped > 0 {
                tracing::warn!(dropped, "Pending entries outside the new scope marked failed");
            }
        }

        let store = FrontierStore::restore(
            checkpoint.job_id.clone(),
            engine,
            checkpoint.max_depth,
            frontier_config.clone(),
            backend,
            snapshot,
        )
        .await?
        .with_commit_retry(commit_retry);

        let mut job = CrawlJob::new(
            checkpoint.job_id.clone(),
            scope,
            checkpoint.max_depth,
            checkpoint.seeds.clone(),
        );
        job.last_checkpoint = Some(checkpoint.sequence);

        tracing::info!(
            job_id = %job.id,
            checkpoint = %checkpoint.name(),
            "Job restored from checkpoint"
        );

        Ok(RestoredJob { job, store })
    }
}

// ============================================================================
// Tests
// ============================================================================
