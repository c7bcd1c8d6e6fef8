//! Frontier persistence backends and checkpoints
//!
//! A backend stores one job's frontier: entries keyed by normalized URL, the
//! visited set and the next discovery sequence. Every frontier mutation arrives
//! as one [`Changeset`] that must be applied atomically.
//!
//! - [`MemoryBackend`]: ephemeral, for tests and single-shot runs
//! - [`SqliteBackend`]: embedded file, one SQL transaction per commit
//! - [`RedisBackend`]: shared remote store, one MULTI/EXEC pipeline per commit

pub mod checkpoint;
pub mod memory;
pub mod redis;
pub mod sqlite;

pub use checkpoint::{
    checkpoint_name, parse_checkpoint_name, Checkpoint, CheckpointConfig, CheckpointError,
    CheckpointInfo, CheckpointManager, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, RestoreOptions, RestoredJob,
};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::frontier::{Changeset, FrontierSnapshot};
use crate::models::JobId;
use crate::utils::retry::RetryConfig;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

// ============================================================================
// Backend trait
// ============================================================================

/// Durable store for frontier state
#[async_trait]
pub trait FrontierBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Load a job's state, `None` if nothing was ever stored
    async fn load(&self, job_id: &JobId) -> Result<Option<FrontierSnapshot>, StorageError>;

    /// Atomically apply a changeset (upsert entries, add visited URLs)
    async fn commit(&self, job_id: &JobId, changeset: &Changeset) -> Result<(), StorageError>;

    /// Replace the job's whole state
    async fn replace(&self, job_id: &JobId, snapshot: &FrontierSnapshot)
        -> Result<(), StorageError>;

    /// Remove everything stored for the job
    async fn clear(&self, job_id: &JobId) -> Result<(), StorageError>;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
    Redis,
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: BackendKind,

    /// SQLite database file
    pub sqlite_path: PathBuf,

    /// Redis URL (e.g., redis://localhost:6379)
    pub redis_url: String,

    /// Redis connection pool size
    pub redis_pool_size: usize,

    /// Redis key prefix for namespacing
    pub key_prefix: String,

    /// Retries for a failed commit before the operation fails
    pub commit_retries: u32,

    /// Base delay for commit retry backoff
    pub commit_retry_base_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            sqlite_path: PathBuf::from("data/frontier.db"),
            redis_url: "redis://localhost:6379".to_string(),
            redis_pool_size: 8,
            key_prefix: "fleetscope".to_string(),
            commit_retries: 3,
            commit_retry_base_ms: 100,
        }
    }
}

impl StorageConfig {
    pub fn commit_retry(&self) -> RetryConfig {
        RetryConfig::with_delays(
            self.commit_retries,
            self.commit_retry_base_ms,
            self.commit_retry_base_ms.saturating_mul(32),
        )
    }
}

/// Open the configured backend
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn FrontierBackend>, StorageError> {
    let backend: Arc<dyn FrontierBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.sqlite_path).await?),
        BackendKind::Redis => Arc::new(
            RedisBackend::connect(&config.redis_url, config.redis_pool_size, &config.key_prefix)
                .await?,
        ),
    };

    tracing::info!(backend = backend.name(), "Frontier backend ready");
    Ok(backend)
}
