//! Configuration management for fleetscope
//!
//! One TOML file describes the job, its scope and every subsystem. Unknown keys
//! are rejected, `FLEETSCOPE_*` environment variables override selected values
//! and [`Config::validate`] runs before anything is started.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::coordinator::CoordinatorConfig;
use crate::crawler::WorkerConfig;
use crate::frontier::FrontierConfig;
use crate::models::JobId;
use crate::notifications::NotificationConfig;
use crate::scope::ScopeConfig;
use crate::storage::{BackendKind, CheckpointConfig, StorageConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub job: JobConfig,

    pub scope: ScopeConfig,

    pub frontier: FrontierConfig,

    pub coordinator: CoordinatorConfig,

    pub checkpoint: CheckpointConfig,

    pub storage: StorageConfig,

    pub worker: WorkerConfig,

    pub notifications: NotificationConfig,

    pub logging: LoggingConfig,
}

/// What to crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Job identifier; generated when absent
    pub id: Option<String>,

    pub seeds: Vec<String>,

    pub max_depth: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            id: None,
            seeds: Vec::new(),
            max_depth: 3,
        }
    }
}

impl JobConfig {
    /// Configured job ID, or a fresh one
    pub fn job_id(&self) -> Result<JobId> {
        match &self.id {
            Some(id) => Ok(JobId::new(id.clone())?),
            None => Ok(JobId::generate()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `FLEETSCOPE_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("FLEETSCOPE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("FLEETSCOPE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(backend) = lookup("FLEETSCOPE_STORAGE_BACKEND") {
            self.storage.backend = match backend.to_lowercase().as_str() {
                "memory" => BackendKind::Memory,
                "sqlite" => BackendKind::Sqlite,
                "redis" => BackendKind::Redis,
                other => anyhow::bail!("FLEETSCOPE_STORAGE_BACKEND: unknown backend '{other}'"),
            };
        }
        if let Some(path) = lookup("FLEETSCOPE_SQLITE_PATH") {
            self.storage.sqlite_path = path.into();
        }
        if let Some(url) = lookup("FLEETSCOPE_REDIS_URL") {
            self.storage.redis_url = url;
        }
        if let Some(addr) = lookup("FLEETSCOPE_BIND_ADDRESS") {
            self.coordinator.bind_address = addr
                .parse()
                .with_context(|| format!("FLEETSCOPE_BIND_ADDRESS: invalid address '{addr}'"))?;
        }
        if let Some(url) = lookup("FLEETSCOPE_COORDINATOR_URL") {
            self.worker.coordinator_url = url;
        }
        if let Some(dir) = lookup("FLEETSCOPE_CHECKPOINT_DIR") {
            self.checkpoint.dir = dir.into();
        }
        if let Some(concurrency) = lookup("FLEETSCOPE_WORKER_CONCURRENCY") {
            self.worker.concurrency = concurrency
                .parse()
                .with_context(|| format!("FLEETSCOPE_WORKER_CONCURRENCY: not a number '{concurrency}'"))?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.job.id {
            JobId::new(id.clone())?;
        }
        for seed in &self.job.seeds {
            let parsed = url::Url::parse(seed).with_context(|| format!("Invalid seed URL: {seed}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("Seed must be an http(s) URL: {seed}");
            }
        }

        self.scope.validate()?;
        self.coordinator.validate()?;

        if self.frontier.lease_duration_secs == 0 {
            anyhow::bail!("frontier.lease_duration_secs must be greater than 0");
        }
        if self.frontier.max_batch_size == 0 {
            anyhow::bail!("frontier.max_batch_size must be greater than 0");
        }
        if self.checkpoint.enabled && self.checkpoint.keep_last == 0 {
            anyhow::bail!("checkpoint.keep_last must be greater than 0");
        }
        if self.worker.concurrency == 0 {
            anyhow::bail!("worker.concurrency must be greater than 0");
        }
        if self.worker.batch_size == 0 {
            anyhow::bail!("worker.batch_size must be greater than 0");
        }
        if self.worker.fetcher.requests_per_second == 0 {
            anyhow::bail!("worker.fetcher.requests_per_second must be greater than 0");
        }
        for webhook in &self.notifications.webhooks {
            webhook.validate()?;
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Validate for starting a new job, which needs at least one seed
    pub fn validate_new_job(&self) -> Result<()> {
        self.validate()?;
        if self.job.seeds.is_empty() {
            anyhow::bail!("job.seeds must contain at least one URL");
        }
        Ok(())
    }
}
