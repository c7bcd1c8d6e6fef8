// Core data structures for fleetscope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::scope::ScopeConfig;

const MAX_ID_LEN: usize = 64;

/// Identifier that does not satisfy the `[A-Za-z0-9._-]{1,64}` rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind} '{value}': expected 1-64 characters of [A-Za-z0-9._-]")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
}

fn validate_id(kind: &'static str, value: &str) -> Result<(), InvalidId> {
    let valid = !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(InvalidId {
            kind,
            value: value.to_string(),
        })
    }
}

fn looks_like_checkpoint_name(id: &str) -> bool {
    id.rsplit_once('-').is_some_and(|(head, tail)| {
        !head.is_empty() && tail.len() == 8 && tail.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Stable worker identity chosen by the worker itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidId> {
        let id = id.into();
        validate_id("worker id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkerId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Crawl job identifier. Generated as a UUID v4, but any filename-safe
/// identifier is accepted unless it ends in `-` and eight digits, which is
/// how checkpoint names end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Result<Self, InvalidId> {
        let id = id.into();
        validate_id("job id", &id)?;
        if looks_like_checkpoint_name(&id) {
            return Err(InvalidId {
                kind: "job id",
                value: id,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crawl job: scope, depth limit and seeds plus its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: JobId,
    pub scope: ScopeConfig,
    pub max_depth: u32,
    pub seeds: Vec<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sequence number of the last successful checkpoint
    pub last_checkpoint: Option<u64>,
    pub failure_reason: Option<String>,
}

impl CrawlJob {
    pub fn new(id: JobId, scope: ScopeConfig, max_depth: u32, seeds: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            scope,
            max_depth,
            seeds,
            status: JobStatus::Running,
            created_at: now,
            updated_at: now,
            last_checkpoint: None,
            failure_reason: None,
        }
    }

    /// Move to `status`, stamping `updated_at`
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.set_status(JobStatus::Failed);
    }
}
