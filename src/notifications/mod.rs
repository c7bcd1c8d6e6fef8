//! Job lifecycle notifications
//!
//! The coordinator and checkpoint manager emit [`JobEvent`]s; the
//! [`NotificationManager`] fans them out to every registered channel on
//! spawned tasks. Delivery failures are logged and never reach the caller.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      NotificationManager                   │
//! │  - Fire-and-forget dispatch                │
//! │  - Channel routing                         │
//! └────────────────────────────────────────────┘
//!                     │
//!             ┌───────┴───────┐
//!             ▼               ▼
//!       ┌─────────┐     ┌─────────┐
//!       │ Webhook │     │   Log   │
//!       │ Channel │     │ Channel │
//!       └─────────┘     └─────────┘
//! ```

pub mod channels;
mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::JobId;

pub use channels::log::LogChannel;
pub use channels::webhook::{WebhookChannel, WebhookConfig};
pub use channels::{Channel, ChannelError, DeliveryStatus};
pub use manager::NotificationManager;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobStarted,
    JobPaused,
    JobCompleted,
    JobFailed,
    CheckpointCreated,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::JobPaused => "job_paused",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::CheckpointCreated => "checkpoint_created",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A notification about one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique event identifier
    pub id: String,
    pub kind: JobEventKind,
    pub job_id: JobId,
    pub message: String,
    /// Additional context (counts, checkpoint sequence, failure reason)
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job_id: &JobId, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            job_id: job_id.clone(),
            message: message.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Add metadata to the event
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Format event for display
    pub fn format_message(&self) -> String {
        format!(
            "[{kind}] job {job}: {message}",
            kind = self.kind.as_str().to_uppercase(),
            job = self.job_id,
            message = self.message,
        )
    }
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    /// Emit every event to the log
    pub log_events: bool,

    /// Webhook endpoints receiving JSON payloads
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log_events: true,
            webhooks: Vec::new(),
        }
    }
}
