//! Notification channels for delivering job events

pub mod log;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::notifications::JobEvent;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error
    #[error("Channel error: {0}")]
    Other(String),
}

impl ChannelError {
    /// Client errors (4xx) and bad configuration are not retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::Other(_) => true,
            Self::Status { status, .. } => !(400..500).contains(status),
            Self::InvalidConfig(_) => false,
        }
    }
}

/// Outcome of one delivery attempt on one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub delivered: bool,
    pub channel: String,
    pub detail: Option<String>,
    pub attempted_at: chrono::DateTime<chrono::Utc>,
}

impl DeliveryStatus {
    fn new(delivered: bool, channel: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            delivered,
            channel: channel.into(),
            detail,
            attempted_at: chrono::Utc::now(),
        }
    }

    pub fn success(channel: impl Into<String>) -> Self {
        Self::new(true, channel, None)
    }

    pub fn failure(channel: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(false, channel, Some(detail.into()))
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.delivered { "delivered" } else { "undelivered" };
        match &self.detail {
            Some(detail) => write!(f, "{} {outcome}: {detail}", self.channel),
            None => write!(f, "{} {outcome}", self.channel),
        }
    }
}

/// Trait for notification channels
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &str;

    /// Deliver one event
    async fn send(&self, event: &JobEvent) -> ChannelResult<DeliveryStatus>;
}
