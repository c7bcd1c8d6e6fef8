//! Crawl workers and the fetch collaborator
//!
//! A worker pulls leases from a [`WorkSource`] (the in-process coordinator or a
//! [`CoordinatorClient`](crate::coordinator::CoordinatorClient)), fetches each
//! URL through a [`Fetcher`] and reports the outcome together with the links it
//! discovered. Scope, depth and dedup decisions stay with the coordinator.

pub mod fetcher;
pub mod worker;

pub use fetcher::{FetcherConfig, HttpFetcher};
pub use worker::{CrawlWorker, WorkerConfig, WorkerSummary};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::coordinator::{
    CompleteRequest, CompleteResponse, HeartbeatRequest, HeartbeatResponse, LeaseRequest,
    LeaseResponse, RegisterRequest, RegisterResponse,
};

// ============================================================================
// Fetch collaborator
// ============================================================================

/// What a fetch produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// URL that answered; redirects are reported, not followed
    pub final_url: String,

    pub status: u16,

    /// Absolute http(s) links in document order, without duplicates
    pub links: Vec<String>,

    /// Free-form page metadata (title, content type)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl FetchResponse {
    pub fn new(final_url: impl Into<String>, status: u16) -> Self {
        Self {
            final_url: final_url.into(),
            status,
            links: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Statuses worth another attempt later
    pub fn is_retryable_status(&self) -> bool {
        matches!(self.status, 408 | 429 | 500 | 502 | 503 | 504)
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Fetch error: {0}")]
    Other(String),
}

impl FetchError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}

/// Renders a URL and extracts its links
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

// ============================================================================
// Work source
// ============================================================================

/// The coordinator protocol as seen by a worker
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn register(&self, request: RegisterRequest) -> crate::Result<RegisterResponse>;

    async fn heartbeat(&self, request: HeartbeatRequest) -> crate::Result<HeartbeatResponse>;

    async fn lease(&self, request: LeaseRequest) -> crate::Result<LeaseResponse>;

    async fn complete(&self, request: CompleteRequest) -> crate::Result<CompleteResponse>;
}
