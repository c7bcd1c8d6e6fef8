//! Coordinator client for remote workers
//!
//! Speaks the coordinator's REST API and implements [`WorkSource`], so a
//! [`CrawlWorker`](crate::crawler::CrawlWorker) runs the same against a remote
//! master as against an in-process [`Coordinator`](super::Coordinator).

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::api::{codes, ApiResponse, HealthResponse, WorkersResponse};
use super::registry::{HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse};
use super::{CompleteRequest, CompleteResponse, JobReport, LeaseRequest, LeaseResponse};
use crate::crawler::WorkSource;
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Client Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator base URL
    pub coordinator_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retries for failed requests
    pub retry_count: u32,

    /// Base delay between retries
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(coordinator_url: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn retry(&self) -> RetryConfig {
        let base_ms = self.retry_delay.as_millis() as u64;
        RetryConfig::with_delays(self.retry_count, base_ms, base_ms.saturating_mul(8))
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.coordinator_url
    }

    pub async fn health_check(&self) -> Result<HealthResponse, ClientError> {
        self.get("/api/health").await
    }

    pub async fn job_status(&self) -> Result<JobReport, ClientError> {
        self.get("/api/job").await
    }

    pub async fn workers(&self) -> Result<WorkersResponse, ClientError> {
        self.get("/api/workers").await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.post("/api/workers/register", request).await
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse, ClientError> {
        self.post("/api/workers/heartbeat", request).await
    }

    pub async fn lease(&self, request: &LeaseRequest) -> Result<LeaseResponse, ClientError> {
        self.post("/api/lease", request).await
    }

    pub async fn complete(&self, request: &CompleteRequest) -> Result<CompleteResponse, ClientError> {
        self.post("/api/complete", request).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let url = format!("{}{path}", self.config.coordinator_url);
        let url = url.as_str();
        with_retry_if(
            &self.config.retry(),
            || async move { decode(self.http_client.get(url).send().await?).await },
            ClientError::is_retryable,
        )
        .await
    }

    async fn post<T: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ClientError> {
        let url = format!("{}{path}", self.config.coordinator_url);
        let url = url.as_str();
        with_retry_if(
            &self.config.retry(),
            || async move { decode(self.http_client.post(url).json(body).send().await?).await },
            ClientError::is_retryable,
        )
        .await
    }
}

/// Unwrap the response envelope, mapping failures to [`ClientError::Api`]
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
    let status = response.status();
    let text = response.text().await?;

    let envelope: ApiResponse<R> = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: None,
                message: text,
            })
        }
        Err(e) => return Err(ClientError::Parse(e.to_string())),
    };

    match envelope.data {
        Some(data) if envelope.success => Ok(data),
        _ if envelope.success => Err(ClientError::InvalidResponse("Missing data".to_string())),
        _ => Err(ClientError::Api {
            status: status.as_u16(),
            code: envelope.code,
            message: envelope.error.unwrap_or_default(),
        }),
    }
}

#[async_trait]
impl WorkSource for CoordinatorClient {
    async fn register(&self, request: RegisterRequest) -> crate::Result<RegisterResponse> {
        Ok(CoordinatorClient::register(self, &request).await?)
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> crate::Result<HeartbeatResponse> {
        Ok(CoordinatorClient::heartbeat(self, &request).await?)
    }

    async fn lease(&self, request: LeaseRequest) -> crate::Result<LeaseResponse> {
        Ok(CoordinatorClient::lease(self, &request).await?)
    }

    async fn complete(&self, request: CompleteRequest) -> crate::Result<CompleteResponse> {
        Ok(CoordinatorClient::complete(self, &request).await?)
    }
}

// ============================================================================
// Client Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Coordinator returned HTTP {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Network failures and server-side errors are retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, code, .. } => {
                *status >= 500 && code.as_deref() != Some(codes::PERSISTENCE_FAILURE)
            }
            _ => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The coordinator no longer knows this worker
    pub fn needs_registration(&self) -> bool {
        matches!(
            self.code(),
            Some(codes::WORKER_NOT_FOUND) | Some(codes::WORKER_EVICTED)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
