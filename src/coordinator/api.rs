//! REST API handlers for the Coordinator
//!
//! Every handler returns an [`ApiResponse`] envelope. Failures carry a stable
//! machine-readable `code` next to the human-readable `error` so remote workers
//! can react (re-register, drop a stale completion) without parsing messages.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::frontier::FrontierError;
use crate::metrics;

use super::registry::{HeartbeatRequest, RegisterRequest, RegistryError, RegistryStats, WorkerInfo};
use super::server::AppState;
use super::{CompleteRequest, CoordinatorError, LeaseRequest};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }
}

/// Error codes shared with the client
pub mod codes {
    pub const WORKER_NOT_FOUND: &str = "worker_not_found";
    pub const WORKER_EVICTED: &str = "worker_evicted";
    pub const CAPACITY_EXCEEDED: &str = "capacity_exceeded";
    pub const LEASE_NOT_HELD: &str = "lease_not_held";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const JOB_FINISHED: &str = "job_finished";
    pub const PERSISTENCE_FAILURE: &str = "persistence_failure";
    pub const CHECKPOINT_FAILED: &str = "checkpoint_failed";
}

/// HTTP status and error code for a coordinator error
pub fn error_status(error: &CoordinatorError) -> (StatusCode, &'static str) {
    match error {
        CoordinatorError::Registry(RegistryError::WorkerNotFound(_)) => {
            (StatusCode::NOT_FOUND, codes::WORKER_NOT_FOUND)
        }
        CoordinatorError::Registry(RegistryError::Evicted(_)) => {
            (StatusCode::GONE, codes::WORKER_EVICTED)
        }
        CoordinatorError::Registry(RegistryError::CapacityExceeded { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, codes::CAPACITY_EXCEEDED)
        }
        CoordinatorError::Frontier(FrontierError::LeaseNotHeld { .. }) => {
            (StatusCode::CONFLICT, codes::LEASE_NOT_HELD)
        }
        CoordinatorError::Frontier(FrontierError::InvalidLeaseDuration(_))
        | CoordinatorError::CheckpointsDisabled => (StatusCode::BAD_REQUEST, codes::INVALID_REQUEST),
        CoordinatorError::Frontier(FrontierError::Storage(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, codes::PERSISTENCE_FAILURE)
        }
        CoordinatorError::Checkpoint(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, codes::CHECKPOINT_FAILED)
        }
        CoordinatorError::InvalidTransition { .. } => (StatusCode::CONFLICT, codes::INVALID_TRANSITION),
        CoordinatorError::JobFinished(_) => (StatusCode::CONFLICT, codes::JOB_FINISHED),
    }
}

fn respond<T: Serialize>(
    endpoint: &'static str,
    started: Instant,
    result: Result<T, CoordinatorError>,
) -> Response {
    let (status, body) = match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data)).into_response()),
        Err(e) => {
            let (status, code) = error_status(&e);
            if status.is_server_error() {
                tracing::error!(endpoint, error = %e, "Request failed");
            } else {
                tracing::debug!(endpoint, error = %e, "Request rejected");
            }
            (status, Json(ApiResponse::<()>::error(code, e.to_string())).into_response())
        }
    };

    metrics::record_api_request(endpoint, status.as_u16(), started.elapsed().as_secs_f64());
    (status, body).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub workers: Vec<WorkerInfo>,
    pub stats: RegistryStats,
}

// ============================================================================
// API Routes
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/workers", get(list_workers))
        .route("/api/workers/register", post(register_worker))
        .route("/api/workers/heartbeat", post(heartbeat))
        .route("/api/lease", post(lease))
        .route("/api/complete", post(complete))
        .route("/api/job", get(job_status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn list_workers(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let workers = state.coordinator.workers().await;
    let stats = state.coordinator.registry().stats().await;
    respond("/api/workers", started, Ok(WorkersResponse { workers, stats }))
}

async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let started = Instant::now();
    let result = state.coordinator.register(request).await;
    respond("/api/workers/register", started, result)
}

async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Response {
    let started = Instant::now();
    let result = state.coordinator.heartbeat(request).await;
    respond("/api/workers/heartbeat", started, result)
}

async fn lease(State(state): State<AppState>, Json(request): Json<LeaseRequest>) -> Response {
    let started = Instant::now();
    let result = state.coordinator.lease(request).await;
    respond("/api/lease", started, result)
}

async fn complete(
    State(state): State<AppState>,
    Json(request): Json<CompleteRequest>,
) -> Response {
    let started = Instant::now();
    let result = state.coordinator.complete(request).await;
    respond("/api/complete", started, result)
}

async fn job_status(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let report = state.coordinator.status().await;
    respond("/api/job", started, Ok(report))
}

async fn prometheus_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
