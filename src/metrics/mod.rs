//! Prometheus metrics for the coordinator, frontier and workers
//!
//! This module provides metrics tracking for:
//! - Frontier: enqueue outcomes, leases, completions, expiries, state gauges
//! - Coordinator: registered workers, heartbeats, API requests, checkpoints
//! - Workers: fetch duration and fetch results
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::frontier::{EnqueueOutcome, FrontierStats};

// ============================================================================
// Metrics Storage
// ============================================================================

struct FrontierMetrics {
    enqueued: CounterVec,
    leases_granted: Counter,
    completions: CounterVec,
    lease_expirations: Counter,
    persistence_failures: Counter,
    entries: GaugeVec,
    visited: Gauge,
}

struct CoordinatorMetrics {
    workers: GaugeVec,
    heartbeats: Counter,
    checkpoints: Counter,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

struct WorkerMetrics {
    fetch_duration: HistogramVec,
    fetches: CounterVec,
}

static FRONTIER_METRICS: OnceLock<FrontierMetrics> = OnceLock::new();
static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();
static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails the error is returned
/// and every recording function stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = fleetscope::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let frontier = FrontierMetrics {
        enqueued: register_counter_vec!(
            "fleetscope_frontier_enqueued_total",
            "URLs offered to the frontier by outcome",
            &["outcome"]
        )?,
        leases_granted: register_counter!(
            "fleetscope_frontier_leases_granted_total",
            "Frontier entries leased to workers"
        )?,
        completions: register_counter_vec!(
            "fleetscope_frontier_completions_total",
            "Lease completions by result",
            &["result"]
        )?,
        lease_expirations: register_counter!(
            "fleetscope_frontier_lease_expirations_total",
            "Leases reclaimed after expiry"
        )?,
        persistence_failures: register_counter!(
            "fleetscope_frontier_persistence_failures_total",
            "Frontier commits that failed after retries"
        )?,
        entries: register_gauge_vec!(
            "fleetscope_frontier_entries",
            "Frontier entries by state",
            &["state"]
        )?,
        visited: register_gauge!(
            "fleetscope_frontier_visited",
            "URLs that have been leased at least once"
        )?,
    };

    let coordinator = CoordinatorMetrics {
        workers: register_gauge_vec!(
            "fleetscope_coordinator_workers",
            "Registered workers by liveness",
            &["status"]
        )?,
        heartbeats: register_counter!(
            "fleetscope_coordinator_heartbeats_total",
            "Heartbeats received"
        )?,
        checkpoints: register_counter!(
            "fleetscope_coordinator_checkpoints_total",
            "Checkpoints written"
        )?,
        api_requests: register_counter_vec!(
            "fleetscope_coordinator_api_requests_total",
            "API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "fleetscope_coordinator_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        )?,
    };

    let worker = WorkerMetrics {
        fetch_duration: register_histogram_vec!(
            "fleetscope_worker_fetch_duration_seconds",
            "Time spent fetching one URL",
            &["worker"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        fetches: register_counter_vec!(
            "fleetscope_worker_fetches_total",
            "Fetches by worker and result",
            &["worker", "result"]
        )?,
    };

    FRONTIER_METRICS.set(frontier).map_err(|_| "Frontier metrics already initialized")?;
    COORDINATOR_METRICS.set(coordinator).map_err(|_| "Coordinator metrics already initialized")?;
    WORKER_METRICS.set(worker).map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    FRONTIER_METRICS.get().is_some()
        && COORDINATOR_METRICS.get().is_some()
        && WORKER_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Frontier
// ============================================================================

pub fn record_enqueue(outcome: EnqueueOutcome) {
    if let Some(m) = FRONTIER_METRICS.get() {
        m.enqueued.with_label_values(&[outcome.as_str()]).inc();
    }
}

pub fn record_leases(count: usize) {
    if let Some(m) = FRONTIER_METRICS.get() {
        m.leases_granted.inc_by(count as f64);
    }
}

pub fn record_completion(success: bool) {
    if let Some(m) = FRONTIER_METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.completions.with_label_values(&[result]).inc();
    }
}

pub fn record_lease_expirations(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = FRONTIER_METRICS.get() {
        m.lease_expirations.inc_by(count as f64);
    }
}

pub fn record_persistence_failure() {
    if let Some(m) = FRONTIER_METRICS.get() {
        m.persistence_failures.inc();
    }
}

/// Refresh the per-state gauges
pub fn set_frontier_stats(stats: &FrontierStats) {
    let Some(m) = FRONTIER_METRICS.get() else {
        return;
    };

    for (state, count) in [
        ("pending", stats.pending),
        ("leased", stats.leased),
        ("done", stats.done),
        ("failed", stats.failed),
    ] {
        m.entries.with_label_values(&[state]).set(count as f64);
    }
    m.visited.set(stats.visited as f64);
}

// ============================================================================
// Coordinator
// ============================================================================

pub fn update_worker_metrics(active: usize, disconnected: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.workers.with_label_values(&["active"]).set(active as f64);
        m.workers
            .with_label_values(&["disconnected"])
            .set(disconnected as f64);
    }
}

pub fn record_heartbeat() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.heartbeats.inc();
    }
}

pub fn record_checkpoint() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.checkpoints.inc();
    }
}

pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Workers
// ============================================================================

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

pub fn start_fetch_timer(worker: &str) -> MetricsTimer {
    match WORKER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.fetch_duration.with_label_values(&[worker]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

pub fn record_fetch(worker: &str, success: bool) {
    if let Some(m) = WORKER_METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.fetches.with_label_values(&[worker, result]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
