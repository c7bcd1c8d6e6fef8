//! Crawl worker loop
//!
//! Registers with a [`WorkSource`], keeps a heartbeat going in the background,
//! leases batches of URLs and fetches them with bounded concurrency. In-flight
//! fetches are always reported, even when shutdown is requested mid-batch.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{FetchError, FetchResponse, Fetcher, WorkSource};
use crate::coordinator::{CompleteRequest, HeartbeatRequest, Lease, LeaseRequest, RegisterRequest};
use crate::error::{FleetscopeErrorTrait, Result};
use crate::frontier::{EntryState, LeaseOutcome};
use crate::metrics;
use crate::models::{JobStatus, WorkerId};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Coordinator base URL for remote workers
    pub coordinator_url: String,

    /// Concurrent fetches per worker
    pub concurrency: usize,

    /// URLs requested per lease call
    pub batch_size: usize,

    /// Wait before asking again when nothing was leased
    pub idle_backoff_ms: u64,

    /// Heartbeat cadence used until the coordinator announces its own
    pub heartbeat_interval_secs: u64,

    pub fetcher: super::FetcherConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:8080".to_string(),
            concurrency: 4,
            batch_size: 8,
            idle_backoff_ms: 500,
            heartbeat_interval_secs: 10,
            fetcher: super::FetcherConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// Totals for one worker run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Completions the coordinator rejected because the lease had moved on
    pub stale: usize,
    pub final_status: Option<JobStatus>,
}

enum LeaseResult {
    Done(EntryState),
    Stale,
    Lost,
}

// ============================================================================
// Crawl Worker
// ============================================================================

pub struct CrawlWorker {
    id: WorkerId,
    source: Arc<dyn WorkSource>,
    fetcher: Arc<dyn Fetcher>,
    config: WorkerConfig,
    in_flight: Arc<AtomicUsize>,
}

impl CrawlWorker {
    pub fn new(
        id: WorkerId,
        source: Arc<dyn WorkSource>,
        fetcher: Arc<dyn Fetcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            source,
            fetcher,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Work until the job finishes or `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<WorkerSummary> {
        let registration = self.source.register(RegisterRequest::new(self.id.clone())).await?;
        tracing::info!(
            worker = %self.id,
            job = %registration.job_id,
            status = %registration.job_status,
            "Worker registered"
        );

        let interval = match registration.heartbeat_interval_secs {
            0 => Duration::from_secs(self.config.heartbeat_interval_secs.max(1)),
            secs => Duration::from_secs(secs),
        };
        let (status_tx, status_rx) = watch::channel(registration.job_status);
        let heartbeat = self.spawn_heartbeat(interval, status_tx, shutdown.clone());

        let result = self.work_loop(&mut shutdown, status_rx).await;
        heartbeat.abort();

        let summary = result?;
        tracing::info!(
            worker = %self.id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            stale = summary.stale,
            "Worker stopped"
        );
        Ok(summary)
    }

    async fn work_loop(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        status_rx: watch::Receiver<JobStatus>,
    ) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary::default();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let known = *status_rx.borrow();
            if known.is_terminal() {
                summary.final_status = Some(known);
                break;
            }

            let request = LeaseRequest {
                worker_id: self.id.clone(),
                count: self.config.batch_size.max(1),
            };
            let response = match self.source.lease(request).await {
                Ok(response) => response,
                Err(e) if e.needs_registration() => {
                    self.reregister().await?;
                    continue;
                }
                Err(e) if e.is_job_finished() => break,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(worker = %self.id, error = %e, "Lease request failed");
                    self.idle(shutdown).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if response.job_status.is_terminal() {
                summary.final_status = Some(response.job_status);
                break;
            }
            if response.leases.is_empty() {
                self.idle(shutdown).await;
                continue;
            }

            tracing::debug!(worker = %self.id, count = response.leases.len(), "Leased batch");
            let results: Vec<LeaseResult> = stream::iter(response.leases)
                .map(|lease| self.process(lease))
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

            for result in results {
                match result {
                    LeaseResult::Done(state) => {
                        summary.processed += 1;
                        match state {
                            EntryState::Done => summary.succeeded += 1,
                            _ => summary.failed += 1,
                        }
                    }
                    LeaseResult::Stale => summary.stale += 1,
                    LeaseResult::Lost => {}
                }
            }
        }

        Ok(summary)
    }

    /// Fetch one leased URL and report it
    async fn process(&self, lease: Lease) -> LeaseResult {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let worker = self.id.as_str();

        let timer = metrics::start_fetch_timer(worker);
        let fetched = self.fetcher.fetch(&lease.url).await;
        drop(timer);

        let report = classify(&lease.url, fetched);
        metrics::record_fetch(worker, matches!(report.outcome, LeaseOutcome::Success));

        let request = CompleteRequest {
            worker_id: self.id.clone(),
            url: lease.url.clone(),
            outcome: report.outcome,
            links: report.links,
            metadata: report.metadata,
        };
        let result = match self.source.complete(request).await {
            Ok(report) => LeaseResult::Done(report.state),
            Err(e) if e.is_stale_completion() => {
                tracing::debug!(worker, url = %lease.url, "Completion for expired lease ignored");
                LeaseResult::Stale
            }
            Err(e) => {
                tracing::warn!(worker, url = %lease.url, error = %e, "Failed to report completion");
                LeaseResult::Lost
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn reregister(&self) -> Result<()> {
        tracing::warn!(worker = %self.id, "Coordinator lost this worker, registering again");
        self.source
            .register(RegisterRequest::new(self.id.clone()))
            .await
            .map(|_| ())
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.idle_backoff()) => {}
            Ok(()) = shutdown.changed() => {}
        }
    }

    fn spawn_heartbeat(
        &self,
        interval: Duration,
        status_tx: watch::Sender<JobStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let id = self.id.clone();
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Ok(()) = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let fetching = in_flight.load(Ordering::SeqCst);
                let request = HeartbeatRequest {
                    worker_id: id.clone(),
                    in_flight: fetching,
                };
                match source.heartbeat(request).await {
                    Ok(response) => {
                        if response.leases_held < fetching {
                            tracing::debug!(
                                worker = %id,
                                fetching,
                                leases_held = response.leases_held,
                                "Some in-flight completions will be stale"
                            );
                        }
                        status_tx.send_replace(response.job_status);
                        if response.job_status.is_terminal() {
                            break;
                        }
                    }
                    Err(e) if e.needs_registration() => {
                        tracing::warn!(worker = %id, "Heartbeat rejected, registering again");
                        if let Err(e) = source.register(RegisterRequest::new(id.clone())).await {
                            tracing::error!(worker = %id, error = %e, "Re-registration failed");
                        }
                    }
                    Err(e) => tracing::warn!(worker = %id, error = %e, "Heartbeat failed"),
                }
            }
        })
    }
}

/// What the coordinator is told about one fetch
#[derive(Debug)]
struct FetchReport {
    outcome: LeaseOutcome,
    links: Vec<String>,
    metadata: BTreeMap<String, String>,
}

impl FetchReport {
    fn failure(error: String) -> Self {
        Self {
            outcome: LeaseOutcome::Failure { error },
            links: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// 2xx pages succeed with their links, and a redirect succeeds with its target
/// as the only link. Transport errors and transient statuses fail so the entry
/// is retried. Any other status is a definitive answer: the URL is done and
/// contributes no links.
fn classify(url: &str, fetched: std::result::Result<FetchResponse, FetchError>) -> FetchReport {
    let mut response = match fetched {
        Ok(response) => response,
        Err(e) => return FetchReport::failure(e.to_string()),
    };

    if response.is_retryable_status() {
        return FetchReport::failure(format!("HTTP {}", response.status));
    }

    response
        .metadata
        .insert("status".to_string(), response.status.to_string());
    let links = if response.is_success() || response.is_redirect() {
        std::mem::take(&mut response.links)
    } else {
        tracing::debug!(url, status = response.status, "Non-success status, not following links");
        Vec::new()
    };
    tracing::trace!(url, metadata = ?response.metadata, "Fetched");

    FetchReport {
        outcome: LeaseOutcome::Success,
        links,
        metadata: response.metadata,
    }
}

// ============================================================================
// Tests
// ============================================================================
