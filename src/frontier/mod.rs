//! Frontier store
//!
//! Durable, de-duplicated work queue shared by every worker of a crawl job.
//!
//! Every operation takes the store mutex, plans its transition on a
//! [`Transaction`], commits the resulting [`Changeset`] to the persistence
//! backend and only then applies it in memory. Each enqueue, lease, completion,
//! expiry sweep and snapshot is therefore one linearizable step.
//!
//! Enqueue checks run in a fixed order: scope, depth, duplicate.

pub mod entry;
pub mod state;

pub use entry::{EntryState, FrontierEntry};
pub use state::{Changeset, FrontierSnapshot, FrontierState, Transaction};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::models::{JobId, WorkerId};
use crate::scope::ScopeEngine;
use crate::storage::{FrontierBackend, StorageError};
use crate::utils::normalize_url;
use crate::utils::retry::{with_retry, RetryConfig};

// ============================================================================
// Configuration
// ============================================================================

/// Order in which Pending entries are leased
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeasePriority {
    /// Discovery order
    #[default]
    Fifo,
    /// Lowest depth first, discovery order within a depth
    ShallowestFirst,
}

/// Frontier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrontierConfig {
    /// Retries after the first failed attempt before an entry is Failed
    pub max_retries: u32,

    /// Default lease duration handed to workers
    pub lease_duration_secs: u64,

    /// Upper bound on one lease batch
    pub max_batch_size: usize,

    pub priority: LeasePriority,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            lease_duration_secs: 60,
            max_batch_size: 50,
            priority: LeasePriority::Fifo,
        }
    }
}

impl FrontierConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }
}

// ============================================================================
// Outcomes and errors
// ============================================================================

/// Result of offering one URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Accepted,
    RejectedOutOfScope,
    RejectedDuplicate,
    RejectedDepthExceeded,
}

impl EnqueueOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RejectedOutOfScope => "out_of_scope",
            Self::RejectedDuplicate => "duplicate",
            Self::RejectedDepthExceeded => "depth_exceeded",
        }
    }
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tally of enqueue outcomes for a batch of URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueCounts {
    pub accepted: usize,
    pub out_of_scope: usize,
    pub duplicate: usize,
    pub depth_exceeded: usize,
}

impl EnqueueCounts {
    pub fn record(&mut self, outcome: EnqueueOutcome) {
        match outcome {
            EnqueueOutcome::Accepted => self.accepted += 1,
            EnqueueOutcome::RejectedOutOfScope => self.out_of_scope += 1,
            EnqueueOutcome::RejectedDuplicate => self.duplicate += 1,
            EnqueueOutcome::RejectedDepthExceeded => self.depth_exceeded += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.accepted + self.out_of_scope + self.duplicate + self.depth_exceeded
    }
}

/// What a worker reports for a leased URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeaseOutcome {
    Success,
    Failure { error: String },
}

/// Effect of one completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// State the completed entry ended in
    pub state: EntryState,
    /// Outcomes for the discovered links (empty on failure)
    pub links: EnqueueCounts,
}

/// Entries touched by an expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Returned to Pending
    pub requeued: Vec<String>,
    /// Retries exhausted
    pub failed: Vec<String>,
}

impl ExpiryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Counts per entry state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStats {
    pub pending: usize,
    pub leased: usize,
    pub done: usize,
    pub failed: usize,
    pub visited: usize,
    pub total: usize,
}

impl FrontierStats {
    /// No Pending and no Leased entries remain
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.leased == 0
    }
}

#[derive(Error, Debug)]
pub enum FrontierError {
    #[error("Worker {worker} does not hold a lease on {url}")]
    LeaseNotHeld { worker: WorkerId, url: String },

    #[error("Invalid lease duration: {0:?}")]
    InvalidLeaseDuration(Duration),

    #[error("Persistence failure: {0}")]
    Storage(#[from] StorageError),
}

// ============================================================================
// Frontier Store
// ============================================================================

pub struct FrontierStore {
    job_id: JobId,
    scope: Arc<ScopeEngine>,
    max_depth: u32,
    config: FrontierConfig,
    backend: Arc<dyn FrontierBackend>,
    commit_retry: RetryConfig,
    state: Mutex<FrontierState>,
}

impl FrontierStore {
    /// Empty store for a new job
    pub fn new(
        job_id: JobId,
        scope: Arc<ScopeEngine>,
        max_depth: u32,
        config: FrontierConfig,
        backend: Arc<dyn FrontierBackend>,
    ) -> Self {
        let state = FrontierState::new(config.priority);
        Self {
            job_id,
            scope,
            max_depth,
            config,
            backend,
            commit_retry: RetryConfig::with_delays(3, 100, 3_200),
            state: Mutex::new(state),
        }
    }

    /// Store populated from whatever the backend holds for `job_id`
    pub async fn open(
        job_id: JobId,
        scope: Arc<ScopeEngine>,
        max_depth: u32,
        config: FrontierConfig,
        backend: Arc<dyn FrontierBackend>,
    ) -> Result<Self, FrontierError> {
        let snapshot = backend.load(&job_id).await?;
        let store = Self::new(job_id, scope, max_depth, config, backend);

        if let Some(snapshot) = snapshot {
            info!(
                job_id = %store.job_id,
                entries = snapshot.entries.len(),
                visited = snapshot.visited.len(),
                "Loaded frontier from backend"
            );
            *store.state.lock().await = FrontierState::from_snapshot(snapshot, store.config.priority);
        }

        Ok(store)
    }

    /// Empty store for a new job. Anything the backend still holds under
    /// `job_id` belongs to an earlier run and is discarded; continuing a job
    /// goes through [`FrontierStore::restore`].
    pub async fn start_fresh(
        job_id: JobId,
        scope: Arc<ScopeEngine>,
        max_depth: u32,
        config: FrontierConfig,
        backend: Arc<dyn FrontierBackend>,
    ) -> Result<Self, FrontierError> {
        if let Some(stale) = backend.load(&job_id).await? {
            warn!(
                job_id = %job_id,
                backend = backend.name(),
                entries = stale.entries.len(),
                visited = stale.visited.len(),
                "Discarding stored frontier from an earlier run of this job"
            );
            backend.clear(&job_id).await?;
        }

        Ok(Self::new(job_id, scope, max_depth, config, backend))
    }

    /// Store rebuilt from a snapshot. Leased entries come back Pending and the
    /// backend is overwritten with the rehydrated state.
    pub async fn restore(
        job_id: JobId,
        scope: Arc<ScopeEngine>,
        max_depth: u32,
        config: FrontierConfig,
        backend: Arc<dyn FrontierBackend>,
        mut snapshot: FrontierSnapshot,
    ) -> Result<Self, FrontierError> {
        let released = snapshot.release_all_leases();
        backend.replace(&job_id, &snapshot).await?;

        info!(
            job_id = %job_id,
            entries = snapshot.entries.len(),
            visited = snapshot.visited.len(),
            released_leases = released,
            "Frontier restored"
        );

        let store = Self::new(job_id, scope, max_depth, config, backend);
        *store.state.lock().await = FrontierState::from_snapshot(snapshot, store.config.priority);
        Ok(store)
    }

    pub fn with_commit_retry(mut self, retry: RetryConfig) -> Self {
        self.commit_retry = retry;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn scope(&self) -> &Arc<ScopeEngine> {
        &self.scope
    }

    pub fn config(&self) -> &FrontierConfig {
        &self.config
    }

    /// Offer one URL at `depth`
    pub async fn enqueue(
        &self,
        url: &str,
        depth: u32,
        parent: Option<&str>,
    ) -> Result<EnqueueOutcome, FrontierError> {
        let mut state = self.state.lock().await;

        let mut tx = Transaction::new(&state);
        let outcome = self.plan_enqueue(&mut tx, url, depth, parent);
        let changeset = tx.into_changeset();

        self.commit(&mut state, changeset).await?;
        metrics::record_enqueue(outcome);
        Ok(outcome)
    }

    /// Offer seed URLs at depth 0 in a single transaction
    pub async fn enqueue_seeds(&self, seeds: &[String]) -> Result<EnqueueCounts, FrontierError> {
        let mut state = self.state.lock().await;

        let mut tx = Transaction::new(&state);
        let mut counts = EnqueueCounts::default();
        let mut outcomes = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let outcome = self.plan_enqueue(&mut tx, seed, 0, None);
            counts.record(outcome);
            outcomes.push(outcome);
        }
        let changeset = tx.into_changeset();

        self.commit(&mut state, changeset).await?;
        outcomes.into_iter().for_each(metrics::record_enqueue);

        info!(
            job_id = %self.job_id,
            accepted = counts.accepted,
            rejected = counts.total() - counts.accepted,
            "Seeds enqueued"
        );
        Ok(counts)
    }

    fn plan_enqueue(
        &self,
        tx: &mut Transaction<'_>,
        url: &str,
        depth: u32,
        parent: Option<&str>,
    ) -> EnqueueOutcome {
        let Some(normalized) = normalize_url(url) else {
            debug!(url = %url, "Rejected unparseable URL");
            return EnqueueOutcome::RejectedOutOfScope;
        };

        let decision = self.scope.evaluate(&normalized);
        if !decision.in_scope {
            debug!(url = %normalized, reason = ?decision.reason, "Rejected out-of-scope URL");
            return EnqueueOutcome::RejectedOutOfScope;
        }

        if depth > self.max_depth {
            debug!(url = %normalized, depth, max_depth = self.max_depth, "Rejected URL beyond max depth");
            return EnqueueOutcome::RejectedDepthExceeded;
        }

        if tx.knows(&normalized) {
            debug!(url = %normalized, "Rejected duplicate URL");
            return EnqueueOutcome::RejectedDuplicate;
        }

        let sequence = tx.alloc_sequence();
        tx.put(FrontierEntry::new(
            normalized,
            depth,
            parent.map(str::to_string),
            sequence,
        ));
        EnqueueOutcome::Accepted
    }

    /// Lease up to `count` Pending entries to `worker`, in lease order
    pub async fn lease_batch(
        &self,
        worker: &WorkerId,
        count: usize,
        lease_duration: Duration,
    ) -> Result<Vec<FrontierEntry>, FrontierError> {
        let ttl = chrono::Duration::from_std(lease_duration)
            .map_err(|_| FrontierError::InvalidLeaseDuration(lease_duration))?;
        let count = count.min(self.config.max_batch_size);

        let mut state = self.state.lock().await;
        let expires_at = Utc::now() + ttl;

        let urls: Vec<String> = state.pending_urls().take(count).cloned().collect();
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = Transaction::new(&state);
        let mut leased = Vec::with_capacity(urls.len());
        for url in &urls {
            let Some(entry) = tx.get(url) else { continue };
            let mut entry = entry.clone();
            entry.lease_to(worker, expires_at);
            tx.visit(url);
            tx.put(entry.clone());
            leased.push(entry);
        }
        let changeset = tx.into_changeset();

        self.commit(&mut state, changeset).await?;

        metrics::record_leases(leased.len());
        debug!(worker = %worker, count = leased.len(), "Leased batch");
        Ok(leased)
    }

    /// Report the outcome for a leased URL.
    ///
    /// On success every discovered link is offered at `depth + 1` through the
    /// same checks as [`enqueue`](Self::enqueue), within the same transaction.
    pub async fn complete_lease(
        &self,
        worker: &WorkerId,
        url: &str,
        outcome: LeaseOutcome,
        discovered_links: &[String],
    ) -> Result<CompletionReport, FrontierError> {
        self.complete_lease_with(worker, url, outcome, discovered_links, BTreeMap::new())
            .await
    }

    /// [`complete_lease`](Self::complete_lease), also storing the page metadata
    /// the worker reported on a successful fetch
    pub async fn complete_lease_with(
        &self,
        worker: &WorkerId,
        url: &str,
        outcome: LeaseOutcome,
        discovered_links: &[String],
        metadata: BTreeMap<String, String>,
    ) -> Result<CompletionReport, FrontierError> {
        let key = normalize_url(url).unwrap_or_else(|| url.to_string());
        let not_held = || FrontierError::LeaseNotHeld {
            worker: worker.clone(),
            url: url.to_string(),
        };

        let mut state = self.state.lock().await;

        let mut tx = Transaction::new(&state);
        let mut entry = match tx.get(&key) {
            Some(entry) if entry.is_held_by(worker) => entry.clone(),
            _ => {
                warn!(worker = %worker, url = %url, "Rejected completion for a lease the worker does not hold");
                return Err(not_held());
            }
        };

        let mut links = EnqueueCounts::default();
        let mut outcomes = Vec::new();
        let success = matches!(outcome, LeaseOutcome::Success);

        match outcome {
            LeaseOutcome::Success => {
                entry.mark_done();
                entry.metadata = metadata;
                let depth = entry.depth + 1;
                let parent = entry.url.clone();
                tx.put(entry.clone());

                for link in discovered_links {
                    let result = self.plan_enqueue(&mut tx, link, depth, Some(&parent));
                    links.record(result);
                    outcomes.push(result);
                }
            }
            LeaseOutcome::Failure { error } => {
                if entry.record_failure(error, self.config.max_retries) == EntryState::Failed {
                    warn!(url = %entry.url, attempts = entry.attempts, "Retries exhausted, entry failed");
                }
                tx.put(entry.clone());
            }
        }
        let changeset = tx.into_changeset();

        self.commit(&mut state, changeset).await?;

        metrics::record_completion(success);
        outcomes.into_iter().for_each(metrics::record_enqueue);

        Ok(CompletionReport {
            state: entry.state,
            links,
        })
    }

    /// Return expired leases to Pending, counting each expiry as a failed attempt
    pub async fn release_expired_leases(&self) -> Result<ExpiryReport, FrontierError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let expired: Vec<FrontierEntry> = state
            .leased_entries()
            .filter(|e| e.is_lease_expired(now))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(ExpiryReport::default());
        }

        let mut tx = Transaction::new(&state);
        let mut report = ExpiryReport::default();
        for mut entry in expired {
            let owner = entry
                .lease_owner
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();

            match entry.record_failure("lease expired", self.config.max_retries) {
                EntryState::Failed => report.failed.push(entry.url.clone()),
                _ => report.requeued.push(entry.url.clone()),
            }
            info!(url = %entry.url, worker = %owner, attempts = entry.attempts, "Lease expired");
            tx.put(entry);
        }
        let changeset = tx.into_changeset();

        self.commit(&mut state, changeset).await?;

        metrics::record_lease_expirations(report.requeued.len() + report.failed.len());
        Ok(report)
    }

    /// Consistent copy of every entry and the visited set
    pub async fn snapshot(&self) -> FrontierSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn stats(&self) -> FrontierStats {
        let stats = self.state.lock().await.stats();
        metrics::set_frontier_stats(&stats);
        stats
    }

    pub async fn get(&self, url: &str) -> Option<FrontierEntry> {
        let key = normalize_url(url)?;
        self.state.lock().await.get(&key).cloned()
    }

    /// Number of leases each worker currently holds
    pub async fn leases_by_worker(&self) -> HashMap<WorkerId, usize> {
        self.state.lock().await.leases_by_worker()
    }

    pub async fn leases_held_by(&self, worker: &WorkerId) -> usize {
        self.state
            .lock()
            .await
            .leased_entries()
            .filter(|e| e.is_held_by(worker))
            .count()
    }

    async fn commit(
        &self,
        state: &mut FrontierState,
        changeset: Changeset,
    ) -> Result<(), FrontierError> {
        if changeset.is_empty() {
            return Ok(());
        }

        let result = with_retry(&self.commit_retry, || {
            self.backend.commit(&self.job_id, &changeset)
        })
        .await;

        if let Err(e) = result {
            error!(
                job_id = %self.job_id,
                backend = self.backend.name(),
                error = %e,
                "Frontier commit failed, state unchanged"
            );
            metrics::record_persistence_failure();
            return Err(FrontierError::Storage(e));
        }

        state.apply(changeset);
        Ok(())
    }
}
