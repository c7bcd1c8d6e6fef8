//! Shared builders and fakes for the integration tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use fleetscope::coordinator::{Coordinator, CoordinatorConfig};
use fleetscope::crawler::{FetchError, FetchResponse, Fetcher};
use fleetscope::frontier::{Changeset, FrontierConfig, FrontierSnapshot, FrontierStore};
use fleetscope::models::{CrawlJob, JobId, WorkerId};
use fleetscope::scope::{ScopeConfig, ScopeEngine};
use fleetscope::storage::{
    CheckpointManager, FrontierBackend, MemoryBackend, MemoryCheckpointStore, StorageError,
};

pub fn worker(id: &str) -> WorkerId {
    WorkerId::new(id).unwrap()
}

pub fn job_id(id: &str) -> JobId {
    JobId::new(id).unwrap()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `example.com` and its direct subdomains, `admin.example.com` excluded
pub fn example_scope() -> ScopeConfig {
    ScopeConfig::new(
        strings(&["example.com", "*.example.com"]),
        strings(&["admin.example.com"]),
    )
}

pub fn job(scope: ScopeConfig, max_depth: u32, seeds: &[&str]) -> CrawlJob {
    CrawlJob::new(job_id("job-it"), scope, max_depth, strings(seeds))
}

pub fn frontier_for(job: &CrawlJob, backend: Arc<dyn FrontierBackend>) -> FrontierStore {
    let engine = ScopeEngine::new(&job.scope, &job.seeds).unwrap();
    FrontierStore::new(
        job.id.clone(),
        Arc::new(engine),
        job.max_depth,
        FrontierConfig::default(),
        backend,
    )
}

pub fn memory_frontier(job: &CrawlJob) -> FrontierStore {
    frontier_for(job, Arc::new(MemoryBackend::new()))
}

/// Coordinator with an in-memory checkpoint store and no completion grace
pub fn coordinator(job: CrawlJob) -> (Arc<Coordinator>, Arc<CheckpointManager>) {
    let frontier = memory_frontier(&job);
    let manager = Arc::new(CheckpointManager::new(
        Arc::new(MemoryCheckpointStore::new()),
        5,
    ));
    let config = CoordinatorConfig::builder()
        .completion_grace_secs(0)
        .sweep_interval_ms(20)
        .build()
        .unwrap();

    let coordinator = Coordinator::new(config, job, frontier).with_checkpoints(manager.clone(), None);
    (Arc::new(coordinator), manager)
}

// ============================================================================
// Backends
// ============================================================================

/// Memory backend whose commits can be switched to fail
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    failing: AtomicBool,
    pub commits: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrontierBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<FrontierSnapshot>, StorageError> {
        self.inner.load(job_id).await
    }

    async fn commit(&self, job_id: &JobId, changeset: &Changeset) -> Result<(), StorageError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("backend offline".into()));
        }
        self.inner.commit(job_id, changeset).await
    }

    async fn replace(&self, job_id: &JobId, snapshot: &FrontierSnapshot) -> Result<(), StorageError> {
        self.inner.replace(job_id, snapshot).await
    }

    async fn clear(&self, job_id: &JobId) -> Result<(), StorageError> {
        self.inner.clear(job_id).await
    }
}

// ============================================================================
// Fetchers
// ============================================================================

/// A fixed link graph: URL → outgoing links. Unknown URLs answer 404.
#[derive(Default)]
pub struct StaticWeb {
    pages: HashMap<String, Vec<String>>,
    failing: HashMap<String, u16>,
    pub fetches: AtomicUsize,
}

impl StaticWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, links: &[&str]) -> Self {
        self.pages.insert(url.to_string(), strings(links));
        self
    }

    /// Always answer `status` for `url`
    pub fn broken(mut self, url: &str, status: u16) -> Self {
        self.failing.insert(url.to_string(), status);
        self
    }
}

#[async_trait]
impl Fetcher for StaticWeb {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.failing.get(url) {
            return Ok(FetchResponse::new(url, *status));
        }
        match self.pages.get(url) {
            Some(links) => Ok(FetchResponse::new(url, 200).with_links(links.clone())),
            None => Ok(FetchResponse::new(url, 404)),
        }
    }
}

/// Sample page served by wiremock in the HTTP tests
pub const SAMPLE_PAGE_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head><title>Example home</title></head>
<body>
  <a href="/about">About</a>
  <a href="https://api.example.com/x">API</a>
  <a href="https://admin.example.com/y">Admin</a>
  <a href="mailto:hello@example.com">Mail</a>
</body>
</html>
"#;
