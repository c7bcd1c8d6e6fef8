//! fleetscope - scope-enforcing distributed crawl frontier
//!
//! Coordinates a fleet of crawl workers over a shared, de-duplicated frontier.
//! Every URL passes the scope engine before it is queued, work is handed out as
//! time-limited leases, and checkpoints let a paused or crashed job continue
//! without losing or duplicating work.
//!
//! # Architecture
//!
//! - [`scope`] - include/exclude domain patterns and per-URL decisions
//! - [`frontier`] - leased work queue, visited set and depth tracking
//! - [`storage`] - persistence backends (memory, SQLite, Redis) and checkpoints
//! - [`coordinator`] - worker registry, lease protocol, HTTP server and client
//! - [`crawler`] - fetch collaborator and the crawl worker loop
//! - [`notifications`] - job lifecycle events (log, webhook)
//! - [`metrics`] - Prometheus metrics
//! - [`config`] - TOML configuration with environment overrides
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetscope::coordinator::{Coordinator, CoordinatorConfig};
//! use fleetscope::frontier::{FrontierConfig, FrontierStore};
//! use fleetscope::models::{CrawlJob, JobId};
//! use fleetscope::scope::{ScopeConfig, ScopeEngine};
//! use fleetscope::storage::MemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let seeds = vec!["https://example.com/".to_string()];
//!     let scope = ScopeConfig::new(vec!["example.com".into(), "*.example.com".into()], vec![]);
//!     let job = CrawlJob::new(JobId::generate(), scope, 2, seeds);
//!
//!     let engine = Arc::new(ScopeEngine::new(&job.scope, &job.seeds)?);
//!     let frontier = FrontierStore::new(
//!         job.id.clone(),
//!         engine,
//!         job.max_depth,
//!         FrontierConfig::default(),
//!         Arc::new(MemoryBackend::new()),
//!     );
//!     let coordinator = Coordinator::new(CoordinatorConfig::default(), job, frontier);
//!     coordinator.seed().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod frontier;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod scope;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{Coordinator, CoordinatorClient, CoordinatorServer};
    pub use crate::crawler::{CrawlWorker, Fetcher, HttpFetcher, WorkSource};
    pub use crate::error::{Error, ErrorCategory, FleetscopeErrorTrait, Result};
    pub use crate::frontier::{FrontierStore, LeaseOutcome};
    pub use crate::models::{CrawlJob, JobId, JobStatus, WorkerId};
    pub use crate::scope::{ScopeConfig, ScopeEngine};
    pub use crate::storage::CheckpointManager;
}

pub use error::{Error, Result};
