//! Frontier store behaviour across its public API
//!
//! 1. Enqueue checks (scope, depth, dedup)
//! 2. Lease exclusivity under concurrency
//! 3. Persistence failures leave memory untouched
//! 4. SQLite-backed reopen and fresh starts
//! 5. Snapshot/restore fidelity

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use fleetscope::frontier::{EnqueueOutcome, EntryState, FrontierConfig, FrontierError, FrontierStore, LeaseOutcome};
use fleetscope::scope::{ScopeConfig, ScopeEngine};
use fleetscope::storage::{FrontierBackend, MemoryBackend, SqliteBackend};
use fleetscope::utils::retry::RetryConfig;

use super::fixtures::*;

const LEASE: Duration = Duration::from_secs(60);

// ============================================================================
// Enqueue
// ============================================================================

#[tokio::test]
async fn test_same_url_twice_keeps_first_depth() {
    let job = job(example_scope(), 5, &["https://example.com/"]);
    let store = memory_frontier(&job);

    assert_eq!(
        store.enqueue("https://example.com/a", 1, None).await.unwrap(),
        EnqueueOutcome::Accepted
    );
    assert_eq!(
        store.enqueue("https://EXAMPLE.com/a#frag", 3, None).await.unwrap(),
        EnqueueOutcome::RejectedDuplicate
    );

    let entry = store.get("https://example.com/a").await.unwrap();
    assert_eq!(entry.depth, 1);
    assert_eq!(store.stats().await.total, 1);
}

#[tokio::test]
async fn test_rejections_never_enter_store() {
    let job = job(example_scope(), 1, &["https://example.com/"]);
    let store = memory_frontier(&job);

    let outcomes = [
        store.enqueue("https://admin.example.com/", 0, None).await.unwrap(),
        store.enqueue("https://other.org/", 0, None).await.unwrap(),
        store.enqueue("ftp://example.com/file", 0, None).await.unwrap(),
        store.enqueue("https://example.com/deep", 2, None).await.unwrap(),
    ];
    assert_eq!(
        outcomes,
        [
            EnqueueOutcome::RejectedOutOfScope,
            EnqueueOutcome::RejectedOutOfScope,
            EnqueueOutcome::RejectedOutOfScope,
            EnqueueOutcome::RejectedDepthExceeded,
        ]
    );

    let stats = store.stats().await;
    assert_eq!(stats.total, 0);
    assert_eq!(stats.visited, 0);
}

#[tokio::test]
async fn test_discovered_links_deduplicated_within_batch() {
    let job = job(example_scope(), 3, &["https://example.com/"]);
    let store = memory_frontier(&job);
    store.enqueue_seeds(&job.seeds).await.unwrap();

    let w = worker("w1");
    let leased = store.lease_batch(&w, 1, LEASE).await.unwrap();
    let report = store
        .complete_lease(
            &w,
            &leased[0].url,
            LeaseOutcome::Success,
            &strings(&[
                "https://example.com/a",
                "https://example.com/a/",
                "https://example.com/a",
                "https://example.com/",
            ]),
        )
        .await
        .unwrap();

    assert_eq!(report.state, EntryState::Done);
    assert_eq!(report.links.accepted, 2);
    assert_eq!(report.links.duplicate, 2);
}

// ============================================================================
// Leasing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lease_single_entry() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let store = Arc::new(memory_frontier(&job));
    store.enqueue_seeds(&job.seeds).await.unwrap();

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.lease_batch(&worker("a"), 1, LEASE).await.unwrap() })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.lease_batch(&worker("b"), 1, LEASE).await.unwrap() })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a.len() + b.len(), 1, "exactly one worker receives the entry");

    let stats = store.stats().await;
    assert_eq!(stats.leased, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_shallowest_first_priority() {
    let job = job(example_scope(), 5, &["https://example.com/"]);
    let engine = ScopeEngine::new(&job.scope, &job.seeds).unwrap();
    let config = FrontierConfig {
        priority: fleetscope::frontier::LeasePriority::ShallowestFirst,
        ..FrontierConfig::default()
    };
    let store = FrontierStore::new(
        job.id.clone(),
        Arc::new(engine),
        job.max_depth,
        config,
        Arc::new(fleetscope::storage::MemoryBackend::new()),
    );

    store.enqueue("https://example.com/deep", 3, None).await.unwrap();
    store.enqueue("https://example.com/shallow", 1, None).await.unwrap();

    let leased = store.lease_batch(&worker("w1"), 2, LEASE).await.unwrap();
    let urls: Vec<_> = leased.iter().map(|e| e.url.as_str()).collect();
    assert_eq!(urls, ["https://example.com/shallow", "https://example.com/deep"]);
}

#[tokio::test]
async fn test_zero_duration_lease_expires_once() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let store = memory_frontier(&job);
    store.enqueue_seeds(&job.seeds).await.unwrap();

    store.lease_batch(&worker("w1"), 1, Duration::ZERO).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let first = store.release_expired_leases().await.unwrap();
    let second = store.release_expired_leases().await.unwrap();
    assert_eq!(first.requeued, vec!["https://example.com/".to_string()]);
    assert!(second.is_empty());

    let entry = store.get("https://example.com/").await.unwrap();
    assert_eq!(entry.state, EntryState::Pending);
    assert_eq!(entry.attempts, 1);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_failed_commit_leaves_memory_unchanged() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let backend = Arc::new(FlakyBackend::new());
    let store = frontier_for(&job, backend.clone()).with_commit_retry(RetryConfig::none());
    store.enqueue_seeds(&job.seeds).await.unwrap();

    backend.set_failing(true);
    let err = store.lease_batch(&worker("w1"), 1, LEASE).await.unwrap_err();
    assert!(matches!(err, FrontierError::Storage(_)));

    let stats = store.stats().await;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.visited, 0);

    backend.set_failing(false);
    assert_eq!(store.lease_batch(&worker("w1"), 1, LEASE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_commit_retries_before_failing() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let backend = Arc::new(FlakyBackend::new());
    let store = frontier_for(&job, backend.clone())
        .with_commit_retry(RetryConfig::with_delays(2, 1, 2));

    backend.set_failing(true);
    assert!(store.enqueue_seeds(&job.seeds).await.is_err());
    // First attempt plus two retries
    assert_eq!(backend.commits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sqlite_backend_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frontier.db");
    let job = job(ScopeConfig::default(), 2, &["https://example.com/"]);

    {
        let backend: Arc<dyn FrontierBackend> = Arc::new(SqliteBackend::open(&path).await.unwrap());
        let store = frontier_for(&job, backend);
        store.enqueue_seeds(&job.seeds).await.unwrap();
        let leased = store.lease_batch(&worker("w1"), 1, LEASE).await.unwrap();
        store
            .complete_lease(
                &worker("w1"),
                &leased[0].url,
                LeaseOutcome::Success,
                &strings(&["https://example.com/next"]),
            )
            .await
            .unwrap();
    }

    let backend: Arc<dyn FrontierBackend> = Arc::new(SqliteBackend::open(&path).await.unwrap());
    let engine = ScopeEngine::new(&job.scope, &job.seeds).unwrap();
    let reopened = FrontierStore::open(
        job.id.clone(),
        Arc::new(engine),
        job.max_depth,
        FrontierConfig::default(),
        backend,
    )
    .await
    .unwrap();

    let stats = reopened.stats().await;
    assert_eq!(stats.done, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.visited, 1);
    assert_eq!(
        reopened.get("https://example.com/next").await.unwrap().depth,
        1
    );
}

#[tokio::test]
async fn test_new_job_discards_stored_frontier() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frontier.db");

    let earlier = job(
        ScopeConfig::new(strings(&["example.com"]), Vec::new()),
        2,
        &["https://example.com/old"],
    );
    {
        let backend: Arc<dyn FrontierBackend> = Arc::new(SqliteBackend::open(&path).await.unwrap());
        let store = frontier_for(&earlier, backend);
        store.enqueue_seeds(&earlier.seeds).await.unwrap();
    }

    // Same job ID, different scope
    let later = job(
        ScopeConfig::new(strings(&["other.org"]), Vec::new()),
        2,
        &["https://other.org/"],
    );
    let backend: Arc<dyn FrontierBackend> = Arc::new(SqliteBackend::open(&path).await.unwrap());
    let engine = ScopeEngine::new(&later.scope, &later.seeds).unwrap();
    let store = FrontierStore::start_fresh(
        later.id.clone(),
        Arc::new(engine),
        later.max_depth,
        FrontierConfig::default(),
        backend.clone(),
    )
    .await
    .unwrap();

    assert_eq!(store.stats().await.total, 0);
    store.enqueue_seeds(&later.seeds).await.unwrap();

    let leased = store.lease_batch(&worker("w1"), 10, LEASE).await.unwrap();
    let urls: Vec<_> = leased.iter().map(|e| e.url.as_str()).collect();
    assert_eq!(urls, ["https://other.org/"]);
    assert!(store.get("https://example.com/old").await.is_none());

    let persisted = backend.load(&later.id).await.unwrap().unwrap();
    assert!(persisted
        .entries
        .iter()
        .all(|e| e.url.starts_with("https://other.org/")));
}

#[tokio::test]
async fn test_snapshot_restore_idle_store_is_identical() {
    let job = job(example_scope(), 3, &["https://example.com/"]);
    let store = memory_frontier(&job);
    store.enqueue_seeds(&job.seeds).await.unwrap();

    let w = worker("w1");
    let seed = store.lease_batch(&w, 1, LEASE).await.unwrap();
    store
        .complete_lease(
            &w,
            &seed[0].url,
            LeaseOutcome::Success,
            &strings(&[
                "https://example.com/c",
                "https://api.example.com/a",
                "https://example.com/b",
            ]),
        )
        .await
        .unwrap();

    let before = store.snapshot().await;
    assert_eq!(before.count(EntryState::Leased), 0);

    let engine = ScopeEngine::new(&job.scope, &job.seeds).unwrap();
    let restored = FrontierStore::restore(
        job.id.clone(),
        Arc::new(engine),
        job.max_depth,
        FrontierConfig::default(),
        Arc::new(MemoryBackend::new()),
        before.clone(),
    )
    .await
    .unwrap();

    assert_eq!(restored.snapshot().await, before);

    let lease_order = |leased: Vec<fleetscope::frontier::FrontierEntry>| {
        leased.into_iter().map(|e| e.url).collect::<Vec<_>>()
    };
    let original = lease_order(store.lease_batch(&w, 10, LEASE).await.unwrap());
    let rehydrated = lease_order(restored.lease_batch(&w, 10, LEASE).await.unwrap());
    assert_eq!(original.len(), 3);
    assert_eq!(original, rehydrated);
}
