//! Checkpoint/resume across process boundaries, using files on disk

use std::sync::Arc;
use std::time::Duration;

use fleetscope::coordinator::{CompleteRequest, Coordinator, CoordinatorConfig, LeaseRequest, RegisterRequest};
use fleetscope::frontier::{EntryState, FrontierConfig, LeaseOutcome};
use fleetscope::models::JobStatus;
use fleetscope::scope::ScopeConfig;
use fleetscope::storage::{
    checkpoint_name, CheckpointError, CheckpointManager, FileCheckpointStore, MemoryBackend,
    RestoreOptions, SqliteBackend,
};
use fleetscope::utils::retry::RetryConfig;

use super::fixtures::*;

fn file_manager(dir: &std::path::Path, keep_last: usize) -> Arc<CheckpointManager> {
    let store = FileCheckpointStore::new(dir).unwrap();
    Arc::new(CheckpointManager::new(Arc::new(store), keep_last))
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig::builder()
        .completion_grace_secs(0)
        .sweep_interval_ms(20)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_pause_then_resume_in_new_process() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let w = worker("w1");

    // First run: crawl the seed, hold a lease on a child, then pause
    {
        let manager = file_manager(dir.path(), 5);
        let coordinator = Coordinator::new(config(), job.clone(), memory_frontier(&job))
            .with_checkpoints(manager, None);
        coordinator.seed().await.unwrap();
        coordinator.register(RegisterRequest::new(w.clone())).await.unwrap();

        let seed = coordinator
            .lease(LeaseRequest { worker_id: w.clone(), count: 1 })
            .await
            .unwrap();
        coordinator
            .complete(CompleteRequest {
                worker_id: w.clone(),
                url: seed.leases[0].url.clone(),
                outcome: LeaseOutcome::Success,
                links: strings(&["https://example.com/a", "https://api.example.com/b"]),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        let held = coordinator
            .lease(LeaseRequest { worker_id: w.clone(), count: 1 })
            .await
            .unwrap();
        assert_eq!(held.leases.len(), 1);

        coordinator.pause().await.unwrap();
    }

    // Second run: resume from whatever is on disk
    let manager = file_manager(dir.path(), 5);
    let checkpoint = manager.latest_valid(&job.id).await.unwrap().unwrap();
    assert_eq!(checkpoint.sequence, 1);
    assert_eq!(checkpoint.frontier.count(EntryState::Leased), 1);

    let db = dir.path().join("frontier.db");
    let backend = Arc::new(SqliteBackend::open(&db).await.unwrap());
    let restored = manager
        .restore(
            &checkpoint,
            &RestoreOptions::default(),
            &FrontierConfig::default(),
            backend,
            RetryConfig::none(),
        )
        .await
        .unwrap();

    assert_eq!(restored.job.status, JobStatus::Running);
    let stats = restored.store.stats().await;
    assert_eq!(stats.done, 1);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.leased, 0);

    // The seed is never handed out again
    let leased = restored
        .store
        .lease_batch(&w, 10, Duration::from_secs(60))
        .await
        .unwrap();
    let mut urls: Vec<_> = leased.into_iter().map(|e| e.url).collect();
    urls.sort();
    assert_eq!(urls, ["https://api.example.com/b", "https://example.com/a"]);
}

#[tokio::test]
async fn test_truncated_newest_checkpoint_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let frontier = memory_frontier(&job);
    frontier.enqueue_seeds(&job.seeds).await.unwrap();

    let manager = file_manager(dir.path(), 5);
    manager.snapshot(&job, &frontier).await.unwrap();
    let newest = manager.snapshot(&job, &frontier).await.unwrap();

    // Simulate a crash mid-write of the newest file
    let path = dir
        .path()
        .join(format!("{}.checkpoint.json", newest.name()));
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, &content[..content.len() / 2]).unwrap();

    assert!(manager.load(&newest.name()).await.is_err());
    let latest = manager.latest_valid(&job.id).await.unwrap().unwrap();
    assert_eq!(latest.sequence, 1);

    let infos = manager.list(&job.id).await.unwrap();
    assert_eq!(infos.len(), 2);
    assert!(infos[0].valid);
    assert!(!infos[1].valid);
}

#[tokio::test]
async fn test_file_gc_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let frontier = memory_frontier(&job);

    let manager = file_manager(dir.path(), 2);
    for _ in 0..4 {
        manager.snapshot(&job, &frontier).await.unwrap();
    }

    let sequences: Vec<u64> = manager
        .list(&job.id)
        .await
        .unwrap()
        .into_iter()
        .map(|info| info.sequence)
        .collect();
    assert_eq!(sequences, vec![3, 4]);
    assert!(!dir
        .path()
        .join(format!("{}.checkpoint.json", checkpoint_name(&job.id, 1)))
        .exists());
}

#[tokio::test]
async fn test_changed_scope_refused_without_override() {
    let dir = tempfile::tempdir().unwrap();
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let frontier = memory_frontier(&job);
    frontier.enqueue_seeds(&job.seeds).await.unwrap();

    let manager = file_manager(dir.path(), 5);
    let checkpoint = manager.snapshot(&job, &frontier).await.unwrap();

    // Same patterns in another order are the same scope
    let reordered = ScopeConfig::new(
        strings(&["*.example.com", "example.com"]),
        strings(&["admin.example.com"]),
    );
    let same = manager
        .restore(
            &checkpoint,
            &RestoreOptions {
                scope: Some(reordered),
                allow_scope_change: false,
            },
            &FrontierConfig::default(),
            Arc::new(MemoryBackend::new()),
            RetryConfig::none(),
        )
        .await;
    assert!(same.is_ok());

    let widened = ScopeConfig::new(strings(&["**.example.com", "example.com"]), Vec::new());
    let refused = manager
        .restore(
            &checkpoint,
            &RestoreOptions {
                scope: Some(widened),
                allow_scope_change: false,
            },
            &FrontierConfig::default(),
            Arc::new(MemoryBackend::new()),
            RetryConfig::none(),
        )
        .await;
    assert!(matches!(refused, Err(CheckpointError::ScopeMismatch { .. })));
}
