//! Coordinator lifecycle: leasing, liveness, persistence failures

use std::sync::Arc;
use std::time::Duration;

use fleetscope::coordinator::{
    CompleteRequest, Coordinator, CoordinatorConfig, CoordinatorError, HeartbeatRequest,
    LeaseRequest, RegisterRequest, RegistryError, WorkerStatus,
};
use fleetscope::frontier::{EntryState, FrontierError, LeaseOutcome};
use fleetscope::models::{JobStatus, WorkerId};
use fleetscope::utils::retry::RetryConfig;

use super::fixtures::*;

async fn register(coordinator: &Coordinator, id: &str) -> WorkerId {
    let id = worker(id);
    coordinator
        .register(RegisterRequest::new(id.clone()))
        .await
        .unwrap();
    id
}

fn lease_request(worker: &WorkerId, count: usize) -> LeaseRequest {
    LeaseRequest {
        worker_id: worker.clone(),
        count,
    }
}

fn success(worker: &WorkerId, url: &str, links: &[&str]) -> CompleteRequest {
    CompleteRequest {
        worker_id: worker.clone(),
        url: url.to_string(),
        outcome: LeaseOutcome::Success,
        links: strings(links),
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn test_persistence_failure_fails_job() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let backend = Arc::new(FlakyBackend::new());
    let frontier = frontier_for(&job, backend.clone()).with_commit_retry(RetryConfig::none());
    let config = CoordinatorConfig::builder()
        .completion_grace_secs(0)
        .build()
        .unwrap();
    let coordinator = Coordinator::new(config, job, frontier);
    coordinator.seed().await.unwrap();

    let w = register(&coordinator, "w1").await;
    backend.set_failing(true);

    let err = coordinator.lease(lease_request(&w, 4)).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Frontier(FrontierError::Storage(_))
    ));

    let report = coordinator.status().await;
    assert_eq!(report.status, JobStatus::Failed);
    assert!(report
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("persistence"));

    // The frontier kept its last committed state
    assert_eq!(report.frontier.pending, 1);
    assert_eq!(report.frontier.leased, 0);

    backend.set_failing(false);
    let response = coordinator.lease(lease_request(&w, 4)).await.unwrap();
    assert_eq!(response.job_status, JobStatus::Failed);
    assert!(response.leases.is_empty());
}

#[tokio::test]
async fn test_stale_completion_after_expiry() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let (coordinator, _) = coordinator(job);
    coordinator.seed().await.unwrap();

    let slow = register(&coordinator, "slow").await;
    let fast = register(&coordinator, "fast").await;

    // Lease with zero duration so the next sweep expires it
    let leased = coordinator
        .frontier()
        .lease_batch(&slow, 1, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let sweep = coordinator.sweep().await.unwrap();
    assert_eq!(sweep.requeued, 1);

    let again = coordinator.lease(lease_request(&fast, 1)).await.unwrap();
    assert_eq!(again.leases.len(), 1);
    assert_eq!(again.leases[0].url, "https://example.com/");

    let stale = coordinator
        .complete(success(&slow, "https://example.com/", &[]))
        .await
        .unwrap_err();
    assert!(matches!(
        stale,
        CoordinatorError::Frontier(FrontierError::LeaseNotHeld { .. })
    ));

    let report = coordinator
        .complete(success(&fast, "https://example.com/", &[]))
        .await
        .unwrap();
    assert_eq!(report.state, EntryState::Done);
}

#[tokio::test]
async fn test_completion_keeps_page_metadata() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let (coordinator, _) = coordinator(job);
    coordinator.seed().await.unwrap();

    let w = register(&coordinator, "w1").await;
    coordinator.lease(lease_request(&w, 1)).await.unwrap();

    let mut request = success(&w, "https://example.com/", &[]);
    request.metadata.insert("title".into(), "Example".into());
    request.metadata.insert("content_type".into(), "text/html".into());
    coordinator.complete(request).await.unwrap();

    let entry = coordinator
        .frontier()
        .get("https://example.com/")
        .await
        .unwrap();
    assert_eq!(entry.state, EntryState::Done);
    assert_eq!(entry.metadata.get("title").map(String::as_str), Some("Example"));
    assert_eq!(entry.metadata.len(), 2);
}

#[tokio::test]
async fn test_heartbeat_reports_lapsed_leases() {
    let job = job(
        example_scope(),
        2,
        &["https://example.com/", "https://example.com/b"],
    );
    let (coordinator, _) = coordinator(job);
    coordinator.seed().await.unwrap();

    let w = register(&coordinator, "w1").await;
    let held = coordinator.lease(lease_request(&w, 1)).await.unwrap();
    assert_eq!(held.leases.len(), 1);

    let response = coordinator
        .heartbeat(HeartbeatRequest {
            worker_id: w.clone(),
            in_flight: 1,
        })
        .await
        .unwrap();
    assert_eq!(response.leases_held, 1);

    // A second lease that lapses while the worker still thinks it is fetching
    coordinator
        .frontier()
        .lease_batch(&w, 1, Duration::ZERO)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let sweep = coordinator.sweep().await.unwrap();
    assert_eq!(sweep.requeued, 1);

    let response = coordinator
        .heartbeat(HeartbeatRequest {
            worker_id: w.clone(),
            in_flight: 2,
        })
        .await
        .unwrap();
    assert_eq!(response.leases_held, 1);
    assert!(response.leases_held < 2);
}

#[tokio::test]
async fn test_silent_worker_disconnects_then_evicts() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let config = CoordinatorConfig::builder()
        .heartbeat_timeout_secs(2)
        .eviction_timeout_secs(4)
        .heartbeat_interval_secs(1)
        .completion_grace_secs(60)
        .build()
        .unwrap();
    let coordinator = Coordinator::new(config, job.clone(), memory_frontier(&job));
    coordinator.seed().await.unwrap();

    let w = register(&coordinator, "w1").await;
    let registry = coordinator.registry();
    let now = chrono::Utc::now();

    let changes = registry
        .update_statuses_at(
            now + chrono::Duration::seconds(3),
            Duration::from_secs(2),
            Duration::from_secs(4),
        )
        .await;
    assert_eq!(changes.disconnected, vec![w.clone()]);

    // Any request from a disconnected worker rejoins it
    let heartbeat = coordinator
        .heartbeat(HeartbeatRequest {
            worker_id: w.clone(),
            in_flight: 0,
        })
        .await
        .unwrap();
    assert_eq!(heartbeat.worker_status, WorkerStatus::Active);

    let changes = registry
        .update_statuses_at(
            chrono::Utc::now() + chrono::Duration::seconds(10),
            Duration::from_secs(2),
            Duration::from_secs(4),
        )
        .await;
    assert_eq!(changes.evicted, vec![w.clone()]);

    let err = coordinator.lease(lease_request(&w, 1)).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Registry(RegistryError::Evicted(_))
    ));

    register(&coordinator, "w1").await;
    let response = coordinator.lease(lease_request(&w, 1)).await.unwrap();
    assert_eq!(response.leases.len(), 1);
}

#[tokio::test]
async fn test_pause_checkpoints_and_resume_leases_again() {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let (coordinator, manager) = coordinator(job.clone());
    coordinator.seed().await.unwrap();
    let w = register(&coordinator, "w1").await;

    coordinator.pause().await.unwrap();
    assert_eq!(coordinator.job_status().await, JobStatus::Paused);
    assert!(coordinator.lease(lease_request(&w, 1)).await.unwrap().leases.is_empty());

    let checkpoints = manager.list(&job.id).await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(coordinator.status().await.last_checkpoint, Some(1));

    // Pausing twice is an invalid transition
    assert!(matches!(
        coordinator.pause().await,
        Err(CoordinatorError::InvalidTransition { .. })
    ));

    coordinator.resume().await.unwrap();
    assert_eq!(coordinator.lease(lease_request(&w, 1)).await.unwrap().leases.len(), 1);
}

#[tokio::test]
async fn test_sweeper_completes_drained_job() {
    let job = job(example_scope(), 1, &["https://example.com/"]);
    let (coordinator, manager) = coordinator(job.clone());
    coordinator.seed().await.unwrap();
    let w = register(&coordinator, "w1").await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = coordinator.clone().spawn_sweeper(shutdown_rx);
    let mut status = coordinator.watch_status();

    let lease = coordinator.lease(lease_request(&w, 1)).await.unwrap();
    coordinator
        .complete(success(
            &w,
            &lease.leases[0].url,
            &["https://example.com/about", "https://admin.example.com/"],
        ))
        .await
        .unwrap();

    let child = coordinator.lease(lease_request(&w, 1)).await.unwrap();
    assert_eq!(child.leases[0].depth, 1);
    coordinator
        .complete(success(&w, &child.leases[0].url, &["https://example.com/too-deep"]))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !status.borrow_and_update().is_terminal() {
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("job should complete");

    let report = coordinator.status().await;
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.frontier.done, 2);
    assert!(report.last_checkpoint.is_some());
    assert!(manager.latest_valid(&job.id).await.unwrap().is_some());

    let late = coordinator
        .complete(success(&w, "https://example.com/", &[]))
        .await
        .unwrap_err();
    assert!(matches!(late, CoordinatorError::JobFinished(JobStatus::Completed)));

    shutdown_tx.send_replace(true);
    sweeper.await.unwrap();
}
