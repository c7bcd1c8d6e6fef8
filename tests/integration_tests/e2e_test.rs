//! Whole crawls: workers, fetchers and the coordinator together

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetscope::coordinator::{ClientConfig, CoordinatorClient, CoordinatorServer};
use fleetscope::crawler::{CrawlWorker, FetcherConfig, HttpFetcher, WorkSource, WorkerConfig};
use fleetscope::frontier::{
    EntryState, FrontierConfig, FrontierEntry, FrontierSnapshot, FrontierStore, LeaseOutcome,
};
use fleetscope::models::JobStatus;
use fleetscope::scope::{ScopeConfig, ScopeEngine};
use fleetscope::storage::MemoryBackend;

use super::fixtures::*;

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        batch_size: 2,
        idle_backoff_ms: 10,
        fetcher: FetcherConfig {
            requests_per_second: 100,
            timeout_secs: 5,
            ..FetcherConfig::default()
        },
        ..WorkerConfig::default()
    }
}

// ============================================================================
// Scope at depth one
// ============================================================================

#[tokio::test]
async fn test_subdomain_only_scope_filters_seed_links() {
    let scope = ScopeConfig::new(strings(&["*.example.com"]), strings(&["admin.example.com"]));
    let seeds = strings(&["https://example.com"]);
    let engine = Arc::new(ScopeEngine::new(&scope, &seeds).unwrap());

    // The bare domain is outside `*.example.com`, so enqueue_seeds would drop it.
    // Restoring a snapshot places it at depth 0 to test that its links are scope-filtered.
    let snapshot = FrontierSnapshot {
        entries: vec![FrontierEntry::new("https://example.com/".into(), 0, None, 0)],
        visited: Vec::new(),
        next_sequence: 1,
    };
    let store = FrontierStore::restore(
        job_id("job-scope"),
        engine,
        2,
        FrontierConfig::default(),
        Arc::new(MemoryBackend::new()),
        snapshot,
    )
    .await
    .unwrap();

    let w = worker("w1");
    let leased = store.lease_batch(&w, 1, Duration::from_secs(30)).await.unwrap();
    assert_eq!(leased[0].url, "https://example.com/");

    let report = store
        .complete_lease(
            &w,
            "https://example.com/",
            LeaseOutcome::Success,
            &strings(&[
                "https://api.example.com/x",
                "https://admin.example.com/y",
                "https://example.com/z",
            ]),
        )
        .await
        .unwrap();

    assert_eq!(report.links.accepted, 1);
    assert_eq!(report.links.out_of_scope, 2);

    let api = store.get("https://api.example.com/x").await.unwrap();
    assert_eq!(api.depth, 1);
    assert_eq!(api.state, EntryState::Pending);
    assert_eq!(api.parent_url.as_deref(), Some("https://example.com/"));
    assert!(store.get("https://admin.example.com/y").await.is_none());
    assert!(store.get("https://example.com/z").await.is_none());
}

// ============================================================================
// In-process workers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_workers_crawl_to_completion() {
    let web = Arc::new(
        StaticWeb::new()
            .page(
                "https://example.com/",
                &[
                    "https://example.com/a",
                    "https://api.example.com/b",
                    "https://admin.example.com/secret",
                    "https://example.com/broken",
                ],
            )
            .page(
                "https://example.com/a",
                &["https://example.com/", "https://example.com/a/deeper"],
            )
            .page("https://api.example.com/b", &["https://example.com/a"])
            .page("https://example.com/a/deeper", &["https://example.com/too-deep"])
            .broken("https://example.com/broken", 503),
    );

    let job = job(example_scope(), 2, &["https://example.com/"]);
    let (coordinator, _) = coordinator(job);
    coordinator.seed().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = coordinator.clone().spawn_sweeper(shutdown_rx.clone());

    let mut handles = Vec::new();
    for id in ["w1", "w2"] {
        let source: Arc<dyn WorkSource> = coordinator.clone();
        let worker = CrawlWorker::new(worker(id), source, web.clone(), worker_config());
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    let summaries = tokio::time::timeout(Duration::from_secs(20), async {
        let mut summaries = Vec::new();
        for handle in handles {
            summaries.push(handle.await.unwrap().unwrap());
        }
        summaries
    })
    .await
    .expect("crawl should finish");

    shutdown_tx.send_replace(true);
    sweeper.await.unwrap();

    let report = coordinator.status().await;
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.frontier.done, 4);
    assert_eq!(report.frontier.failed, 1);
    assert_eq!(report.frontier.visited, 5);

    // Four pages once each, the broken page once per attempt
    assert_eq!(web.fetches.load(Ordering::SeqCst), 4 + 4);

    let broken = coordinator
        .frontier()
        .get("https://example.com/broken")
        .await
        .unwrap();
    assert_eq!(broken.attempts, 4);
    assert_eq!(broken.last_error.as_deref(), Some("HTTP 503"));

    assert!(summaries
        .iter()
        .all(|s| s.final_status == Some(JobStatus::Completed)));
    assert_eq!(summaries.iter().map(|s| s.processed).sum::<usize>(), 8);
}

// ============================================================================
// Distributed mode over HTTP
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_worker_over_http() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"<html><body><a href="/about">About</a><a href="https://elsewhere.org/">Out</a></body></html>"#, "text/html"),
        )
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html><title>About</title></html>", "text/html"))
        .mount(&site)
        .await;

    // Default scope policy keeps the crawl on the seed's host
    let seed = format!("{}/", site.uri());
    let job = job(ScopeConfig::default(), 2, &[seed.as_str()]);
    let (coordinator, _) = coordinator(job);
    coordinator.seed().await.unwrap();

    let server = CoordinatorServer::new(coordinator.clone()).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.build_router();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_shutdown = shutdown_rx.clone();
    let serve = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });
    let sweeper = coordinator.clone().spawn_sweeper(shutdown_rx.clone());

    let client = CoordinatorClient::new(
        ClientConfig::new(format!("http://{addr}"))
            .with_retry_count(2)
            .with_retry_delay(Duration::from_millis(20)),
    )
    .unwrap();
    assert_eq!(client.health_check().await.unwrap().status, "healthy");

    let config = worker_config();
    let fetcher = Arc::new(HttpFetcher::new(&config.fetcher).unwrap());
    let remote = CrawlWorker::new(worker("remote-1"), Arc::new(client), fetcher, config);

    let summary = tokio::time::timeout(Duration::from_secs(20), remote.run(shutdown_rx.clone()))
        .await
        .expect("remote crawl should finish")
        .unwrap();

    assert_eq!(summary.final_status, Some(JobStatus::Completed));
    assert_eq!(summary.succeeded, 2);

    let report = coordinator.status().await;
    assert_eq!(report.frontier.done, 2);
    assert_eq!(report.workers.completed, 2);

    shutdown_tx.send_replace(true);
    sweeper.await.unwrap();
    serve.await.unwrap().unwrap();
}
