//! REST API behaviour through the router, without binding a socket

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use fleetscope::coordinator::CoordinatorServer;

use super::fixtures::*;

async fn router() -> Router {
    let job = job(example_scope(), 2, &["https://example.com/"]);
    let (coordinator, _) = coordinator(job);
    coordinator.seed().await.unwrap();
    CoordinatorServer::new(coordinator).unwrap().build_router()
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_and_job_report() {
    let router = router().await;

    let (status, body) = call(&router, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");

    let (status, body) = call(&router, "GET", "/api/job", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["job_id"], "job-it");
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["frontier"]["pending"], 1);
}

#[tokio::test]
async fn test_register_lease_complete_roundtrip() {
    let router = router().await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/workers/register",
        Some(json!({ "worker_id": "w1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["job_status"], "running");

    let (status, body) = call(
        &router,
        "POST",
        "/api/lease",
        Some(json!({ "worker_id": "w1", "count": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let leases = body["data"]["leases"].as_array().unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0]["url"], "https://example.com/");
    assert_eq!(leases[0]["depth"], 0);

    let (status, body) = call(
        &router,
        "POST",
        "/api/complete",
        Some(json!({
            "worker_id": "w1",
            "url": "https://example.com/",
            "outcome": { "status": "success" },
            "links": ["https://api.example.com/x", "https://admin.example.com/y"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "done");
    assert_eq!(body["data"]["links"]["accepted"], 1);
    assert_eq!(body["data"]["links"]["out_of_scope"], 1);

    let (_, body) = call(&router, "GET", "/api/workers", None).await;
    assert_eq!(body["data"]["stats"]["total_workers"], 1);
    assert_eq!(body["data"]["workers"][0]["completed"], 1);
}

#[tokio::test]
async fn test_error_codes() {
    let router = router().await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/lease",
        Some(json!({ "worker_id": "ghost", "count": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "worker_not_found");

    call(
        &router,
        "POST",
        "/api/workers/register",
        Some(json!({ "worker_id": "w1" })),
    )
    .await;
    let (status, body) = call(
        &router,
        "POST",
        "/api/complete",
        Some(json!({
            "worker_id": "w1",
            "url": "https://example.com/",
            "outcome": { "status": "failure", "error": "timeout" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "lease_not_held");
}

#[tokio::test]
async fn test_malformed_request_rejected() {
    let router = router().await;

    let (status, _) = call(
        &router,
        "POST",
        "/api/workers/register",
        Some(json!({ "worker_id": "not a valid id!" })),
    )
    .await;
    assert!(status.is_client_error());

    let (status, _) = call(&router, "POST", "/api/lease", Some(json!({ "count": 1 }))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let _ = fleetscope::metrics::init_metrics();
    let router = router().await;

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("fleetscope_"));
}
