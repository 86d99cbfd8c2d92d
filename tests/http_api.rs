//! HTTP API tests driven through the router without a socket

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use ticket_miner::coordinator::{BroadcastPolicy, SessionCoordinator};
use ticket_miner::engine::CpuSearchEngine;
use ticket_miner::persistence::StateStore;
use ticket_miner::server::router;
use tower::ServiceExt;

fn coordinator(dir: &Path) -> SessionCoordinator {
    SessionCoordinator::builder(Arc::new(CpuSearchEngine::new(64)), StateStore::new(dir))
        .policy(BroadcastPolicy::disabled())
        .build()
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn start_body(target: &str) -> Value {
    json!({
        "addr1": "11".repeat(20),
        "addr2": "22".repeat(20),
        "value": 7,
        "target": target,
    })
}

#[tokio::test]
async fn start_and_poll_until_complete() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(coordinator(dir.path()));

    let (status, body) = call(&app, post_json("/mine/start", start_body(&"f".repeat(64)))).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let mut last = Value::Null;
    for _ in 0..200 {
        let (status, body) = call(&app, get(&format!("/mine/{}/status", session_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["is_mining"] == json!(false) {
            last = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(last["solution_found"], json!(true));
    assert_eq!(last["current_nonce"], json!("0"));
    assert_eq!(last["message"], json!("Mining complete. Found nonce: 0x0"));
}

#[tokio::test]
async fn invalid_start_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(coordinator(dir.path()));

    let mut body = start_body(&"f".repeat(64));
    body["addr1"] = json!("1234");
    let (status, body) = call(&app, post_json("/mine/start", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], json!("invalid_argument"));
    assert!(body["error"].as_str().unwrap().contains("addr1"));
}

#[tokio::test]
async fn malformed_bodies_are_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(coordinator(dir.path()));

    let mut missing_addr1 = start_body(&"f".repeat(64));
    missing_addr1.as_object_mut().unwrap().remove("addr1");
    let mut negative_value = start_body(&"f".repeat(64));
    negative_value["value"] = json!(-1);
    let mut negative_limit = start_body(&"f".repeat(64));
    negative_limit["time_limit"] = json!(-2.5);

    for body in [missing_addr1, negative_value, negative_limit] {
        let (status, body) = call(&app, post_json("/mine/start", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("invalid_argument"));
        assert!(body["error"].is_string());
    }

    let (status, body) = call(&app, post_json("/mine/resume", json!({ "path": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], json!("invalid_argument"));
}

#[tokio::test]
async fn fractional_time_limit_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path());
    let app = router(coordinator.clone());

    let mut body = start_body(&"0".repeat(64));
    body["time_limit"] = json!(1.5);
    let (status, body) = call(&app, post_json("/mine/start", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_string());

    coordinator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(coordinator(dir.path()));

    let (status, body) = call(&app, get("/mine/nope/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], json!("not_found"));

    let (status, _) = call(&app, post_json("/mine/nope/pause", Value::Null)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pause_resume_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(dir.path());
    let app = router(coordinator.clone());

    // An all-zero target keeps the session mining
    let (_, body) = call(&app, post_json("/mine/start", start_body(&"0".repeat(64)))).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, post_json(&format!("/mine/{}/pause", session_id), Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    let state_file = body["state_file"].as_str().unwrap().to_string();
    assert!(state_file.ends_with(&format!("mining_state_{}.bin", session_id)));

    let (status, body) = call(&app, post_json(&format!("/mine/{}/pause", session_id), Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], json!("precondition_failed"));

    let (status, body) = call(&app, post_json("/mine/resume", json!({ "state_file": state_file }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["session_id"].as_str().unwrap(), session_id);

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["active_sessions"], json!(1));
    assert_eq!(body["total_sessions"], json!(2));

    coordinator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn resume_of_corrupt_file_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(coordinator(dir.path()));

    let path = dir.path().join("mining_state_junk.bin");
    std::fs::write(&path, b"junk").unwrap();

    let (status, body) = call(&app, post_json("/mine/resume", json!({ "state_file": path }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], json!("internal"));
}
