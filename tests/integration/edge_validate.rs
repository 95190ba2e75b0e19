//! Integration tests for the edge `validate-task` endpoint.
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot` and
//! checks status codes, response bodies, CORS headers and the audit rows
//! each path leaves behind.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{TimeDelta, Utc};
use collabtodo_edge::server::{self, VALIDATE_PATH};
use collabtodo_edge::store::MemoryBackend;
use collabtodo_edge::validator::AccessValidator;
use collabtodo_proto::task::{Priority, Task, TaskId, UserId};
use http_body_util::BodyExt;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn make_task(id: &str, owner: &str, age: TimeDelta) -> Task {
    Task {
        id: TaskId::new(id),
        user_id: UserId::new(owner),
        text: format!("task {id}"),
        completed: false,
        priority: Priority::High,
        position: 0,
        created_at: Utc::now() - age,
        updated_at: None,
    }
}

/// Backend with users `alice` and `bob`; alice owns a fresh and a 25h-old task.
async fn make_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_token("tok-alice", UserId::new("alice")).await;
    backend.add_token("tok-bob", UserId::new("bob")).await;
    backend
        .put_task(make_task("fresh", "alice", TimeDelta::hours(1)))
        .await;
    backend
        .put_task(make_task("stale", "alice", TimeDelta::hours(25)))
        .await;
    backend
}

fn make_router(backend: &Arc<MemoryBackend>) -> axum::Router {
    server::router(Arc::new(AccessValidator::new(Arc::clone(backend))))
}

fn post(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(VALIDATE_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ORIGIN, "https://todo.example.com")
        .header("x-forwarded-for", "203.0.113.9")
        .header(header::USER_AGENT, "edge-test/1.0");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ===========================================================================
// Success path
// ===========================================================================

#[tokio::test]
async fn owner_read_succeeds_and_is_logged() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"fresh","action":"read"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Task validation successful");
    assert_eq!(body["task"]["id"], "fresh");
    assert_eq!(body["task"]["text"], "task fresh");
    assert_eq!(body["task"]["priority"], "high");

    let logs = backend.task_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "validate_read");
    assert!(logs[0].success);
    assert_eq!(logs[0].ip_address, "203.0.113.9");
    assert_eq!(logs[0].user_agent, "edge-test/1.0");
}

#[tokio::test]
async fn fresh_delete_succeeds() {
    let backend = make_backend().await;
    let (status, _) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"fresh","action":"delete"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ===========================================================================
// Authentication failures
// ===========================================================================

#[tokio::test]
async fn missing_header_is_401_without_audit() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(None, r#"{"taskId":"fresh","action":"read"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "No authorization header");
    assert!(backend.task_logs().await.is_empty());
    assert!(backend.auth_logs().await.is_empty());
}

#[tokio::test]
async fn unknown_token_is_401() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-mallory"), r#"{"taskId":"fresh","action":"read"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

// ===========================================================================
// Input validation
// ===========================================================================

#[tokio::test]
async fn missing_fields_is_400() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"action":"read"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing taskId or action");
}

#[tokio::test]
async fn unknown_action_is_400() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"fresh","action":"archive"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid action");

    let logs = backend.task_logs().await;
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].task_id, Some(TaskId::new("fresh")));
}

// ===========================================================================
// Authorization and policy
// ===========================================================================

#[tokio::test]
async fn unknown_task_is_404() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"ghost","action":"update"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Task not found");
}

#[tokio::test]
async fn foreign_task_is_403_with_one_auth_log() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-bob"), r#"{"taskId":"fresh","action":"update"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");

    let logs = backend.auth_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "unauthorized_update_attempt");
    assert_eq!(logs[0].user_id, Some(UserId::new("bob")));
    assert!(!logs[0].success);
    assert!(backend.task_logs().await.is_empty());
}

#[tokio::test]
async fn old_delete_is_400_but_old_update_is_allowed() {
    let backend = make_backend().await;
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"stale","action":"delete"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Tasks older than 24 hours cannot be deleted");

    let (status, _) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"stale","action":"update"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn backend_failure_is_500_with_generic_body() {
    let backend = make_backend().await;
    backend.fail_next_lookups(1);
    let (status, body) = send(
        make_router(&backend),
        post(Some("tok-alice"), r#"{"taskId":"fresh","action":"read"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
}

// ===========================================================================
// CORS
// ===========================================================================

#[tokio::test]
async fn responses_allow_any_origin() {
    let backend = make_backend().await;
    let response = make_router(&backend)
        .oneshot(post(Some("tok-bob"), r#"{"taskId":"fresh","action":"read"}"#))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn preflight_lists_allowed_headers() {
    let backend = make_backend().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri(VALIDATE_PATH)
        .header(header::ORIGIN, "https://todo.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap();
    let response = make_router(&backend).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let allowed = response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    for name in ["authorization", "x-client-info", "apikey", "content-type"] {
        assert!(allowed.contains(name), "missing {name} in {allowed}");
    }
}

#[tokio::test]
async fn bare_options_is_answered() {
    let backend = make_backend().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri(VALIDATE_PATH)
        .body(Body::empty())
        .unwrap();
    let response = make_router(&backend).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
