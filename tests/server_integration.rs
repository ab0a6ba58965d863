//! HTTP API tests.
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`,
//! backed by per-tenant SQLite files in a temp dir and the in-memory remote.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use gitvault::config::Config;
use gitvault::remote::memory::MemoryRemote;
use gitvault::server::router;
use gitvault::tenants::TenantRegistry;
use gitvault_core::models::RepoCoordinates;

struct TestApp {
    app: Router,
    remote: Arc<MemoryRemote>,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.dir = dir.path().to_path_buf();
    config.remote.base_backoff_ms = 1;
    let remote = Arc::new(MemoryRemote::new());
    let registry = Arc::new(TenantRegistry::new(config, remote.clone()));
    TestApp {
        app: router(registry),
        remote,
        _dir: dir,
    }
}

fn task_body(title: &str, content: &str) -> Value {
    json!({
        "commitMessage": format!("Add {}", title),
        "credentials": { "installationId": "42", "token": "ghs_test" },
        "repo": { "owner": "acme", "repo": "notes", "branch": "main" },
        "vaultPath": "vaults",
        "vaultName": "team",
        "title": title,
        "content": content
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll the status endpoint until the tenant's ledger drains.
async fn wait_for_drain(app: &Router, tenant: &str) -> Value {
    let uri = format!("/tenants/{}/index/status", tenant);
    for _ in 0..200 {
        let (status, body) = send(app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if body["pendingTasks"] == 0 {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tasks for {} never completed", tenant);
}

#[tokio::test]
async fn test_health() {
    let t = test_app();
    let (status, body) = send(&t.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["tenants"], 0);

    send(&t.app, "GET", "/tenants/acme/index/status", None).await;
    let (_, body) = send(&t.app, "GET", "/health", None).await;
    assert_eq!(body["tenants"], 1);
}

#[tokio::test]
async fn test_submit_is_accepted_then_processed() {
    let t = test_app();
    let (status, ack) = send(
        &t.app,
        "POST",
        "/tenants/acme/tasks",
        Some(task_body("Hello", "First note")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["completed"], false);
    let task_id = ack["taskId"].as_str().unwrap().to_string();

    let state = wait_for_drain(&t.app, "acme").await;
    assert_eq!(state["articles"], 1);
    assert_eq!(state["titleEntries"], 1);
    assert_eq!(state["state"]["fileIndexInFolder"], 0);

    let repo = t.remote.repo(&RepoCoordinates {
        owner: "acme".to_string(),
        repo: "notes".to_string(),
        branch: "main".to_string(),
    });
    assert_eq!(
        repo.file("vaults/team/Folder_0/Article_0.md").as_deref(),
        Some("First note")
    );

    let (status, ack) = send(
        &t.app,
        "POST",
        &format!("/tenants/acme/tasks/{}/process", task_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["completed"], true);

    let (status, entry) = send(&t.app, "GET", "/tenants/acme/titles/lookup?title=Hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["remoteArticlePath"], "vaults/team/Folder_0/Article_0.md");

    let (status, page) = send(&t.app, "GET", "/tenants/acme/articles?page=1&page_size=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["articles"][0]["title"], "Hello");
}

#[tokio::test]
async fn test_invalid_submission_is_bad_request() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        "POST",
        "/tenants/acme/tasks",
        Some(task_body("Empty", "")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("content"));
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let t = test_app();
    let (status, body) = send(&t.app, "POST", "/tenants/acme/tasks/missing/process", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_unknown_title_is_not_found() {
    let t = test_app();
    let (status, body) = send(&t.app, "GET", "/tenants/acme/titles/lookup?title=Nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_invalid_tenant_is_bad_request() {
    let t = test_app();
    let (status, body) = send(&t.app, "GET", "/tenants/bad%20tenant/index/status", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_oversized_page_is_bad_request() {
    let t = test_app();
    let (status, body) = send(&t.app, "GET", "/tenants/acme/articles?page_size=1000", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_flush_and_reset() {
    let t = test_app();
    let (status, body) = send(&t.app, "POST", "/tenants/acme/index/flush", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("empty"));

    send(&t.app, "POST", "/tenants/acme/tasks", Some(task_body("One", "1"))).await;
    wait_for_drain(&t.app, "acme").await;

    let (status, body) = send(&t.app, "POST", "/tenants/acme/index/flush", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["written"]["entries"], 1);
    assert_eq!(body["written"]["files"], 1);

    let (status, body) = send(&t.app, "POST", "/tenants/acme/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset"], true);

    let (_, state) = send(&t.app, "GET", "/tenants/acme/index/status", None).await;
    assert_eq!(state["articles"], 0);
    assert_eq!(state["state"]["fileIndexInFolder"], -1);
}

#[tokio::test]
async fn test_tenants_get_separate_indexes() {
    let t = test_app();
    send(&t.app, "POST", "/tenants/alpha/tasks", Some(task_body("A", "a"))).await;
    wait_for_drain(&t.app, "alpha").await;

    let (_, alpha) = send(&t.app, "GET", "/tenants/alpha/index/status", None).await;
    let (_, beta) = send(&t.app, "GET", "/tenants/beta/index/status", None).await;
    assert_eq!(alpha["articles"], 1);
    assert_eq!(beta["articles"], 0);
    assert_eq!(beta["tenant"], "beta");
}
