//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version and open tenant count) |
//! | `POST` | `/tenants/{tenant}/tasks` | Submit a write and queue it; answers `202` at once |
//! | `POST` | `/tenants/{tenant}/tasks/{id}/process` | Queue an existing task |
//! | `GET`  | `/tenants/{tenant}/articles?page&page_size` | Cached articles, newest first |
//! | `GET`  | `/tenants/{tenant}/index/status` | Counters and capacities |
//! | `GET`  | `/tenants/{tenant}/titles/lookup?title=` | Title → remote path |
//! | `POST` | `/tenants/{tenant}/index/flush` | Flush buffered title lines |
//! | `POST` | `/tenants/{tenant}/reset` | Clear the tenant's local index |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: task 1234" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `remote_error` (502),
//! `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use gitvault_core::models::{
    ArticlePage, FlushReport, IndexStatus, ProcessAck, TaskParams, TitleIndexEntry,
};
use gitvault_core::VaultError;

use crate::config::Config;
use crate::remote::github::GitHubFactory;
use crate::tenants::TenantRegistry;

#[derive(Clone)]
struct AppState {
    registry: Arc<TenantRegistry>,
}

/// Start the server on `[server].bind` against the GitHub contents API.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let remote = Arc::new(GitHubFactory::new(&config.remote)?);
    let registry = Arc::new(TenantRegistry::new(config.clone(), remote));

    let app = router(registry);

    tracing::info!(bind = %bind_addr, "gitvault server listening");
    println!("gitvault server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router over an existing registry.
pub fn router(registry: Arc<TenantRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tenants/{tenant}/tasks", post(handle_submit))
        .route("/tenants/{tenant}/tasks/{id}/process", post(handle_process))
        .route("/tenants/{tenant}/articles", get(handle_articles))
        .route("/tenants/{tenant}/index/status", get(handle_status))
        .route("/tenants/{tenant}/titles/lookup", get(handle_lookup))
        .route("/tenants/{tenant}/index/flush", post(handle_flush))
        .route("/tenants/{tenant}/reset", post(handle_reset))
        .layer(cors)
        .with_state(AppState { registry })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let code = err.code();
        let status = match code {
            "bad_request" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "remote_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    /// Tenants with a running coordinator.
    tenants: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tenants: state.registry.open_tenants().await.len(),
    })
}

// ============ Tasks ============

/// `POST /tenants/{tenant}/tasks`: record the task and queue it without
/// waiting for the push.
async fn handle_submit(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(params): Json<TaskParams>,
) -> Result<(StatusCode, Json<ProcessAck>), AppError> {
    let handle = state.registry.get(&tenant).await?;
    let task_id = handle.submit_task(params).await?;
    let ack = handle.process_task(&task_id).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn handle_process(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<ProcessAck>, AppError> {
    let handle = state.registry.get(&tenant).await?;
    Ok(Json(handle.process_task(&id).await?))
}

// ============ Index ============

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

async fn handle_articles(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<ArticlePage>, AppError> {
    let handle = state.registry.get(&tenant).await?;
    Ok(Json(handle.list_articles(q.page, q.page_size).await?))
}

async fn handle_status(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<IndexStatus>, AppError> {
    let handle = state.registry.get(&tenant).await?;
    Ok(Json(handle.index_status().await?))
}

#[derive(Deserialize)]
struct LookupQuery {
    #[serde(default)]
    title: String,
}

async fn handle_lookup(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(q): Query<LookupQuery>,
) -> Result<Json<TitleIndexEntry>, AppError> {
    let handle = state.registry.get(&tenant).await?;
    Ok(Json(handle.lookup_title(&q.title).await?))
}

async fn handle_flush(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<FlushReport>, AppError> {
    let handle = state.registry.get(&tenant).await?;
    Ok(Json(handle.flush_index().await?))
}

#[derive(Serialize)]
struct ResetResponse {
    reset: bool,
}

async fn handle_reset(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let handle = state.registry.get(&tenant).await?;
    handle.reset_all().await?;
    Ok(Json(ResetResponse { reset: true }))
}
