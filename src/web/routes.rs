//! HTTP route handlers
//!
//! The request adapter: converts inbound requests into tasks, feeds them
//! to the session pool, and maps outcomes to response statuses. Nothing
//! here touches the engine directly.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::calendar;
use crate::task::{ExtractSpec, Task, TaskOutcome};
use crate::AppConfig;
use crate::AppState;

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "success": false, "error": msg })))
}

/// Outcome → HTTP response mapping: timeouts are the caller's fault of
/// budget (504), engine problems are the service's (503), bad tasks are
/// the caller's (400).
fn outcome_response(outcome: TaskOutcome) -> (StatusCode, serde_json::Value) {
    match outcome {
        TaskOutcome::Success(payload) => {
            (StatusCode::OK, json!({ "success": true, "data": payload }))
        }
        TaskOutcome::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            json!({ "success": false, "error": "task deadline exceeded" }),
        ),
        TaskOutcome::QueueTimeout => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "success": false, "error": "queue wait exceeded" }),
        ),
        TaskOutcome::Unavailable(msg) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "success": false, "error": msg }),
        ),
        TaskOutcome::EngineFailure(msg) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "success": false, "error": msg }),
        ),
        TaskOutcome::TaskError(msg) => (
            StatusCode::BAD_REQUEST,
            json!({ "success": false, "error": msg }),
        ),
    }
}

/// Top-level routes (the original service's surface).
pub fn root_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/weekly_news.json", get(download_news))
        .route("/scrape-now", get(scrape_now).post(scrape_now))
        .layer(Extension(state))
}

/// `/api` routes.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/news", get(get_news))
        .route("/extract", post(extract))
        .route("/stats", get(get_stats))
        .route("/config", get(get_config).post(configure))
        .layer(Extension(state))
}

async fn home() -> impl IntoResponse {
    Json(json!({
        "message": "Forex Factory News Scraper Service",
        "endpoints": {
            "/": "This info page",
            "/health": "Health check",
            "/weekly_news.json": "Direct file download",
            "/scrape-now": "Manual scrape trigger",
            "/api/news": "Get weekly forex news data (JSON)",
            "/api/extract": "Run a generic browser task",
            "/api/stats": "Task and engine counters",
            "/api/config": "Read or update configuration"
        },
        "schedule": "Updates every Sunday at 00:00 Bangkok time"
    }))
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "engineState": state.pool.engine().state(),
        "poolState": state.pool.state(),
        "newsFileExists": state.store.exists(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn download_news(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    match state.store.load() {
        Some(events) => Json(events).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "no scrape has completed yet").into_response(),
    }
}

async fn scrape_now(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual scrape triggered via web API");
    let (url, deadline) = {
        let config = state.config.read().await;
        (config.scrape_url.clone(), config.request_timeout())
    };

    match calendar::refresh_news(&state.pool, &state.store, &url, deadline).await {
        Ok(count) => Json(json!({
            "success": true,
            "message": "Scraping completed successfully",
            "count": count,
        }))
        .into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, &e).into_response(),
    }
}

async fn get_news(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    // Scrape on demand when nothing has ever been stored.
    if !state.store.exists() {
        info!("News requested before first scrape, scraping now");
        let (url, deadline) = {
            let config = state.config.read().await;
            (config.scrape_url.clone(), config.request_timeout())
        };
        if let Err(e) = calendar::refresh_news(&state.pool, &state.store, &url, deadline).await {
            return err_response(StatusCode::INTERNAL_SERVER_ERROR, &e).into_response();
        }
    }

    let events = state.store.load().unwrap_or_default();
    Json(json!({
        "success": true,
        "count": events.len(),
        "data": events,
        "last_updated": state.store.last_updated().map(|t| t.to_rfc3339()),
    }))
    .into_response()
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest {
    url: String,
    action: ExtractSpec,
    /// Task budget; clamped to the configured request timeout.
    timeout_seconds: Option<u64>,
    /// Cap on the slot queue wait; defaults to the task budget.
    queue_timeout_seconds: Option<u64>,
}

async fn extract(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ExtractRequest>,
) -> impl IntoResponse {
    let max_timeout = state.config.read().await.request_timeout_seconds;
    let deadline = Duration::from_secs(req.timeout_seconds.unwrap_or(max_timeout).min(max_timeout));
    let queue_timeout = req
        .queue_timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(deadline);

    let task = Task::new(req.url, req.action, deadline).with_queue_timeout(queue_timeout);
    let (status, body) = outcome_response(state.pool.submit(task).await);
    (status, Json(body))
}

async fn get_stats(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "tasks": state.stats.snapshot(),
        "engineState": state.pool.engine().state(),
        "poolState": state.pool.state(),
    }))
}

async fn get_config(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(config)
}

async fn configure(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<AppConfig>,
) -> impl IntoResponse {
    info!("Configuring application via web API");
    state.configure(config).await;
    StatusCode::OK
}
