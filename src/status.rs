//! HTTP status surface: health, tone memory stats, last driver cycle.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::driver::{CycleReport, CycleStatus, FeedbackLoopDriver};

/// Shared state for status routes.
#[derive(Clone)]
pub struct StatusState {
    pub driver: Arc<FeedbackLoopDriver>,
}

#[derive(Debug, Serialize)]
struct LoopStatus {
    cycles_run: u64,
    pending_writes: usize,
    in_flight: usize,
    last_cycle: Option<CycleReport>,
}

#[derive(Debug, Deserialize)]
struct EntriesQuery {
    client: Option<String>,
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/memory/stats
async fn memory_stats(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.driver.controller().memory().stats().await)
}

/// GET /api/memory/entries?client=...
async fn memory_entries(
    State(state): State<StatusState>,
    Query(query): Query<EntriesQuery>,
) -> impl IntoResponse {
    let entries = state
        .driver
        .controller()
        .memory()
        .entries(query.client.as_deref())
        .await;
    Json(entries)
}

/// GET /api/loop/status
async fn loop_status(State(state): State<StatusState>) -> impl IntoResponse {
    let controller = state.driver.controller();
    Json(LoopStatus {
        cycles_run: state.driver.cycles_run(),
        pending_writes: controller.pending_write_count().await,
        in_flight: controller.claims().len(),
        last_cycle: state.driver.last_report().await,
    })
}

/// POST /api/loop/cycle
///
/// Runs a cycle now. 409 when one is already running.
async fn trigger_cycle(State(state): State<StatusState>) -> impl IntoResponse {
    let report = state.driver.run_cycle().await;
    let code = match report.status {
        CycleStatus::Overlapped => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    (code, Json(report))
}

/// Build the status routes.
pub fn status_routes(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/memory/stats", get(memory_stats))
        .route("/api/memory/entries", get(memory_entries))
        .route("/api/loop/status", get(loop_status))
        .route("/api/loop/cycle", post(trigger_cycle))
        .with_state(state)
}
