//! Operational endpoints for a worker instance: liveness and a status-count
//! snapshot. Job submission, listing, and log reads belong to the separate
//! request layer, not to the worker.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::jobs::store::JobStore;

#[derive(Clone)]
pub struct ApiState {
    pub jobs: Arc<dyn JobStore>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<ApiState>) -> Response {
    match state.jobs.status_counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response(),
    }
}
