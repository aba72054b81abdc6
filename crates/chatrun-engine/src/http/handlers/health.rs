//! Health and metrics handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::state::BotState;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_runs": state.runs.len(),
    }))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    let body = crate::metrics::collect_metrics(&state);
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
