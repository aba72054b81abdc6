//! HTTP server for the robot.
//!
//! Provides endpoints for:
//! - The JSON bridge for external tasks (`/json`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::EngineError;
use crate::state::BotState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<BotState>) -> Router {
    Router::new()
        .route("/json", post(handlers::json_function))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `listen` until the server fails.
pub async fn serve(state: Arc<BotState>, listen: &str) -> Result<(), EngineError> {
    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listen, "HTTP server listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
