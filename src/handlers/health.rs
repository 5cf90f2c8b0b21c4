//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that reports the
//! outcome of the last reconcile tick and the running tick statistics.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let (status, message) = {
        let watched = state.watched.read().await;
        match (watched.last_tick, watched.last_tick_success) {
            (None, _) => (StatusCode::OK, "OK - waiting for first reconcile".to_string()),
            (Some(_), true) => (StatusCode::OK, "OK".to_string()),
            (Some(_), false) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!(
                    "Application list fetch failed: {}",
                    watched.last_error.as_deref().unwrap_or("unknown error")
                ),
            ),
        }
    };

    // Render plain-text table from HealthStats
    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}"),
    )
}
