//! Health, readiness, and metrics endpoints
//!
//! Mounted outside the authentication middleware.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use conductor_common::metrics::METRICS;

use crate::state::AppState;

/// Liveness: the process is up.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Readiness: the store answers.
async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Some(pool) = &state.pool {
        if sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(pool)
            .await
            .is_err()
        {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }
    Ok(Json(serde_json::json!({"status": "ready"})))
}

/// Prometheus exposition.
async fn metrics() -> ([(&'static str, &'static str); 1], String) {
    (
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.render(),
    )
}

/// Build health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
}
