//! WebSocket endpoints

mod graph_ws;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Routes nested under `/api/graph`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/{app}/ws", get(graph_ws::graph_updates))
}
