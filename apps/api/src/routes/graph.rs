//! Application graph endpoints

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use conductor_domain::AppGraph;
use conductor_engine::graph::{render, ExportFormat};

use crate::state::AppState;
use crate::ApiError;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

/// Project the application graph as JSON
async fn get_graph(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Json<AppGraph>, ApiError> {
    let graph = state.projector.project(&app).await?;
    Ok(Json(graph))
}

/// Export the graph in the requested format
async fn export_graph(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format: ExportFormat = query.format.parse().map_err(ApiError::from)?;
    let graph = state.projector.project(&app).await?;
    let rendered = render(&graph, format)?;

    Ok((
        [(header::CONTENT_TYPE, rendered.content_type)],
        rendered.body,
    ))
}

/// Build graph routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{app}", get(get_graph))
        .route("/{app}/export", get(export_graph))
}
