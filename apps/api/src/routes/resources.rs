//! Resource endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use conductor_db::Pagination;
use conductor_domain::{Resource, ResourceId};

use crate::state::AppState;
use crate::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Filter by resource type
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    fn pagination(&self) -> Pagination {
        Pagination {
            limit: self.limit.unwrap_or(20),
            offset: self.offset.unwrap_or(0),
        }
    }
}

/// List resources, optionally filtered by type
async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<conductor_db::Page<Resource>>, ApiError> {
    let page = state
        .resources
        .list(query.resource_type.as_deref(), query.pagination())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(page))
}

/// Resource detail
async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource>, ApiError> {
    let id: ResourceId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid resource id".to_string()))?;

    let resource = state
        .resources
        .find_by_id(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("resource {id}")))?;

    Ok(Json(resource))
}

/// Build resource routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_resources))
        .route("/{id}", get(get_resource))
}
