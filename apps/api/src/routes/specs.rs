//! Spec submission endpoints
//!
//! A submitted spec registers the application, records the immutable spec
//! row, and enqueues a deployment task. Execution happens asynchronously
//! on a worker; clients follow progress via the event stream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use conductor_db::repo::{DeleteApplicationError, NewApplication, NewQueueTask, NewSpec};
use conductor_db::Pagination;
use conductor_domain::{
    Application, ExecutionId, QueueTaskId, ScoreSpec, WorkflowCategory, WorkflowSpec,
};
use conductor_engine::consumer::{TaskKind, TaskMetadata};

use crate::middleware::CurrentPrincipal;
use crate::state::AppState;
use crate::ApiError;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response after submitting a spec
#[derive(Debug, Serialize)]
pub struct SubmitSpecResponse {
    pub app_name: String,
    /// Queue task driving the deployment
    pub task_id: QueueTaskId,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
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

// =============================================================================
// Handlers
// =============================================================================

/// List registered applications
async fn list_specs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<conductor_db::Page<Application>>, ApiError> {
    let page = state
        .apps
        .list(query.pagination())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(page))
}

/// Submit a Score spec (YAML body) and enqueue its deployment
async fn submit_spec(
    State(state): State<AppState>,
    Extension(CurrentPrincipal(principal)): Extension<CurrentPrincipal>,
    body: String,
) -> Result<(StatusCode, Json<SubmitSpecResponse>), ApiError> {
    let spec = ScoreSpec::from_yaml(&body).map_err(|e| ApiError::Validation(e.to_string()))?;
    let app_name = spec.app_name().to_string();

    state
        .apps
        .upsert(&NewApplication {
            name: app_name.clone(),
            team: spec.metadata.team.clone(),
            environment: spec.metadata.environment.clone(),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let body_json =
        serde_json::to_value(&spec).map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .apps
        .insert_spec(&NewSpec {
            app_name: app_name.clone(),
            body: body_json,
            submitted_by: Some(principal.subject.clone()),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // Allocated up front so the resolver can bind resource rows to it and
    // retries can find this task again by execution id.
    let execution_id = ExecutionId::new();
    let metadata = TaskMetadata {
        kind: TaskKind::Deployment,
        spec: Some(body),
        submitter: Some(principal.subject),
        environment: spec.metadata.environment.clone(),
        execution_id: Some(execution_id),
        ..TaskMetadata::default()
    };
    let task = state
        .queue
        .enqueue(&NewQueueTask {
            app_name: app_name.clone(),
            workflow_name: format!("deploy-{app_name}"),
            // The worker synthesizes the real workflow from the resolved plan.
            workflow: WorkflowSpec {
                name: format!("deploy-{app_name}"),
                category: WorkflowCategory::Provisioner,
                input_schema: None,
                steps: Vec::new(),
            },
            metadata: metadata.to_value(),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitSpecResponse {
            app_name,
            task_id: task.id,
        }),
    ))
}

/// Remove an application and its dependent rows
async fn delete_spec(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.apps.delete(&name).await.map_err(|e| match e {
        DeleteApplicationError::NotFound(name) => {
            ApiError::NotFound(format!("application {name}"))
        }
        DeleteApplicationError::Database(e) => ApiError::Internal(e.to_string()),
    })?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Router
// =============================================================================

/// Build spec routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_specs).post(submit_spec))
        .route("/{name}", axum::routing::delete(delete_spec))
}
