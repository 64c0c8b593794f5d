//! Workflow execution endpoints
//!
//! Listing and detail views over execution rows, explicit golden-path
//! invocation, and the retry API. Retries enqueue a fresh task linked to
//! the parent execution; steps before the resume point are inherited.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use conductor_db::repo::NewQueueTask;
use conductor_db::Pagination;
use conductor_domain::{
    ExecutionId, QueueTaskId, StepExecution, StepStatus, WorkflowExecution,
};
use conductor_engine::consumer::{TaskKind, TaskMetadata};

use crate::middleware::CurrentPrincipal;
use crate::state::AppState;
use crate::ApiError;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Filter by application name
    pub app: Option<String>,
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

/// Execution detail with its step rows
#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: WorkflowExecution,
    pub steps: Vec<StepExecution>,
}

/// Request to invoke a golden-path workflow explicitly
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Golden-path workflow name
    pub workflow: String,
    /// Application the invocation belongs to
    pub app_name: String,
    /// Inputs validated against the workflow's input schema
    #[serde(default)]
    pub inputs: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Response for explicit invocation and retry
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: ExecutionId,
    pub task_id: QueueTaskId,
}

/// Request to retry a failed execution
#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    /// Step index to resume from; defaults to the first failed step
    pub resume_from_step: Option<i32>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List executions with pagination
async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<conductor_db::Page<WorkflowExecution>>, ApiError> {
    let page = state
        .executions
        .list(query.app.as_deref(), query.pagination())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(page))
}

/// Execution detail with steps
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    let id: ExecutionId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid execution id".to_string()))?;

    let execution = state
        .executions
        .find_by_id(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("execution {id}")))?;

    let steps = state
        .executions
        .list_steps(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ExecutionDetail { execution, steps }))
}

/// Invoke a golden-path workflow with inputs
async fn execute_workflow(
    State(state): State<AppState>,
    Extension(CurrentPrincipal(principal)): Extension<CurrentPrincipal>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    let resolved = state.registry.golden_path(&request.workflow).await?;

    let execution_id = ExecutionId::new();
    let metadata = TaskMetadata {
        kind: TaskKind::Workflow,
        submitter: Some(principal.subject),
        inputs: request.inputs,
        execution_id: Some(execution_id),
        ..TaskMetadata::default()
    };

    let task = state
        .queue
        .enqueue(&NewQueueTask {
            app_name: request.app_name,
            workflow_name: resolved.workflow.name.clone(),
            workflow: resolved.workflow,
            metadata: metadata.to_value(),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id,
            task_id: task.id,
        }),
    ))
}

/// Retry a failed execution, resuming at the given step
async fn retry_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(CurrentPrincipal(principal)): Extension<CurrentPrincipal>,
    Json(request): Json<RetryRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    let id: ExecutionId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid execution id".to_string()))?;

    let parent = state
        .executions
        .find_by_id(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("execution {id}")))?;

    if !parent.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "execution {id} is still {:?}",
            parent.status
        )));
    }

    if let Some(resume) = request.resume_from_step {
        if resume < 0 || resume >= parent.total_steps {
            return Err(ApiError::Validation(format!(
                "resume_from_step {resume} is outside the parent's {} steps",
                parent.total_steps
            )));
        }
    }

    // The original task carries the workflow definition to re-run.
    let original = state
        .queue
        .find_by_execution(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| {
            ApiError::Conflict(format!("no queue task recorded execution {id}"))
        })?;

    let resume_from_step = match request.resume_from_step {
        Some(resume) => Some(resume),
        None => first_failed_step(state.clone(), &id).await?,
    };

    let execution_id = ExecutionId::new();
    let original_meta = TaskMetadata::from_value(&original.metadata);
    let metadata = TaskMetadata {
        kind: original_meta.kind,
        spec: original_meta.spec,
        submitter: Some(principal.subject),
        environment: original_meta.environment,
        inputs: original_meta.inputs,
        parent_execution_id: Some(id),
        resume_from_step,
        execution_id: Some(execution_id),
    };

    let task = state
        .queue
        .enqueue(&NewQueueTask {
            app_name: parent.app_name,
            workflow_name: parent.workflow_name,
            workflow: original.workflow,
            metadata: metadata.to_value(),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id,
            task_id: task.id,
        }),
    ))
}

async fn first_failed_step(
    state: AppState,
    execution_id: &ExecutionId,
) -> Result<Option<i32>, ApiError> {
    let steps = state
        .executions
        .list_steps(execution_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(steps
        .iter()
        .find(|s| s.status == StepStatus::Failed)
        .map(|s| s.step_index))
}

// =============================================================================
// Router
// =============================================================================

/// Build workflow routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_executions))
        .route("/execute", post(execute_workflow))
        .route("/{id}", get(get_execution))
        .route("/{id}/retry", post(retry_execution))
}
