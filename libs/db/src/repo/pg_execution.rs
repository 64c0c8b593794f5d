//! PostgreSQL implementation of ExecutionRepository
//!
//! All terminal transitions are conditional updates on status so a row can
//! never leave a terminal state, regardless of worker races.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::PgPool;

use conductor_domain::{
    ExecutionId, ExecutionStatus, StepExecution, StepExecutionId, StepStatus, WorkflowExecution,
};

use crate::pagination::{Page, Pagination};
use crate::repo::errors::{
    CreateExecutionError, CreateStepError, FindExecutionError, UpdateExecutionError,
    UpdateStepError,
};
use crate::repo::traits::{ExecutionRepository, NewExecution};

/// PostgreSQL execution repository
pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    /// Create a new PostgreSQL execution repository
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EXECUTION_COLUMNS: &str = r#"id, app_name, workflow_name, status::text AS status,
    started_at, completed_at, total_steps, error_message,
    parent_execution_id, retry_count, is_retry, resume_from_step, created_at"#;

const STEP_COLUMNS: &str = r#"id, execution_id, step_index, name, step_type,
    status::text AS status, resource, started_at, completed_at, error_message, outputs"#;

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn create(&self, exec: &NewExecution) -> Result<WorkflowExecution, CreateExecutionError> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            INSERT INTO workflow_executions
                (id, app_name, workflow_name, status, total_steps,
                 parent_execution_id, retry_count, is_retry, resume_from_step)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(exec.id.as_uuid())
        .bind(&exec.app_name)
        .bind(&exec.workflow_name)
        .bind(exec.total_steps)
        .bind(exec.parent_execution_id.as_ref().map(ExecutionId::as_uuid))
        .bind(exec.retry_count)
        .bind(exec.parent_execution_id.is_some())
        .bind(exec.resume_from_step)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.constraint() == Some("workflow_executions_parent_execution_id_fkey") {
                    if let Some(parent) = exec.parent_execution_id {
                        return CreateExecutionError::ParentNotFound(parent);
                    }
                }
            }
            CreateExecutionError::Database(e)
        })?;

        Ok(row.into())
    }

    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<WorkflowExecution>, FindExecutionError> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(FindExecutionError::Database)?;

        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        app_name: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<WorkflowExecution>, FindExecutionError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM workflow_executions WHERE ($1::text IS NULL OR app_name = $1)",
        )
        .bind(app_name)
        .fetch_one(&self.pool)
        .await
        .map_err(FindExecutionError::Database)?;

        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM workflow_executions
            WHERE ($1::text IS NULL OR app_name = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(app_name)
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(FindExecutionError::Database)?;

        let executions = rows.into_iter().map(Into::into).collect();
        Ok(Page::new(executions, total, &pagination))
    }

    async fn mark_running(&self, id: &ExecutionId) -> Result<(), UpdateExecutionError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(UpdateExecutionError::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.classify_execution_conflict(id).await);
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), UpdateExecutionError> {
        debug_assert!(status.is_terminal());
        let status_str = status_text(status);

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2::execution_status,
                completed_at = NOW(),
                error_message = $3
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.as_uuid())
        .bind(status_str)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(UpdateExecutionError::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.classify_execution_conflict(id).await);
        }
        Ok(())
    }

    async fn insert_step(&self, step: &StepExecution) -> Result<(), CreateStepError> {
        let outputs = serde_json::to_value(&step.outputs).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO step_executions
                (id, execution_id, step_index, name, step_type, status, resource,
                 started_at, completed_at, error_message, outputs)
            VALUES ($1, $2, $3, $4, $5, $6::step_status, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(step.id.as_uuid())
        .bind(step.execution_id.as_uuid())
        .bind(step.step_index)
        .bind(&step.name)
        .bind(&step.step_type)
        .bind(step_status_text(step.status))
        .bind(&step.resource)
        .bind(step.started_at)
        .bind(step.completed_at)
        .bind(&step.error_message)
        .bind(outputs)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.constraint() == Some("step_executions_execution_id_fkey") {
                    return CreateStepError::ExecutionNotFound(step.execution_id);
                }
            }
            CreateStepError::Database(e)
        })?;

        Ok(())
    }

    async fn start_step(&self, id: &StepExecutionId) -> Result<(), UpdateStepError> {
        let result = sqlx::query(
            r#"
            UPDATE step_executions
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(UpdateStepError::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.classify_step_conflict(id).await);
        }
        Ok(())
    }

    async fn finish_step(
        &self,
        id: &StepExecutionId,
        status: StepStatus,
        outputs: &BTreeMap<String, String>,
        error: Option<&str>,
    ) -> Result<(), UpdateStepError> {
        debug_assert!(status.is_terminal());
        let outputs = serde_json::to_value(outputs).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE step_executions
            SET status = $2::step_status,
                completed_at = NOW(),
                outputs = $3,
                error_message = $4
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.as_uuid())
        .bind(step_status_text(status))
        .bind(outputs)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(UpdateStepError::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.classify_step_conflict(id).await);
        }
        Ok(())
    }

    async fn list_steps(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<StepExecution>, FindExecutionError> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            r#"
            SELECT {STEP_COLUMNS}
            FROM step_executions
            WHERE execution_id = $1
            ORDER BY step_index
            "#
        ))
        .bind(execution_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(FindExecutionError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

impl PgExecutionRepository {
    /// A zero-row conditional update either raced a terminal transition or
    /// targeted a missing row; tell the two apart for the caller.
    async fn classify_execution_conflict(&self, id: &ExecutionId) -> UpdateExecutionError {
        match sqlx::query_scalar::<_, i64>("SELECT 1 FROM workflow_executions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => UpdateExecutionError::AlreadyTerminal(*id),
            Ok(None) => UpdateExecutionError::NotFound(*id),
            Err(e) => UpdateExecutionError::Database(e),
        }
    }

    async fn classify_step_conflict(&self, id: &StepExecutionId) -> UpdateStepError {
        match sqlx::query_scalar::<_, i64>("SELECT 1 FROM step_executions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => UpdateStepError::AlreadyTerminal(*id),
            Ok(None) => UpdateStepError::NotFound(*id),
            Err(e) => UpdateStepError::Database(e),
        }
    }
}

fn status_text(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
}

fn step_status_text(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    }
}

// =============================================================================
// Internal row types for SQLx mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: uuid::Uuid,
    app_name: String,
    workflow_name: String,
    status: String,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    total_steps: i32,
    error_message: Option<String>,
    parent_execution_id: Option<uuid::Uuid>,
    retry_count: i32,
    is_retry: bool,
    resume_from_step: Option<i32>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ExecutionRow> for WorkflowExecution {
    fn from(row: ExecutionRow) -> Self {
        WorkflowExecution {
            id: ExecutionId::from_uuid(row.id),
            app_name: row.app_name,
            workflow_name: row.workflow_name,
            status: parse_execution_status(&row.status),
            started_at: row.started_at,
            completed_at: row.completed_at,
            total_steps: row.total_steps,
            error_message: row.error_message,
            parent_execution_id: row.parent_execution_id.map(ExecutionId::from_uuid),
            retry_count: row.retry_count,
            is_retry: row.is_retry,
            resume_from_step: row.resume_from_step,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: uuid::Uuid,
    execution_id: uuid::Uuid,
    step_index: i32,
    name: String,
    step_type: String,
    status: String,
    resource: Option<String>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    error_message: Option<String>,
    outputs: serde_json::Value,
}

impl From<StepRow> for StepExecution {
    fn from(row: StepRow) -> Self {
        StepExecution {
            id: StepExecutionId::from_uuid(row.id),
            execution_id: ExecutionId::from_uuid(row.execution_id),
            step_index: row.step_index,
            name: row.name,
            step_type: row.step_type,
            status: parse_step_status(&row.status),
            resource: row.resource,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            outputs: serde_json::from_value(row.outputs).unwrap_or_default(),
        }
    }
}

fn parse_execution_status(s: &str) -> ExecutionStatus {
    match s {
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Pending,
    }
}

fn parse_step_status(s: &str) -> StepStatus {
    match s {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "skipped" => StepStatus::Skipped,
        _ => StepStatus::Pending,
    }
}
