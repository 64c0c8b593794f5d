//! PostgreSQL implementation of QueueRepository
//!
//! Claims use a single-statement conditional update over the oldest
//! pending row (`FOR UPDATE SKIP LOCKED`), so at most one worker can move
//! any task to `running`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use conductor_domain::{ExecutionId, QueueTask, QueueTaskId, TaskStatus};

use crate::repo::errors::{ClaimError, EnqueueError, UpdateTaskError};
use crate::repo::traits::{NewQueueTask, QueueRepository, TaskOutcome};

/// Unclean releases before a task is quarantined
pub const QUARANTINE_THRESHOLD: i32 = 3;

/// PostgreSQL queue repository
pub struct PgQueueRepository {
    pool: PgPool,
}

impl PgQueueRepository {
    /// Create a new PostgreSQL queue repository
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str = r#"id, app_name, workflow_name, workflow, metadata,
    status::text AS status, enqueued_at, started_at, completed_at,
    lease_expires_at, crash_count, error_message"#;

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn enqueue(&self, task: &NewQueueTask) -> Result<QueueTask, EnqueueError> {
        let id = QueueTaskId::new();
        let workflow = serde_json::to_value(&task.workflow)?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO queue_tasks (id, app_name, workflow_name, workflow, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(&task.app_name)
        .bind(&task.workflow_name)
        .bind(workflow)
        .bind(&task.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(EnqueueError::Database)?;

        row.try_into().map_err(|e: serde_json::Error| {
            EnqueueError::Serialization(e)
        })
    }

    async fn claim(&self, lease: Duration) -> Result<Option<QueueTask>, ClaimError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE queue_tasks
            SET status = 'running',
                started_at = NOW(),
                lease_expires_at = NOW() + $1 * INTERVAL '1 second'
            WHERE id = (
                SELECT id FROM queue_tasks
                WHERE status = 'pending'
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(lease.num_seconds())
        .fetch_optional(&self.pool)
        .await
        .map_err(ClaimError::Database)?;

        row.map(|r| {
            r.try_into()
                .map_err(|e: serde_json::Error| ClaimError::CorruptPayload(e.to_string()))
        })
        .transpose()
    }

    async fn renew_lease(&self, id: &QueueTaskId, lease: Duration) -> Result<(), UpdateTaskError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET lease_expires_at = NOW() + $2 * INTERVAL '1 second'
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id.as_uuid())
        .bind(lease.num_seconds())
        .execute(&self.pool)
        .await
        .map_err(UpdateTaskError::Database)?;

        if result.rows_affected() == 0 {
            return Err(UpdateTaskError::NotClaimed(*id));
        }
        Ok(())
    }

    async fn release(&self, id: &QueueTaskId, outcome: TaskOutcome) -> Result<(), UpdateTaskError> {
        let (status, error) = match &outcome {
            TaskOutcome::Completed => ("completed", None),
            TaskOutcome::Failed { error } => ("failed", Some(error.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = $2::task_status,
                completed_at = NOW(),
                lease_expires_at = NULL,
                error_message = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id.as_uuid())
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(UpdateTaskError::Database)?;

        if result.rows_affected() == 0 {
            return Err(UpdateTaskError::NotClaimed(*id));
        }
        Ok(())
    }

    async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<u64, ClaimError> {
        // Quarantine repeat offenders first so they never bounce forever.
        sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = 'quarantined',
                lease_expires_at = NULL,
                error_message = 'quarantined after repeated unclean releases'
            WHERE status = 'running'
              AND lease_expires_at < $1
              AND crash_count + 1 >= $2
            "#,
        )
        .bind(now)
        .bind(QUARANTINE_THRESHOLD)
        .execute(&self.pool)
        .await
        .map_err(ClaimError::Database)?;

        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = 'pending',
                started_at = NULL,
                lease_expires_at = NULL,
                crash_count = crash_count + 1
            WHERE status = 'running' AND lease_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ClaimError::Database)?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: &QueueTaskId) -> Result<Option<QueueTask>, ClaimError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM queue_tasks WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(ClaimError::Database)?;

        row.map(|r| {
            r.try_into()
                .map_err(|e: serde_json::Error| ClaimError::CorruptPayload(e.to_string()))
        })
        .transpose()
    }

    async fn find_by_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<QueueTask>, ClaimError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM queue_tasks WHERE metadata->>'execution_id' = $1"
        ))
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(ClaimError::Database)?;

        row.map(|r| {
            r.try_into()
                .map_err(|e: serde_json::Error| ClaimError::CorruptPayload(e.to_string()))
        })
        .transpose()
    }
}

// =============================================================================
// Internal row type for SQLx mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: uuid::Uuid,
    app_name: String,
    workflow_name: String,
    workflow: serde_json::Value,
    metadata: serde_json::Value,
    status: String,
    enqueued_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    crash_count: i32,
    error_message: Option<String>,
}

impl TryFrom<TaskRow> for QueueTask {
    type Error = serde_json::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(QueueTask {
            id: QueueTaskId::from_uuid(row.id),
            app_name: row.app_name,
            workflow_name: row.workflow_name,
            workflow: serde_json::from_value(row.workflow)?,
            metadata: row.metadata,
            status: parse_task_status(&row.status),
            enqueued_at: row.enqueued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            lease_expires_at: row.lease_expires_at,
            crash_count: row.crash_count,
            error_message: row.error_message,
        })
    }
}

fn parse_task_status(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "quarantined" => TaskStatus::Quarantined,
        _ => TaskStatus::Pending,
    }
}
