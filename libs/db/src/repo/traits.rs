//! Repository trait definitions
//!
//! These traits define the interface for data access operations.
//! Implementations are provided for PostgreSQL and, for tests and
//! development, in-memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_domain::{
    Application, Event, ExecutionId, ExecutionStatus, QueueTask, QueueTaskId, Resource,
    ResourceId, ResourceState, SpecRecord, StepExecution, StepExecutionId, StepStatus,
    WorkflowExecution, WorkflowSpec,
};

use crate::pagination::{Page, Pagination};
use crate::repo::errors::*;

// =============================================================================
// Input Types
// =============================================================================

/// Input for registering (or refreshing) an application
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub name: String,
    pub team: Option<String>,
    pub environment: Option<String>,
}

/// Input for recording a spec submission
#[derive(Debug, Clone)]
pub struct NewSpec {
    pub app_name: String,
    pub body: serde_json::Value,
    pub submitted_by: Option<String>,
}

/// Input for creating a workflow execution row
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: ExecutionId,
    pub app_name: String,
    pub workflow_name: String,
    pub total_steps: i32,
    pub parent_execution_id: Option<ExecutionId>,
    pub retry_count: i32,
    pub resume_from_step: Option<i32>,
}

/// Input for creating a resource row in `requested` state
#[derive(Debug, Clone)]
pub struct NewResource {
    pub app_name: String,
    pub name: String,
    pub resource_type: String,
    pub execution_id: Option<ExecutionId>,
    pub properties: BTreeMap<String, String>,
    pub fingerprint: String,
}

/// Input for enqueueing a workflow invocation
#[derive(Debug, Clone)]
pub struct NewQueueTask {
    pub app_name: String,
    pub workflow_name: String,
    pub workflow: WorkflowSpec,
    pub metadata: serde_json::Value,
}

/// Terminal outcome reported when releasing a claimed queue task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed,
    Failed { error: String },
}

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for applications and their spec submissions
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    /// Create the application on first submission, or refresh team/environment
    async fn upsert(&self, app: &NewApplication) -> Result<Application, UpsertApplicationError>;

    /// Find an application by name
    async fn find_by_name(&self, name: &str) -> Result<Option<Application>, FindApplicationError>;

    /// List applications with pagination
    async fn list(&self, pagination: Pagination) -> Result<Page<Application>, FindApplicationError>;

    /// Remove an application and its dependent rows
    async fn delete(&self, name: &str) -> Result<(), DeleteApplicationError>;

    /// Record an immutable spec submission and point the app at it
    async fn insert_spec(&self, spec: &NewSpec) -> Result<SpecRecord, InsertSpecError>;

    /// Latest spec submitted for an application, if any
    async fn latest_spec(&self, app_name: &str) -> Result<Option<SpecRecord>, FindApplicationError>;
}

/// Repository for workflow executions and their steps.
///
/// Terminal transitions are conditional updates: a row already in a
/// terminal state is left untouched and the call reports a conflict.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a pending execution row
    async fn create(&self, exec: &NewExecution) -> Result<WorkflowExecution, CreateExecutionError>;

    /// Find an execution by id
    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<WorkflowExecution>, FindExecutionError>;

    /// List executions, optionally filtered by application
    async fn list(
        &self,
        app_name: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<WorkflowExecution>, FindExecutionError>;

    /// pending -> running, stamping started_at
    async fn mark_running(&self, id: &ExecutionId) -> Result<(), UpdateExecutionError>;

    /// running -> terminal status; fails with `AlreadyTerminal` if raced
    async fn finish(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), UpdateExecutionError>;

    /// Insert a step row (pending, or completed when inherited on retry)
    async fn insert_step(&self, step: &StepExecution) -> Result<(), CreateStepError>;

    /// pending -> running
    async fn start_step(&self, id: &StepExecutionId) -> Result<(), UpdateStepError>;

    /// running -> terminal status with outputs/error; guards terminal rows
    async fn finish_step(
        &self,
        id: &StepExecutionId,
        status: StepStatus,
        outputs: &BTreeMap<String, String>,
        error: Option<&str>,
    ) -> Result<(), UpdateStepError>;

    /// All step rows for an execution, ordered by step index
    async fn list_steps(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<StepExecution>, FindExecutionError>;
}

/// Repository for provisioned resources.
///
/// State may only advance along `ResourceState::can_transition_to`;
/// regressions surface as `InvalidTransition` and leave the row unchanged.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Create a resource row in `requested` state, or re-request an
    /// existing logical resource for a new execution
    async fn upsert_requested(&self, res: &NewResource) -> Result<Resource, UpsertResourceError>;

    /// Find by id
    async fn find_by_id(&self, id: &ResourceId) -> Result<Option<Resource>, FindResourceError>;

    /// Find by (application, logical name)
    async fn find_by_name(
        &self,
        app_name: &str,
        name: &str,
    ) -> Result<Option<Resource>, FindResourceError>;

    /// List resources, optionally filtered by type
    async fn list(
        &self,
        resource_type: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<Resource>, FindResourceError>;

    /// All resources of one application
    async fn list_by_app(&self, app_name: &str) -> Result<Vec<Resource>, FindResourceError>;

    /// Advance the lifecycle state, guarded by the allowed-transition set
    async fn transition(
        &self,
        id: &ResourceId,
        to: ResourceState,
        error: Option<&str>,
    ) -> Result<Resource, UpdateResourceError>;

    /// Merge provisioning outputs into the resource properties
    async fn set_properties(
        &self,
        id: &ResourceId,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), UpdateResourceError>;
}

/// Durable FIFO task queue with at-most-one claim semantics.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Durably enqueue a workflow invocation
    async fn enqueue(&self, task: &NewQueueTask) -> Result<QueueTask, EnqueueError>;

    /// Atomically claim the oldest pending task, holding a lease.
    /// Returns `None` when the queue is empty.
    async fn claim(&self, lease: chrono::Duration) -> Result<Option<QueueTask>, ClaimError>;

    /// Extend the lease on a claimed task
    async fn renew_lease(
        &self,
        id: &QueueTaskId,
        lease: chrono::Duration,
    ) -> Result<(), UpdateTaskError>;

    /// Release a claimed task to its terminal status
    async fn release(&self, id: &QueueTaskId, outcome: TaskOutcome) -> Result<(), UpdateTaskError>;

    /// Return stale-leased running tasks to pending, quarantining tasks
    /// that crashed too often. Returns the number of reclaimed tasks.
    async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<u64, ClaimError>;

    /// Find a task by id
    async fn find_by_id(&self, id: &QueueTaskId) -> Result<Option<QueueTask>, ClaimError>;

    /// Find the task whose metadata records the given execution id
    async fn find_by_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<QueueTask>, ClaimError>;
}

/// Append-only durable event log (the bus handles live delivery).
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append an event. Best-effort callers log and continue on error.
    async fn append(&self, event: &Event) -> Result<(), AppendEventError>;

    /// Events for one application, newest first
    async fn list_by_app(
        &self,
        app_name: &str,
        pagination: Pagination,
    ) -> Result<Page<Event>, AppendEventError>;
}
