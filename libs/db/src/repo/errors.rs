//! Per-operation repository errors
//!
//! Each repository operation has its own error type for precise error handling.

use conductor_domain::{ExecutionId, QueueTaskId, ResourceId, StepExecutionId};
use thiserror::Error;

// =============================================================================
// Application Repository Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum UpsertApplicationError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindApplicationError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DeleteApplicationError {
    #[error("application not found: {0}")]
    NotFound(String),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum InsertSpecError {
    #[error("application not found: {0}")]
    ApplicationNotFound(String),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

// =============================================================================
// Execution Repository Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum CreateExecutionError {
    #[error("parent execution not found: {0}")]
    ParentNotFound(ExecutionId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindExecutionError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateExecutionError {
    #[error("execution not found: {0}")]
    NotFound(ExecutionId),
    #[error("execution already in a terminal state: {0}")]
    AlreadyTerminal(ExecutionId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateStepError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateStepError {
    #[error("step not found: {0}")]
    NotFound(StepExecutionId),
    #[error("step already in a terminal state: {0}")]
    AlreadyTerminal(StepExecutionId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

// =============================================================================
// Resource Repository Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum UpsertResourceError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindResourceError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateResourceError {
    #[error("resource not found: {0}")]
    NotFound(ResourceId),
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

// =============================================================================
// Queue Repository Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("task payload corrupt: {0}")]
    CorruptPayload(String),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateTaskError {
    #[error("task not found: {0}")]
    NotFound(QueueTaskId),
    #[error("task not claimed by this worker: {0}")]
    NotClaimed(QueueTaskId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

// =============================================================================
// Event Repository Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum AppendEventError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}
