//! Workflow execution and step execution entities

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{ExecutionStatus, StepStatus};
use crate::ids::{ExecutionId, StepExecutionId};

/// A single run of a workflow, created when a queue task is claimed.
///
/// Retry executions link back to their parent via `parent_execution_id`;
/// `retry_count` is denormalized so readers never walk the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub app_name: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Total number of steps in the workflow definition
    pub total_steps: i32,
    pub error_message: Option<String>,
    pub parent_execution_id: Option<ExecutionId>,
    pub retry_count: i32,
    pub is_retry: bool,
    /// Step index a retry resumes from; steps below it inherit parent outputs
    pub resume_from_step: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// One attempted step within an execution.
///
/// Rows exist only for steps the executor attempted (or inherited on retry);
/// unattempted steps have no row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub execution_id: ExecutionId,
    /// Zero-based position in the workflow's declared step order
    pub step_index: i32,
    pub name: String,
    /// Step type tag dispatched to an executor (terraform, kubernetes, ...)
    pub step_type: String,
    pub status: StepStatus,
    /// Logical resource this step provisions, if any
    pub resource: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Outputs produced by the step executor, available to later steps
    pub outputs: BTreeMap<String, String>,
}

impl StepExecution {
    /// Create a pending step row for an attempt about to start.
    #[must_use]
    pub fn pending(execution_id: ExecutionId, step_index: i32, name: &str, step_type: &str) -> Self {
        Self {
            id: StepExecutionId::new(),
            execution_id,
            step_index,
            name: name.to_string(),
            step_type: step_type.to_string(),
            status: StepStatus::Pending,
            resource: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Bind this step to the logical resource it provisions.
    #[must_use]
    pub fn with_resource(mut self, resource: Option<String>) -> Self {
        self.resource = resource;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_step_has_no_timestamps() {
        let step = StepExecution::pending(ExecutionId::new(), 0, "deploy", "kubernetes");
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.started_at.is_none());
        assert!(step.completed_at.is_none());
        assert!(step.outputs.is_empty());
    }
}
