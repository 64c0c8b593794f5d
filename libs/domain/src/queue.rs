//! Queue task entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::TaskStatus;
use crate::ids::QueueTaskId;
use crate::workflow::WorkflowSpec;

/// A durable workflow invocation awaiting (or undergoing) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: QueueTaskId,
    pub app_name: String,
    pub workflow_name: String,
    /// The full workflow definition to execute
    pub workflow: WorkflowSpec,
    /// Submission metadata (submitter, trigger, retry linkage)
    pub metadata: serde_json::Value,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Lease expiry while claimed; stale leases make the task reclaimable
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Unclean releases observed; drives quarantine
    pub crash_count: i32,
    pub error_message: Option<String>,
}
