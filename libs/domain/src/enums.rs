//! All enum types for the Conductor platform
//!
//! These enums are the source of truth and must match the SQL enum types exactly.

use serde::{Deserialize, Serialize};

// =============================================================================
// Execution Status Enums
// =============================================================================

/// Status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status of a single step within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

// =============================================================================
// Resource Lifecycle
// =============================================================================

/// Lifecycle state of a provisioned resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Requested,
    Provisioning,
    Active,
    Failed,
    Terminated,
}

impl ResourceState {
    /// Check if transition to the target state is allowed.
    ///
    /// Allowed: requested -> provisioning -> active | failed,
    /// and active -> terminated. Everything else is a regression.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Requested, Self::Provisioning)
                | (Self::Provisioning, Self::Active)
                | (Self::Provisioning, Self::Failed)
                | (Self::Active, Self::Terminated)
        )
    }

    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Status of a queue task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Quarantined,
}

impl TaskStatus {
    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Quarantined)
    }
}

// =============================================================================
// Providers and Planning
// =============================================================================

/// Category of a provider workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    Provisioner,
    Goldenpath,
}

/// Diff classification of a declared resource relative to persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffClass {
    New,
    Updated,
    Unchanged,
    Removed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_terminal_states() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_resource_transitions() {
        use ResourceState::*;
        assert!(Requested.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Active));
        assert!(Provisioning.can_transition_to(Failed));
        assert!(Active.can_transition_to(Terminated));

        // Regressions are rejected
        assert!(!Active.can_transition_to(Requested));
        assert!(!Active.can_transition_to(Provisioning));
        assert!(!Failed.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Active));
        assert!(!Requested.can_transition_to(Active));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&StepStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let state: ResourceState = serde_json::from_str("\"provisioning\"").unwrap();
        assert_eq!(state, ResourceState::Provisioning);
    }
}
