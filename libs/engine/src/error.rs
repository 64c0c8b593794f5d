//! Engine error taxonomy
//!
//! Step-level failures stay on the step row and fail the containing group;
//! runner errors terminate the execution; transient store errors are
//! retried with bounded backoff before they surface.

use thiserror::Error;

use conductor_domain::ExecutionId;

use crate::substitution::SubstitutionError;

/// Errors terminating a workflow execution
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("parent execution {parent} is not in a terminal state")]
    ParentNotTerminal { parent: ExecutionId },

    #[error("resume_from_step {resume} is outside the parent's {total} steps")]
    ResumeOutOfRange { resume: i32, total: i32 },

    #[error("no executor registered for step type '{step_type}'")]
    UnknownStepType { step_type: String },

    #[error("workflow input validation failed: {0}")]
    InputValidation(String),

    #[error("step input materialization failed: {0}")]
    Substitution(#[from] SubstitutionError),

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution exceeded its wall-clock timeout")]
    ExecutionTimeout,

    #[error("store error: {0}")]
    Store(String),
}

impl RunnerError {
    /// Short stable code carried on user-visible failures.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExecutionNotFound(_) => "execution_not_found",
            Self::ParentNotTerminal { .. } => "parent_not_terminal",
            Self::ResumeOutOfRange { .. } => "resume_out_of_range",
            Self::UnknownStepType { .. } => "unknown_step_type",
            Self::InputValidation(_) => "input_validation",
            Self::Substitution(_) => "substitution_failed",
            Self::Cancelled => "cancelled",
            Self::ExecutionTimeout => "execution_timeout",
            Self::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RunnerError::Cancelled.code(), "cancelled");
        assert_eq!(RunnerError::ExecutionTimeout.code(), "execution_timeout");
        assert_eq!(
            RunnerError::Store("down".to_string()).code(),
            "store_error"
        );
    }
}
