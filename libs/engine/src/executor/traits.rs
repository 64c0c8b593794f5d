//! Step executor contract

use std::collections::BTreeMap;

use async_trait::async_trait;

use conductor_domain::{ExecutionId, StepSpec};

/// Context handed to every step execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: ExecutionId,
    pub app_name: String,
    pub environment: Option<String>,
    pub submitter: Option<String>,
    /// Zero-based index of the step in the workflow
    pub step_index: usize,
}

/// What went wrong, for observability. Timeouts and cancellations are
/// reported distinctly from ordinary failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepErrorKind {
    Failed,
    Timeout,
    Cancelled,
}

/// A failed step execution. May carry the outputs produced before the
/// failure; they are persisted with the failed step row.
#[derive(Debug)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
    pub partial_outputs: BTreeMap<String, String>,
}

impl StepError {
    /// Ordinary failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Failed,
            message: message.into(),
            partial_outputs: BTreeMap::new(),
        }
    }

    /// Failure carrying outputs produced before the error.
    #[must_use]
    pub fn failed_with_outputs(
        message: impl Into<String>,
        partial_outputs: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind: StepErrorKind::Failed,
            message: message.into(),
            partial_outputs,
        }
    }

    /// The step exceeded its timeout.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Timeout,
            message: message.into(),
            partial_outputs: BTreeMap::new(),
        }
    }

    /// The step was cancelled by the execution.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: StepErrorKind::Cancelled,
            message: "step cancelled".to_string(),
            partial_outputs: BTreeMap::new(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            StepErrorKind::Failed => write!(f, "{}", self.message),
            StepErrorKind::Timeout => write!(f, "timed out: {}", self.message),
            StepErrorKind::Cancelled => write!(f, "cancelled: {}", self.message),
        }
    }
}

/// Result of a step execution: the outputs map, or an error with whatever
/// partial outputs were produced.
pub type StepOutcome = Result<BTreeMap<String, String>, StepError>;

/// Contract for typed step executors.
///
/// Implementations must not assume they are retried; the workflow layer
/// owns retry decisions.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// The step type tag this executor handles.
    fn step_type(&self) -> &str;

    /// Execute the step with fully materialized inputs.
    async fn execute(
        &self,
        step: &StepSpec,
        inputs: &BTreeMap<String, serde_json::Value>,
        ctx: &StepContext,
    ) -> StepOutcome;
}
