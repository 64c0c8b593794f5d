//! Workflow definition documents
//!
//! A workflow is an ordered list of typed steps with optional parallelism
//! markers. Definitions come from provider manifests or explicit
//! invocations; the grouper turns them into execution groups.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::enums::WorkflowCategory;

/// A workflow definition: what the executor runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,

    #[serde(default = "WorkflowSpec::default_category")]
    pub category: WorkflowCategory,

    /// JSON Schema validated against invocation inputs, if declared
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,

    pub steps: Vec<StepSpec>,
}

impl WorkflowSpec {
    const fn default_category() -> WorkflowCategory {
        WorkflowCategory::Provisioner
    }
}

/// One step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    /// Executor type tag (terraform, kubernetes, ansible, validation, ...)
    #[serde(rename = "type")]
    pub step_type: String,

    /// Raw step inputs; `${...}` references are materialized at dispatch
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,

    /// Join the synthetic parallel group of adjacent parallel steps
    #[serde(default)]
    pub parallel: bool,

    /// Explicit phase number; wins over `parallel` when both are set
    #[serde(default, rename = "parallelGroup")]
    pub parallel_group: Option<u32>,

    /// Per-step timeout override in minutes
    #[serde(default, rename = "timeoutMinutes")]
    pub timeout_minutes: Option<u64>,

    /// Logical resource this step provisions, if any
    #[serde(default)]
    pub resource: Option<String>,
}

impl StepSpec {
    /// Minimal step for tests and programmatic construction.
    #[must_use]
    pub fn new(name: &str, step_type: &str) -> Self {
        Self {
            name: name.to_string(),
            step_type: step_type.to_string(),
            inputs: BTreeMap::new(),
            parallel: false,
            parallel_group: None,
            timeout_minutes: None,
            resource: None,
        }
    }

    /// Builder-style parallel marker.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Builder-style phase assignment.
    #[must_use]
    pub fn in_group(mut self, group: u32) -> Self {
        self.parallel_group = Some(group);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_workflow_yaml() {
        let yaml = r#"
name: provision-postgres
category: provisioner
steps:
  - name: validate
    type: validation
  - name: apply
    type: terraform
    parallelGroup: 1
    timeoutMinutes: 30
    inputs:
      size: ${context.size}
  - name: smoke
    type: validation
    parallel: true
"#;
        let wf: WorkflowSpec = serde_yml::from_str(yaml).unwrap();
        assert_eq!(wf.name, "provision-postgres");
        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[1].parallel_group, Some(1));
        assert_eq!(wf.steps[1].timeout_minutes, Some(30));
        assert!(wf.steps[2].parallel);
    }

    #[test]
    fn test_category_defaults_to_provisioner() {
        let yaml = "name: wf\nsteps: []\n";
        let wf: WorkflowSpec = serde_yml::from_str(yaml).unwrap();
        assert_eq!(wf.category, WorkflowCategory::Provisioner);
    }
}
