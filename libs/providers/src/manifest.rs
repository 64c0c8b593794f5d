//! Provider manifest model and structural validation
//!
//! Manifests are YAML documents declaring a provider's identity, the
//! resource types it handles, and the workflows that provision them.
//! Validation rejects missing required fields and unreachable workflows.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use conductor_domain::{WorkflowCategory, WorkflowSpec};

/// Expected manifest kind
const MANIFEST_KIND: &str = "Provider";

// =============================================================================
// Errors
// =============================================================================

/// Manifest validation error with location and suggestion
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ManifestError {
    /// Error message
    pub message: String,

    /// Location in the manifest (e.g. "workflows[2].provisions")
    pub location: Option<String>,

    /// Suggested fix (e.g. "Did you mean 'postgres'?")
    pub suggestion: Option<String>,
}

impl ManifestError {
    /// Create a new manifest error with just a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            suggestion: None,
        }
    }

    /// Add a location to the error
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add a suggestion to the error
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// =============================================================================
// Manifest Types
// =============================================================================

/// Root provider manifest parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ProviderMetadata,

    pub capabilities: ProviderCapabilities,

    #[serde(default)]
    pub workflows: Vec<ManifestWorkflow>,
}

/// Provider identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    /// Provider category, e.g. "database" or "gitops"
    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Resource types a provider handles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    #[serde(rename = "resourceTypes")]
    pub resource_types: Vec<String>,
}

/// A workflow entry in a manifest: the workflow definition plus the
/// resource-type bindings that make it reachable from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestWorkflow {
    #[serde(flatten)]
    pub spec: WorkflowSpec,

    /// Resource type this workflow provisions
    #[serde(default)]
    pub provisions: Option<String>,

    /// Resource type this workflow updates in place
    #[serde(default)]
    pub updates: Option<String>,
}

impl ProviderManifest {
    /// Parse a manifest from YAML without validating it.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }

    /// Validate structural correctness.
    ///
    /// Checks required fields, that every input schema compiles, that every
    /// declared resource type has a provisioning workflow, and that every
    /// provisioner workflow is reachable through a declared type.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.api_version.trim().is_empty() {
            return Err(ManifestError::new("apiVersion is required").with_location("apiVersion"));
        }
        if self.kind != MANIFEST_KIND {
            return Err(ManifestError::new(format!(
                "kind must be '{MANIFEST_KIND}', got '{}'",
                self.kind
            ))
            .with_location("kind"));
        }
        if self.metadata.name.trim().is_empty() {
            return Err(ManifestError::new("metadata.name is required")
                .with_location("metadata.name"));
        }
        if self.capabilities.resource_types.is_empty() {
            return Err(ManifestError::new(
                "capabilities.resourceTypes must declare at least one type",
            )
            .with_location("capabilities.resourceTypes"));
        }
        if self.workflows.is_empty() {
            return Err(ManifestError::new("at least one workflow is required")
                .with_location("workflows"));
        }

        self.validate_workflows()?;
        self.validate_reachability()?;
        Ok(())
    }

    fn validate_workflows(&self) -> Result<(), ManifestError> {
        let mut names = HashSet::new();
        for (idx, workflow) in self.workflows.iter().enumerate() {
            if workflow.spec.name.trim().is_empty() {
                return Err(ManifestError::new("workflow name is required")
                    .with_location(format!("workflows[{idx}].name")));
            }
            if !names.insert(workflow.spec.name.as_str()) {
                return Err(ManifestError::new(format!(
                    "duplicate workflow name '{}'",
                    workflow.spec.name
                ))
                .with_location(format!("workflows[{idx}].name")));
            }
            if workflow.spec.steps.is_empty() {
                return Err(ManifestError::new(format!(
                    "workflow '{}' has no steps",
                    workflow.spec.name
                ))
                .with_location(format!("workflows[{idx}].steps")));
            }
            for (step_idx, step) in workflow.spec.steps.iter().enumerate() {
                if step.step_type.trim().is_empty() {
                    return Err(ManifestError::new(format!(
                        "step '{}' has no type",
                        step.name
                    ))
                    .with_location(format!("workflows[{idx}].steps[{step_idx}].type")));
                }
            }
            if let Some(schema) = &workflow.spec.input_schema {
                if let Err(e) = jsonschema::validator_for(schema) {
                    return Err(ManifestError::new(format!(
                        "workflow '{}' input schema does not compile: {e}",
                        workflow.spec.name
                    ))
                    .with_location(format!("workflows[{idx}].inputSchema")));
                }
            }
        }
        Ok(())
    }

    /// Every declared type needs a provisioner; every provisioner binding
    /// must name a declared type.
    fn validate_reachability(&self) -> Result<(), ManifestError> {
        let declared: HashSet<&str> = self
            .capabilities
            .resource_types
            .iter()
            .map(String::as_str)
            .collect();

        for (idx, workflow) in self.workflows.iter().enumerate() {
            for (field, binding) in [
                ("provisions", &workflow.provisions),
                ("updates", &workflow.updates),
            ] {
                if let Some(bound_type) = binding {
                    if !declared.contains(bound_type.as_str()) {
                        let suggestion = nearest(bound_type, &declared);
                        return Err(ManifestError::new(format!(
                            "workflow '{}' {field} undeclared type '{bound_type}'",
                            workflow.spec.name
                        ))
                        .with_location(format!("workflows[{idx}].{field}"))
                        .with_suggestion(
                            suggestion
                                .map(|s| format!("Did you mean '{s}'?"))
                                .unwrap_or_default(),
                        ));
                    }
                }
            }
        }

        for resource_type in &self.capabilities.resource_types {
            let has_provisioner = self
                .workflows
                .iter()
                .any(|w| w.provisions.as_deref() == Some(resource_type));
            if !has_provisioner {
                return Err(ManifestError::new(format!(
                    "resource type '{resource_type}' has no provisioning workflow"
                ))
                .with_location("workflows"));
            }
        }

        // A provisioner workflow with no binding is unreachable from any
        // resource type; golden paths are invoked by name instead.
        for (idx, workflow) in self.workflows.iter().enumerate() {
            let reachable = workflow.provisions.is_some()
                || workflow.updates.is_some()
                || workflow.spec.category == WorkflowCategory::Goldenpath;
            if !reachable {
                return Err(ManifestError::new(format!(
                    "workflow '{}' is unreachable: it provisions nothing and is not a golden path",
                    workflow.spec.name
                ))
                .with_location(format!("workflows[{idx}]")));
            }
        }

        Ok(())
    }

    /// Provisioning workflow for a resource type, if declared.
    #[must_use]
    pub fn provisioner_for(&self, resource_type: &str) -> Option<&ManifestWorkflow> {
        self.workflows
            .iter()
            .find(|w| w.provisions.as_deref() == Some(resource_type))
    }

    /// Update workflow for a resource type, if declared.
    #[must_use]
    pub fn updater_for(&self, resource_type: &str) -> Option<&ManifestWorkflow> {
        self.workflows
            .iter()
            .find(|w| w.updates.as_deref() == Some(resource_type))
    }
}

/// Find the most similar candidate using Levenshtein distance.
pub(crate) fn nearest<'a>(target: &str, candidates: &HashSet<&'a str>) -> Option<&'a str> {
    let mut best_match: Option<&str> = None;
    let mut best_distance = usize::MAX;

    for &candidate in candidates {
        let distance = strsim::levenshtein(target, candidate);
        // Only suggest if reasonably similar (distance <= 3)
        if distance < best_distance && distance <= 3 {
            best_distance = distance;
            best_match = Some(candidate);
        }
    }

    best_match
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MANIFEST: &str = r#"
apiVersion: conductor.dev/v1
kind: Provider
metadata:
  name: database-team
  version: "2.1.0"
  category: database
capabilities:
  resourceTypes:
    - postgres
    - redis
workflows:
  - name: provision-postgres
    category: provisioner
    provisions: postgres
    steps:
      - name: plan
        type: terraform
      - name: apply
        type: terraform
  - name: update-postgres
    category: provisioner
    updates: postgres
    steps:
      - name: apply
        type: terraform
  - name: provision-redis
    category: provisioner
    provisions: redis
    steps:
      - name: apply
        type: terraform
  - name: db-sandbox
    category: goldenpath
    steps:
      - name: create
        type: kubernetes
"#;

    #[test]
    fn test_parse_and_validate() {
        let manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.metadata.name, "database-team");
        assert_eq!(manifest.capabilities.resource_types.len(), 2);
        assert!(manifest.provisioner_for("postgres").is_some());
        assert!(manifest.updater_for("postgres").is_some());
        assert!(manifest.updater_for("redis").is_none());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.kind = "Widget".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(err.message.contains("kind"));
    }

    #[test]
    fn test_missing_resource_types_rejected() {
        let mut manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.capabilities.resource_types.clear();
        let err = manifest.validate().unwrap_err();
        assert_eq!(
            err.location.as_deref(),
            Some("capabilities.resourceTypes")
        );
    }

    #[test]
    fn test_binding_typo_gets_suggestion() {
        let mut manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.workflows[0].provisions = Some("postgers".to_string());
        let err = manifest.validate().unwrap_err();
        assert!(err.suggestion.as_ref().is_some_and(|s| s.contains("postgres")));
    }

    #[test]
    fn test_type_without_provisioner_rejected() {
        let mut manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.capabilities.resource_types.push("s3-bucket".to_string());
        let err = manifest.validate().unwrap_err();
        assert!(err.message.contains("s3-bucket"));
    }

    #[test]
    fn test_unreachable_workflow_rejected() {
        let mut manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.workflows[1].updates = None;
        let err = manifest.validate().unwrap_err();
        assert!(err.message.contains("unreachable"));
    }

    #[test]
    fn test_bad_input_schema_rejected() {
        let mut manifest = ProviderManifest::from_yaml(MANIFEST).unwrap();
        manifest.workflows[0].spec.input_schema =
            Some(serde_json::json!({"type": "not-a-real-type"}));
        let err = manifest.validate().unwrap_err();
        assert!(err.message.contains("input schema"));
    }
}
