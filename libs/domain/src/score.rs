//! Score spec document model
//!
//! The user-facing declarative format: an application, its containers, and
//! the resources it requires. Parsed from YAML submissions; the engine only
//! reads the fields the resolver consumes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors parsing a Score spec
#[derive(Debug, Error)]
pub enum ScoreParseError {
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("Spec metadata.name is required")]
    MissingName,
}

/// Root Score spec document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSpec {
    #[serde(default, rename = "apiVersion")]
    pub api_version: Option<String>,

    pub metadata: ScoreMetadata,

    /// Container images keyed by container name
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerSpec>,

    /// Declared resources keyed by logical name
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
}

/// Application identity carried by the spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub name: String,

    #[serde(default)]
    pub team: Option<String>,

    #[serde(default)]
    pub environment: Option<String>,
}

/// A single container declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// A declared resource requirement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource type resolved against the provider registry
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Free-form properties passed to the provisioning workflow
    #[serde(default, alias = "params")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl ScoreSpec {
    /// Parse a Score spec from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScoreParseError> {
        let spec: Self = serde_yml::from_str(yaml)?;
        if spec.metadata.name.trim().is_empty() {
            return Err(ScoreParseError::MissingName);
        }
        Ok(spec)
    }

    /// Application name shorthand.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.metadata.name
    }
}
