//! Provider registry
//!
//! Maps declared resource types to provider workflows. Built at startup
//! from validated manifests; reloads build a complete new snapshot and
//! swap it atomically, so a failed reload leaves the old registry serving.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use conductor_domain::{WorkflowCategory, WorkflowSpec};

use crate::manifest::{nearest, ManifestError, ProviderManifest};

// =============================================================================
// Errors
// =============================================================================

/// Registry lookup and reload errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no provider handles resource type '{resource_type}'")]
    UnknownType {
        resource_type: String,
        suggestion: Option<String>,
    },

    #[error("resource type '{resource_type}' is claimed by multiple providers ({providers:?}) and no default is configured")]
    AmbiguousType {
        resource_type: String,
        providers: Vec<String>,
    },

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("golden path not found: {0}")]
    GoldenPathNotFound(String),

    #[error("invalid manifest for provider '{provider}': {error}")]
    InvalidManifest {
        provider: String,
        #[source]
        error: ManifestError,
    },

    #[error("configured default provider '{provider}' for type '{resource_type}' is not registered")]
    UnknownDefault {
        resource_type: String,
        provider: String,
    },
}

// =============================================================================
// Lookup Result
// =============================================================================

/// Result of resolving a resource type: the owning provider and the
/// workflow that provisions it.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub provider: String,
    pub workflow: WorkflowSpec,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of all loaded providers. Replaced wholesale on reload.
#[derive(Debug)]
struct Snapshot {
    providers: HashMap<String, Arc<ProviderManifest>>,
    /// resource type -> provider names claiming it
    by_type: HashMap<String, Vec<String>>,
}

impl Snapshot {
    fn build(
        manifests: Vec<ProviderManifest>,
        defaults: &HashMap<String, String>,
    ) -> Result<Self, RegistryError> {
        let mut providers = HashMap::new();
        let mut by_type: HashMap<String, Vec<String>> = HashMap::new();

        for manifest in manifests {
            manifest
                .validate()
                .map_err(|error| RegistryError::InvalidManifest {
                    provider: manifest.metadata.name.clone(),
                    error,
                })?;

            let name = manifest.metadata.name.clone();
            for resource_type in &manifest.capabilities.resource_types {
                by_type
                    .entry(resource_type.clone())
                    .or_default()
                    .push(name.clone());
            }
            providers.insert(name, Arc::new(manifest));
        }

        // Defaults must point at registered claimants so a contested type
        // never resolves silently to a missing provider.
        for (resource_type, provider) in defaults {
            let claimants = by_type.get(resource_type);
            if !claimants.is_some_and(|c| c.contains(provider)) {
                return Err(RegistryError::UnknownDefault {
                    resource_type: resource_type.clone(),
                    provider: provider.clone(),
                });
            }
        }

        Ok(Self { providers, by_type })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Copy-on-reload provider registry
#[derive(Debug)]
pub struct ProviderRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
    /// Explicit precedence: resource type -> provider name
    defaults: HashMap<String, String>,
}

impl ProviderRegistry {
    /// Build a registry from validated manifests.
    pub fn new(
        manifests: Vec<ProviderManifest>,
        defaults: HashMap<String, String>,
    ) -> Result<Self, RegistryError> {
        let snapshot = Snapshot::build(manifests, &defaults)?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            defaults,
        })
    }

    /// Empty registry, useful before the first load and in tests.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                providers: HashMap::new(),
                by_type: HashMap::new(),
            })),
            defaults: HashMap::new(),
        }
    }

    /// Atomically replace the registry contents.
    ///
    /// Validation failures leave the current snapshot serving and surface
    /// the error to the caller.
    pub async fn reload(&self, manifests: Vec<ProviderManifest>) -> Result<(), RegistryError> {
        let next = Snapshot::build(manifests, &self.defaults)?;
        *self.snapshot.write().await = Arc::new(next);
        Ok(())
    }

    /// Resolve a resource type to its provisioning workflow.
    pub async fn lookup(&self, resource_type: &str) -> Result<ResolvedWorkflow, RegistryError> {
        let snapshot = self.snapshot.read().await.clone();
        let provider = self.owner_of(&snapshot, resource_type)?;

        let manifest = &snapshot.providers[&provider];
        let workflow = manifest
            .provisioner_for(resource_type)
            .expect("validated manifest has a provisioner per declared type");

        Ok(ResolvedWorkflow {
            provider,
            workflow: workflow.spec.clone(),
        })
    }

    /// Resolve a resource type to its update workflow, if the provider
    /// declares one.
    pub async fn lookup_update(
        &self,
        resource_type: &str,
    ) -> Result<Option<ResolvedWorkflow>, RegistryError> {
        let snapshot = self.snapshot.read().await.clone();
        let provider = self.owner_of(&snapshot, resource_type)?;

        let manifest = &snapshot.providers[&provider];
        Ok(manifest.updater_for(resource_type).map(|w| ResolvedWorkflow {
            provider,
            workflow: w.spec.clone(),
        }))
    }

    /// Find a golden-path workflow by name across all providers.
    pub async fn golden_path(&self, name: &str) -> Result<ResolvedWorkflow, RegistryError> {
        let snapshot = self.snapshot.read().await.clone();
        for (provider, manifest) in &snapshot.providers {
            for workflow in &manifest.workflows {
                if workflow.spec.category == WorkflowCategory::Goldenpath
                    && workflow.spec.name == name
                {
                    return Ok(ResolvedWorkflow {
                        provider: provider.clone(),
                        workflow: workflow.spec.clone(),
                    });
                }
            }
        }
        Err(RegistryError::GoldenPathNotFound(name.to_string()))
    }

    /// All loaded provider manifests, sorted by name.
    pub async fn providers(&self) -> Vec<Arc<ProviderManifest>> {
        let snapshot = self.snapshot.read().await;
        let mut all: Vec<Arc<ProviderManifest>> = snapshot.providers.values().cloned().collect();
        all.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        all
    }

    /// One provider manifest by name.
    pub async fn provider(&self, name: &str) -> Result<Arc<ProviderManifest>, RegistryError> {
        self.snapshot
            .read()
            .await
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound(name.to_string()))
    }

    fn owner_of(&self, snapshot: &Snapshot, resource_type: &str) -> Result<String, RegistryError> {
        let Some(claimants) = snapshot.by_type.get(resource_type) else {
            let known: HashSet<&str> = snapshot.by_type.keys().map(String::as_str).collect();
            return Err(RegistryError::UnknownType {
                resource_type: resource_type.to_string(),
                suggestion: nearest(resource_type, &known).map(String::from),
            });
        };

        match claimants.as_slice() {
            [single] => Ok(single.clone()),
            several => {
                if let Some(default) = self.defaults.get(resource_type) {
                    return Ok(default.clone());
                }
                let mut providers: Vec<String> = several.to_vec();
                providers.sort();
                Err(RegistryError::AmbiguousType {
                    resource_type: resource_type.to_string(),
                    providers,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(provider: &str, resource_type: &str) -> ProviderManifest {
        let yaml = format!(
            r#"
apiVersion: conductor.dev/v1
kind: Provider
metadata:
  name: {provider}
capabilities:
  resourceTypes: [{resource_type}]
workflows:
  - name: provision-{resource_type}
    category: provisioner
    provisions: {resource_type}
    steps:
      - name: apply
        type: terraform
"#
        );
        ProviderManifest::from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_resolves_provisioner() {
        let registry =
            ProviderRegistry::new(vec![manifest("db-team", "postgres")], HashMap::new()).unwrap();

        let resolved = registry.lookup("postgres").await.unwrap();
        assert_eq!(resolved.provider, "db-team");
        assert_eq!(resolved.workflow.name, "provision-postgres");
    }

    #[tokio::test]
    async fn test_unknown_type_suggests_nearest() {
        let registry =
            ProviderRegistry::new(vec![manifest("db-team", "postgres")], HashMap::new()).unwrap();

        let err = registry.lookup("postgers").await.unwrap_err();
        match err {
            RegistryError::UnknownType { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("postgres"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_contested_type_requires_default() {
        let manifests = vec![manifest("team-a", "postgres"), manifest("team-b", "postgres")];

        let registry = ProviderRegistry::new(manifests.clone(), HashMap::new()).unwrap();
        let err = registry.lookup("postgres").await.unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousType { .. }));

        let defaults = HashMap::from([("postgres".to_string(), "team-b".to_string())]);
        let registry = ProviderRegistry::new(manifests, defaults).unwrap();
        let resolved = registry.lookup("postgres").await.unwrap();
        assert_eq!(resolved.provider, "team-b");
    }

    #[tokio::test]
    async fn test_reload_is_atomic_on_failure() {
        let registry =
            ProviderRegistry::new(vec![manifest("db-team", "postgres")], HashMap::new()).unwrap();

        let mut broken = manifest("db-team", "redis");
        broken.workflows.clear();
        let err = registry.reload(vec![broken]).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidManifest { .. }));

        // Old snapshot still serves.
        assert!(registry.lookup("postgres").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_default_rejected() {
        let defaults = HashMap::from([("postgres".to_string(), "ghost-team".to_string())]);
        let err = ProviderRegistry::new(vec![manifest("db-team", "postgres")], defaults)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDefault { .. }));
    }
}
