//! Resource resolver
//!
//! Translates a Score spec into a dependency-ordered provisioning plan:
//! each declared resource is matched to a provider workflow and classified
//! as new, updated, unchanged, or removed relative to persisted state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use petgraph::algo;
use petgraph::graph::DiGraph;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use conductor_db::repo::{NewResource, ResourceRepository};
use conductor_domain::{DiffClass, ExecutionId, ResourceState, ScoreSpec};

use crate::plan::{Plan, PlanItem};
use crate::registry::{ProviderRegistry, RegistryError};

/// Matches `${resources.<name>.<attribute>}` inside property values.
static RESOURCE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{resources\.([A-Za-z0-9_-]+)\.[A-Za-z0-9_.-]+\}").expect("valid regex"));

/// Matches credential references that must never be compared by value.
static SECRET_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{secrets?\.[A-Za-z0-9_.-]+\}$").expect("valid regex"));

// =============================================================================
// Errors
// =============================================================================

/// Resolution failures abort the whole submission.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("resource '{resource}' changed type from '{from}' to '{to}'; type changes require a new resource")]
    TypeChanged {
        resource: String,
        from: String,
        to: String,
    },

    #[error("resource '{resource}' of type '{resource_type}' was updated but its provider declares no update workflow")]
    UpdateUnsupported {
        resource: String,
        resource_type: String,
    },

    #[error("resource dependencies form a cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("resource '{resource}' references undeclared resource '{depends_on}'")]
    UnknownDependency { resource: String, depends_on: String },

    #[error("store error: {0}")]
    Store(String),
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves Score specs against the provider registry and persisted state.
pub struct Resolver {
    registry: Arc<ProviderRegistry>,
    resources: Arc<dyn ResourceRepository>,
}

impl Resolver {
    /// Create a new resolver
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, resources: Arc<dyn ResourceRepository>) -> Self {
        Self {
            registry,
            resources,
        }
    }

    /// Produce the provisioning plan for a spec.
    ///
    /// `execution_id` is allocated up front by the caller; new and updated
    /// resource rows are bound to it in `requested` state.
    pub async fn resolve(
        &self,
        spec: &ScoreSpec,
        execution_id: ExecutionId,
    ) -> Result<Plan, ResolutionError> {
        let app_name = spec.app_name();
        let ordered = dependency_order(spec)?;

        let mut items = Vec::with_capacity(ordered.len());
        for resource_name in &ordered {
            let declared = &spec.resources[resource_name.as_str()];
            let normalized = normalize_properties(&declared.properties);
            let fingerprint = fingerprint(&declared.resource_type, &normalized);

            let persisted = self
                .resources
                .find_by_name(app_name, resource_name)
                .await
                .map_err(|e| ResolutionError::Store(e.to_string()))?;

            let diff = match &persisted {
                None => DiffClass::New,
                Some(existing) if existing.state == ResourceState::Terminated => DiffClass::New,
                Some(existing) => {
                    if existing.resource_type != declared.resource_type {
                        return Err(ResolutionError::TypeChanged {
                            resource: resource_name.clone(),
                            from: existing.resource_type.clone(),
                            to: declared.resource_type.clone(),
                        });
                    }
                    if existing.state != ResourceState::Active {
                        // A failed or never-finished resource is
                        // re-provisioned regardless of its fingerprint.
                        DiffClass::New
                    } else if existing.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                        DiffClass::Unchanged
                    } else {
                        DiffClass::Updated
                    }
                }
            };

            let (provider, workflow) = match diff {
                DiffClass::New => {
                    let resolved = self.registry.lookup(&declared.resource_type).await?;
                    (Some(resolved.provider), Some(resolved.workflow))
                }
                DiffClass::Updated => {
                    let resolved = self
                        .registry
                        .lookup_update(&declared.resource_type)
                        .await?
                        .ok_or_else(|| ResolutionError::UpdateUnsupported {
                            resource: resource_name.clone(),
                            resource_type: declared.resource_type.clone(),
                        })?;
                    (Some(resolved.provider), Some(resolved.workflow))
                }
                DiffClass::Unchanged | DiffClass::Removed => {
                    // Still resolve the owner so an unchanged resource with
                    // a vanished provider surfaces at plan time.
                    let resolved = self.registry.lookup(&declared.resource_type).await?;
                    (Some(resolved.provider), None)
                }
            };

            let resource_id = if workflow.is_some() {
                let row = self
                    .resources
                    .upsert_requested(&NewResource {
                        app_name: app_name.to_string(),
                        name: resource_name.clone(),
                        resource_type: declared.resource_type.clone(),
                        execution_id: Some(execution_id),
                        properties: normalized.clone(),
                        fingerprint: fingerprint.clone(),
                    })
                    .await
                    .map_err(|e| ResolutionError::Store(e.to_string()))?;
                Some(row.id)
            } else {
                persisted.map(|p| p.id)
            };

            items.push(PlanItem {
                name: resource_name.clone(),
                resource_type: declared.resource_type.clone(),
                diff,
                provider,
                workflow,
                resource_id,
                properties: normalized,
            });
        }

        // Persisted resources no longer declared are reported as removed;
        // deprovisioning is not scheduled here.
        let declared_names: HashSet<&String> = spec.resources.keys().collect();
        let existing = self
            .resources
            .list_by_app(app_name)
            .await
            .map_err(|e| ResolutionError::Store(e.to_string()))?;
        for resource in existing {
            if declared_names.contains(&resource.name)
                || resource.state == ResourceState::Terminated
            {
                continue;
            }
            items.push(PlanItem {
                name: resource.name.clone(),
                resource_type: resource.resource_type.clone(),
                diff: DiffClass::Removed,
                provider: None,
                workflow: None,
                resource_id: Some(resource.id),
                properties: BTreeMap::new(),
            });
        }

        Ok(Plan {
            app_name: app_name.to_string(),
            environment: spec.metadata.environment.clone(),
            items,
        })
    }
}

// =============================================================================
// Dependency Ordering
// =============================================================================

/// Order declared resources so referenced resources precede referrers.
///
/// An edge A -> B means B's properties reference `${resources.A.*}`.
fn dependency_order(spec: &ScoreSpec) -> Result<Vec<String>, ResolutionError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices = HashMap::new();

    for name in spec.resources.keys() {
        let idx = graph.add_node(name.as_str());
        indices.insert(name.as_str(), idx);
    }

    for (name, declared) in &spec.resources {
        for dependency in referenced_resources(&declared.properties) {
            let Some(&dep_idx) = indices.get(dependency.as_str()) else {
                return Err(ResolutionError::UnknownDependency {
                    resource: name.clone(),
                    depends_on: dependency,
                });
            };
            graph.add_edge(dep_idx, indices[name.as_str()], ());
        }
    }

    match algo::toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|idx| graph[idx].to_string()).collect()),
        Err(_) => {
            let sccs = algo::kosaraju_scc(&graph);
            let path: Vec<String> = sccs
                .iter()
                .find(|scc| scc.len() > 1)
                .map(|scc| scc.iter().map(|&idx| graph[idx].to_string()).collect())
                .unwrap_or_default();
            Err(ResolutionError::DependencyCycle { path })
        }
    }
}

/// Resource names referenced by `${resources.<name>.*}` in any property.
fn referenced_resources(properties: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for value in properties.values() {
        scan_value(value, &mut |text| {
            for capture in RESOURCE_REF.captures_iter(text) {
                let name = capture[1].to_string();
                if seen.insert(name.clone()) {
                    found.push(name);
                }
            }
        });
    }
    found
}

fn scan_value(value: &serde_json::Value, visit: &mut impl FnMut(&str)) {
    match value {
        serde_json::Value::String(s) => visit(s),
        serde_json::Value::Array(items) => {
            for item in items {
                scan_value(item, visit);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                scan_value(item, visit);
            }
        }
        _ => {}
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize declared properties for comparison: keys ordered, strings
/// trimmed, credential references replaced by stable fingerprints.
fn normalize_properties(
    properties: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    properties
        .iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            let text = if SECRET_REF.is_match(&text) {
                format!("fp:{}", hex_digest(&text))
            } else {
                text
            };
            (key.clone(), text)
        })
        .collect()
}

/// Stable digest over the declared type and normalized properties.
fn fingerprint(resource_type: &str, normalized: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_type.as_bytes());
    for (key, value) in normalized {
        hasher.update([0]);
        hasher.update(key.as_bytes());
        hasher.update([1]);
        hasher.update(value.as_bytes());
    }
    hex(&hasher.finalize())
}

fn hex_digest(text: &str) -> String {
    hex(&Sha256::digest(text.as_bytes()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_db::repo::InMemoryResourceRepository;
    use conductor_domain::ResourceSpec;
    use std::collections::HashMap as StdHashMap;

    use crate::manifest::ProviderManifest;

    fn registry() -> Arc<ProviderRegistry> {
        let yaml = r#"
apiVersion: conductor.dev/v1
kind: Provider
metadata:
  name: platform
capabilities:
  resourceTypes: [postgres, redis, k8s-deploy]
workflows:
  - name: provision-postgres
    category: provisioner
    provisions: postgres
    steps: [{name: apply, type: terraform}]
  - name: update-postgres
    category: provisioner
    updates: postgres
    steps: [{name: apply, type: terraform}]
  - name: provision-redis
    category: provisioner
    provisions: redis
    steps: [{name: apply, type: terraform}]
  - name: provision-k8s-deploy
    category: provisioner
    provisions: k8s-deploy
    steps: [{name: apply, type: kubernetes}]
"#;
        let manifest = ProviderManifest::from_yaml(yaml).unwrap();
        Arc::new(ProviderRegistry::new(vec![manifest], StdHashMap::new()).unwrap())
    }

    fn spec(resources: &[(&str, &str, &[(&str, &str)])]) -> ScoreSpec {
        let yaml_resources: BTreeMap<String, ResourceSpec> = resources
            .iter()
            .map(|(name, resource_type, props)| {
                (
                    (*name).to_string(),
                    ResourceSpec {
                        resource_type: (*resource_type).to_string(),
                        properties: props
                            .iter()
                            .map(|(k, v)| ((*k).to_string(), serde_json::json!(v)))
                            .collect(),
                    },
                )
            })
            .collect();
        ScoreSpec {
            api_version: None,
            metadata: conductor_domain::ScoreMetadata {
                name: "billing".to_string(),
                team: None,
                environment: Some("staging".to_string()),
            },
            containers: BTreeMap::new(),
            resources: yaml_resources,
        }
    }

    #[tokio::test]
    async fn test_dependency_ordering() {
        let resolver = Resolver::new(registry(), Arc::new(InMemoryResourceRepository::new()));
        let spec = spec(&[
            ("cache", "redis", &[]),
            (
                "worker",
                "k8s-deploy",
                &[("db_url", "${resources.app-db.connection_string}")],
            ),
            ("app-db", "postgres", &[]),
        ]);

        let plan = resolver.resolve(&spec, ExecutionId::new()).await.unwrap();
        let order: Vec<&str> = plan.items.iter().map(|i| i.name.as_str()).collect();

        let db_pos = order.iter().position(|n| *n == "app-db").unwrap();
        let worker_pos = order.iter().position(|n| *n == "worker").unwrap();
        assert!(db_pos < worker_pos, "app-db must precede worker: {order:?}");
        assert!(order.contains(&"cache"));
        assert!(plan.items.iter().all(|i| i.diff == DiffClass::New));
    }

    #[tokio::test]
    async fn test_cycle_is_fatal() {
        let resolver = Resolver::new(registry(), Arc::new(InMemoryResourceRepository::new()));
        let spec = spec(&[
            ("a", "postgres", &[("ref", "${resources.b.x}")]),
            ("b", "postgres", &[("ref", "${resources.a.x}")]),
        ]);

        let err = resolver.resolve(&spec, ExecutionId::new()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::DependencyCycle { .. }));
    }

    #[tokio::test]
    async fn test_unknown_dependency_is_fatal() {
        let resolver = Resolver::new(registry(), Arc::new(InMemoryResourceRepository::new()));
        let spec = spec(&[("a", "postgres", &[("ref", "${resources.ghost.x}")])]);

        let err = resolver.resolve(&spec, ExecutionId::new()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownDependency { .. }));
    }

    /// Drive a requested resource to active, as the executor would.
    async fn activate(resources: &InMemoryResourceRepository, app: &str, name: &str) {
        let resource = resources.find_by_name(app, name).await.unwrap().unwrap();
        resources
            .transition(&resource.id, ResourceState::Provisioning, None)
            .await
            .unwrap();
        resources
            .transition(&resource.id, ResourceState::Active, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_spec_produces_no_work() {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let resolver = Resolver::new(registry(), resources.clone());
        let spec = spec(&[("app-db", "postgres", &[("size", "small")])]);

        let first = resolver.resolve(&spec, ExecutionId::new()).await.unwrap();
        assert!(first.has_work());
        activate(&resources, "billing", "app-db").await;

        let second = resolver.resolve(&spec, ExecutionId::new()).await.unwrap();
        assert!(!second.has_work());
        assert!(second
            .items
            .iter()
            .all(|i| i.diff == DiffClass::Unchanged));
    }

    #[tokio::test]
    async fn test_failed_resource_is_reprovisioned() {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let resolver = Resolver::new(registry(), resources.clone());
        let spec = spec(&[("app-db", "postgres", &[("size", "small")])]);

        resolver.resolve(&spec, ExecutionId::new()).await.unwrap();
        let row = resources.find_by_name("billing", "app-db").await.unwrap().unwrap();
        resources
            .transition(&row.id, ResourceState::Provisioning, None)
            .await
            .unwrap();
        resources
            .transition(&row.id, ResourceState::Failed, Some("boom"))
            .await
            .unwrap();

        // Same fingerprint, but the resource never became active.
        let plan = resolver.resolve(&spec, ExecutionId::new()).await.unwrap();
        assert_eq!(plan.items[0].diff, DiffClass::New);
        assert!(plan.has_work());
    }

    #[tokio::test]
    async fn test_update_requires_update_workflow() {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let resolver = Resolver::new(registry(), resources.clone());

        let v1 = spec(&[("cache", "redis", &[("size", "small")])]);
        resolver.resolve(&v1, ExecutionId::new()).await.unwrap();
        activate(&resources, "billing", "cache").await;

        // redis has no update workflow; a property change is rejected.
        let v2 = spec(&[("cache", "redis", &[("size", "large")])]);
        let err = resolver.resolve(&v2, ExecutionId::new()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::UpdateUnsupported { .. }));

        // postgres declares one; the update path resolves.
        let v1 = spec(&[("app-db", "postgres", &[("size", "small")])]);
        resolver.resolve(&v1, ExecutionId::new()).await.unwrap();
        activate(&resources, "billing", "app-db").await;
        let v2 = spec(&[("app-db", "postgres", &[("size", "large")])]);
        let plan = resolver.resolve(&v2, ExecutionId::new()).await.unwrap();
        let item = plan.items.iter().find(|i| i.name == "app-db").unwrap();
        assert_eq!(item.diff, DiffClass::Updated);
        assert_eq!(
            item.workflow.as_ref().map(|w| w.name.as_str()),
            Some("update-postgres")
        );
    }

    #[tokio::test]
    async fn test_type_change_is_fatal() {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let resolver = Resolver::new(registry(), resources.clone());

        let v1 = spec(&[("store", "redis", &[])]);
        resolver.resolve(&v1, ExecutionId::new()).await.unwrap();

        let v2 = spec(&[("store", "postgres", &[])]);
        let err = resolver.resolve(&v2, ExecutionId::new()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::TypeChanged { .. }));
    }

    #[tokio::test]
    async fn test_removed_resources_reported() {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let resolver = Resolver::new(registry(), resources.clone());

        let v1 = spec(&[("cache", "redis", &[]), ("app-db", "postgres", &[])]);
        resolver.resolve(&v1, ExecutionId::new()).await.unwrap();

        let v2 = spec(&[("app-db", "postgres", &[])]);
        let plan = resolver.resolve(&v2, ExecutionId::new()).await.unwrap();
        let removed = plan
            .items
            .iter()
            .find(|i| i.diff == DiffClass::Removed)
            .unwrap();
        assert_eq!(removed.name, "cache");
        assert!(!removed.has_work());
    }

    #[test]
    fn test_secret_refs_fingerprinted_not_compared() {
        let props = BTreeMap::from([(
            "password".to_string(),
            serde_json::json!("${secrets.db-password}"),
        )]);
        let normalized = normalize_properties(&props);
        assert!(normalized["password"].starts_with("fp:"));
        assert!(!normalized["password"].contains("db-password"));
    }

    #[test]
    fn test_fingerprint_stable_under_key_order() {
        let a = BTreeMap::from([
            ("x".to_string(), "1".to_string()),
            ("y".to_string(), "2".to_string()),
        ]);
        assert_eq!(fingerprint("postgres", &a), fingerprint("postgres", &a));
        assert_ne!(fingerprint("postgres", &a), fingerprint("redis", &a));
    }
}
