//! Application graph projection and export
//!
//! Projects an application's spec, executions, steps, and resources into
//! the node/edge view consumed by the web UI and export endpoints. The
//! graph is derived on demand; the store stays the source of truth.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use conductor_db::repo::{ApplicationRepository, ExecutionRepository, ResourceRepository};
use conductor_db::Pagination;
use conductor_domain::{AppGraph, EdgeKind, GraphEdge, GraphNode, NodeKind, ScoreSpec};

static RESOURCE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{resources\.([A-Za-z0-9_-]+)\.").expect("valid regex"));

/// Executions included per application view
const EXECUTION_WINDOW: i64 = 100;

// =============================================================================
// Errors
// =============================================================================

/// Projection errors
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("application not found: {0}")]
    AppNotFound(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Export errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format '{0}'")]
    UnknownFormat(String),

    #[error("format '{0}' requires an external rasterizer and is not supported")]
    Unsupported(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =============================================================================
// Projection
// =============================================================================

/// Builds application graphs from the store.
pub struct GraphProjector {
    apps: Arc<dyn ApplicationRepository>,
    executions: Arc<dyn ExecutionRepository>,
    resources: Arc<dyn ResourceRepository>,
}

impl GraphProjector {
    /// Create a new projector
    #[must_use]
    pub fn new(
        apps: Arc<dyn ApplicationRepository>,
        executions: Arc<dyn ExecutionRepository>,
        resources: Arc<dyn ResourceRepository>,
    ) -> Self {
        Self {
            apps,
            executions,
            resources,
        }
    }

    /// Project the full graph for one application.
    pub async fn project(&self, app_name: &str) -> Result<AppGraph, ProjectionError> {
        let app = self
            .apps
            .find_by_name(app_name)
            .await
            .map_err(|e| ProjectionError::Store(e.to_string()))?
            .ok_or_else(|| ProjectionError::AppNotFound(app_name.to_string()))?;

        let mut graph = AppGraph::empty(app_name);
        let spec_node_id = format!("spec:{app_name}");
        graph.nodes.push(GraphNode {
            id: spec_node_id.clone(),
            kind: NodeKind::Spec,
            label: app.name.clone(),
            status: None,
        });

        // Resources: one node per persisted row.
        let resources = self
            .resources
            .list_by_app(app_name)
            .await
            .map_err(|e| ProjectionError::Store(e.to_string()))?;
        let resource_ids: HashSet<String> = resources.iter().map(|r| r.name.clone()).collect();
        for resource in &resources {
            let node_id = resource_node_id(&resource.name);
            graph.nodes.push(GraphNode {
                id: node_id.clone(),
                kind: NodeKind::Resource,
                label: format!("{} ({})", resource.name, resource.resource_type),
                status: Some(format!("{:?}", resource.state).to_lowercase()),
            });
            graph.edges.push(GraphEdge {
                from: spec_node_id.clone(),
                to: node_id,
                kind: EdgeKind::Contains,
            });
        }

        // Declared dependencies and container bindings from the latest spec.
        if let Some(record) = self
            .apps
            .latest_spec(app_name)
            .await
            .map_err(|e| ProjectionError::Store(e.to_string()))?
        {
            if let Ok(spec) = serde_json::from_value::<ScoreSpec>(record.body) {
                self.add_spec_edges(&mut graph, &spec_node_id, &spec, &resource_ids);
            }
        }

        // Executions with their steps.
        let executions = self
            .executions
            .list(Some(app_name), Pagination::with_limit(EXECUTION_WINDOW))
            .await
            .map_err(|e| ProjectionError::Store(e.to_string()))?;

        for execution in &executions.items {
            let workflow_node_id = format!("workflow:{}", execution.id);
            graph.nodes.push(GraphNode {
                id: workflow_node_id.clone(),
                kind: NodeKind::Workflow,
                label: execution.workflow_name.clone(),
                status: Some(format!("{:?}", execution.status).to_lowercase()),
            });
            graph.edges.push(GraphEdge {
                from: spec_node_id.clone(),
                to: workflow_node_id.clone(),
                kind: EdgeKind::Creates,
            });

            for resource in &resources {
                if resource.execution_id == Some(execution.id) {
                    graph.edges.push(GraphEdge {
                        from: workflow_node_id.clone(),
                        to: resource_node_id(&resource.name),
                        kind: EdgeKind::Provisions,
                    });
                }
            }

            let steps = self
                .executions
                .list_steps(&execution.id)
                .await
                .map_err(|e| ProjectionError::Store(e.to_string()))?;
            for step in steps {
                let step_node_id = format!("step:{}:{}", execution.id, step.step_index);
                graph.nodes.push(GraphNode {
                    id: step_node_id.clone(),
                    kind: NodeKind::Step,
                    label: step.name.clone(),
                    status: Some(format!("{:?}", step.status).to_lowercase()),
                });
                graph.edges.push(GraphEdge {
                    from: workflow_node_id.clone(),
                    to: step_node_id.clone(),
                    kind: EdgeKind::Contains,
                });
                if let Some(resource) = &step.resource {
                    if resource_ids.contains(resource) {
                        graph.edges.push(GraphEdge {
                            from: step_node_id,
                            to: resource_node_id(resource),
                            kind: EdgeKind::Configures,
                        });
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Edges derived from the declared spec document: resource-to-resource
    /// dependencies and container variable bindings.
    fn add_spec_edges(
        &self,
        graph: &mut AppGraph,
        spec_node_id: &str,
        spec: &ScoreSpec,
        known_resources: &HashSet<String>,
    ) {
        for (name, declared) in &spec.resources {
            if !known_resources.contains(name) {
                continue;
            }
            for referenced in scan_references(&declared.properties) {
                if known_resources.contains(&referenced) && referenced != *name {
                    graph.edges.push(GraphEdge {
                        from: resource_node_id(name),
                        to: resource_node_id(&referenced),
                        kind: EdgeKind::DependsOn,
                    });
                }
            }
        }

        let mut bound: HashSet<String> = HashSet::new();
        for container in spec.containers.values() {
            for value in container.variables.values() {
                for capture in RESOURCE_REF.captures_iter(value) {
                    bound.insert(capture[1].to_string());
                }
            }
        }
        for name in bound {
            if known_resources.contains(&name) {
                graph.edges.push(GraphEdge {
                    from: spec_node_id.to_string(),
                    to: resource_node_id(&name),
                    kind: EdgeKind::BindsTo,
                });
            }
        }
    }
}

fn resource_node_id(name: &str) -> String {
    format!("resource:{name}")
}

fn scan_references(properties: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
    let mut found = Vec::new();
    for value in properties.values() {
        if let Some(text) = value.as_str() {
            for capture in RESOURCE_REF.captures_iter(text) {
                found.push(capture[1].to_string());
            }
        }
    }
    found
}

// =============================================================================
// Export
// =============================================================================

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Dot,
    Mermaid,
    MermaidSimple,
    Svg,
    Png,
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            "mermaid-simple" => Ok(Self::MermaidSimple),
            "svg" => Ok(Self::Svg),
            "png" => Ok(Self::Png),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// A rendered export
#[derive(Debug)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

/// Render a graph in the requested format.
pub fn render(graph: &AppGraph, format: ExportFormat) -> Result<Rendered, ExportError> {
    match format {
        ExportFormat::Json => Ok(Rendered {
            content_type: "application/json",
            body: serde_json::to_string_pretty(graph)?,
        }),
        ExportFormat::Dot => Ok(Rendered {
            content_type: "text/vnd.graphviz",
            body: render_dot(graph),
        }),
        ExportFormat::Mermaid => Ok(Rendered {
            content_type: "text/plain",
            body: render_mermaid(graph, false),
        }),
        ExportFormat::MermaidSimple => Ok(Rendered {
            content_type: "text/plain",
            body: render_mermaid(graph, true),
        }),
        ExportFormat::Svg => Ok(Rendered {
            content_type: "image/svg+xml",
            body: render_svg(graph),
        }),
        ExportFormat::Png => Err(ExportError::Unsupported("png".to_string())),
    }
}

fn render_dot(graph: &AppGraph) -> String {
    let mut out = format!("digraph \"{}\" {{\n  rankdir=LR;\n", graph.app_name);
    for node in &graph.nodes {
        let shape = match node.kind {
            NodeKind::Spec => "folder",
            NodeKind::Workflow => "box",
            NodeKind::Step => "ellipse",
            NodeKind::Resource => "cylinder",
        };
        let label = match &node.status {
            Some(status) => format!("{}\\n[{status}]", node.label),
            None => node.label.clone(),
        };
        out.push_str(&format!(
            "  \"{}\" [label=\"{label}\", shape={shape}];\n",
            node.id
        ));
    }
    for edge in &graph.edges {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
            edge.from,
            edge.to,
            edge_label(edge.kind)
        ));
    }
    out.push_str("}\n");
    out
}

fn render_mermaid(graph: &AppGraph, simple: bool) -> String {
    let mut out = String::from("graph TD\n");
    for node in &graph.nodes {
        if simple && node.kind == NodeKind::Step {
            continue;
        }
        let label = if simple {
            node.label.clone()
        } else {
            match &node.status {
                Some(status) => format!("{} [{status}]", node.label),
                None => node.label.clone(),
            }
        };
        out.push_str(&format!("    {}[\"{label}\"]\n", mermaid_id(&node.id)));
    }
    for edge in &graph.edges {
        if simple && (edge.from.starts_with("step:") || edge.to.starts_with("step:")) {
            continue;
        }
        out.push_str(&format!(
            "    {} -->|{}| {}\n",
            mermaid_id(&edge.from),
            edge_label(edge.kind),
            mermaid_id(&edge.to)
        ));
    }
    out
}

/// Mermaid node ids may not contain ':' or '-'.
fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Minimal layered renderer: one row per node kind, nodes spaced evenly.
fn render_svg(graph: &AppGraph) -> String {
    const BOX_WIDTH: usize = 180;
    const BOX_HEIGHT: usize = 40;
    const H_GAP: usize = 20;
    const V_GAP: usize = 80;

    let rows = [
        NodeKind::Spec,
        NodeKind::Workflow,
        NodeKind::Step,
        NodeKind::Resource,
    ];

    let mut positions: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut max_cols = 1;
    for (row, kind) in rows.iter().enumerate() {
        let mut col = 0;
        for node in graph.nodes.iter().filter(|n| n.kind == *kind) {
            positions.insert(
                node.id.as_str(),
                (
                    col * (BOX_WIDTH + H_GAP) + H_GAP,
                    row * (BOX_HEIGHT + V_GAP) + V_GAP / 2,
                ),
            );
            col += 1;
        }
        max_cols = max_cols.max(col);
    }

    let width = max_cols * (BOX_WIDTH + H_GAP) + H_GAP;
    let height = rows.len() * (BOX_HEIGHT + V_GAP);
    let mut out = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">\n"
    );

    for edge in &graph.edges {
        let (Some(&(x1, y1)), Some(&(x2, y2))) = (
            positions.get(edge.from.as_str()),
            positions.get(edge.to.as_str()),
        ) else {
            continue;
        };
        out.push_str(&format!(
            "  <line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" stroke=\"#999\"/>\n",
            x1 + BOX_WIDTH / 2,
            y1 + BOX_HEIGHT,
            x2 + BOX_WIDTH / 2,
            y2
        ));
    }

    for node in &graph.nodes {
        let Some(&(x, y)) = positions.get(node.id.as_str()) else {
            continue;
        };
        let fill = match node.status.as_deref() {
            Some("completed" | "active") => "#d4edda",
            Some("failed") => "#f8d7da",
            Some("running" | "provisioning") => "#fff3cd",
            _ => "#e2e3e5",
        };
        out.push_str(&format!(
            "  <rect x=\"{x}\" y=\"{y}\" width=\"{BOX_WIDTH}\" height=\"{BOX_HEIGHT}\" rx=\"4\" fill=\"{fill}\" stroke=\"#333\"/>\n"
        ));
        out.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" text-anchor=\"middle\">{}</text>\n",
            x + BOX_WIDTH / 2,
            y + BOX_HEIGHT / 2 + 4,
            xml_escape(&node.label)
        ));
    }

    out.push_str("</svg>\n");
    out
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn edge_label(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Contains => "contains",
        EdgeKind::DependsOn => "depends-on",
        EdgeKind::Provisions => "provisions",
        EdgeKind::Creates => "creates",
        EdgeKind::BindsTo => "binds-to",
        EdgeKind::Configures => "configures",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    use conductor_db::repo::{
        InMemoryApplicationRepository, InMemoryExecutionRepository, InMemoryResourceRepository,
        NewApplication, NewExecution, NewResource, NewSpec,
    };
    use conductor_domain::ExecutionId;

    async fn seeded_projector() -> GraphProjector {
        let apps = Arc::new(InMemoryApplicationRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let resources = Arc::new(InMemoryResourceRepository::new());

        apps.upsert(&NewApplication {
            name: "billing".to_string(),
            team: Some("payments".to_string()),
            environment: None,
        })
        .await
        .unwrap();
        apps.insert_spec(&NewSpec {
            app_name: "billing".to_string(),
            body: serde_json::json!({
                "metadata": {"name": "billing"},
                "containers": {
                    "web": {
                        "image": "ghcr.io/acme/billing:1",
                        "variables": {"DB": "${resources.app-db.url}"}
                    }
                },
                "resources": {
                    "app-db": {"type": "postgres"},
                    "worker": {
                        "type": "k8s-deploy",
                        "properties": {"db": "${resources.app-db.url}"}
                    }
                }
            }),
            submitted_by: None,
        })
        .await
        .unwrap();

        let execution_id = ExecutionId::new();
        executions
            .create(&NewExecution {
                id: execution_id,
                app_name: "billing".to_string(),
                workflow_name: "deploy-billing".to_string(),
                total_steps: 1,
                parent_execution_id: None,
                retry_count: 0,
                resume_from_step: None,
            })
            .await
            .unwrap();

        for name in ["app-db", "worker"] {
            resources
                .upsert_requested(&NewResource {
                    app_name: "billing".to_string(),
                    name: name.to_string(),
                    resource_type: if name == "app-db" {
                        "postgres".to_string()
                    } else {
                        "k8s-deploy".to_string()
                    },
                    execution_id: Some(execution_id),
                    properties: Map::new(),
                    fingerprint: "fp".to_string(),
                })
                .await
                .unwrap();
        }

        GraphProjector::new(apps, executions, resources)
    }

    #[tokio::test]
    async fn test_projection_covers_declared_resources() {
        let projector = seeded_projector().await;
        let graph = projector.project("billing").await.unwrap();

        let resource_labels: Vec<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Resource)
            .map(|n| n.label.as_str())
            .collect();
        assert_eq!(resource_labels.len(), 2);
        assert!(resource_labels.iter().any(|l| l.contains("app-db")));

        // Declared dependency surfaces as a depends-on edge.
        assert!(graph.edges.iter().any(|e| e.kind == EdgeKind::DependsOn
            && e.from == "resource:worker"
            && e.to == "resource:app-db"));

        // Container variable reference becomes a binds-to edge.
        assert!(graph
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::BindsTo && e.to == "resource:app-db"));

        // The execution provisions both resources.
        assert_eq!(
            graph
                .edges
                .iter()
                .filter(|e| e.kind == EdgeKind::Provisions)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_unknown_app_rejected() {
        let projector = seeded_projector().await;
        let err = projector.project("ghost").await.unwrap_err();
        assert!(matches!(err, ProjectionError::AppNotFound(_)));
    }

    #[tokio::test]
    async fn test_export_formats() {
        let projector = seeded_projector().await;
        let graph = projector.project("billing").await.unwrap();

        let json = render(&graph, ExportFormat::Json).unwrap();
        assert_eq!(json.content_type, "application/json");
        assert!(json.body.contains("\"app_name\": \"billing\""));

        let dot = render(&graph, ExportFormat::Dot).unwrap();
        assert!(dot.body.starts_with("digraph"));
        assert!(dot.body.contains("depends-on"));

        let mermaid = render(&graph, ExportFormat::Mermaid).unwrap();
        assert!(mermaid.body.starts_with("graph TD"));

        let svg = render(&graph, ExportFormat::Svg).unwrap();
        assert!(svg.body.starts_with("<svg"));

        let err = render(&graph, ExportFormat::Png).unwrap_err();
        assert!(matches!(err, ExportError::Unsupported(_)));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(
            "mermaid-simple".parse::<ExportFormat>().unwrap(),
            ExportFormat::MermaidSimple
        );
        assert!("gif".parse::<ExportFormat>().is_err());
    }
}
