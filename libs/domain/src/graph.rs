//! Application graph projection types
//!
//! A derived node/edge view of an application's spec, executions, steps,
//! and resources. Projection logic lives in the engine; these are the
//! shared wire types.

use serde::{Deserialize, Serialize};

/// Kind of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Spec,
    Workflow,
    Step,
    Resource,
}

/// Kind of a graph edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Contains,
    DependsOn,
    Provisions,
    Creates,
    BindsTo,
    Configures,
}

/// A node in the application graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable id unique within the graph, e.g. `step:wfx_.../2`
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    /// Display status (execution/step/resource state), if any
    pub status: Option<String>,
}

/// A directed edge in the application graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// The full projected graph for one application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppGraph {
    pub app_name: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl AppGraph {
    /// Empty graph for an application with no state yet.
    #[must_use]
    pub fn empty(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_kind_kebab_case() {
        let json = serde_json::to_string(&EdgeKind::DependsOn).unwrap();
        assert_eq!(json, "\"depends-on\"");
    }
}
