//! Lifecycle events
//!
//! Events use dotted type names with a fixed suffix convention
//! (`.started`, `.completed`, `.failed`, ...). The in-process bus delivers
//! them live; an optional durable copy lands in the events table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;

/// A lifecycle event published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Dotted type name, e.g. `step.completed`
    #[serde(rename = "type")]
    pub event_type: String,
    pub app_name: String,
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload
    pub data: serde_json::Value,
    /// Component that emitted the event
    pub source: String,
}

impl Event {
    /// Build an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn now(
        event_type: &str,
        app_name: &str,
        source: &str,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.to_string(),
            app_name: app_name.to_string(),
            timestamp: Utc::now(),
            data,
            source: source.to_string(),
        }
    }
}

/// Well-known event type names emitted by the executor and resolver.
pub mod types {
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";

    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_PROGRESS: &str = "step.progress";

    pub const RESOURCE_REQUESTED: &str = "resource.requested";
    pub const RESOURCE_PROVISIONING: &str = "resource.provisioning";
    pub const RESOURCE_ACTIVE: &str = "resource.active";
    pub const RESOURCE_FAILED: &str = "resource.failed";

    pub const PROVIDER_RESOLVED: &str = "provider.resolved";

    pub const DEPLOYMENT_STARTED: &str = "deployment.started";
    pub const DEPLOYMENT_COMPLETED: &str = "deployment.completed";
    pub const DEPLOYMENT_FAILED: &str = "deployment.failed";
}
