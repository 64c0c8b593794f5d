//! Event publication helper
//!
//! Publishes lifecycle events to the in-process bus and, best-effort, to
//! the durable event table. Store failures are logged and never propagate
//! to the executor.

use std::sync::Arc;

use conductor_db::repo::EventRepository;
use conductor_domain::{event::types, Event, ExecutionId};

use crate::bus::EventBus;

/// Emits engine lifecycle events for one application.
pub struct EventPublisher {
    bus: Arc<EventBus>,
    store: Option<Arc<dyn EventRepository>>,
    app_name: String,
    source: &'static str,
}

impl EventPublisher {
    /// Create a publisher for an application.
    #[must_use]
    pub fn new(
        bus: Arc<EventBus>,
        store: Option<Arc<dyn EventRepository>>,
        app_name: &str,
        source: &'static str,
    ) -> Self {
        Self {
            bus,
            store,
            app_name: app_name.to_string(),
            source,
        }
    }

    /// Publish an event; the durable copy is best-effort.
    pub async fn emit(&self, event_type: &str, data: serde_json::Value) {
        let event = Event::now(event_type, &self.app_name, self.source, data);

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&event).await {
                tracing::warn!(event_type, error = %e, "failed to persist event");
            }
        }

        self.bus.publish(&event).await;
    }

    pub async fn workflow_started(&self, execution_id: ExecutionId, workflow_name: &str) {
        self.emit(
            types::WORKFLOW_STARTED,
            serde_json::json!({
                "execution_id": execution_id,
                "workflow": workflow_name,
            }),
        )
        .await;
    }

    pub async fn workflow_completed(&self, execution_id: ExecutionId) {
        self.emit(
            types::WORKFLOW_COMPLETED,
            serde_json::json!({"execution_id": execution_id}),
        )
        .await;
    }

    pub async fn workflow_failed(&self, execution_id: ExecutionId, error: &str) {
        self.emit(
            types::WORKFLOW_FAILED,
            serde_json::json!({
                "execution_id": execution_id,
                "error": error,
            }),
        )
        .await;
    }

    pub async fn step_started(&self, execution_id: ExecutionId, step_name: &str, step_index: usize) {
        self.emit(
            types::STEP_STARTED,
            serde_json::json!({
                "execution_id": execution_id,
                "step": step_name,
                "index": step_index,
            }),
        )
        .await;
    }

    pub async fn step_completed(
        &self,
        execution_id: ExecutionId,
        step_name: &str,
        step_index: usize,
    ) {
        self.emit(
            types::STEP_COMPLETED,
            serde_json::json!({
                "execution_id": execution_id,
                "step": step_name,
                "index": step_index,
            }),
        )
        .await;
    }

    pub async fn step_failed(
        &self,
        execution_id: ExecutionId,
        step_name: &str,
        step_index: usize,
        error: &str,
    ) {
        self.emit(
            types::STEP_FAILED,
            serde_json::json!({
                "execution_id": execution_id,
                "step": step_name,
                "index": step_index,
                "error": error,
            }),
        )
        .await;
    }

    pub async fn resource_event(&self, event_type: &str, resource_name: &str) {
        self.emit(event_type, serde_json::json!({"resource": resource_name}))
            .await;
    }

    pub async fn provider_resolved(&self, resource_name: &str, provider: &str, workflow: &str) {
        self.emit(
            types::PROVIDER_RESOLVED,
            serde_json::json!({
                "resource": resource_name,
                "provider": provider,
                "workflow": workflow,
            }),
        )
        .await;
    }
}
