//! Prometheus metrics registry
//!
//! A single process-wide registry shared by the API and the worker. The
//! exporter endpoint lives in the API crate; everything else only
//! increments counters.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

/// Process-wide metrics, registered once.
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// All Conductor metrics
pub struct Metrics {
    registry: Registry,

    /// Workflow executions reaching a terminal state, by status
    pub executions_total: IntCounterVec,
    /// Step executions reaching a terminal state, by status
    pub steps_total: IntCounterVec,
    /// Events dropped because a subscriber buffer was full
    pub events_dropped_total: IntCounter,
    /// Events published to the bus
    pub events_published_total: IntCounter,
    /// Tasks currently claimed by workers
    pub tasks_in_flight: IntGauge,
    /// Tasks quarantined after repeated unclean releases
    pub tasks_quarantined_total: IntCounter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let executions_total = register_int_counter_vec_with_registry!(
            "conductor_executions_total",
            "Workflow executions by terminal status",
            &["status"],
            registry
        )
        .expect("register executions_total");

        let steps_total = register_int_counter_vec_with_registry!(
            "conductor_steps_total",
            "Step executions by terminal status",
            &["status"],
            registry
        )
        .expect("register steps_total");

        let events_dropped_total = register_int_counter_with_registry!(
            "conductor_events_dropped_total",
            "Events dropped due to full subscriber buffers",
            registry
        )
        .expect("register events_dropped_total");

        let events_published_total = register_int_counter_with_registry!(
            "conductor_events_published_total",
            "Events published to the in-process bus",
            registry
        )
        .expect("register events_published_total");

        let tasks_in_flight = register_int_gauge_with_registry!(
            "conductor_tasks_in_flight",
            "Queue tasks currently claimed by workers",
            registry
        )
        .expect("register tasks_in_flight");

        let tasks_quarantined_total = register_int_counter_with_registry!(
            "conductor_tasks_quarantined_total",
            "Queue tasks quarantined after repeated crashes",
            registry
        )
        .expect("register tasks_quarantined_total");

        Self {
            registry,
            executions_total,
            steps_total,
            events_dropped_total,
            events_published_total,
            tasks_in_flight,
            tasks_quarantined_total,
        }
    }

    /// Render the registry in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
