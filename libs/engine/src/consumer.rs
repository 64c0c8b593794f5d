//! Queue consumer
//!
//! The worker-side entry point: claims tasks, holds the lease with a
//! heartbeat, resolves deployment tasks into synthesized workflows, runs
//! them, and releases the task with the outcome. Transient store errors
//! are retried with bounded exponential backoff; a separate reclaimer
//! loop returns stale-leased tasks to the queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use conductor_common::metrics::METRICS;
use conductor_db::repo::{QueueRepository, TaskOutcome};
use conductor_domain::{event::types, ExecutionId, ExecutionStatus, QueueTask, ScoreSpec};
use conductor_providers::Resolver;

use crate::bus::EventBus;
use crate::events::EventPublisher;
use crate::runner::{RunOptions, WorkflowRunner};

/// How long a worker sleeps when the queue is empty
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What a queue task asks the worker to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the task's workflow as-is
    #[default]
    Workflow,
    /// Resolve the embedded Score spec into a deployment workflow first
    Deployment,
}

/// Structured metadata carried by queue tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    pub kind: TaskKind,
    /// YAML Score spec for deployment tasks
    pub spec: Option<String>,
    pub submitter: Option<String>,
    pub environment: Option<String>,
    /// Invocation inputs for explicit workflow executions
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Retry linkage
    pub parent_execution_id: Option<ExecutionId>,
    pub resume_from_step: Option<i32>,
    /// Execution id recorded after the run, for retry lookup
    pub execution_id: Option<ExecutionId>,
}

impl TaskMetadata {
    /// Parse task metadata; unknown fields are ignored, absent ones default.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Serialize back to a metadata value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Consumes the task queue and drives executions.
pub struct QueueConsumer {
    queue: Arc<dyn QueueRepository>,
    runner: WorkflowRunner,
    resolver: Arc<Resolver>,
    bus: Arc<EventBus>,
    events: Option<Arc<dyn conductor_db::repo::EventRepository>>,
    lease: chrono::Duration,
}

impl QueueConsumer {
    /// Create a new consumer
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        runner: WorkflowRunner,
        resolver: Arc<Resolver>,
        bus: Arc<EventBus>,
        events: Option<Arc<dyn conductor_db::repo::EventRepository>>,
        lease: chrono::Duration,
    ) -> Self {
        Self {
            queue,
            runner,
            resolver,
            bus,
            events,
            lease,
        }
    }

    /// Worker loop: claim, execute, release, until shutdown flips.
    pub async fn run_worker(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed = match self.claim_with_backoff().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(error = %e, "queue claim failed after retries");
                    break;
                }
            };

            let Some(task) = claimed else {
                tokio::select! {
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            METRICS.tasks_in_flight.inc();
            tracing::info!(task_id = %task.id, app = %task.app_name, "claimed task");

            let heartbeat = self.spawn_heartbeat(&task);
            let outcome = self.process(&task, shutdown.clone()).await;
            heartbeat.abort();

            if let Err(e) = self.release_with_backoff(&task, outcome).await {
                tracing::error!(task_id = %task.id, error = %e, "failed to release task");
            }
            METRICS.tasks_in_flight.dec();
        }
    }

    /// Reclaimer loop: return stale-leased tasks to the queue.
    pub async fn run_reclaimer(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.lease.num_seconds().max(1) as u64);
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            match self.queue.reclaim_stale(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(count) => tracing::warn!(count, "reclaimed stale queue tasks"),
                Err(e) => tracing::error!(error = %e, "reclaim pass failed"),
            }
        }
    }

    /// Renew the task lease at half its duration until aborted.
    fn spawn_heartbeat(&self, task: &QueueTask) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let task_id = task.id;
        let lease = self.lease;
        let interval = Duration::from_secs((lease.num_seconds().max(2) as u64) / 2);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = queue.renew_lease(&task_id, lease).await {
                    tracing::warn!(task_id = %task_id, error = %e, "lease renewal failed");
                    break;
                }
            }
        })
    }

    /// Execute one claimed task. The returned outcome is what the queue
    /// row is released with.
    async fn process(&self, task: &QueueTask, shutdown: watch::Receiver<bool>) -> TaskOutcome {
        let meta = TaskMetadata::from_value(&task.metadata);

        // A shutdown signal cancels the in-flight execution.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut shutdown_watch = shutdown;
        let cancel_guard = tokio::spawn(async move {
            while shutdown_watch.changed().await.is_ok() {
                if *shutdown_watch.borrow() {
                    let _ = cancel_tx.send(true);
                    break;
                }
            }
        });

        let result = match meta.kind {
            TaskKind::Deployment => self.process_deployment(task, &meta, cancel_rx).await,
            TaskKind::Workflow => self.process_workflow(task, &meta, cancel_rx).await,
        };
        cancel_guard.abort();

        match result {
            Ok(status) if status == ExecutionStatus::Completed => TaskOutcome::Completed,
            Ok(_) => TaskOutcome::Failed {
                error: "execution failed".to_string(),
            },
            Err(error) => TaskOutcome::Failed { error },
        }
    }

    async fn process_workflow(
        &self,
        task: &QueueTask,
        meta: &TaskMetadata,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionStatus, String> {
        let execution = self
            .runner
            .run(
                &task.app_name,
                &task.workflow,
                RunOptions {
                    execution_id: meta.execution_id,
                    submitter: meta.submitter.clone(),
                    environment: meta.environment.clone(),
                    inputs: meta.inputs.clone(),
                    parent_execution_id: meta.parent_execution_id,
                    resume_from_step: meta.resume_from_step,
                    cancel,
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(execution.status)
    }

    /// Resolve the embedded spec and run the synthesized deployment
    /// workflow. An unchanged spec completes without dispatching steps.
    async fn process_deployment(
        &self,
        task: &QueueTask,
        meta: &TaskMetadata,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionStatus, String> {
        let yaml = meta
            .spec
            .as_deref()
            .ok_or_else(|| "deployment task carries no spec".to_string())?;
        let spec = ScoreSpec::from_yaml(yaml).map_err(|e| e.to_string())?;

        let publisher = EventPublisher::new(
            Arc::clone(&self.bus),
            self.events.clone(),
            &task.app_name,
            "worker",
        );
        publisher
            .emit(types::DEPLOYMENT_STARTED, serde_json::json!({"task_id": task.id}))
            .await;

        let execution_id = meta.execution_id.unwrap_or_default();
        let plan = match self.resolver.resolve(&spec, execution_id).await {
            Ok(plan) => plan,
            Err(e) => {
                publisher
                    .emit(
                        types::DEPLOYMENT_FAILED,
                        serde_json::json!({"error": e.to_string()}),
                    )
                    .await;
                return Err(e.to_string());
            }
        };

        for item in &plan.items {
            if let (Some(provider), Some(workflow)) = (&item.provider, &item.workflow) {
                publisher
                    .provider_resolved(&item.name, provider, &workflow.name)
                    .await;
            }
            if item.has_work() {
                publisher
                    .resource_event(types::RESOURCE_REQUESTED, &item.name)
                    .await;
            }
        }

        if !plan.has_work() {
            tracing::info!(app = %task.app_name, "spec unchanged, nothing to deploy");
            publisher
                .emit(types::DEPLOYMENT_COMPLETED, serde_json::json!({"unchanged": true}))
                .await;
            return Ok(ExecutionStatus::Completed);
        }

        let workflow = plan.to_workflow(&format!("deploy-{}", task.app_name));
        let status = self
            .runner
            .run(
                &task.app_name,
                &workflow,
                RunOptions {
                    execution_id: Some(execution_id),
                    submitter: meta.submitter.clone(),
                    environment: plan.environment.clone(),
                    inputs: BTreeMap::new(),
                    parent_execution_id: meta.parent_execution_id,
                    resume_from_step: meta.resume_from_step,
                    cancel,
                },
            )
            .await
            .map_err(|e| e.to_string())?
            .status;

        let event_type = if status == ExecutionStatus::Completed {
            types::DEPLOYMENT_COMPLETED
        } else {
            types::DEPLOYMENT_FAILED
        };
        publisher
            .emit(event_type, serde_json::json!({"execution_id": execution_id}))
            .await;

        Ok(status)
    }

    async fn claim_with_backoff(&self) -> Result<Option<QueueTask>, String> {
        let policy = short_backoff();
        backoff::future::retry(policy, || async {
            self.queue
                .claim(self.lease)
                .await
                .map_err(|e| backoff::Error::transient(e.to_string()))
        })
        .await
    }

    async fn release_with_backoff(
        &self,
        task: &QueueTask,
        outcome: TaskOutcome,
    ) -> Result<(), String> {
        let policy = short_backoff();
        backoff::future::retry(policy, || {
            let outcome = outcome.clone();
            async move {
                self.queue
                    .release(&task.id, outcome)
                    .await
                    .map_err(|e| backoff::Error::transient(e.to_string()))
            }
        })
        .await
    }
}

/// Bounded exponential backoff for transient store errors.
fn short_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..ExponentialBackoff::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_db::repo::{
        ExecutionRepository, InMemoryEventRepository, InMemoryExecutionRepository,
        InMemoryQueueRepository, InMemoryResourceRepository, NewQueueTask,
    };
    use conductor_domain::{StepSpec, TaskStatus, WorkflowCategory, WorkflowSpec};
    use conductor_providers::{ProviderManifest, ProviderRegistry};

    use crate::executor::ExecutorRegistry;
    use crate::runner::RunnerConfig;
    use crate::testing::MockExecutor;

    const PROVIDER: &str = r#"
apiVersion: conductor.dev/v1
kind: Provider
metadata:
  name: platform
capabilities:
  resourceTypes: [postgres]
workflows:
  - name: provision-postgres
    category: provisioner
    provisions: postgres
    steps:
      - name: apply
        type: mock
"#;

    struct Fixture {
        consumer: QueueConsumer,
        queue: Arc<InMemoryQueueRepository>,
        executions: Arc<InMemoryExecutionRepository>,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemoryQueueRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let resources = Arc::new(InMemoryResourceRepository::new());
        let events = Arc::new(InMemoryEventRepository::new());
        let bus = Arc::new(EventBus::new());

        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(MockExecutor::new("mock")));

        let runner = WorkflowRunner::new(
            executions.clone(),
            resources.clone(),
            Some(events.clone() as Arc<dyn conductor_db::repo::EventRepository>),
            Arc::clone(&bus),
            Arc::new(registry),
            RunnerConfig::default(),
        );

        let manifest = ProviderManifest::from_yaml(PROVIDER).unwrap();
        let provider_registry =
            Arc::new(ProviderRegistry::new(vec![manifest], Default::default()).unwrap());
        let resolver = Arc::new(Resolver::new(provider_registry, resources));

        let consumer = QueueConsumer::new(
            queue.clone(),
            runner,
            resolver,
            bus,
            Some(events as Arc<dyn conductor_db::repo::EventRepository>),
            chrono::Duration::seconds(30),
        );

        Fixture {
            consumer,
            queue,
            executions,
        }
    }

    fn workflow_task(app: &str) -> NewQueueTask {
        NewQueueTask {
            app_name: app.to_string(),
            workflow_name: "smoke".to_string(),
            workflow: WorkflowSpec {
                name: "smoke".to_string(),
                category: WorkflowCategory::Goldenpath,
                input_schema: None,
                steps: vec![StepSpec::new("a", "mock"), StepSpec::new("b", "mock")],
            },
            metadata: TaskMetadata::default().to_value(),
        }
    }

    #[tokio::test]
    async fn test_worker_processes_and_releases_task() {
        let fixture = fixture();
        let task = fixture.queue.enqueue(&workflow_task("billing")).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let claimed = fixture
            .consumer
            .claim_with_backoff()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, task.id);

        let outcome = fixture.consumer.process(&claimed, shutdown_rx).await;
        assert!(matches!(outcome, TaskOutcome::Completed));
        fixture
            .consumer
            .release_with_backoff(&claimed, outcome)
            .await
            .unwrap();

        let released = fixture.queue.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(released.status, TaskStatus::Completed);
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn test_deployment_task_resolves_and_executes() {
        let fixture = fixture();
        let spec = r#"
metadata:
  name: billing
resources:
  app-db:
    type: postgres
"#;
        let meta = TaskMetadata {
            kind: TaskKind::Deployment,
            spec: Some(spec.to_string()),
            ..TaskMetadata::default()
        };
        fixture
            .queue
            .enqueue(&NewQueueTask {
                app_name: "billing".to_string(),
                workflow_name: "deploy-billing".to_string(),
                workflow: WorkflowSpec {
                    name: "deploy-billing".to_string(),
                    category: WorkflowCategory::Provisioner,
                    input_schema: None,
                    steps: Vec::new(),
                },
                metadata: meta.to_value(),
            })
            .await
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let claimed = fixture.consumer.claim_with_backoff().await.unwrap().unwrap();
        let outcome = fixture.consumer.process(&claimed, shutdown_rx).await;
        assert!(matches!(outcome, TaskOutcome::Completed), "{outcome:?}");

        // One execution with the synthesized deploy workflow ran.
        let executions = fixture
            .executions
            .list(Some("billing"), Default::default())
            .await
            .unwrap();
        assert_eq!(executions.items.len(), 1);
        assert_eq!(executions.items[0].workflow_name, "deploy-billing");
        let steps = fixture
            .executions
            .list_steps(&executions.items[0].id)
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, "app-db-apply");
    }

    #[tokio::test]
    async fn test_unchanged_deployment_dispatches_nothing() {
        let fixture = fixture();
        let spec = "metadata:\n  name: billing\nresources:\n  app-db:\n    type: postgres\n";
        let meta = TaskMetadata {
            kind: TaskKind::Deployment,
            spec: Some(spec.to_string()),
            ..TaskMetadata::default()
        };
        let make_task = || NewQueueTask {
            app_name: "billing".to_string(),
            workflow_name: "deploy-billing".to_string(),
            workflow: WorkflowSpec {
                name: "deploy-billing".to_string(),
                category: WorkflowCategory::Provisioner,
                input_schema: None,
                steps: Vec::new(),
            },
            metadata: meta.to_value(),
        };

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        fixture.queue.enqueue(&make_task()).await.unwrap();
        let first = fixture.consumer.claim_with_backoff().await.unwrap().unwrap();
        fixture.consumer.process(&first, shutdown_rx.clone()).await;

        // Same spec again: the stored fingerprint matches, so every item
        // classifies as unchanged and no workflow is synthesized.
        fixture.queue.enqueue(&make_task()).await.unwrap();
        let second = fixture.consumer.claim_with_backoff().await.unwrap().unwrap();
        let outcome = fixture.consumer.process(&second, shutdown_rx).await;
        assert!(matches!(outcome, TaskOutcome::Completed));

        // No second execution was created.
        let executions = fixture
            .executions
            .list(Some("billing"), Default::default())
            .await
            .unwrap();
        assert_eq!(executions.items.len(), 1);
    }
}
