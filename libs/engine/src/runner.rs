//! Workflow runner
//!
//! Drives a single workflow execution to a terminal state: iterates
//! execution groups in order, dispatches steps concurrently under a
//! semaphore, persists every transition before publishing it, and handles
//! per-step timeouts, the execution wall-clock timeout, cancellation, and
//! retry/resume.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use conductor_common::metrics::METRICS;
use conductor_db::repo::{
    EventRepository, ExecutionRepository, NewExecution, ResourceRepository, UpdateResourceError,
};
use conductor_domain::{
    event::types, ExecutionId, ExecutionStatus, Resource, ResourceState, StepExecution,
    StepSpec, StepStatus, WorkflowExecution, WorkflowSpec,
};

use crate::bus::EventBus;
use crate::error::RunnerError;
use crate::events::EventPublisher;
use crate::executor::{ExecutorRegistry, StepContext, StepError, StepErrorKind};
use crate::grouper::{group_steps, ExecutionGroup};
use crate::substitution::{materialize_inputs, SubstitutionScope};

// =============================================================================
// Configuration
// =============================================================================

/// Runner tuning knobs
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum concurrent in-flight steps within one group
    pub max_step_concurrency: usize,
    /// Default per-step timeout; steps may override it
    pub default_step_timeout: Duration,
    /// Wall-clock budget for a whole execution
    pub execution_timeout: Duration,
    /// How long in-flight steps get to finalize after a cancellation
    pub cancellation_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_step_concurrency: 5,
            default_step_timeout: Duration::from_secs(15 * 60),
            execution_timeout: Duration::from_secs(2 * 60 * 60),
            cancellation_grace: Duration::from_secs(10),
        }
    }
}

/// Per-run options
pub struct RunOptions {
    /// Pre-allocated execution id (the resolver binds resource rows to it);
    /// a fresh id is allocated when absent
    pub execution_id: Option<ExecutionId>,
    pub submitter: Option<String>,
    pub environment: Option<String>,
    /// Invocation inputs, exposed as `${context.<key>}`
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Parent execution for retries
    pub parent_execution_id: Option<ExecutionId>,
    /// Step index to resume from; defaults to the parent's first failed step
    pub resume_from_step: Option<i32>,
    /// Cancellation signal; flipping to `true` stops the run
    pub cancel: watch::Receiver<bool>,
}

/// Sender half kept alive so defaulted runs observe a never-cancelled flag.
static NEVER_CANCELLED: Lazy<watch::Sender<bool>> = Lazy::new(|| watch::channel(false).0);

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            execution_id: None,
            submitter: None,
            environment: None,
            inputs: BTreeMap::new(),
            parent_execution_id: None,
            resume_from_step: None,
            cancel: NEVER_CANCELLED.subscribe(),
        }
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Executes one claimed workflow at a time; cloneable so group members can
/// be dispatched onto the runtime.
#[derive(Clone)]
pub struct WorkflowRunner {
    executions: Arc<dyn ExecutionRepository>,
    resources: Arc<dyn ResourceRepository>,
    events: Option<Arc<dyn EventRepository>>,
    bus: Arc<EventBus>,
    executors: Arc<ExecutorRegistry>,
    config: RunnerConfig,
}

/// Outcome of one dispatched step, fed back into group aggregation.
struct StepRecord {
    index: usize,
    name: String,
    status: StepStatus,
    outputs: BTreeMap<String, String>,
    error: Option<String>,
}

impl WorkflowRunner {
    /// Create a new runner
    #[must_use]
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        resources: Arc<dyn ResourceRepository>,
        events: Option<Arc<dyn EventRepository>>,
        bus: Arc<EventBus>,
        executors: Arc<ExecutorRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            executions,
            resources,
            events,
            bus,
            executors,
            config,
        }
    }

    /// Execute a workflow to a terminal state.
    ///
    /// Step failures terminate the run with a `failed` execution and are
    /// NOT errors here; `Err` means the run could not proceed at all
    /// (store failure, invalid retry linkage, unknown step type).
    pub async fn run(
        &self,
        app_name: &str,
        workflow: &WorkflowSpec,
        options: RunOptions,
    ) -> Result<WorkflowExecution, RunnerError> {
        self.validate_inputs(workflow, &options)?;

        // Every step type must be dispatchable before any row is written.
        for step in &workflow.steps {
            if self.executors.get(&step.step_type).is_none() {
                return Err(RunnerError::UnknownStepType {
                    step_type: step.step_type.clone(),
                });
            }
        }

        let (parent, resume_from, retry_count) = self.resolve_retry(&options).await?;

        let execution_id = options.execution_id.unwrap_or_default();
        let execution = self
            .executions
            .create(&NewExecution {
                id: execution_id,
                app_name: app_name.to_string(),
                workflow_name: workflow.name.clone(),
                total_steps: workflow.steps.len() as i32,
                parent_execution_id: options.parent_execution_id,
                retry_count,
                resume_from_step: (resume_from > 0).then_some(resume_from),
            })
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;

        let publisher = EventPublisher::new(
            Arc::clone(&self.bus),
            self.events.clone(),
            app_name,
            "executor",
        );

        let mut step_outputs = self
            .inherit_parent_steps(&execution, parent.as_ref(), resume_from)
            .await?;

        self.executions
            .mark_running(&execution.id)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;
        publisher
            .workflow_started(execution.id, &workflow.name)
            .await;

        let context = self.build_context(app_name, &options);
        let last_step_for_resource = last_step_per_resource(&workflow.steps);
        let deadline = tokio::time::Instant::now() + self.config.execution_timeout;
        let semaphore = Arc::new(Semaphore::new(self.config.max_step_concurrency));
        let groups = group_steps(&workflow.steps);

        let mut failure: Option<(usize, String)> = None;
        for group in &groups {
            // Groups fully below the resume point were inherited.
            if group.last_index() < resume_from as usize && resume_from > 0 {
                continue;
            }

            if *options.cancel.borrow() {
                return self
                    .finish_failed(&execution, &publisher, &RunnerError::Cancelled.to_string())
                    .await;
            }
            if tokio::time::Instant::now() >= deadline {
                return self
                    .finish_failed(
                        &execution,
                        &publisher,
                        &RunnerError::ExecutionTimeout.to_string(),
                    )
                    .await;
            }

            let records = self
                .dispatch_group(
                    group,
                    &execution,
                    &step_outputs,
                    &context,
                    &last_step_for_resource,
                    &semaphore,
                    deadline,
                    resume_from,
                    &options.cancel,
                )
                .await?;

            // Completed outputs become visible to later groups.
            for record in &records {
                if record.status == StepStatus::Completed {
                    step_outputs.insert(record.name.clone(), record.outputs.clone());
                }
            }

            // The group fails if any step failed; the first failing step's
            // error (by declared index) becomes the execution error.
            if let Some(first_failed) = records
                .iter()
                .filter(|r| r.status == StepStatus::Failed)
                .min_by_key(|r| r.index)
            {
                failure = Some((
                    first_failed.index,
                    first_failed
                        .error
                        .clone()
                        .unwrap_or_else(|| "step failed".to_string()),
                ));
                break;
            }
        }

        match failure {
            Some((index, error)) => {
                let message = format!("step {index} failed: {error}");
                self.finish_failed(&execution, &publisher, &message).await
            }
            None if *options.cancel.borrow() => {
                self.finish_failed(&execution, &publisher, &RunnerError::Cancelled.to_string())
                    .await
            }
            None => {
                self.executions
                    .finish(&execution.id, ExecutionStatus::Completed, None)
                    .await
                    .map_err(|e| RunnerError::Store(e.to_string()))?;
                METRICS
                    .executions_total
                    .with_label_values(&["completed"])
                    .inc();
                publisher.workflow_completed(execution.id).await;
                self.reload(&execution.id).await
            }
        }
    }

    fn validate_inputs(
        &self,
        workflow: &WorkflowSpec,
        options: &RunOptions,
    ) -> Result<(), RunnerError> {
        let Some(schema) = &workflow.input_schema else {
            return Ok(());
        };
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| RunnerError::InputValidation(e.to_string()))?;
        let instance = serde_json::Value::Object(
            options
                .inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        if let Err(error) = validator.validate(&instance) {
            return Err(RunnerError::InputValidation(error.to_string()));
        }
        Ok(())
    }

    /// Resolve retry linkage: the parent must be terminal and the resume
    /// index must lie within its step count.
    async fn resolve_retry(
        &self,
        options: &RunOptions,
    ) -> Result<(Option<WorkflowExecution>, i32, i32), RunnerError> {
        let Some(parent_id) = options.parent_execution_id else {
            return Ok((None, 0, 0));
        };

        let parent = self
            .executions
            .find_by_id(&parent_id)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?
            .ok_or(RunnerError::ExecutionNotFound(parent_id))?;

        if !parent.status.is_terminal() {
            return Err(RunnerError::ParentNotTerminal { parent: parent_id });
        }

        let parent_steps = self
            .executions
            .list_steps(&parent_id)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;

        let resume = match options.resume_from_step {
            Some(resume) => resume,
            None => parent_steps
                .iter()
                .find(|s| s.status == StepStatus::Failed)
                .map_or(0, |s| s.step_index),
        };

        if resume < 0 || resume >= parent.total_steps {
            return Err(RunnerError::ResumeOutOfRange {
                resume,
                total: parent.total_steps,
            });
        }

        let retry_count = parent.retry_count + 1;
        Ok((Some(parent), resume, retry_count))
    }

    /// Copy parent step rows below the resume point into the new execution
    /// and seed the output map from them.
    async fn inherit_parent_steps(
        &self,
        execution: &WorkflowExecution,
        parent: Option<&WorkflowExecution>,
        resume_from: i32,
    ) -> Result<HashMap<String, BTreeMap<String, String>>, RunnerError> {
        let mut outputs = HashMap::new();
        let Some(parent) = parent else {
            return Ok(outputs);
        };

        let parent_steps = self
            .executions
            .list_steps(&parent.id)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;

        for parent_step in parent_steps {
            if parent_step.step_index >= resume_from {
                continue;
            }
            let inherited = StepExecution {
                id: conductor_domain::StepExecutionId::new(),
                execution_id: execution.id,
                ..parent_step.clone()
            };
            self.executions
                .insert_step(&inherited)
                .await
                .map_err(|e| RunnerError::Store(e.to_string()))?;

            if inherited.status == StepStatus::Completed {
                outputs.insert(inherited.name.clone(), inherited.outputs.clone());
            }
        }
        Ok(outputs)
    }

    fn build_context(&self, app_name: &str, options: &RunOptions) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();
        context.insert("app_name".to_string(), app_name.to_string());
        if let Some(environment) = &options.environment {
            context.insert("environment".to_string(), environment.clone());
        }
        if let Some(submitter) = &options.submitter {
            context.insert("submitter".to_string(), submitter.clone());
        }
        for (key, value) in &options.inputs {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            context.insert(key.clone(), text);
        }
        context
    }

    /// Dispatch every step of one group, bounded by the semaphore, and
    /// wait for all of them. Steps already running when one fails run to
    /// completion; their results are persisted.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_group(
        &self,
        group: &ExecutionGroup,
        execution: &WorkflowExecution,
        step_outputs: &HashMap<String, BTreeMap<String, String>>,
        context: &BTreeMap<String, String>,
        last_step_for_resource: &HashMap<String, usize>,
        semaphore: &Arc<Semaphore>,
        deadline: tokio::time::Instant,
        resume_from: i32,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<StepRecord>, RunnerError> {
        let mut join_set: JoinSet<Result<StepRecord, RunnerError>> = JoinSet::new();

        for (index, step) in &group.steps {
            if (*index as i32) < resume_from {
                continue;
            }

            let runner = self.clone();
            let step = step.clone();
            let index = *index;
            let execution = execution.clone();
            let outputs_snapshot = step_outputs.clone();
            let context = context.clone();
            let last_for_resource = last_step_for_resource.clone();
            let semaphore = Arc::clone(semaphore);
            let cancel = cancel.clone();
            let events = self.events.clone();
            let bus = Arc::clone(&self.bus);

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("runner semaphore never closes");

                let publisher =
                    EventPublisher::new(bus, events, &execution.app_name, "executor");

                // Cancellation stops steps that have not been dispatched.
                if *cancel.borrow() {
                    return Ok(StepRecord {
                        index,
                        name: step.name.clone(),
                        status: StepStatus::Skipped,
                        outputs: BTreeMap::new(),
                        error: Some("cancelled before dispatch".to_string()),
                    });
                }

                runner
                    .dispatch_step(
                        &step,
                        index,
                        &execution,
                        &publisher,
                        outputs_snapshot,
                        context,
                        &last_for_resource,
                        deadline,
                        cancel,
                    )
                    .await
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let record = joined.map_err(|e| RunnerError::Store(format!("step task panicked: {e}")))??;
            records.push(record);
        }
        records.sort_by_key(|r| r.index);
        Ok(records)
    }

    /// Persist, dispatch, and settle a single step.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_step(
        &self,
        step: &StepSpec,
        index: usize,
        execution: &WorkflowExecution,
        publisher: &EventPublisher,
        outputs_snapshot: HashMap<String, BTreeMap<String, String>>,
        context: BTreeMap<String, String>,
        last_step_for_resource: &HashMap<String, usize>,
        deadline: tokio::time::Instant,
        cancel: watch::Receiver<bool>,
    ) -> Result<StepRecord, RunnerError> {
        let row = StepExecution::pending(execution.id, index as i32, &step.name, &step.step_type)
            .with_resource(step.resource.clone());
        self.executions
            .insert_step(&row)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;

        // Inputs are materialized lazily, against resource state as of
        // dispatch. A substitution failure fails the step before dispatch.
        let resources = self
            .app_resources(&execution.app_name)
            .await
            .map_err(RunnerError::Store)?;
        let scope = SubstitutionScope {
            resources: &resources,
            step_outputs: &outputs_snapshot,
            context: &context,
        };
        let inputs = match materialize_inputs(&step.inputs, &scope) {
            Ok(inputs) => inputs,
            Err(e) => {
                let message = e.to_string();
                self.executions
                    .finish_step(&row.id, StepStatus::Failed, &BTreeMap::new(), Some(&message))
                    .await
                    .map_err(|e| RunnerError::Store(e.to_string()))?;
                METRICS.steps_total.with_label_values(&["failed"]).inc();
                publisher
                    .step_failed(execution.id, &step.name, index, &message)
                    .await;
                return Ok(StepRecord {
                    index,
                    name: step.name.clone(),
                    status: StepStatus::Failed,
                    outputs: BTreeMap::new(),
                    error: Some(message),
                });
            }
        };

        self.executions
            .start_step(&row.id)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;
        publisher.step_started(execution.id, &step.name, index).await;
        self.advance_resource(
            step,
            &resources,
            ResourceState::Provisioning,
            types::RESOURCE_PROVISIONING,
            publisher,
            None,
        )
        .await;

        let executor = self
            .executors
            .get(&step.step_type)
            .ok_or_else(|| RunnerError::UnknownStepType {
                step_type: step.step_type.clone(),
            })?;
        let ctx = StepContext {
            execution_id: execution.id,
            app_name: execution.app_name.clone(),
            environment: context.get("environment").cloned(),
            submitter: context.get("submitter").cloned(),
            step_index: index,
        };

        let step_timeout = step
            .timeout_minutes
            .map_or(self.config.default_step_timeout, |minutes| {
                Duration::from_secs(minutes * 60)
            });
        let step_deadline = tokio::time::Instant::now() + step_timeout;
        let effective_deadline = step_deadline.min(deadline);

        let outcome = {
            let step_future = executor.execute(step, &inputs, &ctx);
            tokio::pin!(step_future);
            tokio::select! {
                result = &mut step_future => result,
                () = tokio::time::sleep_until(effective_deadline) => {
                    Err(StepError::timeout(format!(
                        "step '{}' exceeded {}s",
                        step.name,
                        step_timeout.as_secs()
                    )))
                }
                () = cancelled_signal(cancel) => {
                    // Bounded grace for the in-flight step to finalize.
                    match tokio::time::timeout(self.config.cancellation_grace, &mut step_future)
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StepError::cancelled()),
                    }
                }
            }
        };

        match outcome {
            Ok(outputs) => {
                self.executions
                    .finish_step(&row.id, StepStatus::Completed, &outputs, None)
                    .await
                    .map_err(|e| RunnerError::Store(e.to_string()))?;
                METRICS.steps_total.with_label_values(&["completed"]).inc();
                publisher
                    .step_completed(execution.id, &step.name, index)
                    .await;

                // The resource goes active when its final step succeeds.
                let is_last = step
                    .resource
                    .as_ref()
                    .and_then(|r| last_step_for_resource.get(r))
                    .is_some_and(|&last| last == index);
                if is_last {
                    self.advance_resource(
                        step,
                        &resources,
                        ResourceState::Active,
                        types::RESOURCE_ACTIVE,
                        publisher,
                        Some(&outputs),
                    )
                    .await;
                }

                Ok(StepRecord {
                    index,
                    name: step.name.clone(),
                    status: StepStatus::Completed,
                    outputs,
                    error: None,
                })
            }
            Err(step_error) => {
                let message = step_error.to_string();
                self.executions
                    .finish_step(
                        &row.id,
                        StepStatus::Failed,
                        &step_error.partial_outputs,
                        Some(&message),
                    )
                    .await
                    .map_err(|e| RunnerError::Store(e.to_string()))?;
                let label = match step_error.kind {
                    StepErrorKind::Cancelled => "cancelled",
                    StepErrorKind::Timeout => "timeout",
                    StepErrorKind::Failed => "failed",
                };
                METRICS.steps_total.with_label_values(&[label]).inc();
                publisher
                    .step_failed(execution.id, &step.name, index, &message)
                    .await;
                self.advance_resource(
                    step,
                    &resources,
                    ResourceState::Failed,
                    types::RESOURCE_FAILED,
                    publisher,
                    None,
                )
                .await;

                Ok(StepRecord {
                    index,
                    name: step.name.clone(),
                    status: StepStatus::Failed,
                    outputs: step_error.partial_outputs,
                    error: Some(message),
                })
            }
        }
    }

    /// Try to advance the step's bound resource; regressions (the row is
    /// already past this state) are expected and ignored.
    async fn advance_resource(
        &self,
        step: &StepSpec,
        resources: &HashMap<String, Resource>,
        to: ResourceState,
        event_type: &str,
        publisher: &EventPublisher,
        outputs: Option<&BTreeMap<String, String>>,
    ) {
        let Some(resource) = step.resource.as_ref().and_then(|name| resources.get(name)) else {
            return;
        };

        match self.resources.transition(&resource.id, to, None).await {
            Ok(_) => {
                if let Some(outputs) = outputs {
                    if !outputs.is_empty() {
                        if let Err(e) = self.resources.set_properties(&resource.id, outputs).await {
                            tracing::warn!(resource = %resource.name, error = %e,
                                "failed to merge step outputs into resource");
                        }
                    }
                }
                publisher.resource_event(event_type, &resource.name).await;
            }
            Err(UpdateResourceError::InvalidTransition { .. }) => {}
            Err(e) => {
                tracing::warn!(resource = %resource.name, error = %e,
                    "failed to advance resource state");
            }
        }
    }

    async fn app_resources(
        &self,
        app_name: &str,
    ) -> Result<HashMap<String, Resource>, String> {
        Ok(self
            .resources
            .list_by_app(app_name)
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect())
    }

    async fn finish_failed(
        &self,
        execution: &WorkflowExecution,
        publisher: &EventPublisher,
        message: &str,
    ) -> Result<WorkflowExecution, RunnerError> {
        self.executions
            .finish(&execution.id, ExecutionStatus::Failed, Some(message))
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?;
        METRICS.executions_total.with_label_values(&["failed"]).inc();
        publisher.workflow_failed(execution.id, message).await;
        self.reload(&execution.id).await
    }

    async fn reload(&self, id: &ExecutionId) -> Result<WorkflowExecution, RunnerError> {
        self.executions
            .find_by_id(id)
            .await
            .map_err(|e| RunnerError::Store(e.to_string()))?
            .ok_or(RunnerError::ExecutionNotFound(*id))
    }
}

/// Highest step index bound to each resource; the resource activates when
/// that step succeeds.
fn last_step_per_resource(steps: &[StepSpec]) -> HashMap<String, usize> {
    let mut last = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        if let Some(resource) = &step.resource {
            last.insert(resource.clone(), index);
        }
    }
    last
}

/// Resolves when the cancellation flag flips to true; pends forever when
/// the sender is gone (a dropped controller cannot cancel).
async fn cancelled_signal(mut cancel: watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    use conductor_db::repo::{
        InMemoryEventRepository, InMemoryExecutionRepository, InMemoryResourceRepository,
        NewResource, ResourceRepository,
    };
    use conductor_domain::WorkflowCategory;

    use crate::testing::{MockExecutor, MockRule};

    struct Harness {
        runner: WorkflowRunner,
        executions: Arc<InMemoryExecutionRepository>,
        resources: Arc<InMemoryResourceRepository>,
        bus: Arc<EventBus>,
    }

    fn harness(executor: MockExecutor) -> Harness {
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let resources = Arc::new(InMemoryResourceRepository::new());
        let events = Arc::new(InMemoryEventRepository::new());
        let bus = Arc::new(EventBus::new());

        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(executor));

        let runner = WorkflowRunner::new(
            executions.clone(),
            resources.clone(),
            Some(events),
            Arc::clone(&bus),
            Arc::new(registry),
            RunnerConfig {
                max_step_concurrency: 5,
                default_step_timeout: Duration::from_secs(5),
                execution_timeout: Duration::from_secs(30),
                cancellation_grace: Duration::from_millis(50),
            },
        );

        Harness {
            runner,
            executions,
            resources,
            bus,
        }
    }

    fn workflow(name: &str, steps: Vec<StepSpec>) -> WorkflowSpec {
        WorkflowSpec {
            name: name.to_string(),
            category: WorkflowCategory::Provisioner,
            input_schema: None,
            steps,
        }
    }

    #[tokio::test]
    async fn test_pure_sequential_completes_in_order() {
        let harness = harness(MockExecutor::new("mock"));
        let wf = workflow(
            "seq",
            vec![
                StepSpec::new("a", "mock"),
                StepSpec::new("b", "mock"),
                StepSpec::new("c", "mock"),
            ],
        );

        let execution = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let steps = harness.executions.list_steps(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_parallel_group_runs_concurrently() {
        let delay = Duration::from_millis(80);
        let executor = MockExecutor::new("mock").with_default_delay(delay);
        let harness = harness(executor);
        let wf = workflow(
            "par",
            vec![
                StepSpec::new("a", "mock").parallel(),
                StepSpec::new("b", "mock").parallel(),
                StepSpec::new("c", "mock").parallel(),
            ],
        );

        let started = StdInstant::now();
        let execution = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        // Concurrent: roughly max(duration), far below the 240ms serial sum.
        assert!(elapsed < delay * 2, "took {elapsed:?}, expected ~{delay:?}");
        let steps = harness.executions.list_steps(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 3);
    }

    #[tokio::test]
    async fn test_mixed_phased_workflow() {
        let harness = harness(MockExecutor::new("mock"));
        let wf = workflow(
            "phased",
            vec![
                StepSpec::new("init", "mock"),
                StepSpec::new("val1", "mock").in_group(1),
                StepSpec::new("val2", "mock").in_group(1),
                StepSpec::new("deploy-b", "mock").in_group(2),
                StepSpec::new("deploy-f", "mock").in_group(2),
                StepSpec::new("finalize", "mock"),
            ],
        );

        let execution = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let steps = harness.executions.list_steps(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 6);
        // finalize must start only after both deploys completed.
        let finalize = steps.iter().find(|s| s.name == "finalize").unwrap();
        for deploy in steps.iter().filter(|s| s.name.starts_with("deploy")) {
            assert!(deploy.completed_at.unwrap() <= finalize.started_at.unwrap());
        }
    }

    #[tokio::test]
    async fn test_failure_propagation_in_parallel_group() {
        let executor = MockExecutor::new("mock")
            .with_rule("slow-1", MockRule::ok_after(Duration::from_millis(120), &[]))
            .with_rule("bad", MockRule::fail_after(Duration::from_millis(30), "boom"))
            .with_rule("slow-2", MockRule::ok_after(Duration::from_millis(120), &[]));
        let harness = harness(executor);
        let wf = workflow(
            "failing",
            vec![
                StepSpec::new("slow-1", "mock").in_group(1),
                StepSpec::new("bad", "mock").in_group(1),
                StepSpec::new("slow-2", "mock").in_group(1),
                StepSpec::new("never-runs", "mock"),
            ],
        );

        let execution = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error_message.as_ref().unwrap().contains("boom"));

        // All three group members persisted; running steps finished.
        let steps = harness.executions.list_steps(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 3, "later groups must not start");
        let by_name = |name: &str| steps.iter().find(|s| s.name == name).unwrap();
        assert_eq!(by_name("bad").status, StepStatus::Failed);
        assert_eq!(by_name("slow-1").status, StepStatus::Completed);
        assert_eq!(by_name("slow-2").status, StepStatus::Completed);
        assert!(steps.iter().all(|s| s.name != "never-runs"));
    }

    #[tokio::test]
    async fn test_retry_resumes_from_failed_step() {
        let seven_steps: Vec<StepSpec> = (0..7)
            .map(|i| StepSpec::new(&format!("s{i}"), "mock"))
            .collect();
        let wf = workflow("retryable", seven_steps);

        // Parent run: s4 fails; s0..s3 complete with outputs.
        let mut parent_executor = MockExecutor::new("mock")
            .with_rule("s4", MockRule::fail_after(Duration::ZERO, "flaky"));
        for i in 0..4 {
            parent_executor = parent_executor.with_rule(
                &format!("s{i}"),
                MockRule::ok_after(Duration::ZERO, &[("result", &format!("v{i}"))]),
            );
        }
        let harness = harness(parent_executor);
        let parent = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(parent.status, ExecutionStatus::Failed);

        // Retry with a healthy executor, resuming from step 4.
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(MockExecutor::new("mock")));
        let retry_runner = WorkflowRunner::new(
            harness.executions.clone(),
            harness.resources.clone(),
            None,
            Arc::new(EventBus::new()),
            Arc::new(registry),
            RunnerConfig::default(),
        );

        let retry = retry_runner
            .run(
                "billing",
                &wf,
                RunOptions {
                    parent_execution_id: Some(parent.id),
                    resume_from_step: Some(4),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(retry.status, ExecutionStatus::Completed);
        assert_eq!(retry.parent_execution_id, Some(parent.id));
        assert!(retry.is_retry);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.resume_from_step, Some(4));

        let retry_steps = harness.executions.list_steps(&retry.id).await.unwrap();
        assert_eq!(retry_steps.len(), 7);
        let parent_steps = harness.executions.list_steps(&parent.id).await.unwrap();

        // Steps below the resume point carry the parent's outputs.
        for index in 0..4 {
            let inherited = &retry_steps[index];
            let original = parent_steps
                .iter()
                .find(|s| s.step_index == index as i32)
                .unwrap();
            assert_eq!(inherited.status, StepStatus::Completed);
            assert_eq!(inherited.outputs, original.outputs);
        }
        for index in 4..7 {
            assert_eq!(retry_steps[index].status, StepStatus::Completed);
        }

        // Parent untouched.
        let parent_after = harness
            .executions
            .find_by_id(&parent.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent_after.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_default_resume_is_first_failed_step() {
        let wf = workflow(
            "retryable",
            vec![
                StepSpec::new("ok", "mock"),
                StepSpec::new("bad", "mock"),
                StepSpec::new("tail", "mock"),
            ],
        );
        let executor = MockExecutor::new("mock")
            .with_rule("bad", MockRule::fail_after(Duration::ZERO, "nope"));
        let harness = harness(executor);
        let parent = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(MockExecutor::new("mock")));
        let retry_runner = WorkflowRunner::new(
            harness.executions.clone(),
            harness.resources.clone(),
            None,
            Arc::new(EventBus::new()),
            Arc::new(registry),
            RunnerConfig::default(),
        );
        let retry = retry_runner
            .run(
                "billing",
                &wf,
                RunOptions {
                    parent_execution_id: Some(parent.id),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(retry.status, ExecutionStatus::Completed);
        assert_eq!(retry.resume_from_step, Some(1));
    }

    #[tokio::test]
    async fn test_retry_rejects_non_terminal_parent_and_bad_resume() {
        let harness = harness(MockExecutor::new("mock"));
        let wf = workflow("wf", vec![StepSpec::new("a", "mock")]);
        let parent = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        let err = harness
            .runner
            .run(
                "billing",
                &wf,
                RunOptions {
                    parent_execution_id: Some(parent.id),
                    resume_from_step: Some(9),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ResumeOutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_fails_execution_distinctly() {
        let executor = MockExecutor::new("mock").with_default_delay(Duration::from_secs(5));
        let harness = harness(executor);
        let wf = workflow("slow", vec![StepSpec::new("forever", "mock")]);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = harness.runner.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(
                    "billing",
                    &wf,
                    RunOptions {
                        cancel: cancel_rx,
                        ..RunOptions::default()
                    },
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        let execution = handle.await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let steps = harness.executions.list_steps(&execution.id).await.unwrap();
        assert!(steps[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("cancelled"));
    }

    #[tokio::test]
    async fn test_step_timeout_is_reported_distinctly() {
        let executor = MockExecutor::new("mock").with_default_delay(Duration::from_secs(10));
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(executor));
        let runner = WorkflowRunner::new(
            executions.clone(),
            Arc::new(InMemoryResourceRepository::new()),
            None,
            Arc::new(EventBus::new()),
            Arc::new(registry),
            RunnerConfig {
                default_step_timeout: Duration::from_millis(40),
                ..RunnerConfig::default()
            },
        );

        let wf = workflow("slow", vec![StepSpec::new("tar-pit", "mock")]);
        let execution = runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let steps = executions.list_steps(&execution.id).await.unwrap();
        assert!(steps[0].error_message.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_step_type_rejected_before_any_row() {
        let harness = harness(MockExecutor::new("mock"));
        let wf = workflow("wf", vec![StepSpec::new("a", "warpdrive")]);

        let err = harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownStepType { .. }));
    }

    #[tokio::test]
    async fn test_event_sequence_for_successful_execution() {
        let harness = harness(MockExecutor::new("mock"));
        let mut sub = harness.bus.subscribe(None, 100).await;
        let wf = workflow(
            "seq",
            vec![StepSpec::new("a", "mock"), StepSpec::new("b", "mock")],
        );

        harness
            .runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = sub.rx.try_recv() {
            seen.push(event.event_type);
        }
        assert_eq!(seen.first().map(String::as_str), Some("workflow.started"));
        assert_eq!(
            seen.last().map(String::as_str),
            Some("workflow.completed")
        );
        let terminals = seen
            .iter()
            .filter(|t| *t == "workflow.completed" || *t == "workflow.failed")
            .count();
        assert_eq!(terminals, 1);
        // step.completed for each step precedes workflow.completed.
        assert_eq!(
            seen.iter().filter(|t| *t == "step.completed").count(),
            2
        );
    }

    #[tokio::test]
    async fn test_steps_advance_bound_resources() {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let requested = resources
            .upsert_requested(&NewResource {
                app_name: "billing".to_string(),
                name: "app-db".to_string(),
                resource_type: "postgres".to_string(),
                execution_id: None,
                properties: BTreeMap::new(),
                fingerprint: "fp".to_string(),
            })
            .await
            .unwrap();

        let executor = MockExecutor::new("mock").with_rule(
            "apply",
            MockRule::ok_after(Duration::ZERO, &[("connection_string", "postgres://db")]),
        );
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(executor));
        let runner = WorkflowRunner::new(
            Arc::new(InMemoryExecutionRepository::new()),
            resources.clone(),
            None,
            Arc::new(EventBus::new()),
            Arc::new(registry),
            RunnerConfig::default(),
        );

        let mut apply = StepSpec::new("apply", "mock");
        apply.resource = Some("app-db".to_string());
        let wf = workflow("provision", vec![apply]);

        let execution = runner
            .run("billing", &wf, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let resource = resources.find_by_id(&requested.id).await.unwrap().unwrap();
        assert_eq!(resource.state, ResourceState::Active);
        assert_eq!(
            resource.properties.get("connection_string").map(String::as_str),
            Some("postgres://db")
        );
    }
}
