//! In-memory repository implementations
//!
//! Used by the engine test suites and local development; they honor the
//! same transition guards as the PostgreSQL implementations.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use conductor_domain::{
    Application, ApplicationId, Event, ExecutionId, ExecutionStatus, QueueTask, QueueTaskId,
    Resource, ResourceId, ResourceState, SpecId, SpecRecord, StepExecution, StepExecutionId,
    StepStatus, TaskStatus, WorkflowExecution,
};

use crate::pagination::{Page, Pagination};
use crate::repo::errors::*;
use crate::repo::pg_queue::QUARANTINE_THRESHOLD;
use crate::repo::traits::*;

// =============================================================================
// Applications
// =============================================================================

/// In-memory application repository
#[derive(Default)]
pub struct InMemoryApplicationRepository {
    apps: Mutex<HashMap<String, Application>>,
    specs: Mutex<Vec<SpecRecord>>,
}

impl InMemoryApplicationRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn upsert(&self, app: &NewApplication) -> Result<Application, UpsertApplicationError> {
        let mut apps = self.apps.lock().await;
        let entry = apps.entry(app.name.clone()).or_insert_with(|| Application {
            id: ApplicationId::new(),
            name: app.name.clone(),
            team: None,
            environment: None,
            latest_spec_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        if app.team.is_some() {
            entry.team = app.team.clone();
        }
        if app.environment.is_some() {
            entry.environment = app.environment.clone();
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Application>, FindApplicationError> {
        Ok(self.apps.lock().await.get(name).cloned())
    }

    async fn list(&self, pagination: Pagination) -> Result<Page<Application>, FindApplicationError> {
        let apps = self.apps.lock().await;
        let mut all: Vec<Application> = apps.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(all, &pagination))
    }

    async fn delete(&self, name: &str) -> Result<(), DeleteApplicationError> {
        let removed = self.apps.lock().await.remove(name);
        if removed.is_none() {
            return Err(DeleteApplicationError::NotFound(name.to_string()));
        }
        self.specs.lock().await.retain(|s| s.app_name != name);
        Ok(())
    }

    async fn insert_spec(&self, spec: &NewSpec) -> Result<SpecRecord, InsertSpecError> {
        let record = SpecRecord {
            id: SpecId::new(),
            app_name: spec.app_name.clone(),
            body: spec.body.clone(),
            submitted_by: spec.submitted_by.clone(),
            submitted_at: Utc::now(),
        };

        let mut apps = self.apps.lock().await;
        let app = apps
            .get_mut(&spec.app_name)
            .ok_or_else(|| InsertSpecError::ApplicationNotFound(spec.app_name.clone()))?;
        app.latest_spec_id = Some(record.id);
        app.updated_at = Utc::now();

        self.specs.lock().await.push(record.clone());
        Ok(record)
    }

    async fn latest_spec(&self, app_name: &str) -> Result<Option<SpecRecord>, FindApplicationError> {
        let latest = self
            .apps
            .lock()
            .await
            .get(app_name)
            .and_then(|a| a.latest_spec_id);
        let Some(spec_id) = latest else {
            return Ok(None);
        };
        Ok(self
            .specs
            .lock()
            .await
            .iter()
            .find(|s| s.id == spec_id)
            .cloned())
    }
}

// =============================================================================
// Executions
// =============================================================================

/// In-memory execution repository
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: Mutex<HashMap<ExecutionId, WorkflowExecution>>,
    steps: Mutex<HashMap<StepExecutionId, StepExecution>>,
}

impl InMemoryExecutionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, exec: &NewExecution) -> Result<WorkflowExecution, CreateExecutionError> {
        let executions = &mut *self.executions.lock().await;
        if let Some(parent) = exec.parent_execution_id {
            if !executions.contains_key(&parent) {
                return Err(CreateExecutionError::ParentNotFound(parent));
            }
        }
        let execution = WorkflowExecution {
            id: exec.id,
            app_name: exec.app_name.clone(),
            workflow_name: exec.workflow_name.clone(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: exec.total_steps,
            error_message: None,
            parent_execution_id: exec.parent_execution_id,
            retry_count: exec.retry_count,
            is_retry: exec.parent_execution_id.is_some(),
            resume_from_step: exec.resume_from_step,
            created_at: Utc::now(),
        };
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<WorkflowExecution>, FindExecutionError> {
        Ok(self.executions.lock().await.get(id).cloned())
    }

    async fn list(
        &self,
        app_name: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<WorkflowExecution>, FindExecutionError> {
        let executions = self.executions.lock().await;
        let mut all: Vec<WorkflowExecution> = executions
            .values()
            .filter(|e| app_name.map_or(true, |a| e.app_name == a))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(all, &pagination))
    }

    async fn mark_running(&self, id: &ExecutionId) -> Result<(), UpdateExecutionError> {
        let mut executions = self.executions.lock().await;
        let exec = executions
            .get_mut(id)
            .ok_or(UpdateExecutionError::NotFound(*id))?;
        if exec.status != ExecutionStatus::Pending {
            return Err(UpdateExecutionError::AlreadyTerminal(*id));
        }
        exec.status = ExecutionStatus::Running;
        exec.started_at = Some(Utc::now());
        Ok(())
    }

    async fn finish(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), UpdateExecutionError> {
        let mut executions = self.executions.lock().await;
        let exec = executions
            .get_mut(id)
            .ok_or(UpdateExecutionError::NotFound(*id))?;
        if exec.status.is_terminal() {
            return Err(UpdateExecutionError::AlreadyTerminal(*id));
        }
        exec.status = status;
        exec.completed_at = Some(Utc::now());
        exec.error_message = error.map(String::from);
        Ok(())
    }

    async fn insert_step(&self, step: &StepExecution) -> Result<(), CreateStepError> {
        if !self
            .executions
            .lock()
            .await
            .contains_key(&step.execution_id)
        {
            return Err(CreateStepError::ExecutionNotFound(step.execution_id));
        }
        self.steps.lock().await.insert(step.id, step.clone());
        Ok(())
    }

    async fn start_step(&self, id: &StepExecutionId) -> Result<(), UpdateStepError> {
        let mut steps = self.steps.lock().await;
        let step = steps.get_mut(id).ok_or(UpdateStepError::NotFound(*id))?;
        if step.status != StepStatus::Pending {
            return Err(UpdateStepError::AlreadyTerminal(*id));
        }
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        Ok(())
    }

    async fn finish_step(
        &self,
        id: &StepExecutionId,
        status: StepStatus,
        outputs: &BTreeMap<String, String>,
        error: Option<&str>,
    ) -> Result<(), UpdateStepError> {
        let mut steps = self.steps.lock().await;
        let step = steps.get_mut(id).ok_or(UpdateStepError::NotFound(*id))?;
        if step.status.is_terminal() {
            return Err(UpdateStepError::AlreadyTerminal(*id));
        }
        step.status = status;
        step.completed_at = Some(Utc::now());
        step.outputs = outputs.clone();
        step.error_message = error.map(String::from);
        Ok(())
    }

    async fn list_steps(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<StepExecution>, FindExecutionError> {
        let steps = self.steps.lock().await;
        let mut rows: Vec<StepExecution> = steps
            .values()
            .filter(|s| s.execution_id == *execution_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.step_index);
        Ok(rows)
    }
}

// =============================================================================
// Resources
// =============================================================================

/// In-memory resource repository
#[derive(Default)]
pub struct InMemoryResourceRepository {
    resources: Mutex<HashMap<(String, String), Resource>>,
}

impl InMemoryResourceRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn upsert_requested(&self, res: &NewResource) -> Result<Resource, UpsertResourceError> {
        let mut resources = self.resources.lock().await;
        let key = (res.app_name.clone(), res.name.clone());
        let entry = resources.entry(key).or_insert_with(|| Resource {
            id: ResourceId::new(),
            app_name: res.app_name.clone(),
            name: res.name.clone(),
            resource_type: res.resource_type.clone(),
            state: ResourceState::Requested,
            execution_id: None,
            properties: BTreeMap::new(),
            fingerprint: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        entry.state = ResourceState::Requested;
        entry.resource_type = res.resource_type.clone();
        entry.execution_id = res.execution_id;
        entry.properties = res.properties.clone();
        entry.fingerprint = Some(res.fingerprint.clone());
        entry.error_message = None;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn find_by_id(&self, id: &ResourceId) -> Result<Option<Resource>, FindResourceError> {
        Ok(self
            .resources
            .lock()
            .await
            .values()
            .find(|r| r.id == *id)
            .cloned())
    }

    async fn find_by_name(
        &self,
        app_name: &str,
        name: &str,
    ) -> Result<Option<Resource>, FindResourceError> {
        Ok(self
            .resources
            .lock()
            .await
            .get(&(app_name.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        resource_type: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<Resource>, FindResourceError> {
        let resources = self.resources.lock().await;
        let mut all: Vec<Resource> = resources
            .values()
            .filter(|r| resource_type.map_or(true, |t| r.resource_type == t))
            .cloned()
            .collect();
        all.sort_by(|a, b| (&a.app_name, &a.name).cmp(&(&b.app_name, &b.name)));
        Ok(paginate(all, &pagination))
    }

    async fn list_by_app(&self, app_name: &str) -> Result<Vec<Resource>, FindResourceError> {
        let resources = self.resources.lock().await;
        let mut all: Vec<Resource> = resources
            .values()
            .filter(|r| r.app_name == app_name)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn transition(
        &self,
        id: &ResourceId,
        to: ResourceState,
        error: Option<&str>,
    ) -> Result<Resource, UpdateResourceError> {
        let mut resources = self.resources.lock().await;
        let resource = resources
            .values_mut()
            .find(|r| r.id == *id)
            .ok_or(UpdateResourceError::NotFound(*id))?;

        if !resource.state.can_transition_to(to) {
            return Err(UpdateResourceError::InvalidTransition {
                from: format!("{:?}", resource.state).to_lowercase(),
                to: format!("{to:?}").to_lowercase(),
            });
        }
        resource.state = to;
        resource.error_message = error.map(String::from);
        resource.updated_at = Utc::now();
        Ok(resource.clone())
    }

    async fn set_properties(
        &self,
        id: &ResourceId,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), UpdateResourceError> {
        let mut resources = self.resources.lock().await;
        let resource = resources
            .values_mut()
            .find(|r| r.id == *id)
            .ok_or(UpdateResourceError::NotFound(*id))?;
        resource.properties.extend(properties.clone());
        resource.updated_at = Utc::now();
        Ok(())
    }
}

// =============================================================================
// Queue
// =============================================================================

/// In-memory FIFO queue repository
#[derive(Default)]
pub struct InMemoryQueueRepository {
    tasks: Mutex<Vec<QueueTask>>,
}

impl InMemoryQueueRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn enqueue(&self, task: &NewQueueTask) -> Result<QueueTask, EnqueueError> {
        let queued = QueueTask {
            id: QueueTaskId::new(),
            app_name: task.app_name.clone(),
            workflow_name: task.workflow_name.clone(),
            workflow: task.workflow.clone(),
            metadata: task.metadata.clone(),
            status: TaskStatus::Pending,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            lease_expires_at: None,
            crash_count: 0,
            error_message: None,
        };
        self.tasks.lock().await.push(queued.clone());
        Ok(queued)
    }

    async fn claim(&self, lease: Duration) -> Result<Option<QueueTask>, ClaimError> {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| t.enqueued_at)
        else {
            return Ok(None);
        };
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.lease_expires_at = Some(Utc::now() + lease);
        Ok(Some(task.clone()))
    }

    async fn renew_lease(&self, id: &QueueTaskId, lease: Duration) -> Result<(), UpdateTaskError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == *id && t.status == TaskStatus::Running)
            .ok_or(UpdateTaskError::NotClaimed(*id))?;
        task.lease_expires_at = Some(Utc::now() + lease);
        Ok(())
    }

    async fn release(&self, id: &QueueTaskId, outcome: TaskOutcome) -> Result<(), UpdateTaskError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == *id && t.status == TaskStatus::Running)
            .ok_or(UpdateTaskError::NotClaimed(*id))?;
        match outcome {
            TaskOutcome::Completed => {
                task.status = TaskStatus::Completed;
            }
            TaskOutcome::Failed { error } => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(error);
            }
        }
        task.completed_at = Some(Utc::now());
        task.lease_expires_at = None;
        Ok(())
    }

    async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<u64, ClaimError> {
        let mut tasks = self.tasks.lock().await;
        let mut reclaimed = 0;
        for task in tasks.iter_mut() {
            if task.status != TaskStatus::Running {
                continue;
            }
            let Some(expires) = task.lease_expires_at else {
                continue;
            };
            if expires >= now {
                continue;
            }
            task.crash_count += 1;
            task.lease_expires_at = None;
            task.started_at = None;
            if task.crash_count >= QUARANTINE_THRESHOLD {
                task.status = TaskStatus::Quarantined;
                task.error_message =
                    Some("quarantined after repeated unclean releases".to_string());
            } else {
                task.status = TaskStatus::Pending;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn find_by_id(&self, id: &QueueTaskId) -> Result<Option<QueueTask>, ClaimError> {
        Ok(self.tasks.lock().await.iter().find(|t| t.id == *id).cloned())
    }

    async fn find_by_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<QueueTask>, ClaimError> {
        let needle = execution_id.to_string();
        Ok(self
            .tasks
            .lock()
            .await
            .iter()
            .find(|t| t.metadata.get("execution_id").and_then(|v| v.as_str()) == Some(&needle))
            .cloned())
    }
}

// =============================================================================
// Events
// =============================================================================

/// In-memory event log
#[derive(Default)]
pub struct InMemoryEventRepository {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, event: &Event) -> Result<(), AppendEventError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn list_by_app(
        &self,
        app_name: &str,
        pagination: Pagination,
    ) -> Result<Page<Event>, AppendEventError> {
        let events = self.events.lock().await;
        let mut all: Vec<Event> = events
            .iter()
            .filter(|e| e.app_name == app_name)
            .cloned()
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(all, &pagination))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn paginate<T>(all: Vec<T>, pagination: &Pagination) -> Page<T> {
    let total = all.len() as i64;
    let items = all
        .into_iter()
        .skip(pagination.offset.max(0) as usize)
        .take(pagination.clamped_limit() as usize)
        .collect();
    Page::new(items, total, pagination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_domain::{StepSpec, WorkflowSpec};

    fn sample_task(app: &str) -> NewQueueTask {
        NewQueueTask {
            app_name: app.to_string(),
            workflow_name: "deploy".to_string(),
            workflow: WorkflowSpec {
                name: "deploy".to_string(),
                category: conductor_domain::WorkflowCategory::Provisioner,
                input_schema: None,
                steps: vec![StepSpec::new("noop", "validation")],
            },
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_exclusive() {
        let queue = InMemoryQueueRepository::new();
        let first = queue.enqueue(&sample_task("a")).await.unwrap();
        let _second = queue.enqueue(&sample_task("b")).await.unwrap();

        let claimed = queue.claim(Duration::seconds(30)).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, TaskStatus::Running);

        // The claimed task is not handed out twice.
        let next = queue.claim(Duration::seconds(30)).await.unwrap().unwrap();
        assert_ne!(next.id, first.id);
        assert!(queue.claim(Duration::seconds(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reclaim_stale_quarantines_repeat_offenders() {
        let queue = InMemoryQueueRepository::new();
        let task = queue.enqueue(&sample_task("a")).await.unwrap();

        for round in 0..QUARANTINE_THRESHOLD {
            let claimed = queue.claim(Duration::seconds(0)).await.unwrap();
            assert!(claimed.is_some(), "round {round} should claim");
            // Lease of zero seconds is immediately stale.
            queue
                .reclaim_stale(Utc::now() + Duration::seconds(1))
                .await
                .unwrap();
        }

        let state = queue.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Quarantined);
    }

    #[tokio::test]
    async fn test_execution_terminal_state_set_once() {
        let repo = InMemoryExecutionRepository::new();
        let exec = repo
            .create(&NewExecution {
                id: ExecutionId::new(),
                app_name: "a".to_string(),
                workflow_name: "deploy".to_string(),
                total_steps: 1,
                parent_execution_id: None,
                retry_count: 0,
                resume_from_step: None,
            })
            .await
            .unwrap();

        repo.mark_running(&exec.id).await.unwrap();
        repo.finish(&exec.id, ExecutionStatus::Completed, None)
            .await
            .unwrap();

        let err = repo
            .finish(&exec.id, ExecutionStatus::Failed, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateExecutionError::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_resource_regression_rejected() {
        let repo = InMemoryResourceRepository::new();
        let res = repo
            .upsert_requested(&NewResource {
                app_name: "a".to_string(),
                name: "db".to_string(),
                resource_type: "postgres".to_string(),
                execution_id: None,
                properties: BTreeMap::new(),
                fingerprint: "fp".to_string(),
            })
            .await
            .unwrap();

        repo.transition(&res.id, ResourceState::Provisioning, None)
            .await
            .unwrap();
        repo.transition(&res.id, ResourceState::Active, None)
            .await
            .unwrap();

        let err = repo
            .transition(&res.id, ResourceState::Provisioning, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateResourceError::InvalidTransition { .. }));
    }
}
