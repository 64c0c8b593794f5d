//! Deterministic step executors for engine tests
//!
//! Scenario suites mock provisioners with fixed sleeps and canned
//! results, so timing-sensitive behavior (parallelism, failure
//! propagation, cancellation) is reproducible.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use conductor_domain::StepSpec;

use crate::executor::{StepContext, StepError, StepExecutor, StepOutcome};

/// Canned behavior for one step name.
#[derive(Debug, Clone)]
pub struct MockRule {
    pub delay: Duration,
    pub result: Result<BTreeMap<String, String>, String>,
}

impl MockRule {
    /// Succeed after a delay with the given outputs.
    #[must_use]
    pub fn ok_after(delay: Duration, outputs: &[(&str, &str)]) -> Self {
        Self {
            delay,
            result: Ok(outputs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()),
        }
    }

    /// Fail after a delay with the given message.
    #[must_use]
    pub fn fail_after(delay: Duration, message: &str) -> Self {
        Self {
            delay,
            result: Err(message.to_string()),
        }
    }
}

/// A recorded dispatch, for asserting ordering and concurrency.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub step_name: String,
    pub started_at: Instant,
}

/// Step executor with per-step canned behavior and a dispatch log.
pub struct MockExecutor {
    type_tag: String,
    rules: HashMap<String, MockRule>,
    default_delay: Duration,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockExecutor {
    /// Executor for `type_tag` where unmatched steps succeed immediately
    /// with no outputs.
    #[must_use]
    pub fn new(type_tag: &str) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            rules: HashMap::new(),
            default_delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a rule for a step name.
    #[must_use]
    pub fn with_rule(mut self, step_name: &str, rule: MockRule) -> Self {
        self.rules.insert(step_name.to_string(), rule);
        self
    }

    /// Delay applied to steps without an explicit rule.
    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Handle to the dispatch log.
    #[must_use]
    pub fn calls(&self) -> Arc<Mutex<Vec<MockCall>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    fn step_type(&self) -> &str {
        &self.type_tag
    }

    async fn execute(
        &self,
        step: &StepSpec,
        _inputs: &BTreeMap<String, serde_json::Value>,
        _ctx: &StepContext,
    ) -> StepOutcome {
        self.calls
            .lock()
            .expect("mock call log")
            .push(MockCall {
                step_name: step.name.clone(),
                started_at: Instant::now(),
            });

        match self.rules.get(&step.name) {
            Some(rule) => {
                tokio::time::sleep(rule.delay).await;
                match &rule.result {
                    Ok(outputs) => Ok(outputs.clone()),
                    Err(message) => Err(StepError::failed(message.clone())),
                }
            }
            None => {
                tokio::time::sleep(self.default_delay).await;
                Ok(BTreeMap::new())
            }
        }
    }
}
