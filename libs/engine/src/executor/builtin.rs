//! Built-in step executors
//!
//! External provisioners (terraform, kubernetes, ansible) live outside
//! this repository and register through the same registry. The builtins
//! cover spec validation gates and no-op steps.

use std::collections::BTreeMap;

use async_trait::async_trait;

use conductor_domain::StepSpec;

use super::traits::{StepContext, StepError, StepExecutor, StepOutcome};

/// Validation gate: checks that every input named in `required` is present
/// and non-empty. Produces no outputs.
pub struct ValidationExecutor;

#[async_trait]
impl StepExecutor for ValidationExecutor {
    fn step_type(&self) -> &str {
        "validation"
    }

    async fn execute(
        &self,
        _step: &StepSpec,
        inputs: &BTreeMap<String, serde_json::Value>,
        _ctx: &StepContext,
    ) -> StepOutcome {
        let required: Vec<String> = inputs
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        for name in &required {
            let present = inputs
                .get(name)
                .is_some_and(|v| !matches!(v, serde_json::Value::Null)
                    && v.as_str().map_or(true, |s| !s.trim().is_empty()));
            if !present {
                return Err(StepError::failed(format!(
                    "required input '{name}' is missing or empty"
                )));
            }
        }

        Ok(BTreeMap::new())
    }
}

/// No-op step: echoes its scalar inputs as outputs. Useful for wiring
/// values through a workflow and for smoke workflows.
pub struct NoopExecutor;

#[async_trait]
impl StepExecutor for NoopExecutor {
    fn step_type(&self) -> &str {
        "noop"
    }

    async fn execute(
        &self,
        _step: &StepSpec,
        inputs: &BTreeMap<String, serde_json::Value>,
        _ctx: &StepContext,
    ) -> StepOutcome {
        let outputs = inputs
            .iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key.clone(), s.clone())),
                serde_json::Value::Number(n) => Some((key.clone(), n.to_string())),
                serde_json::Value::Bool(b) => Some((key.clone(), b.to_string())),
                _ => None,
            })
            .collect();
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_domain::ExecutionId;

    fn ctx() -> StepContext {
        StepContext {
            execution_id: ExecutionId::new(),
            app_name: "billing".to_string(),
            environment: None,
            submitter: None,
            step_index: 0,
        }
    }

    #[tokio::test]
    async fn test_validation_passes_when_required_present() {
        let inputs = BTreeMap::from([
            ("required".to_string(), serde_json::json!(["image"])),
            ("image".to_string(), serde_json::json!("ghcr.io/acme/app:1")),
        ]);
        let step = StepSpec::new("check", "validation");
        let outputs = ValidationExecutor
            .execute(&step, &inputs, &ctx())
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejects_missing_input() {
        let inputs = BTreeMap::from([("required".to_string(), serde_json::json!(["image"]))]);
        let step = StepSpec::new("check", "validation");
        let err = ValidationExecutor
            .execute(&step, &inputs, &ctx())
            .await
            .unwrap_err();
        assert!(err.message.contains("image"));
    }

    #[tokio::test]
    async fn test_noop_echoes_scalars() {
        let inputs = BTreeMap::from([
            ("name".to_string(), serde_json::json!("db")),
            ("size".to_string(), serde_json::json!(3)),
            ("nested".to_string(), serde_json::json!({"skipped": true})),
        ]);
        let step = StepSpec::new("echo", "noop");
        let outputs = NoopExecutor.execute(&step, &inputs, &ctx()).await.unwrap();
        assert_eq!(outputs.get("name").map(String::as_str), Some("db"));
        assert_eq!(outputs.get("size").map(String::as_str), Some("3"));
        assert!(!outputs.contains_key("nested"));
    }
}
