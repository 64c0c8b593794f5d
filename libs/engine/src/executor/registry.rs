//! Registry mapping step type tags to executors

use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{NoopExecutor, ValidationExecutor};
use super::traits::StepExecutor;

/// Registry of step executors, keyed by type tag. Built at startup;
/// external provisioner executors register alongside the builtins.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Create a registry with the built-in executors
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ValidationExecutor));
        registry.register(Arc::new(NoopExecutor));
        registry
    }

    /// Register an executor under its type tag
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors
            .insert(executor.step_type().to_string(), executor);
    }

    /// Get the executor for a step type
    #[must_use]
    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }

    /// List registered type tags
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ExecutorRegistry::with_builtins();
        assert!(registry.get("validation").is_some());
        assert!(registry.get("noop").is_some());
        assert!(registry.get("terraform").is_none());
        assert_eq!(registry.list(), vec!["noop", "validation"]);
    }
}
