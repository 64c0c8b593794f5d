//! Provisioning plans
//!
//! The resolver's output: each declared resource classified against
//! persisted state, in dependency order. A plan with work is synthesized
//! into a single deployment workflow for the executor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use conductor_domain::{DiffClass, ResourceId, StepSpec, WorkflowCategory, WorkflowSpec};

/// One declared (or removed) resource in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    /// Logical resource name from the spec
    pub name: String,
    pub resource_type: String,
    pub diff: DiffClass,
    /// Provider owning the type; absent for removed resources
    pub provider: Option<String>,
    /// Workflow to execute; present only when the item contributes work
    pub workflow: Option<WorkflowSpec>,
    /// Persisted resource row the executor advances
    pub resource_id: Option<ResourceId>,
    /// Declared properties, normalized
    pub properties: BTreeMap<String, String>,
}

impl PlanItem {
    /// Whether this item dispatches any steps.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.workflow.is_some()
    }
}

/// A dependency-ordered provisioning plan for one spec submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub app_name: String,
    pub environment: Option<String>,
    /// Items in dependency order: referenced resources precede referrers
    pub items: Vec<PlanItem>,
}

impl Plan {
    /// Whether any item dispatches steps.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.items.iter().any(PlanItem::has_work)
    }

    /// Synthesize one deployment workflow from the plan.
    ///
    /// Per-item steps keep their declared phasing but are rebased onto
    /// fresh group numbers so phases never merge across resources; step
    /// names are prefixed with the resource name to keep output references
    /// unambiguous; each step is bound to its resource.
    #[must_use]
    pub fn to_workflow(&self, name: &str) -> WorkflowSpec {
        let mut steps = Vec::new();
        let mut next_group: u32 = 0;

        for item in &self.items {
            let Some(workflow) = &item.workflow else {
                continue;
            };

            let mut group_map: BTreeMap<u32, u32> = BTreeMap::new();
            let mut run_group: Option<u32> = None;

            for step in &workflow.steps {
                let mut rebased = StepSpec {
                    name: format!("{}-{}", item.name, step.name),
                    resource: Some(step.resource.clone().unwrap_or_else(|| item.name.clone())),
                    ..step.clone()
                };

                if let Some(group) = step.parallel_group {
                    // Group number wins over the parallel flag.
                    let mapped = *group_map.entry(group).or_insert_with(|| {
                        let g = next_group;
                        next_group += 1;
                        g
                    });
                    rebased.parallel_group = Some(mapped);
                    rebased.parallel = false;
                    run_group = None;
                } else if step.parallel {
                    // Adjacent parallel steps share one synthetic group,
                    // closed off by the next sequential step.
                    let group = *run_group.get_or_insert_with(|| {
                        let g = next_group;
                        next_group += 1;
                        g
                    });
                    rebased.parallel_group = Some(group);
                    rebased.parallel = false;
                } else {
                    run_group = None;
                }

                steps.push(rebased);
            }
        }

        WorkflowSpec {
            name: name.to_string(),
            category: WorkflowCategory::Provisioner,
            input_schema: None,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, steps: Vec<StepSpec>) -> PlanItem {
        PlanItem {
            name: name.to_string(),
            resource_type: "postgres".to_string(),
            diff: DiffClass::New,
            provider: Some("db-team".to_string()),
            workflow: Some(WorkflowSpec {
                name: format!("provision-{name}"),
                category: WorkflowCategory::Provisioner,
                input_schema: None,
                steps,
            }),
            resource_id: None,
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn test_to_workflow_rebases_groups_across_items() {
        let plan = Plan {
            app_name: "billing".to_string(),
            environment: None,
            items: vec![
                item(
                    "db",
                    vec![
                        StepSpec::new("plan", "terraform").in_group(1),
                        StepSpec::new("apply", "terraform").in_group(2),
                    ],
                ),
                item(
                    "worker",
                    vec![
                        StepSpec::new("plan", "terraform").in_group(1),
                        StepSpec::new("apply", "terraform").in_group(2),
                    ],
                ),
            ],
        };

        let workflow = plan.to_workflow("deploy-billing");
        let groups: Vec<Option<u32>> =
            workflow.steps.iter().map(|s| s.parallel_group).collect();
        // db phases 0,1; worker phases 2,3 - no merging across resources.
        assert_eq!(groups, vec![Some(0), Some(1), Some(2), Some(3)]);
        assert_eq!(workflow.steps[0].name, "db-plan");
        assert_eq!(workflow.steps[2].resource.as_deref(), Some("worker"));
    }

    #[test]
    fn test_to_workflow_converts_parallel_runs() {
        let plan = Plan {
            app_name: "billing".to_string(),
            environment: None,
            items: vec![item(
                "db",
                vec![
                    StepSpec::new("init", "validation"),
                    StepSpec::new("a", "terraform").parallel(),
                    StepSpec::new("b", "terraform").parallel(),
                    StepSpec::new("finalize", "validation"),
                    StepSpec::new("c", "terraform").parallel(),
                ],
            )],
        };

        let workflow = plan.to_workflow("deploy-billing");
        let groups: Vec<Option<u32>> =
            workflow.steps.iter().map(|s| s.parallel_group).collect();
        // a and b share a run; finalize breaks it; c starts a new one.
        assert_eq!(groups, vec![None, Some(0), Some(0), None, Some(1)]);
        assert!(workflow.steps.iter().all(|s| !s.parallel));
    }

    #[test]
    fn test_unchanged_items_contribute_no_steps() {
        let mut unchanged = item("db", vec![StepSpec::new("apply", "terraform")]);
        unchanged.diff = DiffClass::Unchanged;
        unchanged.workflow = None;

        let plan = Plan {
            app_name: "billing".to_string(),
            environment: None,
            items: vec![unchanged],
        };
        assert!(!plan.has_work());
        assert!(plan.to_workflow("deploy-billing").steps.is_empty());
    }
}
