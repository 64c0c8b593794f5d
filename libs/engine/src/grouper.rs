//! Step grouper
//!
//! Converts a workflow's ordered step list into an ordered list of
//! execution groups. All steps in one group run concurrently; groups run
//! strictly in sequence.
//!
//! Rules, first match wins per step:
//! 1. `parallelGroup = N` joins numbered group N (the group number wins
//!    when `parallel: true` is also set).
//! 2. `parallel: true` joins a synthetic group shared with adjacent
//!    parallel steps, closed off by the next non-parallel step.
//! 3. Everything else is a singleton group at its declared position.

use conductor_domain::StepSpec;

/// A set of steps dispatched concurrently. Carries the original declared
/// index of each step so resume-from-step can address them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionGroup {
    /// (declared index, step) pairs in declaration order
    pub steps: Vec<(usize, StepSpec)>,
}

impl ExecutionGroup {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Lowest declared step index in this group.
    #[must_use]
    pub fn first_index(&self) -> usize {
        self.steps.first().map_or(usize::MAX, |(idx, _)| *idx)
    }

    /// Highest declared step index in this group.
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.steps.iter().map(|(idx, _)| *idx).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKey {
    Numbered(u32),
    Synthetic(usize),
    Singleton(usize),
}

/// Group a workflow's steps into ordered execution groups.
#[must_use]
pub fn group_steps(steps: &[StepSpec]) -> Vec<ExecutionGroup> {
    let mut keys: Vec<GroupKey> = Vec::new();
    let mut groups: Vec<ExecutionGroup> = Vec::new();
    let mut open_run: Option<usize> = None;

    for (index, step) in steps.iter().enumerate() {
        let key = if let Some(number) = step.parallel_group {
            open_run = None;
            GroupKey::Numbered(number)
        } else if step.parallel {
            match open_run {
                Some(slot) => GroupKey::Synthetic(slot),
                None => {
                    let slot = groups.len();
                    open_run = Some(slot);
                    GroupKey::Synthetic(slot)
                }
            }
        } else {
            open_run = None;
            GroupKey::Singleton(index)
        };

        if let Some(slot) = keys.iter().position(|k| *k == key) {
            groups[slot].steps.push((index, step.clone()));
        } else {
            keys.push(key);
            let mut group = ExecutionGroup::new();
            group.steps.push((index, step.clone()));
            groups.push(group);
        }
    }

    reorder_numbered(&mut keys, &mut groups);
    groups
}

/// Numbered groups run in ascending group number. Their slots relative to
/// sequential and synthetic groups stay where declaration put them; only
/// the numbered groups are permuted among their own slots.
fn reorder_numbered(keys: &mut [GroupKey], groups: &mut [ExecutionGroup]) {
    let slots: Vec<usize> = keys
        .iter()
        .enumerate()
        .filter_map(|(slot, key)| matches!(key, GroupKey::Numbered(_)).then_some(slot))
        .collect();

    let mut ordered: Vec<(u32, ExecutionGroup)> = slots
        .iter()
        .map(|&slot| {
            let GroupKey::Numbered(number) = keys[slot] else {
                unreachable!()
            };
            (number, groups[slot].clone())
        })
        .collect();
    ordered.sort_by_key(|(number, _)| *number);

    for (&slot, (_, group)) in slots.iter().zip(ordered) {
        groups[slot] = group;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(groups: &[ExecutionGroup]) -> Vec<Vec<&str>> {
        groups
            .iter()
            .map(|g| g.steps.iter().map(|(_, s)| s.name.as_str()).collect())
            .collect()
    }

    #[test]
    fn test_pure_sequential() {
        let steps = vec![
            StepSpec::new("a", "validation"),
            StepSpec::new("b", "validation"),
            StepSpec::new("c", "validation"),
        ];
        let groups = group_steps(&steps);
        assert_eq!(names(&groups), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_parallel_flags_share_one_group() {
        let steps = vec![
            StepSpec::new("a", "terraform").parallel(),
            StepSpec::new("b", "terraform").parallel(),
            StepSpec::new("c", "terraform").parallel(),
        ];
        let groups = group_steps(&steps);
        assert_eq!(names(&groups), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_mixed_phased() {
        let steps = vec![
            StepSpec::new("init", "validation"),
            StepSpec::new("val1", "validation").in_group(1),
            StepSpec::new("val2", "validation").in_group(1),
            StepSpec::new("deploy-b", "kubernetes").in_group(2),
            StepSpec::new("deploy-f", "kubernetes").in_group(2),
            StepSpec::new("finalize", "validation"),
        ];
        let groups = group_steps(&steps);
        assert_eq!(
            names(&groups),
            vec![
                vec!["init"],
                vec!["val1", "val2"],
                vec!["deploy-b", "deploy-f"],
                vec!["finalize"],
            ]
        );
    }

    #[test]
    fn test_sequential_step_closes_parallel_run() {
        let steps = vec![
            StepSpec::new("a", "terraform").parallel(),
            StepSpec::new("b", "terraform").parallel(),
            StepSpec::new("gate", "validation"),
            StepSpec::new("c", "terraform").parallel(),
        ];
        let groups = group_steps(&steps);
        assert_eq!(
            names(&groups),
            vec![vec!["a", "b"], vec!["gate"], vec!["c"]]
        );
    }

    #[test]
    fn test_group_number_wins_over_parallel_flag() {
        let mut both = StepSpec::new("both", "terraform").in_group(3);
        both.parallel = true;
        let steps = vec![
            StepSpec::new("a", "terraform").parallel(),
            both,
            StepSpec::new("b", "terraform").in_group(3),
        ];
        let groups = group_steps(&steps);
        assert_eq!(names(&groups), vec![vec!["a"], vec!["both", "b"]]);
    }

    #[test]
    fn test_numbered_groups_sorted_ascending() {
        let steps = vec![
            StepSpec::new("late", "terraform").in_group(5),
            StepSpec::new("early", "terraform").in_group(1),
        ];
        let groups = group_steps(&steps);
        assert_eq!(names(&groups), vec![vec!["early"], vec!["late"]]);
    }

    #[test]
    fn test_grouping_is_idempotent() {
        let steps = vec![
            StepSpec::new("init", "validation"),
            StepSpec::new("a", "terraform").in_group(1),
            StepSpec::new("b", "terraform").in_group(1),
            StepSpec::new("fin", "validation"),
        ];
        let first = group_steps(&steps);

        // Rebuild a workflow from the grouping and group it again.
        let mut flattened = Vec::new();
        for (group_index, group) in first.iter().enumerate() {
            for (_, step) in &group.steps {
                let mut step = step.clone();
                step.parallel = false;
                step.parallel_group = (group.steps.len() > 1).then_some(group_index as u32);
                flattened.push(step);
            }
        }
        let second = group_steps(&flattened);
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn test_empty_workflow() {
        assert!(group_steps(&[]).is_empty());
    }
}
