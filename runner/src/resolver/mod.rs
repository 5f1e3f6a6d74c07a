//! Dependency resolution and readiness classification.
//!
//! Pure and infallible: given a flat list of tasks it always produces a
//! `DependencyResult`, degrading unresolvable references into
//! `unresolved_deps` rather than failing. See the classification rules
//! below — they are applied in order, first match wins.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::task::{BlockReason, Classification, DependencyResult, ResolvedTask, ResolverStats};
use crate::domain::{Task, TaskIndex, TaskStatus};

/// Effective status used for classification: a task's declared status,
/// unless it is in the cycle set, in which case it is treated as
/// `"circular"` regardless of what it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectiveStatus {
    Declared(TaskStatus),
    Circular,
}

impl EffectiveStatus {
    fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::Circular | Self::Declared(TaskStatus::Blocked) | Self::Declared(TaskStatus::Cancelled)
        )
    }

    fn is_pending_or_in_progress(self) -> bool {
        matches!(self, Self::Declared(TaskStatus::Pending) | Self::Declared(TaskStatus::InProgress))
    }

    fn counts_as_parent_cleared(self) -> bool {
        matches!(
            self,
            Self::Declared(TaskStatus::Active) | Self::Declared(TaskStatus::InProgress) | Self::Declared(TaskStatus::Completed)
        )
    }
}

/// Safety bound on cycle-detection BFS iterations per start node, guarding
/// against pathological inputs without changing correctness for any
/// realistic task count.
const CYCLE_DETECTION_ITERATION_CAP: usize = 10_000;

/// Resolve and classify a flat list of tasks. Never fails.
pub fn resolve(tasks: &[Task]) -> DependencyResult {
    if tasks.is_empty() {
        return DependencyResult::default();
    }

    let index = TaskIndex::build(tasks);

    let mut resolved_deps: HashMap<&str, Vec<String>> = HashMap::new();
    let mut unresolved_deps: HashMap<&str, Vec<String>> = HashMap::new();
    for task in tasks {
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for reference in &task.depends_on {
            match index.resolve(reference) {
                Some(id) => resolved.push(id.to_string()),
                None => unresolved.push(reference.clone()),
            }
        }
        resolved_deps.insert(task.id.as_str(), resolved);
        unresolved_deps.insert(task.id.as_str(), unresolved);
    }

    let cycle_set = detect_cycles(tasks, &resolved_deps);

    let effective_status: HashMap<&str, EffectiveStatus> = tasks
        .iter()
        .map(|t| {
            let status = if cycle_set.contains(t.id.as_str()) {
                EffectiveStatus::Circular
            } else {
                EffectiveStatus::Declared(t.status)
            };
            (t.id.as_str(), status)
        })
        .collect();

    let mut stats = ResolverStats { total: tasks.len(), ..Default::default() };
    let mut cycles: Vec<Vec<String>> = Vec::new();
    if !cycle_set.is_empty() {
        cycles.push(cycle_set.iter().cloned().collect());
    }

    let resolved_tasks: Vec<ResolvedTask> = tasks
        .iter()
        .map(|task| {
            let parent_chain = build_parent_chain(task, &index);
            let deps = resolved_deps.get(task.id.as_str()).cloned().unwrap_or_default();
            let in_cycle = cycle_set.contains(task.id.as_str());

            let (classification, blocked_by, blocked_by_reason, waiting_on) =
                classify(task, &parent_chain, &deps, &effective_status, in_cycle);

            match classification {
                Classification::Ready => stats.ready += 1,
                Classification::Waiting | Classification::WaitingOnParent => stats.waiting += 1,
                Classification::Blocked | Classification::BlockedByParent => stats.blocked += 1,
                Classification::NotPending => stats.not_pending += 1,
            }

            ResolvedTask {
                resolved_deps: deps,
                unresolved_deps: unresolved_deps.get(task.id.as_str()).cloned().unwrap_or_default(),
                parent_chain,
                classification,
                blocked_by,
                blocked_by_reason,
                waiting_on,
                in_cycle,
                resolved_workdir: None,
                task: task.clone(),
            }
        })
        .collect();

    DependencyResult {
        tasks: resolved_tasks,
        cycles,
        stats,
    }
}

fn build_parent_chain(task: &Task, index: &TaskIndex) -> Vec<String> {
    let mut chain = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = task.parent_id.clone();
    while let Some(parent_ref) = current {
        if !visited.insert(parent_ref.clone()) {
            break; // cyclic parent pointers: stop, truncated chain
        }
        match index.resolve(&parent_ref) {
            Some(id) => {
                chain.push(id.to_string());
                current = index.by_id.get(id).and_then(|t| t.parent_id.clone());
            }
            None => {
                // Missing parent: include the dangling reference and stop.
                chain.push(parent_ref);
                break;
            }
        }
    }
    chain
}

fn detect_cycles(tasks: &[Task], resolved_deps: &HashMap<&str, Vec<String>>) -> HashSet<String> {
    let mut in_cycle = HashSet::new();
    for task in tasks {
        let start = task.id.as_str();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = resolved_deps.get(start).cloned().unwrap_or_default().into();
        let mut iterations = 0;
        while let Some(current) = queue.pop_front() {
            iterations += 1;
            if iterations > CYCLE_DETECTION_ITERATION_CAP {
                break;
            }
            if current == start {
                in_cycle.insert(start.to_string());
                break;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            for next in resolved_deps.get(current.as_str()).into_iter().flatten() {
                queue.push_back(next.clone());
            }
        }
    }
    in_cycle
}

type ClassifyOutput = (Classification, Vec<String>, Option<BlockReason>, Vec<String>);

fn classify(
    task: &Task,
    parent_chain: &[String],
    resolved_deps: &[String],
    effective_status: &HashMap<&str, EffectiveStatus>,
    in_cycle: bool,
) -> ClassifyOutput {
    // Rule 1: self/cyclic membership.
    if in_cycle {
        return (Classification::Blocked, vec![], Some(BlockReason::CircularDependency), vec![]);
    }

    // Rule 2: anything not pending is simply "not pending."
    if task.status != TaskStatus::Pending {
        return (Classification::NotPending, vec![], None, vec![]);
    }

    // Rule 3: any ancestor blocked/cancelled/circular blocks the whole chain.
    let blocking_ancestors: Vec<String> = parent_chain
        .iter()
        .filter(|ancestor| {
            effective_status
                .get(ancestor.as_str())
                .map(|s| s.is_blocking())
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    if !blocking_ancestors.is_empty() {
        return (
            Classification::BlockedByParent,
            blocking_ancestors,
            Some(BlockReason::ParentBlocked),
            vec![],
        );
    }

    // Rule 4: direct parent not yet active/in_progress/completed.
    if let Some(parent) = parent_chain.first() {
        let cleared = effective_status.get(parent.as_str()).map(|s| s.counts_as_parent_cleared()).unwrap_or(false);
        if !cleared {
            return (Classification::WaitingOnParent, vec![], None, vec![parent.clone()]);
        }
    }

    // Rule 5: any dependency blocked/cancelled/circular.
    let blocking_deps: Vec<String> = resolved_deps
        .iter()
        .filter(|dep| effective_status.get(dep.as_str()).map(|s| s.is_blocking()).unwrap_or(false))
        .cloned()
        .collect();
    if !blocking_deps.is_empty() {
        return (Classification::Blocked, blocking_deps, Some(BlockReason::DependencyBlocked), vec![]);
    }

    // Rule 6: any dependency still pending/in_progress.
    let waiting_deps: Vec<String> = resolved_deps
        .iter()
        .filter(|dep| effective_status.get(dep.as_str()).map(|s| s.is_pending_or_in_progress()).unwrap_or(false))
        .cloned()
        .collect();
    if !waiting_deps.is_empty() {
        return (Classification::Waiting, vec![], None, waiting_deps);
    }

    // Rule 7: nothing left in the way.
    (Classification::Ready, vec![], None, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;

    fn task(id: &str, status: TaskStatus, depends_on: Vec<&str>) -> Task {
        Task {
            id: id.to_string(),
            path: format!("projects/demo/task/{id}.md"),
            title: id.to_string(),
            priority: Priority::Medium,
            status,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            parent_id: None,
            workdir: "demo".into(),
            git_branch: None,
            target_workdir: None,
            direct_prompt: None,
            agent: None,
            model: None,
            feature_id: None,
            feature_priority: None,
            feature_depends_on: vec![],
            created_at: 0,
        }
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let result = resolve(&[]);
        assert!(result.tasks.is_empty());
        assert_eq!(result.stats.total, 0);
    }

    #[test]
    fn scenario_dependency_completed_unblocks() {
        let a = task("a", TaskStatus::Completed, vec![]);
        let b = task("b", TaskStatus::Pending, vec!["a"]);
        let result = resolve(&[a, b]);

        assert_eq!(result.by_id("a").unwrap().classification, Classification::NotPending);
        assert_eq!(result.by_id("b").unwrap().classification, Classification::Ready);
        assert_eq!(result.ready_sorted().iter().map(|t| t.task.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn mutual_dependency_is_a_cycle() {
        let a = task("a", TaskStatus::Pending, vec!["b"]);
        let b = task("b", TaskStatus::Pending, vec!["a"]);
        let result = resolve(&[a, b]);

        let ra = result.by_id("a").unwrap();
        let rb = result.by_id("b").unwrap();
        assert_eq!(ra.classification, Classification::Blocked);
        assert_eq!(ra.blocked_by_reason, Some(BlockReason::CircularDependency));
        assert_eq!(rb.classification, Classification::Blocked);
        assert!(ra.in_cycle && rb.in_cycle);
        assert_eq!(result.cycles.len(), 1);
        let members: HashSet<_> = result.cycles[0].iter().cloned().collect();
        assert_eq!(members, HashSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn self_cycle_is_blocked() {
        let a = task("a", TaskStatus::Pending, vec!["a"]);
        let result = resolve(&[a]);
        let ra = result.by_id("a").unwrap();
        assert_eq!(ra.classification, Classification::Blocked);
        assert_eq!(ra.blocked_by_reason, Some(BlockReason::CircularDependency));
    }

    #[test]
    fn blocked_parent_blocks_child() {
        let mut parent = task("parent", TaskStatus::Blocked, vec![]);
        parent.title = "parent".into();
        let mut child = task("child", TaskStatus::Pending, vec![]);
        child.parent_id = Some("parent".into());

        let result = resolve(&[parent, child]);
        let rc = result.by_id("child").unwrap();
        assert_eq!(rc.classification, Classification::BlockedByParent);
        assert_eq!(rc.blocked_by, vec!["parent".to_string()]);
        assert_eq!(rc.parent_chain, vec!["parent".to_string()]);
        assert_eq!(result.stats.blocked, 1);
    }

    #[test]
    fn unresolved_dependency_reference_is_reported() {
        let a = task("a", TaskStatus::Pending, vec!["does-not-exist"]);
        let result = resolve(&[a]);
        let ra = result.by_id("a").unwrap();
        assert_eq!(ra.unresolved_deps, vec!["does-not-exist".to_string()]);
        assert!(ra.resolved_deps.is_empty());
        // No blocking/waiting deps resolved, so it falls through to ready.
        assert_eq!(ra.classification, Classification::Ready);
    }

    #[test]
    fn missing_parent_terminates_chain_with_dangling_id() {
        let mut child = task("child", TaskStatus::Pending, vec![]);
        child.parent_id = Some("ghost".into());
        let result = resolve(&[child]);
        let rc = result.by_id("child").unwrap();
        assert_eq!(rc.parent_chain, vec!["ghost".to_string()]);
    }

    #[test]
    fn parent_blocked_takes_priority_over_dependency_blocked() {
        let mut parent = task("parent", TaskStatus::Blocked, vec![]);
        parent.title = "parent".into();
        let dep = task("dep", TaskStatus::Blocked, vec![]);
        let mut child = task("child", TaskStatus::Pending, vec!["dep"]);
        child.parent_id = Some("parent".into());

        let result = resolve(&[parent, dep, child]);
        assert_eq!(result.by_id("child").unwrap().classification, Classification::BlockedByParent);
    }

    #[test]
    fn ready_tasks_have_no_blocking_metadata() {
        let a = task("a", TaskStatus::Pending, vec![]);
        let result = resolve(&[a]);
        let ra = result.by_id("a").unwrap();
        assert_eq!(ra.classification, Classification::Ready);
        assert!(ra.blocked_by.is_empty());
        assert!(ra.waiting_on.is_empty());
    }

    #[test]
    fn priority_sort_orders_high_before_low_then_by_age() {
        let mut high = task("high", TaskStatus::Pending, vec![]);
        high.priority = Priority::High;
        high.created_at = 100;
        let mut low = task("low", TaskStatus::Pending, vec![]);
        low.priority = Priority::Low;
        low.created_at = 1;
        let mut high_older = task("high_older", TaskStatus::Pending, vec![]);
        high_older.priority = Priority::High;
        high_older.created_at = 1;

        let result = resolve(&[high, low, high_older]);
        let order: Vec<&str> = result.ready_sorted().iter().map(|t| t.task.id.as_str()).collect();
        assert_eq!(order, vec!["high_older", "high", "low"]);
    }

    #[test]
    fn every_task_gets_exactly_one_classification() {
        let tasks = vec![
            task("a", TaskStatus::Pending, vec![]),
            task("b", TaskStatus::Completed, vec![]),
            task("c", TaskStatus::Pending, vec!["a"]),
        ];
        let result = resolve(&tasks);
        assert_eq!(result.tasks.len(), tasks.len());
    }
}
