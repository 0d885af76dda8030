//! Task dependency graph.
//!
//! `TaskGraphBuilder` turns a flat task list into a validated DAG. The
//! resulting `TaskGraph` owns every task and applies all status transitions,
//! so readiness and failure cascading stay consistent with the edges.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attempt::ExecutionAttempt;
use crate::error::CyneticsError;
use crate::task::{Task, TaskSpec, TaskStatus};

/// Structural defects that make a task list unexecutable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    specs: Vec<TaskSpec>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn tasks(mut self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Validate the task list and build the graph.
    ///
    /// Checks run in order: duplicate ids, unknown dependencies, cycles.
    /// Tasks without dependencies start Ready, everything else Pending.
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        let mut seen = HashSet::new();
        for spec in &self.specs {
            if !seen.insert(spec.id.as_str()) {
                return Err(GraphError::DuplicateId(spec.id.clone()));
            }
        }

        for spec in &self.specs {
            if let Some(dependency) = spec.dependencies.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(GraphError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let tasks = self
            .specs
            .into_iter()
            .map(|mut spec| {
                dedup_in_place(&mut spec.dependencies);
                (spec.id.clone(), Task::new(spec))
            })
            .collect();

        TaskGraph::from_map(tasks)
    }
}

fn dedup_in_place(ids: &mut Vec<String>) {
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

/// What happened to a task after an attempt was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The task succeeded; these dependents just became Ready.
    Succeeded { newly_ready: Vec<String> },
    /// The task goes back to Ready; `failed_attempts` attempts used so far.
    Retry { failed_attempts: u32 },
    /// Retries are exhausted; these dependents were cascaded to Blocked.
    Failed { blocked: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "GraphRecord", try_from = "GraphRecord")]
pub struct TaskGraph {
    tasks: BTreeMap<String, Task>,
    dependents: BTreeMap<String, Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct GraphRecord {
    tasks: Vec<Task>,
}

impl From<TaskGraph> for GraphRecord {
    fn from(graph: TaskGraph) -> Self {
        GraphRecord {
            tasks: graph.tasks.into_values().collect(),
        }
    }
}

impl TryFrom<GraphRecord> for TaskGraph {
    type Error = GraphError;

    fn try_from(record: GraphRecord) -> Result<Self, Self::Error> {
        let mut tasks = BTreeMap::new();
        for task in record.tasks {
            let id = task.id().to_string();
            if tasks.insert(id.clone(), task).is_some() {
                return Err(GraphError::DuplicateId(id));
            }
        }
        for task in tasks.values() {
            if let Some(dependency) = task.dependencies().iter().find(|d| !tasks.contains_key(*d)) {
                return Err(GraphError::UnknownDependency {
                    task: task.id().to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        TaskGraph::from_map(tasks)
    }
}

impl TaskGraph {
    fn from_map(tasks: BTreeMap<String, Task>) -> Result<Self, GraphError> {
        if let Some(path) = find_cycle(&tasks) {
            return Err(GraphError::Cycle { path });
        }

        let mut dependents: BTreeMap<String, Vec<String>> =
            tasks.keys().map(|id| (id.clone(), Vec::new())).collect();
        for task in tasks.values() {
            for dep in task.dependencies() {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(task.id().to_string());
                }
            }
        }

        Ok(Self { tasks, dependents })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All tasks in ascending id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ready task ids, lowest id first in natural order ("2" before "10").
    pub fn ready_ids(&self) -> Vec<String> {
        let mut ids = self.ids_with(TaskStatus::Ready);
        ids.sort_by(|a, b| compare_ids(a, b));
        ids
    }

    pub fn ids_with(&self, status: TaskStatus) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id().to_string())
            .collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.is_active()).count()
    }

    /// No task is Ready, Running or Validating.
    pub fn is_settled(&self) -> bool {
        !self
            .tasks
            .values()
            .any(|t| t.status == TaskStatus::Ready || t.status.is_active())
    }

    /// Every task reached Succeeded, Failed or Blocked.
    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// Kahn's algorithm; among equally ready tasks the lowest id comes first.
    pub fn topological_order(&self) -> Vec<String> {
        let mut remaining: HashMap<&str, usize> = self
            .tasks
            .values()
            .map(|t| (t.id(), t.dependencies().len()))
            .collect();
        let mut frontier: BTreeSet<NaturalId<'_>> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| NaturalId(id))
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(NaturalId(id)) = frontier.pop_first() {
            order.push(id.to_string());
            for dependent in self.dependents(id) {
                if let Some(n) = remaining.get_mut(dependent.as_str()) {
                    *n -= 1;
                    if *n == 0 {
                        frontier.insert(NaturalId(dependent.as_str()));
                    }
                }
            }
        }
        order
    }

    /// Outputs of the direct dependencies of `id` that have succeeded.
    pub fn upstream_outputs(&self, id: &str) -> Vec<(&TaskSpec, &str)> {
        let Some(task) = self.tasks.get(id) else {
            return Vec::new();
        };
        task.dependencies()
            .iter()
            .filter_map(|dep| self.tasks.get(dep))
            .filter_map(|dep| dep.output.as_deref().map(|out| (&dep.spec, out)))
            .collect()
    }

    fn transition(&mut self, id: &str, to: TaskStatus) -> Result<&mut Task, CyneticsError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CyneticsError::NotFound(format!("task {id}")))?;
        if !task.status.can_transition_to(to) {
            return Err(CyneticsError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to,
            });
        }
        task.status = to;
        Ok(task)
    }

    /// Ready -> Running. Returns the zero-based retry number of this attempt.
    pub fn start_attempt(&mut self, id: &str) -> Result<u32, CyneticsError> {
        let task = self.transition(id, TaskStatus::Running)?;
        Ok(task.attempt_count)
    }

    /// Running -> Validating.
    pub fn mark_validating(&mut self, id: &str) -> Result<(), CyneticsError> {
        self.transition(id, TaskStatus::Validating).map(|_| ())
    }

    /// Record a finished attempt and apply its consequences.
    ///
    /// A success promotes dependents whose dependencies have all succeeded.
    /// A failure returns the task to Ready while fewer than `max_attempts`
    /// attempts were used, otherwise fails it and blocks every transitive
    /// dependent.
    pub fn complete_attempt(
        &mut self,
        id: &str,
        attempt: ExecutionAttempt,
        output: Option<String>,
        max_attempts: u32,
    ) -> Result<Disposition, CyneticsError> {
        let succeeded = attempt.outcome.is_success();
        let error = attempt.outcome.error_message();

        let next = {
            let task = self
                .tasks
                .get(id)
                .ok_or_else(|| CyneticsError::NotFound(format!("task {id}")))?;
            if succeeded {
                TaskStatus::Succeeded
            } else if task.attempt_count + 1 < max_attempts {
                TaskStatus::Ready
            } else {
                TaskStatus::Failed
            }
        };

        let task = self.transition(id, next)?;
        task.attempt_count += 1;
        task.attempts.push(attempt);

        match next {
            TaskStatus::Succeeded => {
                task.output = output;
                task.last_error = None;
                let newly_ready = self.promote_dependents(id);
                Ok(Disposition::Succeeded { newly_ready })
            }
            TaskStatus::Ready => {
                task.last_error = error;
                Ok(Disposition::Retry {
                    failed_attempts: task.attempt_count,
                })
            }
            _ => {
                task.last_error = error;
                let blocked = self.block_dependents(id);
                Ok(Disposition::Failed { blocked })
            }
        }
    }

    fn promote_dependents(&mut self, id: &str) -> Vec<String> {
        let candidates = self.dependents(id).to_vec();
        let mut promoted = Vec::new();
        for candidate in candidates {
            let ready = match self.tasks.get(&candidate) {
                Some(task) => {
                    task.status == TaskStatus::Pending
                        && task.dependencies().iter().all(|d| {
                            self.tasks.get(d).map(|t| t.status) == Some(TaskStatus::Succeeded)
                        })
                }
                None => false,
            };
            if ready && self.transition(&candidate, TaskStatus::Ready).is_ok() {
                promoted.push(candidate);
            }
        }
        promoted
    }

    fn block_dependents(&mut self, failed: &str) -> Vec<String> {
        let mut blocked = Vec::new();
        let mut queue: VecDeque<String> = self.dependents(failed).iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            let pending = self
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Pending);
            if !pending {
                continue;
            }
            if let Ok(task) = self.transition(&id, TaskStatus::Blocked) {
                task.last_error = Some(format!("blocked by failed dependency {failed}"));
                queue.extend(self.dependents(&id).iter().cloned());
                blocked.push(id);
            }
        }
        blocked
    }

    /// Carry progress over from a persisted checkpoint of the same task list.
    ///
    /// Attempt history is copied for every task whose descriptor is unchanged.
    /// Succeeded tasks keep their status and output; everything else restarts
    /// with a fresh attempt budget. Returns the number of restored successes.
    pub fn apply_checkpoint(&mut self, checkpoint: &TaskGraph) -> usize {
        let mut restored = 0;
        for (id, task) in self.tasks.iter_mut() {
            let Some(saved) = checkpoint.get(id) else {
                continue;
            };
            if saved.spec != task.spec {
                continue;
            }
            task.attempts = saved.attempts.clone();
            if saved.status == TaskStatus::Succeeded {
                task.status = TaskStatus::Succeeded;
                task.output = saved.output.clone();
                restored += 1;
            }
        }
        self.recompute_readiness();
        restored
    }

    /// Reset every unfinished task to Pending or Ready from its dependencies.
    fn recompute_readiness(&mut self) {
        let succeeded: HashSet<String> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .map(|t| t.id().to_string())
            .collect();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Succeeded {
                continue;
            }
            task.attempt_count = 0;
            task.last_error = None;
            task.status = if task.dependencies().iter().all(|d| succeeded.contains(d)) {
                TaskStatus::Ready
            } else {
                TaskStatus::Pending
            };
        }
    }
}

/// Orders task ids so that runs of digits compare by numeric value:
/// "2" < "10" and "task-2" < "task-10". Ids equal under that rule fall back
/// to plain string order, so the ordering stays total.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => compare_chunks(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn compare_chunks(x: &str, y: &str) -> Ordering {
    let numeric = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if numeric(x) && numeric(y) {
        let x = x.trim_start_matches('0');
        let y = y.trim_start_matches('0');
        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
    } else {
        x.cmp(y)
    }
}

/// Splits an id into alternating runs of ASCII digits and everything else.
fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

#[derive(PartialEq, Eq)]
struct NaturalId<'a>(&'a str);

impl Ord for NaturalId<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ids(self.0, other.0)
    }
}

impl PartialOrd for NaturalId<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Three-colour depth-first search. Returns the first cycle found as a path
/// that starts and ends with the same id.
fn find_cycle(tasks: &BTreeMap<String, Task>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<&str, Color> =
        tasks.keys().map(|id| (id.as_str(), Color::White)).collect();

    for root in tasks.keys() {
        if color.get(root.as_str()) != Some(&Color::White) {
            continue;
        }
        color.insert(root.as_str(), Color::Gray);
        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let deps = tasks.get(node).map(Task::dependencies).unwrap_or(&[]);
            if top.1 < deps.len() {
                let dep = deps[top.1].as_str();
                top.1 += 1;
                match color.get(dep).copied() {
                    Some(Color::White) => {
                        color.insert(dep, Color::Gray);
                        stack.push((dep, 0));
                    }
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                        path.push(dep.to_string());
                        return Some(path);
                    }
                    _ => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::AttemptOutcome;
    use chrono::Utc;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec::new(id, format!("do {id}")).depends_on(deps.iter().copied())
    }

    fn diamond() -> TaskGraph {
        TaskGraphBuilder::new()
            .task(spec("a", &[]))
            .task(spec("b", &["a"]))
            .task(spec("c", &["a"]))
            .task(spec("d", &["b", "c"]))
            .build()
            .unwrap()
    }

    fn attempt(retry: u32, outcome: AttemptOutcome) -> ExecutionAttempt {
        let now = Utc::now();
        ExecutionAttempt {
            retry,
            started_at: now,
            finished_at: now,
            outcome,
        }
    }

    fn failure() -> AttemptOutcome {
        AttemptOutcome::GenerationFailed {
            message: "boom".into(),
        }
    }

    fn succeed(graph: &mut TaskGraph, id: &str) -> Disposition {
        graph.start_attempt(id).unwrap();
        graph.mark_validating(id).unwrap();
        graph
            .complete_attempt(id, attempt(0, AttemptOutcome::Succeeded), Some(format!("out {id}")), 3)
            .unwrap()
    }

    #[test]
    fn build_initial_statuses() {
        let graph = diamond();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.ready_ids(), vec!["a"]);
        assert_eq!(graph.count(TaskStatus::Pending), 3);
        assert_eq!(graph.dependents("a"), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn topological_order_contains_every_task_once() {
        let graph = TaskGraphBuilder::new()
            .task(spec("e", &["d"]))
            .task(spec("d", &["b", "c"]))
            .task(spec("c", &["a"]))
            .task(spec("b", &["a"]))
            .task(spec("a", &[]))
            .task(spec("f", &[]))
            .build()
            .unwrap();
        let order = graph.topological_order();
        assert_eq!(order.len(), graph.len());
        let unique: HashSet<&String> = order.iter().collect();
        assert_eq!(unique.len(), order.len());
        for task in graph.tasks() {
            let pos = order.iter().position(|id| id == task.id()).unwrap();
            for dep in task.dependencies() {
                assert!(order.iter().position(|id| id == dep).unwrap() < pos);
            }
        }
        assert_eq!(order[0], "a");
    }

    #[test]
    fn ready_ids_use_natural_order() {
        let ids = ["10", "2", "1", "task-10", "task-2", "task-02", "b"];
        let graph = TaskGraphBuilder::new()
            .tasks(ids.iter().map(|id| spec(id, &[])))
            .build()
            .unwrap();
        assert_eq!(
            graph.ready_ids(),
            vec!["1", "2", "10", "b", "task-02", "task-2", "task-10"]
        );
        assert_eq!(graph.topological_order(), graph.ready_ids());
    }

    #[test]
    fn compare_ids_is_numeric_within_digit_runs() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("task-9", "task-10"), Ordering::Less);
        assert_eq!(compare_ids("a", "a1"), Ordering::Less);
        assert_eq!(compare_ids("b", "a"), Ordering::Greater);
        assert_eq!(compare_ids("007", "007"), Ordering::Equal);
        assert_eq!(compare_ids("07", "7"), Ordering::Less);
    }

    #[test]
    fn two_task_cycle_is_rejected_with_both_ids() {
        let err = TaskGraphBuilder::new()
            .task(spec("a", &["b"]))
            .task(spec("b", &["a"]))
            .build()
            .unwrap_err();
        match err {
            GraphError::Cycle { path } => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = TaskGraphBuilder::new()
            .task(spec("a", &["a"]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                path: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn longer_cycle_reports_path() {
        let err = TaskGraphBuilder::new()
            .task(spec("root", &[]))
            .task(spec("x", &["root", "z"]))
            .task(spec("y", &["x"]))
            .task(spec("z", &["y"]))
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: x -> z -> y -> x");
        let GraphError::Cycle { path } = err else {
            panic!("expected cycle");
        };
        assert_eq!(path, vec!["x", "z", "y", "x"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = TaskGraphBuilder::new()
            .task(spec("a", &["ghost"]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                task: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = TaskGraphBuilder::new()
            .task(spec("a", &[]))
            .task(spec("a", &[]))
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("a".into()));
    }

    #[test]
    fn repeated_dependency_is_collapsed() {
        let graph = TaskGraphBuilder::new()
            .task(spec("a", &[]))
            .task(spec("b", &["a", "a"]))
            .build()
            .unwrap();
        assert_eq!(graph.get("b").unwrap().dependencies(), ["a".to_string()]);
        assert_eq!(graph.dependents("a").len(), 1);
    }

    #[test]
    fn empty_list_builds_settled_graph() {
        let graph = TaskGraphBuilder::new().build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.is_settled());
        assert!(graph.is_complete());
    }

    #[test]
    fn success_promotes_only_fully_satisfied_dependents() {
        let mut graph = diamond();
        let d = succeed(&mut graph, "a");
        assert_eq!(
            d,
            Disposition::Succeeded {
                newly_ready: vec!["b".into(), "c".into()]
            }
        );
        succeed(&mut graph, "b");
        assert_eq!(graph.get("d").unwrap().status, TaskStatus::Pending);
        let d = succeed(&mut graph, "c");
        assert_eq!(
            d,
            Disposition::Succeeded {
                newly_ready: vec!["d".into()]
            }
        );
        assert_eq!(graph.get("a").unwrap().output.as_deref(), Some("out a"));
    }

    #[test]
    fn failure_retries_then_cascades_block() {
        let mut graph = diamond();
        succeed(&mut graph, "a");

        for retry in 0..2 {
            assert_eq!(graph.start_attempt("b").unwrap(), retry);
            let d = graph.complete_attempt("b", attempt(retry, failure()), None, 3).unwrap();
            assert_eq!(
                d,
                Disposition::Retry {
                    failed_attempts: retry + 1
                }
            );
            assert_eq!(graph.get("b").unwrap().status, TaskStatus::Ready);
        }
        graph.start_attempt("b").unwrap();
        let d = graph.complete_attempt("b", attempt(2, failure()), None, 3).unwrap();
        assert_eq!(
            d,
            Disposition::Failed {
                blocked: vec!["d".into()]
            }
        );

        succeed(&mut graph, "c");
        assert_eq!(graph.get("a").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(graph.get("b").unwrap().status, TaskStatus::Failed);
        assert_eq!(graph.get("c").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(graph.get("d").unwrap().status, TaskStatus::Blocked);
        assert_eq!(graph.get("b").unwrap().attempts.len(), 3);
        assert!(graph.get("d").unwrap().last_error.as_deref().unwrap().contains("b"));
        assert!(graph.is_complete());
    }

    #[test]
    fn block_cascades_transitively() {
        let mut graph = TaskGraphBuilder::new()
            .task(spec("a", &[]))
            .task(spec("b", &["a"]))
            .task(spec("c", &["b"]))
            .build()
            .unwrap();
        graph.start_attempt("a").unwrap();
        let d = graph.complete_attempt("a", attempt(0, failure()), None, 1).unwrap();
        assert_eq!(
            d,
            Disposition::Failed {
                blocked: vec!["b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn illegal_transition_is_reported() {
        let mut graph = diamond();
        let err = graph.start_attempt("d").unwrap_err();
        assert!(matches!(
            err,
            CyneticsError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Running,
                ..
            }
        ));
        assert!(matches!(
            graph.start_attempt("zzz"),
            Err(CyneticsError::NotFound(_))
        ));
    }

    #[test]
    fn checkpoint_restores_successes_and_resets_the_rest() {
        let mut graph = diamond();
        succeed(&mut graph, "a");
        graph.start_attempt("b").unwrap();
        graph.complete_attempt("b", attempt(0, failure()), None, 1).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let checkpoint: TaskGraph = serde_json::from_str(&json).unwrap();

        let mut fresh = diamond();
        let restored = fresh.apply_checkpoint(&checkpoint);
        assert_eq!(restored, 1);
        assert_eq!(fresh.get("a").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(fresh.get("a").unwrap().output.as_deref(), Some("out a"));
        let b = fresh.get("b").unwrap();
        assert_eq!(b.status, TaskStatus::Ready);
        assert_eq!(b.attempt_count, 0);
        assert_eq!(b.attempts.len(), 1);
        assert_eq!(fresh.get("c").unwrap().status, TaskStatus::Ready);
        assert_eq!(fresh.get("d").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn checkpoint_ignores_changed_descriptors() {
        let mut graph = diamond();
        succeed(&mut graph, "a");

        let mut fresh = TaskGraphBuilder::new()
            .task(TaskSpec::new("a", "rewritten"))
            .build()
            .unwrap();
        assert_eq!(fresh.apply_checkpoint(&graph), 0);
        assert_eq!(fresh.get("a").unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn deserializing_a_cyclic_record_fails() {
        let json = serde_json::json!({
            "tasks": [
                {"id": "a", "dependencies": ["b"], "status": "pending"},
                {"id": "b", "dependencies": ["a"], "status": "pending"}
            ]
        });
        let err = serde_json::from_value::<TaskGraph>(json).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn upstream_outputs_lists_succeeded_dependencies() {
        let mut graph = diamond();
        succeed(&mut graph, "a");
        succeed(&mut graph, "b");
        let upstream = graph.upstream_outputs("d");
        assert_eq!(upstream.len(), 1);
        assert_eq!(upstream[0].0.id, "b");
        assert_eq!(upstream[0].1, "out b");
    }
}
