use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use cynetics_core::{ExecutionAttempt, TaskGraph, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::scheduler::RunOutcome;

/// Final result of the Implement phase for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub generated_at: DateTime<Utc>,
    /// Every task in topological order.
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Full history for every attempt ever made at this task.
    #[serde(default)]
    pub attempts: Vec<ExecutionAttempt>,
}

impl ImplementationReport {
    pub fn from_graph(run_id: &str, outcome: RunOutcome, graph: &TaskGraph) -> Self {
        let tasks = graph
            .topological_order()
            .iter()
            .filter_map(|id| graph.get(id))
            .map(|task| TaskReport {
                id: task.id().to_string(),
                title: task.spec.title.clone(),
                status: task.status,
                last_error: task.last_error.clone(),
                attempts: task.attempts.clone(),
            })
            .collect();
        Self {
            run_id: run_id.to_string(),
            outcome,
            generated_at: Utc::now(),
            tasks,
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Human-readable summary. Failed and Blocked tasks list their attempt
    /// history with error detail.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {}: {}", self.run_id, self.outcome);
        let _ = writeln!(
            out,
            "{} tasks: {} succeeded, {} failed, {} blocked",
            self.tasks.len(),
            self.count(TaskStatus::Succeeded),
            self.count(TaskStatus::Failed),
            self.count(TaskStatus::Blocked),
        );
        out.push('\n');

        for task in &self.tasks {
            let title = if task.title.is_empty() || task.title == task.id {
                String::new()
            } else {
                format!(" {}", task.title)
            };
            let _ = writeln!(
                out,
                "[{}] {}{} ({} attempt{})",
                task.status.as_str(),
                task.id,
                title,
                task.attempts.len(),
                if task.attempts.len() == 1 { "" } else { "s" }
            );

            if matches!(task.status, TaskStatus::Failed | TaskStatus::Blocked) {
                for attempt in &task.attempts {
                    let detail = attempt
                        .outcome
                        .error_message()
                        .unwrap_or_else(|| "succeeded".to_string());
                    let _ = writeln!(
                        out,
                        "    attempt {} at {} ({}ms): {}",
                        attempt.retry + 1,
                        attempt.started_at.format("%Y-%m-%d %H:%M:%S"),
                        attempt.duration().num_milliseconds(),
                        detail
                    );
                }
                if let Some(ref error) = task.last_error {
                    let _ = writeln!(out, "    last error: {error}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cynetics_core::{AttemptOutcome, TaskGraphBuilder, TaskSpec};

    fn failed_attempt(retry: u32) -> ExecutionAttempt {
        let now = Utc::now();
        ExecutionAttempt {
            retry,
            started_at: now,
            finished_at: now,
            outcome: AttemptOutcome::ValidationFailed {
                unmet: vec!["exists: a.txt (a.txt not found)".into()],
            },
        }
    }

    fn sample_graph() -> TaskGraph {
        let mut graph = TaskGraphBuilder::new()
            .task(TaskSpec::new("A", "first"))
            .task(TaskSpec::new("B", "second").depends_on(["A"]))
            .build()
            .unwrap();
        for retry in 0..2 {
            graph.start_attempt("A").unwrap();
            graph.complete_attempt("A", failed_attempt(retry), None, 2).unwrap();
        }
        graph
    }

    #[test]
    fn tasks_follow_topological_order() {
        let report = ImplementationReport::from_graph("r1", RunOutcome::Failed, &sample_graph());
        let ids: Vec<&str> = report.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(report.tasks[0].status, TaskStatus::Failed);
        assert_eq!(report.tasks[0].attempts.len(), 2);
        assert_eq!(report.tasks[1].status, TaskStatus::Blocked);
        assert_eq!(report.count(TaskStatus::Blocked), 1);
    }

    #[test]
    fn render_lists_failure_history() {
        let text = ImplementationReport::from_graph("r1", RunOutcome::Failed, &sample_graph()).render();
        assert!(text.starts_with("Run r1: failed\n"));
        assert!(text.contains("2 tasks: 0 succeeded, 1 failed, 1 blocked"));
        assert!(text.contains("[failed] A (2 attempts)"));
        assert!(text.contains("attempt 1 at"));
        assert!(text.contains("attempt 2 at"));
        assert!(text.contains("a.txt not found"));
        assert!(text.contains("[blocked] B (0 attempts)"));
        assert!(text.contains("last error: blocked by failed dependency A"));
    }

    #[test]
    fn serde_round_trip() {
        let report = ImplementationReport::from_graph("r1", RunOutcome::Failed, &sample_graph());
        let json = serde_json::to_string(&report).unwrap();
        let back: ImplementationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
