use std::collections::HashMap;

use serde::Serialize;
use tokio::time::Instant;

/// Tracks the attempts currently in flight for progress reporting.
pub struct RunTracker {
    active: HashMap<String, ActiveAttempt>,
}

/// An in-progress attempt at one task.
pub struct ActiveAttempt {
    pub task_id: String,
    pub retry: u32,
    pub started_at: Instant,
}

/// Serializable snapshot of an active attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveAttemptSnapshot {
    pub task_id: String,
    pub attempt: u32,
    pub elapsed_seconds: u64,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
        }
    }

    pub fn insert(&mut self, attempt: ActiveAttempt) {
        self.active.insert(attempt.task_id.clone(), attempt);
    }

    pub fn remove(&mut self, task_id: &str) -> Option<ActiveAttempt> {
        self.active.remove(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&ActiveAttempt> {
        self.active.get(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active attempts ordered by task id. `attempt` is one-based.
    pub fn snapshot(&self) -> Vec<ActiveAttemptSnapshot> {
        let mut snapshot: Vec<_> = self
            .active
            .values()
            .map(|a| ActiveAttemptSnapshot {
                task_id: a.task_id.clone(),
                attempt: a.retry + 1,
                elapsed_seconds: a.started_at.elapsed().as_secs(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_elapsed_and_order() {
        let mut tracker = RunTracker::new();
        tracker.insert(ActiveAttempt {
            task_id: "b".into(),
            retry: 1,
            started_at: Instant::now(),
        });
        tokio::time::advance(Duration::from_secs(5)).await;
        tracker.insert(ActiveAttempt {
            task_id: "a".into(),
            retry: 0,
            started_at: Instant::now(),
        });

        let snapshot = tracker.snapshot();
        assert_eq!(
            snapshot,
            vec![
                ActiveAttemptSnapshot {
                    task_id: "a".into(),
                    attempt: 1,
                    elapsed_seconds: 0
                },
                ActiveAttemptSnapshot {
                    task_id: "b".into(),
                    attempt: 2,
                    elapsed_seconds: 5
                },
            ]
        );
    }

    #[test]
    fn insert_and_remove() {
        let mut tracker = RunTracker::default();
        tracker.insert(ActiveAttempt {
            task_id: "t".into(),
            retry: 0,
            started_at: Instant::now(),
        });
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.get("t").is_some());
        assert!(tracker.remove("t").is_some());
        assert!(tracker.remove("t").is_none());
        assert_eq!(tracker.active_count(), 0);
    }
}
