use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single try at running and validating a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// The generation capability failed or returned unusable output.
    GenerationFailed { message: String },
    /// The output was produced but some acceptance criteria were unmet.
    ValidationFailed { unmet: Vec<String> },
    /// The attempt exceeded its deadline.
    TimedOut { timeout_ms: u64 },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }

    /// Human-readable error detail, `None` for a success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::GenerationFailed { message } => {
                Some(format!("generation failed: {message}"))
            }
            AttemptOutcome::ValidationFailed { unmet } => {
                Some(format!("validation failed: {}", unmet.join("; ")))
            }
            AttemptOutcome::TimedOut { timeout_ms } => {
                Some(format!("attempt timed out after {timeout_ms}ms"))
            }
        }
    }
}

/// One entry in a task's append-only attempt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// Zero-based retry number within the current attempt budget.
    pub retry: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

impl ExecutionAttempt {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_describes_failure() {
        assert_eq!(AttemptOutcome::Succeeded.error_message(), None);
        let outcome = AttemptOutcome::ValidationFailed {
            unmet: vec!["file `a` exists".into(), "`make` exits 0".into()],
        };
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("validation failed: file `a` exists; `make` exits 0")
        );
        let outcome = AttemptOutcome::TimedOut { timeout_ms: 1500 };
        assert!(outcome.error_message().unwrap().contains("1500ms"));
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(AttemptOutcome::GenerationFailed {
            message: "rate limited".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "generation_failed");
        assert_eq!(json["message"], "rate limited");
    }
}
