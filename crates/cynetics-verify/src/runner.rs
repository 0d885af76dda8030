use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Duration;
use tracing::debug;

use crate::capability::{Capability, CapabilityCall, CapabilityError};
use crate::criteria::Criterion;

/// Evaluates a task's acceptance criteria against its produced artifact.
///
/// Validation only reads: files are inspected and commands are run, but the
/// runner itself never writes, so repeated runs over the same artifact and
/// workspace give the same verdict.
#[derive(Clone)]
pub struct ValidationRunner {
    capability: Arc<dyn Capability>,
    command_timeout: Duration,
    strict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed(String),
    Unchecked,
}

#[derive(Debug, Clone)]
pub struct CriterionResult {
    pub criterion: String,
    pub check: Criterion,
    pub status: CheckStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub results: Vec<CriterionResult>,
    strict: bool,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| match &r.status {
            CheckStatus::Passed => true,
            CheckStatus::Unchecked => !self.strict,
            CheckStatus::Failed(_) => false,
        })
    }

    /// Human-readable descriptions of every criterion that blocks success.
    pub fn unmet(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| match &r.status {
                CheckStatus::Failed(detail) => Some(format!("{} ({detail})", r.criterion)),
                CheckStatus::Unchecked if self.strict => {
                    Some(format!("{} (not machine-checkable)", r.criterion))
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, status: &CheckStatus) -> usize {
        self.results
            .iter()
            .filter(|r| std::mem::discriminant(&r.status) == std::mem::discriminant(status))
            .count()
    }
}

impl ValidationRunner {
    pub fn new(capability: Arc<dyn Capability>, command_timeout: Duration) -> Self {
        Self {
            capability,
            command_timeout,
            strict: false,
        }
    }

    /// When strict, criteria that cannot be checked mechanically count as unmet.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub async fn validate(&self, artifact: &str, criteria: &[String]) -> Verdict {
        let mut results = Vec::with_capacity(criteria.len());

        // Every criterion is evaluated, even after a failure, so the report is complete.
        for text in criteria {
            let check = Criterion::parse(text);
            let started_at = Utc::now();
            let status = match self.evaluate(&check, artifact).await {
                Ok(status) => status,
                Err(e) => CheckStatus::Failed(e.to_string()),
            };
            let finished_at = Utc::now();
            debug!(criterion = %text, ?status, "criterion evaluated");
            results.push(CriterionResult {
                criterion: text.clone(),
                check,
                status,
                started_at,
                finished_at,
            });
        }

        let unchecked = results.iter().filter(|r| !r.check.is_checkable()).count();
        if unchecked > 0 {
            debug!(unchecked, strict = self.strict, "criteria without a mechanical check");
        }

        Verdict {
            results,
            strict: self.strict,
        }
    }

    async fn evaluate(
        &self,
        check: &Criterion,
        artifact: &str,
    ) -> Result<CheckStatus, CapabilityError> {
        let status = match check {
            Criterion::FileExists(path) => {
                let out = self
                    .capability
                    .invoke(&CapabilityCall::FileExists { path: path.clone() })
                    .await?;
                if out.success {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed(format!("{path} not found"))
                }
            }
            Criterion::FileContains { path, needle } => {
                let out = self
                    .capability
                    .invoke(&CapabilityCall::ReadFile { path: path.clone() })
                    .await?;
                if !out.success {
                    CheckStatus::Failed(format!("{path} not found"))
                } else if out.output.contains(needle.as_str()) {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed(format!("{path} does not contain {needle:?}"))
                }
            }
            Criterion::CommandSucceeds(command) => {
                let out = self
                    .capability
                    .invoke(&CapabilityCall::Shell {
                        command: command.clone(),
                        timeout: self.command_timeout,
                    })
                    .await?;
                if out.success {
                    CheckStatus::Passed
                } else {
                    let code = out
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    CheckStatus::Failed(format!("`{command}` exited with {code}"))
                }
            }
            Criterion::OutputContains(needle) => {
                if artifact.contains(needle.as_str()) {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed(format!("output does not contain {needle:?}"))
                }
            }
            Criterion::Unverifiable(_) => CheckStatus::Unchecked,
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::LocalCapabilities;

    fn runner(dir: &std::path::Path) -> ValidationRunner {
        ValidationRunner::new(
            Arc::new(LocalCapabilities::new(dir)),
            Duration::from_secs(10),
        )
    }

    fn criteria(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn all_met() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[dependencies]\ntokio = \"1\"\n").unwrap();
        let verdict = runner(dir.path())
            .validate(
                "here is fn main",
                &criteria(&[
                    "exists: Cargo.toml",
                    "`Cargo.toml` contains `tokio`",
                    "run: true",
                    "Output contains `fn main`",
                ]),
            )
            .await;
        assert!(verdict.passed());
        assert!(verdict.unmet().is_empty());
        assert_eq!(verdict.count(&CheckStatus::Passed), 4);
    }

    #[tokio::test]
    async fn every_criterion_is_evaluated_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let verdict = runner(dir.path())
            .validate(
                "",
                &criteria(&["exists: missing.txt", "run: exit 2", "run: true"]),
            )
            .await;
        assert!(!verdict.passed());
        assert_eq!(verdict.results.len(), 3);
        assert_eq!(verdict.results[2].status, CheckStatus::Passed);

        let unmet = verdict.unmet();
        assert_eq!(unmet.len(), 2);
        assert!(unmet[0].contains("missing.txt not found"));
        assert!(unmet[1].contains("exited with 2"));
    }

    #[tokio::test]
    async fn unverifiable_passes_unless_strict() {
        let dir = tempfile::tempdir().unwrap();
        let items = criteria(&["The API feels responsive"]);

        let lenient = runner(dir.path()).validate("", &items).await;
        assert!(lenient.passed());
        assert_eq!(lenient.results[0].status, CheckStatus::Unchecked);

        let strict = runner(dir.path()).strict(true).validate("", &items).await;
        assert!(!strict.passed());
        assert_eq!(
            strict.unmet(),
            vec!["The API feels responsive (not machine-checkable)".to_string()]
        );
    }

    #[tokio::test]
    async fn capability_errors_fail_the_criterion() {
        let dir = tempfile::tempdir().unwrap();
        let verdict = runner(dir.path())
            .validate("", &criteria(&["exists: ../outside"]))
            .await;
        assert!(!verdict.passed());
        assert!(verdict.unmet()[0].contains("escapes workspace"));
    }

    #[tokio::test]
    async fn no_criteria_passes() {
        let dir = tempfile::tempdir().unwrap();
        let verdict = runner(dir.path()).validate("anything", &[]).await;
        assert!(verdict.passed());
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let runner = runner(dir.path());
        let items = criteria(&[
            "exists: a.txt",
            "contains: a.txt: beta",
            "run: test -f a.txt",
            "Output contains `done`",
            "Looks good to a reviewer",
        ]);

        let first = runner.validate("done", &items).await;
        let second = runner.validate("done", &items).await;

        let statuses = |v: &Verdict| v.results.iter().map(|r| r.status.clone()).collect::<Vec<_>>();
        assert_eq!(statuses(&first), statuses(&second));
        assert_eq!(first.passed(), second.passed());
        assert_eq!(first.unmet(), second.unmet());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "alpha");
    }
}
