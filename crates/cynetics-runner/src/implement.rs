use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cynetics_core::Phase;
use cynetics_prompts::{assemble_prompt, system_prompt, PromptContext, TaskBrief};
use cynetics_verify::{Capability, CapabilityCall, ValidationRunner};
use tracing::{debug, info};

use crate::backend::{GenerationBackend, GenerationError, GenerationRequest};
use crate::scheduler::{Job, TaskExecutor};

const FILE_MARKER: &str = "#### FILE:";

/// Runs one Implement attempt: prompt the backend, write any declared files
/// into the workspace, then check the task's acceptance criteria.
pub struct ImplementExecutor {
    backend: Arc<dyn GenerationBackend>,
    capability: Arc<dyn Capability>,
    validator: ValidationRunner,
    /// Run-wide context: description, specification and plan.
    base: PromptContext,
    generation_timeout: Duration,
}

impl ImplementExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        capability: Arc<dyn Capability>,
        validator: ValidationRunner,
        base: PromptContext,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            capability,
            validator,
            base,
            generation_timeout,
        }
    }

    fn request(&self, job: &Job) -> GenerationRequest {
        let mut ctx = self.base.clone();
        ctx.task = Some(TaskBrief::from_spec(&job.spec));
        ctx.upstream = job.upstream.clone();
        ctx.previous_error = job.previous_error.clone();
        GenerationRequest {
            system: system_prompt(Phase::Implement).to_string(),
            prompt: assemble_prompt(&ctx, Phase::Implement),
            timeout: self.generation_timeout,
        }
    }
}

#[async_trait]
impl TaskExecutor for ImplementExecutor {
    async fn produce(&self, job: &Job) -> Result<String, GenerationError> {
        let request = self.request(job);
        let artifact = self.backend.generate(&request).await?;
        if artifact.trim().is_empty() {
            return Err(GenerationError::Empty);
        }

        let files = extract_files(&artifact);
        for file in &files {
            self.capability
                .invoke(&CapabilityCall::WriteFile {
                    path: file.path.clone(),
                    content: file.content.clone(),
                })
                .await
                .map_err(|e| GenerationError::Unusable(format!("writing {}: {e}", file.path)))?;
        }
        if !files.is_empty() {
            info!(task_id = %job.spec.id, files = files.len(), "materialized files");
        }
        Ok(artifact)
    }

    async fn validate(&self, job: &Job, artifact: &str) -> Result<(), Vec<String>> {
        let verdict = self
            .validator
            .validate(artifact, &job.spec.acceptance_criteria)
            .await;
        debug!(task_id = %job.spec.id, passed = verdict.passed(), "validated");
        if verdict.passed() {
            Ok(())
        } else {
            Err(verdict.unmet())
        }
    }
}

/// A file declared in an implementation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredFile {
    pub path: String,
    pub content: String,
}

/// Find `#### FILE: <path>` markers each followed by a fenced code block.
/// A marker without a complete fence is ignored.
pub fn extract_files(text: &str) -> Vec<DeclaredFile> {
    let mut files = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(path) = line.trim().strip_prefix(FILE_MARKER) else {
            continue;
        };
        let path = path.trim().trim_matches('`').to_string();
        if path.is_empty() {
            continue;
        }

        // Skip blank lines up to the opening fence.
        let fence = loop {
            match lines.next() {
                Some(l) if l.trim().is_empty() => continue,
                Some(l) if l.trim_start().starts_with("```") => {
                    let marker_len = l.trim_start().chars().take_while(|c| *c == '`').count();
                    break Some("`".repeat(marker_len));
                }
                _ => break None,
            }
        };
        let Some(fence) = fence else {
            continue;
        };

        let mut body = Vec::new();
        let mut closed = false;
        for l in lines.by_ref() {
            if l.trim() == fence {
                closed = true;
                break;
            }
            body.push(l);
        }
        if closed {
            let mut content = body.join("\n");
            content.push('\n');
            files.push(DeclaredFile { path, content });
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use cynetics_core::TaskSpec;
    use cynetics_verify::LocalCapabilities;

    fn job(spec: TaskSpec) -> Job {
        Job {
            spec,
            retry: 0,
            upstream: Vec::new(),
            previous_error: None,
        }
    }

    fn executor(backend: MockBackend, dir: &std::path::Path) -> ImplementExecutor {
        let caps: Arc<dyn Capability> = Arc::new(LocalCapabilities::new(dir));
        ImplementExecutor::new(
            Arc::new(backend),
            caps.clone(),
            ValidationRunner::new(caps, Duration::from_secs(10)),
            PromptContext::new("demo", "a demo project"),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn extracts_fenced_files() {
        let text = "Here you go.\n\n#### FILE: src/main.rs\n```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n\n#### FILE: `README.md`\n\n````markdown\n# Demo\n```sh\nrun\n```\n````\nDone.";
        let files = extract_files(text);
        assert_eq!(
            files,
            vec![
                DeclaredFile {
                    path: "src/main.rs".into(),
                    content: "fn main() {\n    println!(\"hi\");\n}\n".into(),
                },
                DeclaredFile {
                    path: "README.md".into(),
                    content: "# Demo\n```sh\nrun\n```\n".into(),
                },
            ]
        );
    }

    #[test]
    fn marker_without_fence_is_ignored() {
        assert!(extract_files("#### FILE: a.txt\nplain text\n").is_empty());
        assert!(extract_files("#### FILE: a.txt\n```\nunterminated").is_empty());
        assert!(extract_files("no files here").is_empty());
    }

    #[tokio::test]
    async fn produce_writes_files_then_validate_checks_them() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new()
            .with_default("#### FILE: hello.txt\n```\nhello world\n```\n");
        let exec = executor(backend, dir.path());
        let job = job(TaskSpec::new("T1", "write hello").with_criteria([
            "exists: hello.txt",
            "contains: hello.txt: hello world",
        ]));

        let artifact = exec.produce(&job).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "hello world\n"
        );
        exec.validate(&job, &artifact).await.unwrap();
    }

    #[tokio::test]
    async fn unmet_criteria_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(MockBackend::new().with_default("nothing"), dir.path());
        let job = job(TaskSpec::new("T1", "x").with_criteria(["exists: missing.rs"]));
        let unmet = exec.validate(&job, "nothing").await.unwrap_err();
        assert_eq!(unmet.len(), 1);
        assert!(unmet[0].contains("missing.rs"));
    }

    #[tokio::test]
    async fn escaping_path_is_unusable_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new().with_default("#### FILE: ../evil\n```\nx\n```\n");
        let exec = executor(backend, dir.path());
        let err = exec.produce(&job(TaskSpec::new("T", "x"))).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unusable(_)));
    }

    #[tokio::test]
    async fn blank_output_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(MockBackend::new().with_default("  \n"), dir.path());
        let err = exec.produce(&job(TaskSpec::new("T", "x"))).await.unwrap_err();
        assert!(matches!(err, GenerationError::Empty));
    }

    #[test]
    fn request_carries_task_context() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(MockBackend::new(), dir.path());
        let mut j = job(TaskSpec::new("T7", "build the parser"));
        j.previous_error = Some("validation failed: tests".into());
        let req = exec.request(&j);
        assert_eq!(req.system, "You are a software engineer.");
        assert!(req.prompt.contains("# Task: T7"));
        assert!(req.prompt.contains("build the parser"));
        assert!(req.prompt.contains("validation failed: tests"));
        assert_eq!(req.timeout, Duration::from_secs(10));
    }
}
