//! Drives a run through Specify → Plan → Tasks → Implement → Done.
//!
//! Every phase output is persisted before the run record advances, so a
//! process restart resumes at the first phase that has not completed.

use std::sync::Arc;

use async_trait::async_trait;
use cynetics_core::{GraphError, Phase, Run, TaskGraph, TaskGraphBuilder, TaskSpec};
use cynetics_prompts::{assemble_prompt, system_prompt, PromptContext};
use cynetics_store::{ArtifactStore, StoreError};
use cynetics_verify::{Capability, ValidationRunner};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{GenerationBackend, GenerationError, GenerationRequest};
use crate::config::EngineSettings;
use crate::implement::ImplementExecutor;
use crate::report::ImplementationReport;
use crate::scheduler::{CancelToken, Checkpointer, RunOutcome, TaskScheduler};
use crate::task_parser::{normalize_document, parse_task_list, render_document};

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("{phase} phase failed: {source}")]
    Generation {
        phase: Phase,
        #[source]
        source: GenerationError,
    },

    #[error("artifact store: {0}")]
    Store(#[from] StoreError),

    #[error("malformed task graph: {0}")]
    MalformedGraph(#[from] GraphError),

    #[error("cannot enter {phase}: no {missing} artifact for this run")]
    MissingArtifact { phase: Phase, missing: Phase },
}

impl PhaseError {
    fn generation(phase: Phase, source: GenerationError) -> Self {
        Self::Generation { phase, source }
    }
}

/// Where a run ended up after `start` or `resume` returned.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run: Run,
    /// Set once Implement has executed.
    pub outcome: Option<RunOutcome>,
    pub report: Option<ImplementationReport>,
}

pub struct PhaseController {
    store: ArtifactStore,
    backend: Arc<dyn GenerationBackend>,
    capability: Arc<dyn Capability>,
    engine: EngineSettings,
    project_name: String,
}

impl PhaseController {
    pub fn new(
        store: ArtifactStore,
        backend: Arc<dyn GenerationBackend>,
        capability: Arc<dyn Capability>,
        engine: EngineSettings,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            capability,
            engine,
            project_name: project_name.into(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Persist a new run and drive it to completion or the first failure.
    pub async fn start(
        &self,
        mut run: Run,
        from_phase: Option<Phase>,
        cancel: CancelToken,
    ) -> Result<RunSummary, PhaseError> {
        if let Some(phase) = from_phase {
            self.enter(&mut run, phase).await?;
        }
        self.store.save_run(&run).await?;
        info!(run_id = %run.id, phase = %run.phase, "run created");
        self.drive(run, cancel).await
    }

    /// Reload a persisted run and continue from its recorded phase, or from
    /// `from_phase` when every artifact it depends on exists.
    pub async fn resume(
        &self,
        run_id: &str,
        from_phase: Option<Phase>,
        cancel: CancelToken,
    ) -> Result<RunSummary, PhaseError> {
        let mut run = self.store.load_run(run_id).await?;
        if let Some(phase) = from_phase {
            self.enter(&mut run, phase).await?;
            self.store.save_run(&run).await?;
        }
        info!(run_id = %run.id, phase = %run.phase, "resuming run");
        self.drive(run, cancel).await
    }

    async fn enter(&self, run: &mut Run, phase: Phase) -> Result<(), PhaseError> {
        for &missing in phase.prerequisites() {
            if !self.store.has(&run.id, missing).await? {
                return Err(PhaseError::MissingArtifact { phase, missing });
            }
        }
        run.enter(phase);
        Ok(())
    }

    async fn drive(&self, mut run: Run, cancel: CancelToken) -> Result<RunSummary, PhaseError> {
        loop {
            match run.phase {
                Phase::Specify | Phase::Plan | Phase::Tasks => {
                    if cancel.is_cancelled() {
                        warn!(run_id = %run.id, phase = %run.phase, "cancelled before phase start");
                        return Ok(RunSummary {
                            run,
                            outcome: None,
                            report: None,
                        });
                    }
                    self.generate(&run).await?;
                    let finished = run.phase;
                    run.advance();
                    self.store.save_run(&run).await?;
                    info!(run_id = %run.id, finished = %finished, next = %run.phase, "phase complete");
                }
                Phase::Implement => {
                    let report = self.implement(&run, cancel.clone()).await?;
                    if report.outcome != RunOutcome::Cancelled {
                        run.advance();
                        self.store.save_run(&run).await?;
                    }
                    info!(run_id = %run.id, outcome = %report.outcome, phase = %run.phase, "implement finished");
                    return Ok(RunSummary {
                        run,
                        outcome: Some(report.outcome),
                        report: Some(report),
                    });
                }
                Phase::Done => {
                    let report = match self.store.get_report::<ImplementationReport>(&run.id).await {
                        Ok(report) => Some(report),
                        Err(StoreError::NotFound(_)) => None,
                        Err(e) => return Err(e.into()),
                    };
                    return Ok(RunSummary {
                        outcome: report.as_ref().map(|r| r.outcome),
                        run,
                        report,
                    });
                }
            }
        }
    }

    /// Everything produced so far that prompts for the current phase draw on.
    async fn context(&self, run: &Run) -> Result<PromptContext, PhaseError> {
        let mut ctx = PromptContext::new(&self.project_name, &run.description);
        ctx.tech_stack = run.tech_stack.as_ref().map(render_document);
        if run.phase > Phase::Specify {
            ctx.specification = Some(self.document(&run.id, Phase::Specify).await?);
        }
        if run.phase > Phase::Plan {
            ctx.plan = Some(self.document(&run.id, Phase::Plan).await?);
        }
        Ok(ctx)
    }

    async fn document(&self, run_id: &str, phase: Phase) -> Result<String, PhaseError> {
        let value: Value = self.store.get_json(run_id, phase).await?;
        Ok(render_document(&value))
    }

    /// One generation step for Specify, Plan or Tasks.
    async fn generate(&self, run: &Run) -> Result<(), PhaseError> {
        let phase = run.phase;
        let ctx = self.context(run).await?;
        let request = GenerationRequest {
            system: system_prompt(phase).to_string(),
            prompt: assemble_prompt(&ctx, phase),
            timeout: self.engine.generation_timeout(),
        };
        info!(
            run_id = %run.id,
            phase = %phase,
            backend = self.backend.name(),
            model = self.backend.model_hint().unwrap_or("default"),
            "generating"
        );

        let text = self
            .backend
            .generate(&request)
            .await
            .map_err(|e| PhaseError::generation(phase, e))?;
        if text.trim().is_empty() {
            return Err(PhaseError::generation(phase, GenerationError::Empty));
        }

        if phase == Phase::Tasks {
            let tasks: Vec<TaskSpec> = parse_task_list(&text).map_err(|e| {
                PhaseError::generation(phase, GenerationError::Unusable(e.to_string()))
            })?;
            if tasks.is_empty() {
                return Err(PhaseError::generation(
                    phase,
                    GenerationError::Unusable("task list is empty".into()),
                ));
            }
            info!(run_id = %run.id, tasks = tasks.len(), "task list parsed");
            self.store.put_json(&run.id, phase, &tasks).await?;
        } else {
            self.store
                .put_json(&run.id, phase, &normalize_document(&text))
                .await?;
        }
        Ok(())
    }

    async fn implement(
        &self,
        run: &Run,
        cancel: CancelToken,
    ) -> Result<ImplementationReport, PhaseError> {
        let specs: Vec<TaskSpec> = self.store.get_json(&run.id, Phase::Tasks).await?;
        let mut graph = TaskGraphBuilder::new().tasks(specs).build()?;

        match self.store.get_json::<TaskGraph>(&run.id, Phase::Implement).await {
            Ok(checkpoint) => {
                let restored = graph.apply_checkpoint(&checkpoint);
                info!(run_id = %run.id, restored, "restored implement checkpoint");
            }
            Err(StoreError::NotFound(_)) => {}
            Err(StoreError::Decode { key, message }) => {
                warn!(run_id = %run.id, %key, "ignoring unreadable checkpoint: {message}");
            }
            Err(e) => return Err(e.into()),
        }

        let validator = ValidationRunner::new(self.capability.clone(), self.engine.command_timeout())
            .strict(self.engine.strict_criteria);
        let executor = ImplementExecutor::new(
            self.backend.clone(),
            self.capability.clone(),
            validator,
            self.context(run).await?,
            self.engine.generation_timeout(),
        );
        let checkpointer = Arc::new(StoreCheckpointer {
            store: self.store.clone(),
            run_id: run.id.clone(),
        });
        let scheduler = TaskScheduler::new(self.engine.scheduler_config(), Arc::new(executor))
            .with_checkpointer(checkpointer.clone());

        info!(
            run_id = %run.id,
            tasks = graph.len(),
            max_concurrency = scheduler.config().max_concurrency,
            "implementing"
        );
        let result = scheduler.run(graph, cancel).await;

        checkpointer.save(&result.graph).await?;
        let report = ImplementationReport::from_graph(&run.id, result.outcome, &result.graph);
        self.store.put_report(&run.id, &report).await?;
        Ok(report)
    }
}

/// Writes the task graph to the run's Implement artifact after every attempt.
struct StoreCheckpointer {
    store: ArtifactStore,
    run_id: String,
}

#[async_trait]
impl Checkpointer for StoreCheckpointer {
    async fn save(&self, graph: &TaskGraph) -> Result<(), StoreError> {
        self.store.put_json(&self.run_id, Phase::Implement, graph).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use cynetics_store::MemoryStore;
    use cynetics_verify::LocalCapabilities;

    fn controller(backend: MockBackend, dir: &std::path::Path) -> PhaseController {
        PhaseController::new(
            ArtifactStore::new(Arc::new(MemoryStore::new())),
            Arc::new(backend),
            Arc::new(LocalCapabilities::new(dir)),
            EngineSettings::default(),
            "demo",
        )
    }

    #[tokio::test]
    async fn empty_task_list_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new()
            .respond("atomic tasks", "[]")
            .with_default("{\"summary\": \"x\"}");
        let ctl = controller(backend, dir.path());

        let err = ctl
            .start(Run::new("demo", None), None, CancelToken::never())
            .await
            .unwrap_err();
        match err {
            PhaseError::Generation {
                phase: Phase::Tasks,
                source: GenerationError::Unusable(msg),
            } => assert!(msg.contains("empty")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn prose_documents_are_stored_as_strings() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new()
            .respond("atomic tasks", "garbage")
            .with_default("A plain prose specification.");
        let ctl = controller(backend, dir.path());
        let run = Run::new("demo", None);
        let id = run.id.clone();

        let err = ctl.start(run, None, CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, PhaseError::Generation { phase: Phase::Tasks, .. }));

        let spec: Value = ctl.store().get_json(&id, Phase::Specify).await.unwrap();
        assert_eq!(spec, Value::String("A plain prose specification.".into()));
        assert_eq!(ctl.store().load_run(&id).await.unwrap().phase, Phase::Tasks);
    }

    #[tokio::test]
    async fn plan_prompt_carries_specification_and_stack() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            MockBackend::new()
                .always_fail("atomic tasks")
                .with_default("{\"core_features\": [\"search\"]}"),
        );
        let ctl = PhaseController::new(
            ArtifactStore::new(Arc::new(MemoryStore::new())),
            backend.clone(),
            Arc::new(LocalCapabilities::new(dir.path())),
            EngineSettings::default(),
            "demo",
        );
        let run = Run::new("demo", Some(serde_json::json!({"language": "rust"})));

        let _ = ctl.start(run, None, CancelToken::never()).await;
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(!prompts[0].contains("## Specification"));
        assert!(prompts[1].contains("## Specification"));
        assert!(prompts[1].contains("search"));
        assert!(prompts[1].contains("\"language\": \"rust\""));
        assert!(prompts[2].contains("## Technical Plan"));
    }
}
