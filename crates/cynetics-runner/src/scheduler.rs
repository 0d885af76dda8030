//! Drives a task graph to completion under bounded concurrency.
//!
//! The scheduler loop owns the `TaskGraph`. Workers run one attempt each and
//! report back; every status transition happens on the loop, so the graph is
//! never touched from two places at once. At most `max_concurrency` workers
//! exist at any time and a task waiting out its backoff holds no worker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cynetics_core::graph::Disposition;
use cynetics_core::{AttemptOutcome, ExecutionAttempt, TaskGraph, TaskSpec, TaskStatus};
use cynetics_prompts::UpstreamOutput;
use cynetics_store::StoreError;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::backend::GenerationError;
use crate::run_tracker::{ActiveAttempt, RunTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Wait after the zero-based attempt `retry` failed: `base * 2^retry`, capped.
    pub fn delay_after(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Deadline for one attempt, generation and validation together.
    pub attempt_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(900),
        }
    }
}

/// Everything a worker needs for one attempt at one task.
#[derive(Debug, Clone)]
pub struct Job {
    pub spec: TaskSpec,
    /// Zero-based retry number.
    pub retry: u32,
    /// Outputs of the task's direct dependencies.
    pub upstream: Vec<UpstreamOutput>,
    /// Why the previous attempt failed, on a retry.
    pub previous_error: Option<String>,
}

/// Produces and checks a task's artifact. Implemented by the Implement phase
/// on top of a generation backend and the validation runner.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn produce(&self, job: &Job) -> Result<String, GenerationError>;

    /// `Err` carries the unmet acceptance criteria.
    async fn validate(&self, job: &Job, artifact: &str) -> Result<(), Vec<String>>;
}

/// Persists the graph after every recorded attempt so a run can resume.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, graph: &TaskGraph) -> Result<(), StoreError>;
}

/// Run-level cancellation signal.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if it never is.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task succeeded.
    Succeeded,
    /// Some tasks succeeded, others failed or were blocked.
    PartialFailure,
    /// No task succeeded.
    Failed,
    /// Stopped by cancellation before the graph settled.
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::PartialFailure => "partial_failure",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }

    /// Outcome of a settled graph.
    pub fn of(graph: &TaskGraph) -> Self {
        let succeeded = graph.count(TaskStatus::Succeeded);
        if succeeded == graph.len() {
            RunOutcome::Succeeded
        } else if succeeded > 0 {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Failed
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleResult {
    pub graph: TaskGraph,
    pub outcome: RunOutcome,
}

enum AttemptResult {
    Produced(String),
    GenerationFailed(GenerationError),
    ValidationFailed(Vec<String>),
    TimedOut(Duration),
}

struct AttemptReport {
    task_id: String,
    retry: u32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    result: AttemptResult,
}

/// Mutable bookkeeping for one `run` call.
struct RunState {
    workers: JoinSet<AttemptReport>,
    worker_tasks: HashMap<tokio::task::Id, String>,
    /// Ready tasks still waiting out their backoff.
    not_before: HashMap<String, Instant>,
    tracker: RunTracker,
    events: mpsc::UnboundedSender<String>,
}

pub struct TaskScheduler {
    config: SchedulerConfig,
    executor: Arc<dyn TaskExecutor>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl TaskScheduler {
    /// A `max_concurrency` of zero is raised to one.
    pub fn new(mut config: SchedulerConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        config.max_concurrency = config.max_concurrency.max(1);
        Self {
            config,
            executor,
            checkpointer: None,
        }
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run until no task is Ready or in flight, or until cancelled.
    ///
    /// Cancellation stops dispatch immediately; attempts already in flight
    /// finish and are recorded before this returns.
    pub async fn run(&self, mut graph: TaskGraph, mut cancel: CancelToken) -> ScheduleResult {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<String>();
        let mut state = RunState {
            workers: JoinSet::new(),
            worker_tasks: HashMap::new(),
            not_before: HashMap::new(),
            tracker: RunTracker::new(),
            events: events_tx,
        };
        let mut cancelled = cancel.is_cancelled();

        info!(
            tasks = graph.len(),
            ready = graph.count(TaskStatus::Ready),
            max_concurrency = self.config.max_concurrency,
            "scheduling task graph"
        );

        loop {
            if !cancelled {
                self.dispatch(&mut graph, &mut state);
            }
            if state.workers.is_empty() && (cancelled || graph.is_settled()) {
                break;
            }

            // With every slot taken, only a finishing worker can free one, so
            // an elapsed backoff must not wake the loop.
            let next_wake = if cancelled || state.workers.len() >= self.config.max_concurrency {
                None
            } else {
                state.not_before.values().min().copied()
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    warn!(
                        in_flight = state.workers.len(),
                        "cancellation requested; finishing in-flight attempts"
                    );
                }
                Some(task_id) = events_rx.recv() => {
                    mark_validating(&mut graph, &task_id);
                }
                Some(joined) = state.workers.join_next_with_id(), if !state.workers.is_empty() => {
                    // A worker reports Validating before it finishes.
                    while let Ok(task_id) = events_rx.try_recv() {
                        mark_validating(&mut graph, &task_id);
                    }
                    let report = match joined {
                        Ok((id, report)) => {
                            state.worker_tasks.remove(&id);
                            report
                        }
                        Err(e) => match state.worker_tasks.remove(&e.id()) {
                            Some(task_id) => panicked_report(&state.tracker, task_id, &e),
                            None => {
                                error!("worker for unknown task ended: {e}");
                                continue;
                            }
                        },
                    };
                    self.record(&mut graph, &mut state, report).await;
                }
                _ = sleep_until(next_wake.unwrap_or_else(Instant::now)), if next_wake.is_some() => {}
            }
        }

        let outcome = if cancelled && !graph.is_complete() {
            RunOutcome::Cancelled
        } else {
            RunOutcome::of(&graph)
        };
        info!(
            %outcome,
            succeeded = graph.count(TaskStatus::Succeeded),
            failed = graph.count(TaskStatus::Failed),
            blocked = graph.count(TaskStatus::Blocked),
            "task graph finished"
        );
        ScheduleResult { graph, outcome }
    }

    /// Start attempts for eligible Ready tasks, lowest id first, up to the bound.
    fn dispatch(&self, graph: &mut TaskGraph, state: &mut RunState) {
        let now = Instant::now();
        for id in graph.ready_ids() {
            if state.workers.len() >= self.config.max_concurrency {
                break;
            }
            if state.not_before.get(&id).is_some_and(|at| *at > now) {
                continue;
            }
            state.not_before.remove(&id);

            let retry = match graph.start_attempt(&id) {
                Ok(retry) => retry,
                Err(e) => {
                    error!(task_id = %id, "cannot start attempt: {e}");
                    continue;
                }
            };
            let Some(task) = graph.get(&id) else {
                continue;
            };
            let job = Job {
                spec: task.spec.clone(),
                retry,
                upstream: graph
                    .upstream_outputs(&id)
                    .into_iter()
                    .map(|(spec, output)| UpstreamOutput {
                        id: spec.id.clone(),
                        title: spec.title.clone(),
                        output: output.to_string(),
                    })
                    .collect(),
                previous_error: task.last_error.clone(),
            };

            info!(task_id = %id, attempt = retry + 1, "dispatching task");
            state.tracker.insert(ActiveAttempt {
                task_id: id.clone(),
                retry,
                started_at: Instant::now(),
            });
            let handle = state.workers.spawn(run_attempt(
                self.executor.clone(),
                job,
                state.events.clone(),
                self.config.attempt_timeout,
            ));
            state.worker_tasks.insert(handle.id(), id);
        }
    }

    async fn record(&self, graph: &mut TaskGraph, state: &mut RunState, report: AttemptReport) {
        let id = report.task_id;
        state.tracker.remove(&id);

        let (outcome, output) = match report.result {
            AttemptResult::Produced(artifact) => (AttemptOutcome::Succeeded, Some(artifact)),
            AttemptResult::GenerationFailed(e) => (
                AttemptOutcome::GenerationFailed {
                    message: e.to_string(),
                },
                None,
            ),
            AttemptResult::ValidationFailed(unmet) => {
                (AttemptOutcome::ValidationFailed { unmet }, None)
            }
            AttemptResult::TimedOut(limit) => (
                AttemptOutcome::TimedOut {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                },
                None,
            ),
        };
        let error = outcome.error_message();
        let attempt = ExecutionAttempt {
            retry: report.retry,
            started_at: report.started_at,
            finished_at: report.finished_at,
            outcome,
        };

        let retry_policy = &self.config.retry;
        match graph.complete_attempt(&id, attempt, output, retry_policy.max_attempts) {
            Ok(Disposition::Succeeded { newly_ready }) => {
                info!(task_id = %id, ?newly_ready, "task succeeded");
            }
            Ok(Disposition::Retry { failed_attempts }) => {
                let delay = retry_policy.delay_after(failed_attempts.saturating_sub(1));
                state.not_before.insert(id.clone(), Instant::now() + delay);
                warn!(
                    task_id = %id,
                    attempt = failed_attempts,
                    ?delay,
                    error = error.as_deref().unwrap_or(""),
                    "attempt failed; retrying"
                );
            }
            Ok(Disposition::Failed { blocked }) => {
                error!(
                    task_id = %id,
                    attempts = retry_policy.max_attempts,
                    ?blocked,
                    error = error.as_deref().unwrap_or(""),
                    "task failed"
                );
            }
            Err(e) => {
                error!(task_id = %id, "cannot record attempt: {e}");
            }
        }

        debug!(
            active = ?state.tracker.snapshot(),
            succeeded = graph.count(TaskStatus::Succeeded),
            remaining = graph.len() - graph.count(TaskStatus::Succeeded)
                - graph.count(TaskStatus::Failed)
                - graph.count(TaskStatus::Blocked),
            "progress"
        );

        if let Some(ref checkpointer) = self.checkpointer {
            if let Err(e) = checkpointer.save(graph).await {
                warn!("checkpoint failed: {e}");
            }
        }
    }
}

fn mark_validating(graph: &mut TaskGraph, task_id: &str) {
    if let Err(e) = graph.mark_validating(task_id) {
        debug!(task_id, "ignoring validating event: {e}");
    }
}

fn panicked_report(
    tracker: &RunTracker,
    task_id: String,
    e: &tokio::task::JoinError,
) -> AttemptReport {
    let retry = tracker.get(&task_id).map(|a| a.retry).unwrap_or(0);
    let now = Utc::now();
    AttemptReport {
        task_id,
        retry,
        started_at: now,
        finished_at: now,
        result: AttemptResult::GenerationFailed(GenerationError::Process(format!(
            "worker panicked: {e}"
        ))),
    }
}

async fn run_attempt(
    executor: Arc<dyn TaskExecutor>,
    job: Job,
    events: mpsc::UnboundedSender<String>,
    limit: Duration,
) -> AttemptReport {
    let started_at = Utc::now();
    let work = async {
        let artifact = match executor.produce(&job).await {
            Ok(artifact) => artifact,
            Err(e) => return AttemptResult::GenerationFailed(e),
        };
        let _ = events.send(job.spec.id.clone());
        match executor.validate(&job, &artifact).await {
            Ok(()) => AttemptResult::Produced(artifact),
            Err(unmet) => AttemptResult::ValidationFailed(unmet),
        }
    };
    let result = timeout(limit, work)
        .await
        .unwrap_or(AttemptResult::TimedOut(limit));
    AttemptReport {
        task_id: job.spec.id,
        retry: job.retry,
        started_at,
        finished_at: Utc::now(),
        result,
    }
}
