//! Job runner
//!
//! One [`JobRunner`] drives one invocation of a pipeline:
//!
//! ```text
//! WAITING ──run()──► RUNNING ──► SUCCESS
//!                        └─────► FAILED
//! ```
//!
//! Tasks at a level run strictly in order. A branch task replaces the
//! working pipeline with the branch it selected; the level it came from is
//! never resumed. Branch descent uses an explicit frame stack, so nesting
//! depth does not grow the call stack, and a branch that leads back into a
//! pipeline already on the stack fails the run instead of looping.

mod context;
mod types;
mod unwind;

pub use context::RunContext;
pub use types::{RunOutcome, TaskFailure, TaskResult};

pub(crate) use context::{read, write};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::error::Error;
use crate::repository::{JobStatus, JobTaskRecord, Repository};
use crate::task::{Node, NodeOutcome, Pipeline};

/// What evaluating one pipeline level produced
enum LevelOutcome {
    Completed,
    Descend(Pipeline),
    Failed,
}

/// Single-use state machine for one job invocation
pub struct JobRunner {
    ctx: RunContext,
    pipeline: Pipeline,
    repository: Arc<dyn Repository>,
    timeout: Option<Duration>,
}

impl JobRunner {
    /// Create a runner over `pipeline`
    pub fn new(ctx: RunContext, pipeline: Pipeline, repository: Arc<dyn Repository>) -> Self {
        Self {
            ctx,
            pipeline,
            repository,
            timeout: None,
        }
    }

    /// Limit the wall-clock duration of the run
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run id
    pub fn id(&self) -> Uuid {
        self.ctx.id()
    }

    /// Context shared with executions
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run the pipeline to a terminal state.
    ///
    /// Never fails: task errors and panics end up in the outcome's
    /// `exception`, repository errors are logged.
    pub async fn run(self) -> RunOutcome {
        let span = self.ctx.span().clone();
        self.execute().instrument(span).await
    }

    async fn execute(self) -> RunOutcome {
        write(&self.ctx.state.progress).status = JobStatus::Running;
        info!(tasks = self.pipeline.len(), "Job started");

        let deadline = self.timeout.map(|limit| (limit, Instant::now() + limit));
        let watchdog = self.timeout.map(|limit| {
            let token = self.ctx.cancellation().clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                token.cancel();
            })
        });

        let mut frames: Vec<Pipeline> = Vec::new();
        let mut level = self.pipeline.clone();
        let status = loop {
            if frames.iter().any(|frame| frame.same_as(&level)) {
                let task = self.ctx.current_task().unwrap_or_default();
                let failure = TaskFailure::error(Error::BranchCycle(task.clone()).to_string());
                self.record_failure(&task, failure);
                break JobStatus::Failed;
            }
            frames.push(level.clone());

            match self.run_level(&level, deadline).await {
                LevelOutcome::Completed => break JobStatus::Success,
                LevelOutcome::Descend(next) => level = next,
                LevelOutcome::Failed => break JobStatus::Failed,
            }
        };

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        {
            let mut progress = write(&self.ctx.state.progress);
            progress.status = status;
            progress.end_datetime = Some(Utc::now());
        }

        match status {
            JobStatus::Success => info!(levels = frames.len(), "Job succeeded"),
            _ => warn!(
                task = %self.ctx.exception_task_name().unwrap_or_default(),
                error = %self
                    .ctx
                    .exception()
                    .map(|e| e.message)
                    .unwrap_or_default(),
                "Job failed"
            ),
        }

        RunOutcome::from_context(&self.ctx)
    }

    async fn run_level(
        &self,
        level: &Pipeline,
        deadline: Option<(Duration, Instant)>,
    ) -> LevelOutcome {
        write(&self.ctx.state.progress).current_task_index = 0;

        for (index, node) in level.iter().enumerate() {
            {
                let mut progress = write(&self.ctx.state.progress);
                progress.current_task_index = index;
                progress.current_task = Some(node.name().to_string());
            }
            let started_at = Utc::now();

            if let Some((limit, at)) = deadline {
                if Instant::now() >= at {
                    let failure =
                        TaskFailure::error(format!("job timeout of {limit:?} exceeded"));
                    self.fail(node, started_at, failure).await;
                    return LevelOutcome::Failed;
                }
            }

            debug!(task = node.name(), index, "Task started");
            self.persist_task(node, JobStatus::Running, started_at, None, None)
                .await;

            let outcome = match AssertUnwindSafe(unwind::capturing(node.call(&self.ctx)))
                .catch_unwind()
                .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(error)) => {
                    self.fail(node, started_at, TaskFailure::error(format!("{error:#}")))
                        .await;
                    return LevelOutcome::Failed;
                }
                Err(payload) => {
                    let failure = unwind::into_failure(payload);
                    self.fail(node, started_at, failure).await;
                    return LevelOutcome::Failed;
                }
            };
            let finished_at = Utc::now();

            let (value, descend) = match outcome {
                NodeOutcome::Value(value) => (value, None),
                NodeOutcome::Descend { branch, pipeline } => {
                    debug!(task = node.name(), branch = %branch, "Branch selected");
                    (Value::String(branch), Some(pipeline))
                }
            };

            self.ctx.push_task_value(node.name(), value);
            self.push_result(node, JobStatus::Success, started_at, finished_at);
            self.persist_task(
                node,
                JobStatus::Success,
                started_at,
                Some(finished_at),
                None,
            )
            .await;
            debug!(task = node.name(), index, "Task succeeded");

            if let Some(pipeline) = descend {
                return LevelOutcome::Descend(pipeline);
            }
        }

        LevelOutcome::Completed
    }

    async fn fail(&self, node: &Node, started_at: DateTime<Utc>, failure: TaskFailure) {
        let finished_at = Utc::now();
        warn!(task = node.name(), error = %failure.message, "Task failed");

        self.record_failure(node.name(), failure.clone());
        self.push_result(node, JobStatus::Failed, started_at, finished_at);
        self.persist_task(
            node,
            JobStatus::Failed,
            started_at,
            Some(finished_at),
            Some(&failure),
        )
        .await;
    }

    fn record_failure(&self, task: &str, failure: TaskFailure) {
        let mut progress = write(&self.ctx.state.progress);
        progress.exception = Some(failure);
        progress.exception_task_name = Some(task.to_string());
    }

    fn push_result(
        &self,
        node: &Node,
        status: JobStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        write(&self.ctx.state.progress)
            .task_results
            .push(TaskResult {
                name: node.name().to_string(),
                task_type: node.task_type(),
                status,
                started_at,
                finished_at,
            });
    }

    async fn persist_task(
        &self,
        node: &Node,
        status: JobStatus,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        failure: Option<&TaskFailure>,
    ) {
        let now = Utc::now();
        let record = JobTaskRecord {
            scheduler_name: self.ctx.scheduler_name().to_string(),
            job_id: self.ctx.id(),
            task_name: node.name().to_string(),
            task_type: node.task_type(),
            execution_name: node.execution_name().to_string(),
            status,
            start_datetime: started_at,
            end_datetime: finished_at,
            exception: failure.map(|f| f.message.clone()),
            stack_trace: failure.and_then(|f| f.stack_trace.clone()),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.repository.upsert_job_task(&record).await {
            warn!(
                task = node.name(),
                status = %status,
                error = %e,
                "Failed to persist task record"
            );
        }
    }
}

impl RunOutcome {
    pub(crate) fn from_context(ctx: &RunContext) -> Self {
        let progress = read(&ctx.state.progress);
        Self {
            job_id: ctx.id(),
            status: progress.status,
            current_task_index: progress.current_task_index,
            exception_task_name: progress.exception_task_name.clone(),
            exception: progress.exception.clone(),
            task_values: ctx.task_values(),
            task_results: progress.task_results.clone(),
            execute_datetime: ctx.execute_datetime(),
            end_datetime: progress.end_datetime,
        }
    }
}

#[cfg(test)]
mod tests;
