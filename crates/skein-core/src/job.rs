//! Job: a pipeline bound to its scheduler
//!
//! [`Job::trigger`] materializes one run. It allocates the run id, records
//! the job as WAITING, and hands back a [`PendingRun`] that performs the run
//! itself when awaited. Splitting the two lets a caller learn the job id of
//! a future-dated trigger long before the run starts.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::repository::{JobRecord, JobStatus, Repository, TriggerRecord, TriggerType};
use crate::runner::{JobRunner, RunContext, RunOutcome};
use crate::scheduler::SchedulerConfig;
use crate::task::Pipeline;

/// A validated pipeline plus its static arguments
pub struct Job {
    scheduler_name: String,
    pipeline: Pipeline,
    arguments: Map<String, Value>,
    config: Arc<SchedulerConfig>,
    repository: Arc<dyn Repository>,
}

impl Job {
    /// Bind a pipeline to a scheduler. Fails if the pipeline is empty or a
    /// branch loops back on itself.
    pub fn new(
        scheduler_name: impl Into<String>,
        pipeline: Pipeline,
        arguments: Map<String, Value>,
        config: Arc<SchedulerConfig>,
        repository: Arc<dyn Repository>,
    ) -> Result<Self> {
        let scheduler_name = scheduler_name.into();
        pipeline.validate(&scheduler_name)?;

        Ok(Self {
            scheduler_name,
            pipeline,
            arguments,
            config,
            repository,
        })
    }

    /// Owning scheduler
    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    /// Top-level pipeline
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Static arguments copied into every run
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Materialize one run.
    ///
    /// With no `execute_datetime` the run is a cron tick (`SCHEDULE`) due
    /// now; otherwise it is `EXTERNAL` and due at that time. The WAITING job
    /// record is written before this returns; a write failure is logged.
    pub async fn trigger(
        &self,
        override_job_id: Option<Uuid>,
        trigger_config: Map<String, Value>,
        execute_datetime: Option<DateTime<Utc>>,
    ) -> (Uuid, PendingRun) {
        let job_id = override_job_id.unwrap_or_else(Uuid::new_v4);
        let trigger_type = match execute_datetime {
            Some(_) => TriggerType::External,
            None => TriggerType::Schedule,
        };
        let execute_at = execute_datetime.unwrap_or_else(Utc::now);

        let ctx = RunContext::new(
            job_id,
            self.scheduler_name.as_str(),
            trigger_type,
            execute_at,
            self.arguments.clone(),
            trigger_config,
        );
        let runner = JobRunner::new(ctx.clone(), self.pipeline.clone(), self.repository.clone())
            .with_timeout(self.config.job_timeout);

        let record = JobRecord::new(&self.scheduler_name, job_id, JobStatus::Waiting, execute_at);
        if let Err(e) = self.repository.upsert_job(&record).await {
            warn!(
                scheduler = %self.scheduler_name,
                job_id = %job_id,
                error = %e,
                "Failed to persist waiting job"
            );
        }
        debug!(
            scheduler = %self.scheduler_name,
            job_id = %job_id,
            trigger_type = %trigger_type,
            execute_at = %execute_at,
            "Job triggered"
        );

        (
            job_id,
            PendingRun {
                ctx,
                runner,
                record,
                trigger_type,
                config: self.config.clone(),
                repository: self.repository.clone(),
            },
        )
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("scheduler_name", &self.scheduler_name)
            .field("tasks", &self.pipeline.len())
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// A materialized run that has not started yet
pub struct PendingRun {
    ctx: RunContext,
    runner: JobRunner,
    record: JobRecord,
    trigger_type: TriggerType,
    config: Arc<SchedulerConfig>,
    repository: Arc<dyn Repository>,
}

impl PendingRun {
    /// Run id
    pub fn job_id(&self) -> Uuid {
        self.ctx.id()
    }

    /// Trigger classification
    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    /// Context the run will use
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Execute the run: job-record bookkeeping around the runner, then the
    /// success or error hook.
    pub async fn run(self) -> RunOutcome {
        let span = self.ctx.span().clone();
        self.execute().instrument(span).await
    }

    async fn execute(self) -> RunOutcome {
        let Self {
            ctx,
            runner,
            mut record,
            trigger_type,
            config,
            repository,
        } = self;

        if trigger_type == TriggerType::Schedule {
            let tick = TriggerRecord::schedule(ctx.scheduler_name(), ctx.id(), Utc::now());
            if let Err(e) = repository.upsert_trigger(&tick).await {
                warn!(error = %e, "Failed to persist schedule trigger");
            }
        }

        record.status = JobStatus::Running;
        record.updated_at = Utc::now();
        if let Err(e) = repository.upsert_job(&record).await {
            warn!(error = %e, "Failed to persist running job");
        }

        let outcome = runner.run().await;

        record.status = outcome.status;
        record.end_datetime = outcome.end_datetime;
        record.updated_at = Utc::now();
        if let Err(e) = repository.upsert_job(&record).await {
            warn!(error = %e, "Failed to persist finished job");
        }

        let (kind, hook) = match outcome.status {
            JobStatus::Success => ("on_success", config.on_success.clone()),
            _ => ("on_error", config.on_error.clone()),
        };
        if let Some(hook) = hook {
            let ctx = ctx.clone();
            match AssertUnwindSafe(async move { hook(ctx).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => debug!(hook = kind, "Run hook finished"),
                Ok(Err(e)) => warn!(hook = kind, error = %format!("{e:#}"), "Run hook failed"),
                Err(_) => error!(hook = kind, "Run hook panicked"),
            }
        }

        info!(status = %outcome.status, "Run finished");
        outcome
    }
}
