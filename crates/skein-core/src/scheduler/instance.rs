//! One named scheduler: a job, an optional cron schedule and a queue

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::{ConfigSnapshot, SchedulerConfig};
use super::cron::CronSchedule;
use super::queue::ExecutionQueue;
use crate::error::{Error, Result};
use crate::job::{Job, PendingRun};
use crate::repository::{Repository, TriggerRecord};
use crate::task::NodeSnapshot;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand a pending run to the queue and run it once a slot frees up.
fn launch(queue: Arc<ExecutionQueue>, pending: PendingRun) {
    let span = pending.context().span().clone();
    tokio::spawn(
        async move {
            let Some(_permit) = queue.acquire().await else {
                warn!(job_id = %pending.job_id(), "Execution queue closed; run dropped");
                return;
            };
            pending.run().await;
        }
        .instrument(span),
    );
}

/// A named scheduler owning one job
pub struct SchedulerInstance {
    name: String,
    description: String,
    cron: Option<CronSchedule>,
    config: Arc<SchedulerConfig>,
    job: Arc<Job>,
    repository: Arc<dyn Repository>,
    queue: Arc<ExecutionQueue>,
    lifetime: Mutex<CancellationToken>,
    shutdown: CancellationToken,
    armed: DashSet<Uuid>,
    running: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl SchedulerInstance {
    pub(super) fn new(
        name: String,
        description: String,
        cron: Option<CronSchedule>,
        config: Arc<SchedulerConfig>,
        job: Job,
        repository: Arc<dyn Repository>,
    ) -> Self {
        let queue = Arc::new(ExecutionQueue::from_config(&config));
        Self {
            name,
            description,
            cron,
            config,
            job: Arc::new(job),
            repository,
            queue,
            lifetime: Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
            armed: DashSet::new(),
            running: AtomicBool::new(false),
            next_run: Mutex::new(None),
        }
    }

    /// Scheduler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Cron expression, if the scheduler has one
    pub fn cron_expression(&self) -> Option<&str> {
        self.cron.as_ref().map(CronSchedule::expression)
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The job this scheduler runs
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Concurrency gate shared by this scheduler's runs
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Whether `start` has been called without a matching `stop`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next cron fire time, while running
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        *lock(&self.next_run)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of future triggers with a live waiter
    pub fn armed_triggers(&self) -> usize {
        self.armed.len()
    }

    /// Start dispatching.
    ///
    /// Spawns the cron dispatcher when a cron expression is configured.
    /// Calling `start` on a running scheduler does nothing, and a scheduler
    /// that was shut down cannot be started again.
    pub fn start(self: &Arc<Self>) {
        if self.is_shut_down() {
            warn!(scheduler = %self.name, "Scheduler is shut down; start ignored");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(scheduler = %self.name, "Scheduler already running");
            return;
        }

        let token = {
            let mut lifetime = lock(&self.lifetime);
            if lifetime.is_cancelled() {
                *lifetime = CancellationToken::new();
            }
            lifetime.clone()
        };

        match &self.cron {
            Some(cron) => {
                let span = info_span!("cron_dispatch", scheduler = %self.name);
                tokio::spawn(
                    Arc::clone(self)
                        .dispatch(cron.clone(), token)
                        .instrument(span),
                );
                info!(
                    scheduler = %self.name,
                    cron = %cron.expression(),
                    "Scheduler started"
                );
            }
            None => info!(scheduler = %self.name, "Scheduler started without cron"),
        }
    }

    /// Stop the cron dispatcher.
    ///
    /// Armed future triggers keep waiting and fire on time, and runs already
    /// in flight finish on their own.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.lifetime).cancel();
        *lock(&self.next_run) = None;
        info!(scheduler = %self.name, "Scheduler stopped");
    }

    /// Stop for good, at process exit.
    ///
    /// Stops the cron dispatcher and releases every future-trigger waiter
    /// without firing it; those triggers stay armed in the repository for
    /// the next process to re-arm. Runs holding an execution slot finish.
    /// Runs still waiting for a slot are dropped and their job records stay
    /// WAITING. Later calls to [`run`](Self::run) fail.
    pub fn shutdown(&self) {
        self.stop();
        self.shutdown.cancel();
        self.queue.close();
        info!(scheduler = %self.name, "Scheduler shut down");
    }

    async fn dispatch(self: Arc<Self>, cron: CronSchedule, token: CancellationToken) {
        let mut after = Utc::now();
        loop {
            let Some(next) = cron.next_after(after) else {
                warn!("Cron schedule has no further occurrences");
                break;
            };
            *lock(&self.next_run) = Some(next);

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let (job_id, pending) = self.job.trigger(None, Map::new(), None).await;
            launch(self.queue.clone(), pending);
            info!(job_id = %job_id, scheduled_for = %next, "Cron tick dispatched");

            after = next.max(Utc::now());
        }
        debug!("Cron dispatcher exited");
    }

    /// Run a trigger.
    ///
    /// A trigger due now (or with no time) runs right away and is marked
    /// fired. A future trigger is persisted, its job materialized so the id
    /// is known, and a waiter armed; when it wakes it re-reads the trigger
    /// and runs only if it is still active, then marks it fired either way.
    ///
    /// A nil `job_id` on the trigger gets a fresh id. A future trigger whose
    /// job id already has a waiter is not armed twice.
    pub async fn run(self: &Arc<Self>, mut trigger: TriggerRecord) -> Result<Uuid> {
        if self.is_shut_down() {
            return Err(Error::SchedulerShutdown(self.name.clone()));
        }
        if trigger.scheduler_name != self.name {
            return Err(Error::InvalidConfig(format!(
                "trigger for scheduler '{}' sent to '{}'",
                trigger.scheduler_name, self.name
            )));
        }
        if trigger.job_id.is_nil() {
            trigger.job_id = Uuid::new_v4();
        }

        let now = Utc::now();
        match trigger.execute_datetime {
            Some(at) if trigger.is_future(now) => Ok(self.arm(trigger, at).await),
            _ => Ok(self.run_now(trigger, now).await),
        }
    }

    async fn run_now(&self, mut trigger: TriggerRecord, now: DateTime<Utc>) -> Uuid {
        let execute_at = trigger.execute_datetime.unwrap_or(now);
        let (job_id, pending) = self
            .job
            .trigger(Some(trigger.job_id), trigger.config.clone(), Some(execute_at))
            .await;
        launch(self.queue.clone(), pending);
        info!(scheduler = %self.name, job_id = %job_id, "Trigger dispatched");

        trigger.is_trigger = true;
        trigger.updated_at = Utc::now();
        self.persist_trigger(&trigger).await;
        job_id
    }

    async fn arm(self: &Arc<Self>, trigger: TriggerRecord, at: DateTime<Utc>) -> Uuid {
        if !self.armed.insert(trigger.job_id) {
            debug!(job_id = %trigger.job_id, "Future trigger already armed");
            return trigger.job_id;
        }

        self.persist_trigger(&trigger).await;
        let (job_id, pending) = self
            .job
            .trigger(Some(trigger.job_id), trigger.config.clone(), Some(at))
            .await;

        let span = pending.context().span().clone();
        tokio::spawn(
            Arc::clone(self)
                .wait_and_fire(trigger, at, pending)
                .instrument(span),
        );
        info!(
            scheduler = %self.name,
            job_id = %job_id,
            execute_at = %at,
            "Future trigger armed"
        );
        job_id
    }

    async fn wait_and_fire(
        self: Arc<Self>,
        mut trigger: TriggerRecord,
        at: DateTime<Utc>,
        pending: PendingRun,
    ) {
        let wait = (at - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!("Scheduler shut down; trigger left armed");
                self.armed.remove(&trigger.job_id);
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match self.repository.get_one_trigger_by_job_id(trigger.job_id).await {
            Ok(Some(live)) if live.is_pending() => launch(self.queue.clone(), pending),
            Ok(Some(live)) if !live.is_active => info!("Trigger deactivated; run skipped"),
            Ok(Some(_)) => info!("Trigger already fired; run skipped"),
            Ok(None) => warn!("Trigger record missing; run skipped"),
            Err(e) => warn!(error = %e, "Failed to re-read trigger; run skipped"),
        }

        trigger.is_trigger = true;
        trigger.updated_at = Utc::now();
        self.persist_trigger(&trigger).await;
        self.armed.remove(&trigger.job_id);
    }

    async fn persist_trigger(&self, trigger: &TriggerRecord) {
        if let Err(e) = self.repository.upsert_trigger(trigger).await {
            warn!(
                scheduler = %self.name,
                job_id = %trigger.job_id,
                error = %e,
                "Failed to persist trigger"
            );
        }
    }

    /// Re-arm this scheduler's pending triggers from the repository.
    ///
    /// Triggers that already have a live waiter are left alone, so calling
    /// this repeatedly is safe. Returns how many were handed to
    /// [`run`](Self::run).
    pub async fn reconcile(self: &Arc<Self>) -> Result<usize> {
        if self.is_shut_down() {
            return Err(Error::SchedulerShutdown(self.name.clone()));
        }

        let pending = self.repository.get_trigger_timer(&self.name).await?;
        let mut count = 0;
        for trigger in pending {
            if self.armed.contains(&trigger.job_id) {
                continue;
            }
            // A waiter marks its trigger fired before leaving the armed set.
            match self.repository.get_one_trigger_by_job_id(trigger.job_id).await? {
                Some(live) if live.is_pending() => {
                    self.run(live).await?;
                    count += 1;
                }
                _ => {}
            }
        }
        if count > 0 {
            info!(scheduler = %self.name, count, "Pending triggers re-armed");
        }
        Ok(count)
    }

    /// Serializable view of the scheduler
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            cron_expression: self.cron_expression().map(str::to_string),
            is_running: self.is_running(),
            next_run: self.next_run(),
            armed_triggers: self.armed_triggers(),
            arguments: self.job.arguments().clone(),
            config: self.config.snapshot(),
            tasks: self.job.pipeline().describe(),
        }
    }
}

impl std::fmt::Debug for SchedulerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerInstance")
            .field("name", &self.name)
            .field("cron", &self.cron_expression())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Scheduler state as reported to callers
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    /// Scheduler name
    pub name: String,
    /// Description
    pub description: String,
    /// Cron expression
    pub cron_expression: Option<String>,
    /// Whether the scheduler is started
    pub is_running: bool,
    /// Next cron fire time
    pub next_run: Option<DateTime<Utc>>,
    /// Future triggers waiting to fire
    pub armed_triggers: usize,
    /// Static job arguments
    pub arguments: Map<String, Value>,
    /// Configuration summary
    pub config: ConfigSnapshot,
    /// Pipeline structure
    pub tasks: Vec<NodeSnapshot>,
}
