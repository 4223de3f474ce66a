//! Run context handed to executions and hooks
//!
//! The context is the whole boundary between task code and the engine. It
//! is passed explicitly to every [`Execution`](crate::task::Execution) call,
//! so there is no ambient lookup and no runtime cast.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

use super::types::{TaskFailure, TaskResult};
use crate::repository::{JobStatus, TriggerType};

/// Mutable progress of one run
#[derive(Debug)]
pub(crate) struct Progress {
    pub status: JobStatus,
    pub current_task_index: usize,
    pub current_task: Option<String>,
    pub exception: Option<TaskFailure>,
    pub exception_task_name: Option<String>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub task_results: Vec<TaskResult>,
}

/// State owned by exactly one run
#[derive(Debug)]
pub(crate) struct RunState {
    pub id: Uuid,
    pub scheduler_name: String,
    pub trigger_type: TriggerType,
    pub execute_datetime: DateTime<Utc>,
    pub arguments: Map<String, Value>,
    pub trigger_config: Map<String, Value>,
    pub parameter: DashMap<String, Value>,
    pub task_values: RwLock<Vec<(String, Value)>>,
    pub progress: RwLock<Progress>,
}

// Nothing holding these locks calls into task code, so a poisoned lock
// still holds consistent data.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read/mutate facade over one run.
///
/// Cheap to clone; all clones observe the same run. Stores are safe to use
/// from helper tasks an execution spawns.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub(crate) state: Arc<RunState>,
    span: Span,
    cancel: CancellationToken,
}

impl RunContext {
    pub(crate) fn new(
        id: Uuid,
        scheduler_name: impl Into<String>,
        trigger_type: TriggerType,
        execute_datetime: DateTime<Utc>,
        arguments: Map<String, Value>,
        trigger_config: Map<String, Value>,
    ) -> Self {
        let scheduler_name = scheduler_name.into();
        let span = tracing::info_span!(
            "job_run",
            scheduler = %scheduler_name,
            job_id = %id,
        );
        Self {
            state: Arc::new(RunState {
                id,
                scheduler_name,
                trigger_type,
                execute_datetime,
                arguments,
                trigger_config,
                parameter: DashMap::new(),
                task_values: RwLock::new(Vec::new()),
                progress: RwLock::new(Progress {
                    status: JobStatus::Waiting,
                    current_task_index: 0,
                    current_task: None,
                    exception: None,
                    exception_task_name: None,
                    end_datetime: None,
                    task_results: Vec::new(),
                }),
            }),
            span,
            cancel: CancellationToken::new(),
        }
    }

    /// Context that is not attached to any scheduler.
    ///
    /// Useful for exercising an [`Execution`](crate::task::Execution) on its
    /// own, e.g. in unit tests.
    pub fn standalone(
        scheduler_name: impl Into<String>,
        arguments: Map<String, Value>,
        trigger_config: Map<String, Value>,
    ) -> Self {
        Self::new(
            Uuid::new_v4(),
            scheduler_name,
            TriggerType::External,
            Utc::now(),
            arguments,
            trigger_config,
        )
    }

    /// Run (job) id
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Owning scheduler name
    pub fn scheduler_name(&self) -> &str {
        &self.state.scheduler_name
    }

    /// How the run was triggered
    pub fn trigger_type(&self) -> TriggerType {
        self.state.trigger_type
    }

    /// Current status
    pub fn status(&self) -> JobStatus {
        read(&self.state.progress).status
    }

    /// Name of the task being (or last) evaluated
    pub fn current_task(&self) -> Option<String> {
        read(&self.state.progress).current_task.clone()
    }

    /// Index of the current task within its pipeline level
    pub fn current_task_index(&self) -> usize {
        read(&self.state.progress).current_task_index
    }

    /// Failure that ended the run, if any
    pub fn exception(&self) -> Option<TaskFailure> {
        read(&self.state.progress).exception.clone()
    }

    /// Name of the task that failed, if any
    pub fn exception_task_name(&self) -> Option<String> {
        read(&self.state.progress).exception_task_name.clone()
    }

    /// Scheduled execution time
    pub fn execute_datetime(&self) -> DateTime<Utc> {
        self.state.execute_datetime
    }

    /// End time, once the run is terminal
    pub fn end_datetime(&self) -> Option<DateTime<Utc>> {
        read(&self.state.progress).end_datetime
    }

    /// Static job arguments (a copy taken at trigger time)
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.state.arguments
    }

    /// One static argument
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.state.arguments.get(key)
    }

    /// Per-trigger configuration
    pub fn trigger_config(&self) -> &Map<String, Value> {
        &self.state.trigger_config
    }

    /// Read a value from the shared parameter store
    pub fn parameter(&self, key: &str) -> Option<Value> {
        self.state.parameter.get(key).map(|entry| entry.value().clone())
    }

    /// Write a value to the shared parameter store, returning the old value
    pub fn set_parameter(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state.parameter.insert(key.into(), value)
    }

    /// Remove a value from the shared parameter store
    pub fn remove_parameter(&self, key: &str) -> Option<Value> {
        self.state.parameter.remove(key).map(|(_, value)| value)
    }

    /// Snapshot of the parameter store
    pub fn parameters(&self) -> Map<String, Value> {
        self.state
            .parameter
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Value stored by an earlier task. When a task name was visited more
    /// than once, the latest value wins.
    pub fn task_value(&self, task_name: &str) -> Option<Value> {
        read(&self.state.task_values)
            .iter()
            .rev()
            .find(|(name, _)| name == task_name)
            .map(|(_, value)| value.clone())
    }

    /// All task values in the order tasks completed
    pub fn task_values(&self) -> Vec<(String, Value)> {
        read(&self.state.task_values).clone()
    }

    /// Per-task results recorded so far
    pub fn task_results(&self) -> Vec<TaskResult> {
        read(&self.state.progress).task_results.clone()
    }

    /// Span every log line of this run belongs to
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Token cancelled when the run should stop early (job timeout)
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn push_task_value(&self, task_name: &str, value: Value) {
        write(&self.state.task_values).push((task_name.to_string(), value));
    }
}
