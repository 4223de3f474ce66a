//! Skein Core - Pipeline Scheduling Engine
//!
//! This crate provides the scheduling and execution engine behind Skein:
//! - Task model: leaf executions, tasks, branch tasks and pipelines
//! - Runner: the per-invocation state machine that walks a pipeline
//! - Job: binds a pipeline and its static arguments to a scheduler
//! - Scheduler: cron dispatch, on-demand and future-dated triggers,
//!   concurrency gating and startup reconciliation
//! - Repository: persisted job, task and trigger records

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod job;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod task;

pub use error::{Error, Result};
pub use executor::{FnExecution, ShellExecution};
pub use job::{Job, PendingRun};
pub use repository::{
    JobFilter, JobRecord, JobStatus, JobTaskRecord, MemoryRepository, Page, Repository,
    SqliteRepository, TriggerRecord, TriggerType,
};
pub use runner::{JobRunner, RunContext, RunOutcome, TaskFailure, TaskResult};
pub use scheduler::{
    ConfigSnapshot, ExecutionQueue, JobMode, RunHook, SchedulerBuilder, SchedulerConfig,
    SchedulerInstance, SchedulerRegistry, SchedulerSnapshot,
};
pub use task::{Execution, Node, Pipeline, Task, TaskBranch, TaskType};
