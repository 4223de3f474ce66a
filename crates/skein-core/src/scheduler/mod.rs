//! Scheduling
//!
//! A [`SchedulerInstance`] owns one [`Job`](crate::job::Job) and decides
//! when it runs:
//!
//! - **Cron**: a dispatcher task sleeps until the next occurrence and fires
//!   a `SCHEDULE` run
//! - **Immediate**: [`SchedulerInstance::run`] with a trigger that is due
//! - **Future**: [`SchedulerInstance::run`] with a trigger in the future;
//!   the trigger is persisted so a restart re-arms it
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐
//! │ SchedulerRegistry │  Name lookup, start/shutdown
//! └─────────┬─────────┘
//!           │
//!           ▼
//! ┌───────────────────┐
//! │ SchedulerInstance │  Cron dispatch, triggers, reconciliation
//! └─────────┬─────────┘
//!           │
//!           ▼
//! ┌───────────────────┐
//! │  ExecutionQueue   │  Singleton / concurrent admission
//! └─────────┬─────────┘
//!           │
//!           ▼
//! ┌───────────────────┐
//! │ Job ─► JobRunner  │  One run of the pipeline
//! └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use skein_core::{SchedulerBuilder, SchedulerConfig, SqliteRepository};
//!
//! let repository = Arc::new(SqliteRepository::from_path(&db_path).await?);
//!
//! let scheduler = SchedulerBuilder::new("nightly_export")
//!     .cron("0 3 * * *") // 3 AM UTC daily
//!     .config(SchedulerConfig::new().with_job_mode(JobMode::Singleton))
//!     .pipeline(pipeline)
//!     .repository(repository)
//!     .build()?;
//!
//! let mut registry = SchedulerRegistry::new();
//! registry.register(scheduler)?;
//! registry.start_all().await;
//! ```

mod builder;
mod config;
mod cron;
mod instance;
mod queue;
mod registry;

pub use builder::SchedulerBuilder;
pub use config::{ConfigSnapshot, HookFuture, JobMode, RunHook, SchedulerConfig};
pub use self::cron::CronSchedule;
pub use instance::{SchedulerInstance, SchedulerSnapshot};
pub use queue::{ExecutionQueue, QueuePermit};
pub use registry::SchedulerRegistry;

#[cfg(test)]
mod tests;
