//! Persistence of job, task and trigger records
//!
//! The engine treats the repository as a side channel: a failed write is
//! logged and the run carries on. The one read the engine depends on is the
//! trigger liveness check a future-trigger waiter performs before it runs.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryRepository`]: process-local maps, for tests and database-less
//!   deployments
//! - [`SqliteRepository`]: SQLite through `sqlx`

mod memory;
mod models;
mod sqlite;

pub use memory::MemoryRepository;
pub use models::{
    JobFilter, JobRecord, JobStatus, JobTaskRecord, Page, TriggerRecord, TriggerType,
};
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Storage contract consumed by the engine and by inspection tooling.
///
/// All upserts are idempotent under retry. Trigger upserts only ever move
/// `is_trigger` from false to true and `is_active` from true to false; the
/// scheduled time and config of a stored trigger are never rewritten.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert or update a job record
    async fn upsert_job(&self, job: &JobRecord) -> Result<()>;

    /// Insert or update a task record
    async fn upsert_job_task(&self, task: &JobTaskRecord) -> Result<()>;

    /// Insert or update a trigger record
    async fn upsert_trigger(&self, trigger: &TriggerRecord) -> Result<()>;

    /// Pending external triggers of one scheduler: not fired, still active.
    /// Used to re-arm future triggers at startup.
    async fn get_trigger_timer(&self, scheduler_name: &str) -> Result<Vec<TriggerRecord>>;

    /// Job record by id
    async fn get_one_job(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// Trigger record by job id
    async fn get_one_trigger_by_job_id(&self, job_id: Uuid) -> Result<Option<TriggerRecord>>;

    /// Task records of one job, in start order
    async fn get_job_tasks_by_job_id(&self, job_id: Uuid) -> Result<Vec<JobTaskRecord>>;

    /// Disable one trigger. Returns whether a row changed.
    async fn deactivate_trigger(&self, job_id: Uuid) -> Result<bool>;

    /// Disable every pending trigger of a scheduler whose config has
    /// `key == value`. Returns the number of triggers disabled.
    async fn deactivate_triggers_by_config(
        &self,
        scheduler_name: &str,
        key: &str,
        value: &Value,
    ) -> Result<u64>;

    /// Pending triggers ordered by scheduled time, optionally for one
    /// scheduler
    async fn list_future_triggers(
        &self,
        scheduler_name: Option<String>,
        page: Page,
    ) -> Result<Vec<TriggerRecord>>;

    /// Job records, most recent first
    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<JobRecord>>;
}
