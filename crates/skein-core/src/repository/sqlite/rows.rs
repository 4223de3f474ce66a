//! Raw rows and their conversion into records

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::repository::models::{JobRecord, JobTaskRecord, TriggerRecord};

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::InvalidRecord(format!("Invalid job ID: {}", e)))
}

#[derive(FromRow)]
pub(super) struct JobRow {
    pub scheduler_name: String,
    pub job_id: String,
    pub status: String,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobRecord {
            scheduler_name: row.scheduler_name,
            job_id: parse_id(&row.job_id)?,
            status: row.status.parse()?,
            start_datetime: row.start_datetime,
            end_datetime: row.end_datetime,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct JobTaskRow {
    pub scheduler_name: String,
    pub job_id: String,
    pub task_name: String,
    pub task_type: String,
    pub execution_name: String,
    pub status: String,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: Option<DateTime<Utc>>,
    pub exception: Option<String>,
    pub stack_trace: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobTaskRow> for JobTaskRecord {
    type Error = Error;

    fn try_from(row: JobTaskRow) -> Result<Self> {
        Ok(JobTaskRecord {
            scheduler_name: row.scheduler_name,
            job_id: parse_id(&row.job_id)?,
            task_name: row.task_name,
            task_type: row.task_type.parse()?,
            execution_name: row.execution_name,
            status: row.status.parse()?,
            start_datetime: row.start_datetime,
            end_datetime: row.end_datetime,
            exception: row.exception,
            stack_trace: row.stack_trace,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct TriggerRow {
    pub job_id: String,
    pub scheduler_name: String,
    pub execute_datetime: Option<DateTime<Utc>>,
    pub config: String,
    pub trigger_type: String,
    pub is_trigger: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TriggerRow> for TriggerRecord {
    type Error = Error;

    fn try_from(row: TriggerRow) -> Result<Self> {
        Ok(TriggerRecord {
            scheduler_name: row.scheduler_name,
            job_id: parse_id(&row.job_id)?,
            execute_datetime: row.execute_datetime,
            config: serde_json::from_str(&row.config)?,
            trigger_type: row.trigger_type.parse()?,
            is_trigger: row.is_trigger,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(super) fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    rows.into_iter().map(T::try_from).collect()
}
