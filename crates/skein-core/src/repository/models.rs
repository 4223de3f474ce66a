//! Persisted record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::task::TaskType;

/// Status of a job or of one task within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not started
    Waiting,
    /// In progress
    Running,
    /// Finished without error
    Success,
    /// Stopped on a task failure
    Failed,
}

impl JobStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(Error::InvalidRecord(format!("unknown job status: {other}"))),
        }
    }
}

/// How a job run was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Cron tick
    Schedule,
    /// API call, immediate or future-dated
    External,
}

impl TriggerType {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "SCHEDULE",
            Self::External => "EXTERNAL",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULE" => Ok(Self::Schedule),
            "EXTERNAL" => Ok(Self::External),
            other => Err(Error::InvalidRecord(format!("unknown trigger type: {other}"))),
        }
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BASE_TASK" => Ok(Self::BaseTask),
            "BRANCH_TASK" => Ok(Self::BranchTask),
            other => Err(Error::InvalidRecord(format!("unknown task type: {other}"))),
        }
    }
}

/// One job run. Keyed by `(scheduler_name, job_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Owning scheduler
    pub scheduler_name: String,
    /// Run id
    pub job_id: Uuid,
    /// Run status
    pub status: JobStatus,
    /// Scheduled execution time
    pub start_datetime: DateTime<Utc>,
    /// End time, once terminal
    pub end_datetime: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// New record in the given status
    pub fn new(
        scheduler_name: impl Into<String>,
        job_id: Uuid,
        status: JobStatus,
        start_datetime: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            scheduler_name: scheduler_name.into(),
            job_id,
            status,
            start_datetime,
            end_datetime: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update to an existing row; `created_at` is kept.
    pub fn merge(&mut self, incoming: &JobRecord) {
        self.status = incoming.status;
        self.start_datetime = incoming.start_datetime;
        self.end_datetime = incoming.end_datetime;
        self.updated_at = incoming.updated_at;
    }
}

/// Most recent attempt of one task within a run. Keyed by
/// `(job_id, task_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTaskRecord {
    /// Owning scheduler
    pub scheduler_name: String,
    /// Run id
    pub job_id: Uuid,
    /// Task name
    pub task_name: String,
    /// Node kind
    pub task_type: TaskType,
    /// Wrapped execution name
    pub execution_name: String,
    /// Attempt status
    pub status: JobStatus,
    /// Start time
    pub start_datetime: DateTime<Utc>,
    /// End time
    pub end_datetime: Option<DateTime<Utc>>,
    /// Failure message
    pub exception: Option<String>,
    /// Backtrace, for panics
    pub stack_trace: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl JobTaskRecord {
    /// Apply an update to an existing row; `created_at` is kept.
    pub fn merge(&mut self, incoming: &JobTaskRecord) {
        let created_at = self.created_at;
        *self = incoming.clone();
        self.created_at = created_at;
    }
}

/// A persisted request to run a job. Keyed by `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Owning scheduler
    pub scheduler_name: String,
    /// Run id the trigger will use
    pub job_id: Uuid,
    /// When to run; `None` means now
    pub execute_datetime: Option<DateTime<Utc>>,
    /// Per-trigger configuration handed to the run
    pub config: Map<String, Value>,
    /// Trigger kind
    pub trigger_type: TriggerType,
    /// Whether the trigger has fired
    pub is_trigger: bool,
    /// Whether the trigger may still fire
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl TriggerRecord {
    /// External trigger for `job_id`, armed and active
    pub fn external(
        scheduler_name: impl Into<String>,
        job_id: Uuid,
        execute_datetime: Option<DateTime<Utc>>,
        config: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            scheduler_name: scheduler_name.into(),
            job_id,
            execute_datetime,
            config,
            trigger_type: TriggerType::External,
            is_trigger: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record of a cron tick; fired on creation
    pub fn schedule(
        scheduler_name: impl Into<String>,
        job_id: Uuid,
        execute_datetime: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            scheduler_name: scheduler_name.into(),
            job_id,
            execute_datetime: Some(execute_datetime),
            config: Map::new(),
            trigger_type: TriggerType::Schedule,
            is_trigger: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the trigger still waits to fire
    pub fn is_pending(&self) -> bool {
        !self.is_trigger && self.is_active
    }

    /// Whether `execute_datetime` lies after `now`
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.execute_datetime.is_some_and(|at| at > now)
    }

    /// Apply an update to an existing row.
    ///
    /// Only the flags and `updated_at` change. Once fired a trigger stays
    /// fired, and once deactivated it stays inactive.
    pub fn merge(&mut self, incoming: &TriggerRecord) {
        self.is_trigger |= incoming.is_trigger;
        self.is_active &= incoming.is_active;
        self.updated_at = incoming.updated_at;
    }
}

/// Filter for job listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Only jobs of this scheduler
    pub scheduler_name: Option<String>,
    /// Only jobs in this status
    pub status: Option<JobStatus>,
}

impl JobFilter {
    /// Whether `job` passes the filter
    pub fn matches(&self, job: &JobRecord) -> bool {
        self.scheduler_name
            .as_deref()
            .is_none_or(|name| name == job.scheduler_name)
            && self.status.is_none_or(|status| status == job.status)
    }
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip
    pub offset: u32,
    /// Maximum rows to return
    pub limit: u32,
}

impl Page {
    /// Page with the given bounds
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}
