//! Runner result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::JobStatus;
use crate::task::TaskType;

/// Why a task failed.
///
/// `stack_trace` is only set for recovered panics; returned errors are
/// expected business failures and carry just the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Error message
    pub message: String,
    /// Captured backtrace, for panics
    pub stack_trace: Option<String>,
}

impl TaskFailure {
    /// Failure from a returned error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Failure from a recovered panic
    pub fn panic(message: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: Some(stack_trace.into()),
        }
    }

    /// Whether this failure came from a panic
    pub fn is_panic(&self) -> bool {
        self.stack_trace.is_some()
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of one task attempt within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task name
    pub name: String,
    /// Node kind
    pub task_type: TaskType,
    /// Final status of the attempt
    pub status: JobStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

/// Final state of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Job id
    pub job_id: Uuid,
    /// Terminal status
    pub status: JobStatus,
    /// Index of the last task evaluated, within its pipeline level
    pub current_task_index: usize,
    /// Failing task name
    pub exception_task_name: Option<String>,
    /// Failure detail
    pub exception: Option<TaskFailure>,
    /// Values stored by tasks, in completion order
    pub task_values: Vec<(String, Value)>,
    /// Per-task results
    pub task_results: Vec<TaskResult>,
    /// Scheduled execution time
    pub execute_datetime: DateTime<Utc>,
    /// End time
    pub end_datetime: Option<DateTime<Utc>>,
}

impl RunOutcome {
    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
