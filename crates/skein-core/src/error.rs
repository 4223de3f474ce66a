//! Error types for skein-core
//!
//! Task-level failures are not errors of this type: they are recorded on the
//! run itself (see [`crate::runner::TaskFailure`]). `Error` covers
//! registration, configuration and persistence problems.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cron expression could not be parsed
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        /// Expression as supplied
        expression: String,
        /// Parser message
        reason: String,
    },

    /// A pipeline with no nodes was registered
    #[error("pipeline '{0}' must contain at least one task")]
    EmptyPipeline(String),

    /// A branch would re-enter a pipeline that is already being evaluated
    #[error("branch cycle detected at '{0}'")]
    BranchCycle(String),

    /// Two schedulers registered under the same name
    #[error("scheduler already registered: {0}")]
    DuplicateScheduler(String),

    /// Lookup by name failed
    #[error("scheduler not found: {0}")]
    SchedulerNotFound(String),

    /// The scheduler was shut down and accepts no more triggers
    #[error("scheduler '{0}' is shut down")]
    SchedulerShutdown(String),

    /// A scheduler was built without a job
    #[error("scheduler '{0}' has no job registered")]
    JobNotRegistered(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
