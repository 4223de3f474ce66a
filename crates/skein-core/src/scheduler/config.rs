//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::runner::RunContext;

/// Future returned by a run hook
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback invoked with the finished run's context
pub type RunHook = Arc<dyn Fn(RunContext) -> HookFuture + Send + Sync>;

const DEFAULT_MAX_ACTIVE_CONCURRENT: usize = 32;

/// How overlapping runs of the same job are admitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobMode {
    /// One run at a time; later triggers wait
    Singleton,
    /// Runs overlap, up to `max_active_concurrent`
    #[default]
    Concurrent,
}

/// Scheduler configuration
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Maximum runs in flight at once
    pub max_active_concurrent: usize,
    /// Admission policy for overlapping runs
    pub job_mode: JobMode,
    /// Wall-clock limit per run
    pub job_timeout: Option<Duration>,
    /// Reserved; not consulted by the engine
    pub retry_times: u32,
    /// Reserved; not consulted by the engine
    pub retry_delay: Duration,
    /// Called after a successful run
    pub on_success: Option<RunHook>,
    /// Called after a failed run
    pub on_error: Option<RunHook>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_active_concurrent: DEFAULT_MAX_ACTIVE_CONCURRENT,
            job_mode: JobMode::default(),
            job_timeout: None,
            retry_times: 0,
            retry_delay: Duration::ZERO,
            on_success: None,
            on_error: None,
        }
    }
}

fn hook<F, Fut>(f: F) -> RunHook
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx: RunContext| Box::pin(f(ctx)) as HookFuture)
}

impl SchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max runs in flight
    pub fn with_max_active_concurrent(mut self, max: usize) -> Self {
        self.max_active_concurrent = max;
        self
    }

    /// Set the job mode
    pub fn with_job_mode(mut self, mode: JobMode) -> Self {
        self.job_mode = mode;
        self
    }

    /// Set the per-run timeout
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Set the retry knobs
    pub fn with_retry(mut self, times: u32, delay: Duration) -> Self {
        self.retry_times = times;
        self.retry_delay = delay;
        self
    }

    /// Set the success hook
    pub fn on_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_success = Some(hook(f));
        self
    }

    /// Set the error hook
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_error = Some(hook(f));
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_active_concurrent == 0 {
            return Err(Error::InvalidConfig(
                "max_active_concurrent must be at least 1".to_string(),
            ));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfig(
                "job_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Serializable summary
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            max_active_concurrent: self.max_active_concurrent,
            job_mode: self.job_mode,
            job_timeout_secs: self.job_timeout.map(|t| t.as_secs()),
            retry_times: self.retry_times,
            retry_delay_secs: self.retry_delay.as_secs(),
            is_handle_on_success: self.on_success.is_some(),
            is_handle_on_error: self.on_error.is_some(),
        }
    }
}

impl std::fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("max_active_concurrent", &self.max_active_concurrent)
            .field("job_mode", &self.job_mode)
            .field("job_timeout", &self.job_timeout)
            .field("retry_times", &self.retry_times)
            .field("retry_delay", &self.retry_delay)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Scheduler configuration as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Maximum runs in flight
    pub max_active_concurrent: usize,
    /// Admission policy
    pub job_mode: JobMode,
    /// Per-run timeout in seconds
    pub job_timeout_secs: Option<u64>,
    /// Reserved retry count
    pub retry_times: u32,
    /// Reserved retry delay in seconds
    pub retry_delay_secs: u64,
    /// Whether a success hook is set
    pub is_handle_on_success: bool,
    /// Whether an error hook is set
    pub is_handle_on_error: bool,
}
