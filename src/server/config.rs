//! Application configuration types

use serde::{Deserialize, Serialize};
use skein_core::{JobMode, SchedulerConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerDefaults,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where records are persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; empty or missing means in-memory only
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Configured database file, ignoring an empty path
    pub fn sqlite_path(&self) -> Option<&PathBuf> {
        self.path.as_ref().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Defaults applied to every registered scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerDefaults {
    #[serde(default = "default_max_active_concurrent")]
    pub max_active_concurrent: usize,
    #[serde(default)]
    pub job_mode: JobMode,
    /// Per-run limit in seconds (0 = no limit)
    #[serde(default)]
    pub job_timeout_secs: u64,
    /// How often `serve` re-reads pending triggers written by other
    /// processes, in seconds (0 = only at startup)
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_max_active_concurrent() -> usize {
    32
}

impl Default for SchedulerDefaults {
    fn default() -> Self {
        Self {
            max_active_concurrent: default_max_active_concurrent(),
            job_mode: JobMode::default(),
            job_timeout_secs: 0,
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl SchedulerDefaults {
    /// Base scheduler configuration, without hooks
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        let config = SchedulerConfig::new()
            .with_max_active_concurrent(self.max_active_concurrent)
            .with_job_mode(self.job_mode);
        match self.job_timeout_secs {
            0 => config,
            secs => config.with_job_timeout(Duration::from_secs(secs)),
        }
    }

    /// Period of the trigger pickup loop, if enabled
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0)
            .then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "skein=info,skein_core=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}
