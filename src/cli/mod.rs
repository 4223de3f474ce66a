//! CLI module for Skein
//!
//! - `serve`: run every scheduler until interrupted
//! - `schedulers`: print the registered schedulers
//! - `inspect`: print one job's records
//! - `trigger`, `triggers`, `cancel`, `cancel-matching`: manage external
//!   triggers in the shared database; a running `serve` picks them up
//! - `jobs`: list job records

use crate::server::{self, config::AppConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use skein_core::{
    JobFilter, JobStatus, MemoryRepository, Page, Repository, SchedulerRegistry, TriggerRecord,
};
use std::sync::Arc;
use uuid::Uuid;

/// Skein pipeline scheduler
#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(about = "Lightweight pipeline scheduler")]
#[command(version)]
pub struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the schedulers (default)
    Serve,
    /// Print the registered schedulers as JSON
    Schedulers,
    /// Print a job, its trigger and its task records as JSON
    Inspect {
        /// Job id
        job_id: Uuid,
    },
    /// Issue an external trigger for a scheduler
    Trigger {
        /// Scheduler name
        scheduler: String,
        /// When to run (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Trigger config entry as KEY=VALUE; VALUE is parsed as JSON when
        /// it can be, else kept as a string. Repeatable.
        #[arg(long = "config", value_parser = parse_key_value)]
        config: Vec<(String, Value)>,
        /// Use this job id instead of a fresh one
        #[arg(long)]
        job_id: Option<Uuid>,
    },
    /// List pending external triggers
    Triggers {
        /// Only triggers of this scheduler
        #[arg(long)]
        scheduler: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Deactivate one pending trigger
    Cancel {
        /// Job id of the trigger
        job_id: Uuid,
    },
    /// Deactivate every pending trigger whose config has KEY=VALUE
    CancelMatching {
        /// Scheduler name
        scheduler: String,
        /// Config entry as KEY=VALUE
        #[arg(value_parser = parse_key_value)]
        entry: (String, Value),
    },
    /// List job records, most recent first
    Jobs {
        /// Only jobs of this scheduler
        #[arg(long)]
        scheduler: Option<String>,
        /// Only jobs in this status (WAITING, RUNNING, SUCCESS, FAILED)
        #[arg(long)]
        status: Option<JobStatus>,
        #[command(flatten)]
        page: PageArgs,
    },
}

/// Pagination flags shared by the listing commands
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct PageArgs {
    /// Rows to skip
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
    /// Maximum rows to return
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
}

impl From<PageArgs> for Page {
    fn from(args: PageArgs) -> Self {
        Page::new(args.offset, args.limit)
    }
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => server::run(config).await,
        Commands::Schedulers => schedulers(&config),
        Commands::Inspect { job_id } => inspect(&config, job_id).await,
        Commands::Trigger {
            scheduler,
            at,
            config: entries,
            job_id,
        } => {
            let registry = listing_registry(&config)?;
            let repository = server::open_shared_repository(&config).await?;
            let request = TriggerRequest {
                scheduler,
                at,
                config: entries.into_iter().collect(),
                job_id,
            };
            let trigger = issue_trigger(repository.as_ref(), &registry, request).await?;
            print_json(&trigger)
        }
        Commands::Triggers { scheduler, page } => {
            let repository = server::open_shared_repository(&config).await?;
            let triggers = repository
                .list_future_triggers(scheduler, page.into())
                .await?;
            print_json(&triggers)
        }
        Commands::Cancel { job_id } => {
            let repository = server::open_shared_repository(&config).await?;
            let cancelled = repository.deactivate_trigger(job_id).await?;
            print_json(&json!({ "job_id": job_id, "cancelled": cancelled }))
        }
        Commands::CancelMatching {
            scheduler,
            entry: (key, value),
        } => {
            let repository = server::open_shared_repository(&config).await?;
            let cancelled = repository
                .deactivate_triggers_by_config(&scheduler, &key, &value)
                .await?;
            print_json(&json!({ "scheduler": scheduler, "cancelled": cancelled }))
        }
        Commands::Jobs {
            scheduler,
            status,
            page,
        } => {
            let repository = server::open_repository(&config).await?;
            let filter = JobFilter {
                scheduler_name: scheduler,
                status,
            };
            let jobs = repository.list_jobs(&filter, page.into()).await?;
            print_json(&jobs)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{output}");
    Ok(())
}

/// Registry for name lookups only; nothing is started or persisted.
fn listing_registry(config: &AppConfig) -> Result<SchedulerRegistry> {
    server::build_registry(config, Arc::new(MemoryRepository::new()))
}

fn schedulers(config: &AppConfig) -> Result<()> {
    let registry = listing_registry(config)?;
    print_json(&registry.snapshots())
}

async fn inspect(config: &AppConfig, job_id: Uuid) -> Result<()> {
    let repository = server::open_repository(config).await?;

    let job = repository
        .get_one_job(job_id)
        .await?
        .with_context(|| format!("Job {job_id} not found"))?;
    let trigger = repository.get_one_trigger_by_job_id(job_id).await?;
    let tasks = repository.get_job_tasks_by_job_id(job_id).await?;

    print_json(&json!({
        "job": job,
        "trigger": trigger,
        "tasks": tasks,
    }))
}

/// An external trigger as requested on the command line
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub scheduler: String,
    pub at: Option<DateTime<Utc>>,
    pub config: Map<String, Value>,
    pub job_id: Option<Uuid>,
}

/// Write a pending trigger for `serve` to pick up.
///
/// A trigger without a time is due now and runs on the next pickup.
pub async fn issue_trigger(
    repository: &dyn Repository,
    registry: &SchedulerRegistry,
    request: TriggerRequest,
) -> Result<TriggerRecord> {
    registry.get(&request.scheduler)?;

    let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);
    if repository.get_one_trigger_by_job_id(job_id).await?.is_some() {
        anyhow::bail!("A trigger for job {job_id} already exists");
    }

    let at = request.at.unwrap_or_else(Utc::now);
    let trigger = TriggerRecord::external(request.scheduler, job_id, Some(at), request.config);
    repository
        .upsert_trigger(&trigger)
        .await
        .context("Failed to write trigger")?;
    tracing::info!(
        scheduler = %trigger.scheduler_name,
        job_id = %job_id,
        execute_at = %at,
        "Trigger issued"
    );
    Ok(trigger)
}

/// Parse `KEY=VALUE`, reading VALUE as JSON when possible
fn parse_key_value(input: &str) -> Result<(String, Value), String> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{input}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{input}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
