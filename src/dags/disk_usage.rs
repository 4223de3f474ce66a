//! Shell pipeline: sample disk usage and flag full filesystems

use serde_json::{json, Value};
use skein_core::{
    FnExecution, JobMode, Pipeline, Repository, RunContext, SchedulerBuilder, SchedulerConfig,
    SchedulerInstance, ShellExecution, Task,
};
use std::sync::Arc;

const USAGE_LIMIT_PERCENT: u64 = 90;

pub fn scheduler(
    config: SchedulerConfig,
    repository: Arc<dyn Repository>,
) -> skein_core::Result<Arc<SchedulerInstance>> {
    SchedulerBuilder::new("disk_usage")
        .description("Sample filesystem usage every hour")
        .cron("0 * * * *")
        .config(config.with_job_mode(JobMode::Singleton))
        .pipeline(pipeline())
        .repository(repository)
        .build()
}

fn pipeline() -> Pipeline {
    Pipeline::new([
        Task::new(
            "sample",
            ShellExecution::new("df", "df", ["-P", "-k"]).with_env("LC_ALL", "C"),
        ),
        Task::new("check", FnExecution::new("check_usage", check)),
    ])
}

async fn check(ctx: RunContext) -> anyhow::Result<Value> {
    let sample = ctx
        .task_value("sample")
        .ok_or_else(|| anyhow::anyhow!("sample produced no value"))?;
    let stdout = sample["stdout"].as_str().unwrap_or_default();

    let full = parse_full(stdout, USAGE_LIMIT_PERCENT);
    if !full.is_empty() {
        anyhow::bail!("filesystems above {USAGE_LIMIT_PERCENT}%: {}", full.join(", "));
    }
    Ok(json!({ "checked": stdout.lines().skip(1).count() }))
}

/// Mount points whose capacity column exceeds `limit`
fn parse_full(df_output: &str, limit: u64) -> Vec<String> {
    df_output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let used = cols.get(4)?.trim_end_matches('%').parse::<u64>().ok()?;
            let mount = cols.get(5)?;
            (used > limit).then(|| mount.to_string())
        })
        .collect()
}
