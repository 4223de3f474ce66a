//! Sequential pipeline: fetch, summarize, publish

use serde_json::{json, Value};
use skein_core::{
    FnExecution, Pipeline, Repository, RunContext, SchedulerBuilder, SchedulerConfig,
    SchedulerInstance, Task,
};
use std::sync::Arc;
use tracing::info;

pub fn scheduler(
    config: SchedulerConfig,
    repository: Arc<dyn Repository>,
) -> skein_core::Result<Arc<SchedulerInstance>> {
    SchedulerBuilder::new("daily_report")
        .description("Collect yesterday's metrics and publish a summary")
        .cron("0 6 * * *")
        .config(config)
        .argument("source", json!("metrics"))
        .argument("channel", json!("#reports"))
        .pipeline(pipeline())
        .repository(repository)
        .build()
}

fn pipeline() -> Pipeline {
    Pipeline::new([
        Task::new("fetch", FnExecution::new("fetch_metrics", fetch)),
        Task::new("summarize", FnExecution::new("summarize_metrics", summarize)),
        Task::new("publish", FnExecution::new("publish_summary", publish)),
    ])
}

async fn fetch(ctx: RunContext) -> anyhow::Result<Value> {
    let source = ctx
        .argument("source")
        .and_then(Value::as_str)
        .unwrap_or("metrics");
    let day = ctx.execute_datetime().date_naive() - chrono::Days::new(1);
    Ok(json!({ "source": source, "day": day.to_string(), "samples": [12, 7, 31, 4] }))
}

async fn summarize(ctx: RunContext) -> anyhow::Result<Value> {
    let fetched = ctx
        .task_value("fetch")
        .ok_or_else(|| anyhow::anyhow!("fetch produced no value"))?;
    let samples: Vec<i64> = fetched["samples"]
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    let total: i64 = samples.iter().sum();
    ctx.set_parameter("total", json!(total));
    Ok(json!({ "day": fetched["day"], "count": samples.len(), "total": total }))
}

async fn publish(ctx: RunContext) -> anyhow::Result<Value> {
    let channel = ctx
        .argument("channel")
        .and_then(Value::as_str)
        .unwrap_or("#general")
        .to_string();
    let total = ctx.parameter("total").unwrap_or_default();
    ctx.span().in_scope(|| info!(channel = %channel, total = %total, "Summary published"));
    Ok(json!({ "channel": channel, "total": total }))
}
