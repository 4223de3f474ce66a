//! Externally triggered export
//!
//! Has no cron expression; runs only through triggers, immediate or
//! future-dated. The trigger config carries `batch` and optional `format`.

use serde_json::{json, Value};
use skein_core::{
    FnExecution, Pipeline, Repository, RunContext, SchedulerBuilder, SchedulerConfig,
    SchedulerInstance, Task,
};
use std::sync::Arc;

pub fn scheduler(
    config: SchedulerConfig,
    repository: Arc<dyn Repository>,
) -> skein_core::Result<Arc<SchedulerInstance>> {
    SchedulerBuilder::new("adhoc_export")
        .description("Export one batch on request")
        .config(config)
        .argument("bucket", json!("exports"))
        .pipeline(pipeline())
        .repository(repository)
        .build()
}

fn pipeline() -> Pipeline {
    Pipeline::new([
        Task::new("prepare", FnExecution::new("prepare_export", prepare)),
        Task::new("write", FnExecution::new("write_export", write)),
    ])
}

async fn prepare(ctx: RunContext) -> anyhow::Result<Value> {
    let batch = ctx
        .trigger_config()
        .get("batch")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("trigger config has no batch"))?;
    let format = ctx
        .trigger_config()
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or("csv")
        .to_string();
    ctx.set_parameter("format", json!(format));
    Ok(json!({ "batch": batch }))
}

async fn write(ctx: RunContext) -> anyhow::Result<Value> {
    let bucket = ctx
        .argument("bucket")
        .and_then(Value::as_str)
        .unwrap_or("exports")
        .to_string();
    let format = ctx.remove_parameter("format").unwrap_or_else(|| json!("csv"));
    let batch = ctx
        .task_value("prepare")
        .map(|v| v["batch"].clone())
        .unwrap_or_default();
    let key = format!(
        "{bucket}/{}/{}.{}",
        ctx.execute_datetime().format("%Y-%m-%d"),
        ctx.id(),
        format.as_str().unwrap_or("csv")
    );
    Ok(json!({ "key": key, "batch": batch }))
}
