//! Nested branch pipeline
//!
//! `route` picks the domestic or international path from the trigger's
//! `region`; international orders branch again on customs requirements.

use serde_json::{json, Value};
use skein_core::{
    FnExecution, Node, Pipeline, Repository, RunContext, SchedulerBuilder, SchedulerConfig,
    SchedulerInstance, Task, TaskBranch,
};
use std::sync::Arc;

const EU_REGIONS: &[&str] = &["de", "fr", "nl", "es", "it"];

pub fn scheduler(
    config: SchedulerConfig,
    repository: Arc<dyn Repository>,
) -> skein_core::Result<Arc<SchedulerInstance>> {
    SchedulerBuilder::new("order_routing")
        .description("Route pending orders to the right fulfilment path")
        .cron("*/15 * * * *")
        .config(config)
        .argument("home_region", json!("us"))
        .pipeline(pipeline())
        .repository(repository)
        .build()
}

fn step(name: &'static str) -> Task {
    Task::new(
        name,
        FnExecution::new(name, move |ctx: RunContext| async move {
            let region = ctx.parameter("region").unwrap_or_default();
            Ok(json!({ "step": name, "region": region }))
        }),
    )
}

fn pipeline() -> Pipeline {
    let customs = TaskBranch::new("customs", FnExecution::new("customs_rule", customs_rule))
        .branch("eu", Pipeline::new([step("vat_declaration")]))
        .branch("other", Pipeline::new([step("customs_form"), step("duty_estimate")]));

    let international = Pipeline::new([Node::from(step("validate")), Node::from(customs)]);
    let domestic = Pipeline::new([step("validate"), step("ship_ground")]);

    let route = TaskBranch::new("route", FnExecution::new("route_order", route_order))
        .branch("domestic", domestic)
        .branch("international", international);

    Pipeline::new([Node::from(step("load_orders")), Node::from(route)])
}

fn region(ctx: &RunContext) -> String {
    ctx.trigger_config()
        .get("region")
        .or_else(|| ctx.argument("home_region"))
        .and_then(Value::as_str)
        .unwrap_or("us")
        .to_lowercase()
}

async fn route_order(ctx: RunContext) -> anyhow::Result<Value> {
    let region = region(&ctx);
    let home = ctx
        .argument("home_region")
        .and_then(Value::as_str)
        .unwrap_or("us");
    ctx.set_parameter("region", json!(region));

    let branch = if region == home { "domestic" } else { "international" };
    Ok(json!(branch))
}

async fn customs_rule(ctx: RunContext) -> anyhow::Result<Value> {
    let region = region(&ctx);
    let branch = if EU_REGIONS.contains(&region.as_str()) {
        "eu"
    } else {
        "other"
    };
    Ok(json!(branch))
}
