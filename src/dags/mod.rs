//! Built-in pipelines
//!
//! Each module builds one scheduler. [`register_all`] wires them into a
//! registry with the process-wide defaults and repository.

mod adhoc_export;
mod daily_report;
mod disk_usage;
mod order_routing;

use skein_core::{Repository, SchedulerConfig, SchedulerRegistry};
use std::sync::Arc;

/// Build and register every built-in scheduler
pub fn register_all(
    registry: &mut SchedulerRegistry,
    config: &SchedulerConfig,
    repository: Arc<dyn Repository>,
) -> skein_core::Result<()> {
    registry.register(daily_report::scheduler(config.clone(), repository.clone())?)?;
    registry.register(order_routing::scheduler(config.clone(), repository.clone())?)?;
    registry.register(disk_usage::scheduler(config.clone(), repository.clone())?)?;
    registry.register(adhoc_export::scheduler(config.clone(), repository)?)?;
    Ok(())
}
