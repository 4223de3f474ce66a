//! Process bootstrap: repository, registry, run loop

use super::config::AppConfig;
use crate::dags;
use anyhow::{Context, Result};
use skein_core::{
    MemoryRepository, Repository, RunContext, SchedulerConfig, SchedulerRegistry,
    SqliteRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Open the configured SQLite database, refusing the in-memory fallback.
///
/// Commands that hand work to a running `serve` process need the database
/// both processes share.
pub async fn open_shared_repository(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    if config.database.sqlite_path().is_none() {
        anyhow::bail!("No database configured; set database.path");
    }
    open_repository(config).await
}

/// Open the configured repository
pub async fn open_repository(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    match config.database.sqlite_path() {
        Some(path) => {
            let repository = SqliteRepository::from_path(path)
                .await
                .with_context(|| format!("Failed to open database at {}", path.display()))?;
            Ok(Arc::new(repository))
        }
        None => {
            warn!("No database configured; records are kept in memory only");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

/// Scheduler defaults plus process-wide logging hooks
fn base_scheduler_config(config: &AppConfig) -> SchedulerConfig {
    config
        .scheduler
        .to_scheduler_config()
        .on_success(|ctx: RunContext| async move {
            info!(
                scheduler = %ctx.scheduler_name(),
                job_id = %ctx.id(),
                trigger_type = %ctx.trigger_type(),
                "Job succeeded"
            );
            Ok(())
        })
        .on_error(|ctx: RunContext| async move {
            let error = ctx.exception().map(|e| e.message).unwrap_or_default();
            warn!(
                scheduler = %ctx.scheduler_name(),
                job_id = %ctx.id(),
                task = ?ctx.exception_task_name(),
                error = %error,
                "Job failed"
            );
            Ok(())
        })
}

/// Build the registry with every built-in scheduler
pub fn build_registry(
    config: &AppConfig,
    repository: Arc<dyn Repository>,
) -> Result<SchedulerRegistry> {
    let scheduler_config = base_scheduler_config(config);
    scheduler_config
        .validate()
        .context("Invalid scheduler defaults")?;

    let mut registry = SchedulerRegistry::new();
    dags::register_all(&mut registry, &scheduler_config, repository)
        .context("Failed to register schedulers")?;
    Ok(registry)
}

/// Run until Ctrl+C or SIGTERM
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Skein v{}", env!("CARGO_PKG_VERSION"));

    let repository = open_repository(&config).await?;
    let registry = build_registry(&config, repository)?;

    let rearmed = registry.start_all().await;
    info!(
        schedulers = ?registry.names(),
        rearmed,
        "Skein is running"
    );

    tokio::select! {
        result = wait_for_shutdown_signal() => result?,
        _ = pick_up_triggers(&registry, config.scheduler.reconcile_interval()) => {}
    }

    registry.shutdown();
    info!("Skein shutdown complete");
    Ok(())
}

/// Periodically arm triggers written by other processes. Never returns.
async fn pick_up_triggers(registry: &SchedulerRegistry, interval: Option<Duration>) {
    let Some(interval) = interval else {
        return std::future::pending().await;
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already reconciled.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match registry.reconcile_all().await {
            0 => debug!("No new triggers"),
            picked_up => info!(picked_up, "New triggers armed"),
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => info!("Received SIGTERM signal"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
