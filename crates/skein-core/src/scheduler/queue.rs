//! Concurrency gate shared by all runs of one scheduler
//!
//! - Singleton: one run at a time
//! - Concurrent: up to `max_active_concurrent` runs at once
//!
//! Excess runs wait for a slot in arrival order. Closing the queue drops
//! the runs still waiting.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::config::{JobMode, SchedulerConfig};

/// Execution queue that enforces the configured mode.
#[derive(Debug)]
pub struct ExecutionQueue {
    mode: JobMode,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl ExecutionQueue {
    /// Create a new execution queue.
    pub fn new(mode: JobMode, max_active_concurrent: usize) -> Self {
        let capacity = match mode {
            JobMode::Singleton => 1,
            JobMode::Concurrent => max_active_concurrent.max(1),
        };
        Self {
            mode,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Queue for a scheduler configuration
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.job_mode, config.max_active_concurrent)
    }

    /// Acquire a permit to execute. Waits until a slot is available.
    ///
    /// Returns `None` once the queue has been closed.
    pub async fn acquire(&self) -> Option<QueuePermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        debug!(mode = ?self.mode, available = self.available_slots(), "Execution slot acquired");
        Some(QueuePermit { _permit: permit })
    }

    /// Stop admitting runs; waiting and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Get the queue mode.
    pub fn mode(&self) -> JobMode {
        self.mode
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of available execution slots.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of runs currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available_slots()
    }
}

/// A permit that releases the execution slot when dropped.
#[derive(Debug)]
pub struct QueuePermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests;
