//! Registry of the process's schedulers
//!
//! Owned by the process bootstrap and handed to whatever needs name-based
//! lookup; there is no global instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use super::instance::{SchedulerInstance, SchedulerSnapshot};
use crate::error::{Error, Result};

/// Schedulers keyed by unique name
#[derive(Debug, Default)]
pub struct SchedulerRegistry {
    schedulers: BTreeMap<String, Arc<SchedulerInstance>>,
}

impl SchedulerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scheduler. Names must be unique.
    pub fn register(&mut self, scheduler: Arc<SchedulerInstance>) -> Result<()> {
        let name = scheduler.name().to_string();
        if self.schedulers.contains_key(&name) {
            return Err(Error::DuplicateScheduler(name));
        }
        self.schedulers.insert(name, scheduler);
        Ok(())
    }

    /// Scheduler by name
    pub fn get(&self, name: &str) -> Result<&Arc<SchedulerInstance>> {
        self.schedulers
            .get(name)
            .ok_or_else(|| Error::SchedulerNotFound(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.schedulers.keys().map(String::as_str).collect()
    }

    /// Iterate schedulers in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SchedulerInstance>> {
        self.schedulers.values()
    }

    /// Number of schedulers
    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    /// Whether no scheduler is registered
    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    /// Snapshots of every scheduler
    pub fn snapshots(&self) -> Vec<SchedulerSnapshot> {
        self.iter().map(|s| s.snapshot()).collect()
    }

    /// Start every scheduler and re-arm its pending triggers.
    ///
    /// A scheduler whose triggers cannot be loaded still starts; the error
    /// is logged. Returns the number of triggers re-armed.
    pub async fn start_all(&self) -> usize {
        for scheduler in self.iter() {
            scheduler.start();
        }
        let rearmed = self.reconcile_all().await;
        info!(schedulers = self.len(), rearmed, "Schedulers started");
        rearmed
    }

    /// Re-arm pending triggers on every scheduler.
    ///
    /// Picks up triggers written to the repository by another process.
    /// Triggers already armed here are skipped. Returns how many were newly
    /// dispatched or armed.
    pub async fn reconcile_all(&self) -> usize {
        let mut rearmed = 0;
        for scheduler in self.iter() {
            match scheduler.reconcile().await {
                Ok(count) => rearmed += count,
                Err(e) => error!(
                    scheduler = %scheduler.name(),
                    error = %e,
                    "Failed to re-arm pending triggers"
                ),
            }
        }
        rearmed
    }

    /// Shut every scheduler down for process exit
    pub fn shutdown(&self) {
        for scheduler in self.iter() {
            scheduler.shutdown();
        }
        info!(schedulers = self.len(), "Schedulers shut down");
    }
}
