//! In-memory repository

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{JobFilter, JobRecord, JobTaskRecord, Page, TriggerRecord, TriggerType};
use super::Repository;
use crate::error::Result;

/// Repository backed by process-local maps.
///
/// Records do not survive a restart, so future triggers stored here are
/// only re-armed within the same process.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    jobs: RwLock<HashMap<(String, Uuid), JobRecord>>,
    tasks: RwLock<HashMap<(Uuid, String), JobTaskRecord>>,
    triggers: RwLock<HashMap<Uuid, TriggerRecord>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored triggers
    pub async fn trigger_count(&self) -> usize {
        self.triggers.read().await.len()
    }

    /// Number of stored jobs
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

fn sort_by_schedule(triggers: &mut [TriggerRecord]) {
    triggers.sort_by(|a, b| {
        a.execute_datetime
            .cmp(&b.execute_datetime)
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.entry((job.scheduler_name.clone(), job.job_id))
            .and_modify(|existing| existing.merge(job))
            .or_insert_with(|| job.clone());
        Ok(())
    }

    async fn upsert_job_task(&self, task: &JobTaskRecord) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks
            .entry((task.job_id, task.task_name.clone()))
            .and_modify(|existing| existing.merge(task))
            .or_insert_with(|| task.clone());
        Ok(())
    }

    async fn upsert_trigger(&self, trigger: &TriggerRecord) -> Result<()> {
        let mut triggers = self.triggers.write().await;
        triggers
            .entry(trigger.job_id)
            .and_modify(|existing| existing.merge(trigger))
            .or_insert_with(|| trigger.clone());
        Ok(())
    }

    async fn get_trigger_timer(&self, scheduler_name: &str) -> Result<Vec<TriggerRecord>> {
        let triggers = self.triggers.read().await;
        let mut pending: Vec<_> = triggers
            .values()
            .filter(|t| {
                t.scheduler_name == scheduler_name
                    && t.trigger_type == TriggerType::External
                    && t.is_pending()
            })
            .cloned()
            .collect();
        sort_by_schedule(&mut pending);
        Ok(pending)
    }

    async fn get_one_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().find(|job| job.job_id == job_id).cloned())
    }

    async fn get_one_trigger_by_job_id(&self, job_id: Uuid) -> Result<Option<TriggerRecord>> {
        Ok(self.triggers.read().await.get(&job_id).cloned())
    }

    async fn get_job_tasks_by_job_id(&self, job_id: Uuid) -> Result<Vec<JobTaskRecord>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<_> = tasks
            .values()
            .filter(|task| task.job_id == job_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start_datetime.cmp(&b.start_datetime));
        Ok(found)
    }

    async fn deactivate_trigger(&self, job_id: Uuid) -> Result<bool> {
        let mut triggers = self.triggers.write().await;
        match triggers.get_mut(&job_id) {
            Some(trigger) if trigger.is_active => {
                trigger.is_active = false;
                trigger.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_triggers_by_config(
        &self,
        scheduler_name: &str,
        key: &str,
        value: &Value,
    ) -> Result<u64> {
        let now = chrono::Utc::now();
        let mut triggers = self.triggers.write().await;
        let mut changed = 0;
        for trigger in triggers.values_mut() {
            if trigger.scheduler_name == scheduler_name
                && trigger.is_pending()
                && trigger.config.get(key) == Some(value)
            {
                trigger.is_active = false;
                trigger.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_future_triggers(
        &self,
        scheduler_name: Option<String>,
        page: Page,
    ) -> Result<Vec<TriggerRecord>> {
        let triggers = self.triggers.read().await;
        let mut pending: Vec<_> = triggers
            .values()
            .filter(|t| t.is_pending())
            .filter(|t| {
                scheduler_name
                    .as_deref()
                    .is_none_or(|name| name == t.scheduler_name)
            })
            .cloned()
            .collect();
        sort_by_schedule(&mut pending);
        Ok(paginate(pending, page))
    }

    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<JobRecord>> {
        let jobs = self.jobs.read().await;
        let mut found: Vec<_> = jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.start_datetime.cmp(&a.start_datetime));
        Ok(paginate(found, page))
    }
}
