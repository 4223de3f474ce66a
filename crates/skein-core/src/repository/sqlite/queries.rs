use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::rows::{collect, JobRow, JobTaskRow, TriggerRow};
use super::SqliteRepository;
use crate::error::Result;
use crate::repository::models::{
    JobFilter, JobRecord, JobTaskRecord, Page, TriggerRecord, TriggerType,
};
use crate::repository::Repository;

#[async_trait]
impl Repository for SqliteRepository {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                scheduler_name, job_id, status, start_datetime, end_datetime,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scheduler_name, job_id) DO UPDATE SET
                status = excluded.status,
                start_datetime = excluded.start_datetime,
                end_datetime = excluded.end_datetime,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.scheduler_name)
        .bind(job.job_id.to_string())
        .bind(job.status.as_str())
        .bind(job.start_datetime)
        .bind(job.end_datetime)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_job_task(&self, task: &JobTaskRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_tasks (
                scheduler_name, job_id, task_name, task_type, execution_name,
                status, start_datetime, end_datetime, exception, stack_trace,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id, task_name) DO UPDATE SET
                task_type = excluded.task_type,
                execution_name = excluded.execution_name,
                status = excluded.status,
                start_datetime = excluded.start_datetime,
                end_datetime = excluded.end_datetime,
                exception = excluded.exception,
                stack_trace = excluded.stack_trace,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&task.scheduler_name)
        .bind(task.job_id.to_string())
        .bind(&task.task_name)
        .bind(task.task_type.as_str())
        .bind(&task.execution_name)
        .bind(task.status.as_str())
        .bind(task.start_datetime)
        .bind(task.end_datetime)
        .bind(&task.exception)
        .bind(&task.stack_trace)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_trigger(&self, trigger: &TriggerRecord) -> Result<()> {
        let config_json = serde_json::to_string(&trigger.config)?;

        // Fired stays fired, inactive stays inactive.
        sqlx::query(
            r#"
            INSERT INTO triggers (
                job_id, scheduler_name, execute_datetime, config, trigger_type,
                is_trigger, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                is_trigger = (triggers.is_trigger OR excluded.is_trigger),
                is_active = (triggers.is_active AND excluded.is_active),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(trigger.job_id.to_string())
        .bind(&trigger.scheduler_name)
        .bind(trigger.execute_datetime)
        .bind(config_json)
        .bind(trigger.trigger_type.as_str())
        .bind(trigger.is_trigger)
        .bind(trigger.is_active)
        .bind(trigger.created_at)
        .bind(trigger.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_trigger_timer(&self, scheduler_name: &str) -> Result<Vec<TriggerRecord>> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT * FROM triggers
            WHERE scheduler_name = ?
              AND trigger_type = ?
              AND is_trigger = FALSE
              AND is_active = TRUE
            ORDER BY execute_datetime ASC, created_at ASC
            "#,
        )
        .bind(scheduler_name)
        .bind(TriggerType::External.as_str())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn get_one_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE job_id = ? LIMIT 1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn get_one_trigger_by_job_id(&self, job_id: Uuid) -> Result<Option<TriggerRecord>> {
        let row: Option<TriggerRow> = sqlx::query_as("SELECT * FROM triggers WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TriggerRecord::try_from).transpose()
    }

    async fn get_job_tasks_by_job_id(&self, job_id: Uuid) -> Result<Vec<JobTaskRecord>> {
        let rows: Vec<JobTaskRow> = sqlx::query_as(
            "SELECT * FROM job_tasks WHERE job_id = ? ORDER BY start_datetime ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn deactivate_trigger(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE triggers SET is_active = FALSE, updated_at = ? WHERE job_id = ? AND is_active = TRUE",
        )
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_triggers_by_config(
        &self,
        scheduler_name: &str,
        key: &str,
        value: &Value,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT * FROM triggers
            WHERE scheduler_name = ? AND is_trigger = FALSE AND is_active = TRUE
            "#,
        )
        .bind(scheduler_name)
        .fetch_all(&mut *tx)
        .await?;

        // Config is stored as JSON text, so match on the decoded map.
        let now = Utc::now();
        let mut changed = 0;
        for trigger in collect::<_, TriggerRecord>(rows)? {
            if trigger.config.get(key) != Some(value) {
                continue;
            }
            let result =
                sqlx::query("UPDATE triggers SET is_active = FALSE, updated_at = ? WHERE job_id = ?")
                    .bind(now)
                    .bind(trigger.job_id.to_string())
                    .execute(&mut *tx)
                    .await?;
            changed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn list_future_triggers(
        &self,
        scheduler_name: Option<String>,
        page: Page,
    ) -> Result<Vec<TriggerRecord>> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT * FROM triggers
            WHERE is_trigger = FALSE
              AND is_active = TRUE
              AND (?1 IS NULL OR scheduler_name = ?1)
            ORDER BY execute_datetime ASC, created_at ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(scheduler_name)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE (?1 IS NULL OR scheduler_name = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY start_datetime DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(filter.scheduler_name.as_deref())
        .bind(filter.status.map(|status| status.as_str()))
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }
}
