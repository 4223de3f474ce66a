use super::SqliteRepository;
use crate::error::Result;

const SCHEMA: &[(&str, &str)] = &[
    (
        "jobs",
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            scheduler_name TEXT NOT NULL,
            job_id TEXT NOT NULL,
            status TEXT NOT NULL,
            start_datetime TIMESTAMP NOT NULL,
            end_datetime TIMESTAMP,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (scheduler_name, job_id)
        )
        "#,
    ),
    (
        "job_tasks",
        r#"
        CREATE TABLE IF NOT EXISTS job_tasks (
            scheduler_name TEXT NOT NULL,
            job_id TEXT NOT NULL,
            task_name TEXT NOT NULL,
            task_type TEXT NOT NULL,
            execution_name TEXT NOT NULL,
            status TEXT NOT NULL,
            start_datetime TIMESTAMP NOT NULL,
            end_datetime TIMESTAMP,
            exception TEXT,
            stack_trace TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (job_id, task_name)
        )
        "#,
    ),
    (
        "triggers",
        r#"
        CREATE TABLE IF NOT EXISTS triggers (
            job_id TEXT PRIMARY KEY,
            scheduler_name TEXT NOT NULL,
            execute_datetime TIMESTAMP,
            config TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            is_trigger BOOLEAN NOT NULL DEFAULT FALSE,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    ),
    (
        "idx_jobs_job_id",
        "CREATE INDEX IF NOT EXISTS idx_jobs_job_id ON jobs(job_id)",
    ),
    (
        "idx_jobs_start",
        "CREATE INDEX IF NOT EXISTS idx_jobs_start ON jobs(start_datetime)",
    ),
    (
        "idx_triggers_pending",
        "CREATE INDEX IF NOT EXISTS idx_triggers_pending \
         ON triggers(scheduler_name, is_trigger, is_active)",
    ),
];

impl SqliteRepository {
    /// Create tables and indexes
    pub(super) async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (name, statement) in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    tracing::error!(step = *name, error = %e, "Migration failed");
                    e
                })?;
        }

        tx.commit().await?;
        Ok(())
    }
}
