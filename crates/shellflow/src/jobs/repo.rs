// crates/shellflow/src/jobs/repo.rs

use crate::jobs::model::{Job, JobStatus, LogEntry, NewJob, StatusCounts};
use crate::jobs::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> anyhow::Result<Job> {
        let rec = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (command, parameters, priority, timeout_seconds, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&job.command)
        .bind(&job.parameters)
        .bind(job.priority.as_str())
        .bind(job.timeout_seconds)
        .bind(JobStatus::Queued.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(rec)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list(&self, status: Option<JobStatus>, limit: i64) -> anyhow::Result<Vec<Job>> {
        let limit = limit.clamp(1, 500);

        let rows = match status {
            Some(st) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE status = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(st.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> anyhow::Result<bool> {
        // The status guard makes duplicate delivery of the same queue entry a
        // no-op: only a job still in `queued` can move to `running`.
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                started_at = $3
            WHERE id = $1
              AND status = $4
            "#,
        )
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(started_at)
        .bind(JobStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn mark_finished(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i32>,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                exit_code = $3,
                completed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(exit_code)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_log(
        &self,
        id: Uuid,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, message, timestamp)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(message)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_logs(&self, id: Uuid) -> anyhow::Result<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogEntry>(
            r#"
            SELECT job_id, message, timestamp
            FROM job_logs
            WHERE job_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        let mut counts = StatusCounts::default();

        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;

            match status {
                JobStatus::Queued => counts.queued = n,
                JobStatus::Running => counts.running = n,
                JobStatus::Completed => counts.completed = n,
                JobStatus::Failed => counts.failed = n,
                JobStatus::Cancelled => counts.cancelled = n,
            }
        }

        Ok(counts)
    }
}
