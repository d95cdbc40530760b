//! Interfaces to the two external stores the worker consumes: the durable
//! job record store and the priority queue / flag store. Production backends
//! are Postgres (`PgJobStore`) and Redis (`RedisQueue`); the in-memory
//! implementations back the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::jobs::model::{Job, JobStatus, LogEntry, NewJob, Priority, StatusCounts};

/// Durable, keyed storage for job metadata plus append-only log lines.
///
/// Every status write is a full-field update keyed by job id and is safe to
/// retry; the persisted record is the single source of truth across worker
/// instances.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> anyhow::Result<Job>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Job>>;

    async fn list(&self, status: Option<JobStatus>, limit: i64) -> anyhow::Result<Vec<Job>>;

    /// queued -> running. Returns false when the job is no longer in `queued`
    /// (duplicate delivery, already terminal), in which case nothing was
    /// written.
    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Transition to a terminal status. `exit_code` is only present when the
    /// process exited on its own.
    async fn mark_finished(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i32>,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Append one captured output chunk. Entries are immutable once written.
    async fn append_log(
        &self,
        id: Uuid,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Ascending by timestamp, replay order.
    async fn list_logs(&self, id: Uuid) -> anyhow::Result<Vec<LogEntry>>;

    async fn status_counts(&self) -> anyhow::Result<StatusCounts>;
}

/// One ordered list per priority tier (FIFO within a tier, atomic pop), plus
/// an expiring-key store used for cancellation signaling and an advisory
/// publish channel for live log observers.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn push_back(&self, priority: Priority, payload: &str) -> anyhow::Result<()>;

    /// Pop the next entry, highest tier first. Each tier is drained before a
    /// lower tier is even checked. Returns the raw payload; the caller owns
    /// deserialization so a malformed entry can be failed without crashing
    /// the loop.
    async fn pop_next(&self) -> anyhow::Result<Option<String>>;

    /// Request cancellation of a job. The flag expires after `ttl_secs` so an
    /// unconsumed flag cannot leak forever.
    async fn set_cancel_flag(&self, id: Uuid, ttl_secs: u64) -> anyhow::Result<()>;

    async fn cancel_requested(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn clear_cancel_flag(&self, id: Uuid) -> anyhow::Result<()>;

    /// Fire-and-forget emit to live observers of `log:<job id>`. No delivery
    /// guarantee; failures here never affect the job.
    async fn publish_log(&self, id: Uuid, message: &str) -> anyhow::Result<()>;
}
