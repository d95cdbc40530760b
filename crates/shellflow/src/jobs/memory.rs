//! In-memory implementations of the two store interfaces. They back the
//! integration tests so the engine's state machine can be exercised without
//! a live Postgres or Redis, and they double as a reference for the
//! semantics each backend must provide.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::jobs::model::{Job, JobStatus, LogEntry, NewJob, Priority, StatusCounts};
use crate::jobs::store::{JobStore, QueueStore};

/// Every write the store performs, in order. Tests use this to assert that
/// the terminal status write lands only after all log appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Created(Uuid),
    MarkedRunning(Uuid),
    LogAppended(Uuid),
    Finished(Uuid, JobStatus),
}

#[derive(Default)]
struct JobStoreInner {
    jobs: HashMap<Uuid, Job>,
    logs: Vec<LogEntry>,
    ops: Vec<WriteOp>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<JobStoreInner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write_ops(&self) -> Vec<WriteOp> {
        self.inner.lock().await.ops.clone()
    }

    pub async fn mark_running_count(&self, id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .ops
            .iter()
            .filter(|op| matches!(op, WriteOp::MarkedRunning(op_id) if *op_id == id))
            .count()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> anyhow::Result<Job> {
        let mut inner = self.inner.lock().await;
        let created = Job {
            id: Uuid::new_v4(),
            command: job.command,
            parameters: job.parameters,
            priority: job.priority.as_str().to_string(),
            timeout_seconds: job.timeout_seconds,
            status: JobStatus::Queued.as_str().to_string(),
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        inner.jobs.insert(created.id, created.clone());
        inner.ops.push(WriteOp::Created(created.id));
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn list(&self, status: Option<JobStatus>, limit: i64) -> anyhow::Result<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| status.map_or(true, |st| j.status == st.as_str()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.clamp(1, 500) as usize);
        Ok(rows)
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Queued.as_str() {
            return Ok(false);
        }
        job.status = JobStatus::Running.as_str().to_string();
        job.started_at = Some(started_at);
        inner.ops.push(WriteOp::MarkedRunning(id));
        Ok(true)
    }

    async fn mark_finished(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i32>,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.status = status.as_str().to_string();
            job.exit_code = exit_code;
            job.completed_at = Some(completed_at);
        }
        inner.ops.push(WriteOp::Finished(id, status));
        Ok(())
    }

    async fn append_log(
        &self,
        id: Uuid,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.logs.push(LogEntry {
            job_id: id,
            message: message.to_string(),
            timestamp,
        });
        inner.ops.push(WriteOp::LogAppended(id));
        Ok(())
    }

    async fn list_logs(&self, id: Uuid) -> anyhow::Result<Vec<LogEntry>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<LogEntry> = inner
            .logs
            .iter()
            .filter(|l| l.job_id == id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(rows)
    }

    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for job in inner.jobs.values() {
            match job.status() {
                Some(JobStatus::Queued) => counts.queued += 1,
                Some(JobStatus::Running) => counts.running += 1,
                Some(JobStatus::Completed) => counts.completed += 1,
                Some(JobStatus::Failed) => counts.failed += 1,
                Some(JobStatus::Cancelled) => counts.cancelled += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[derive(Default)]
struct QueueInner {
    tiers: HashMap<Priority, VecDeque<String>>,
    flags: HashMap<Uuid, Instant>,
    published: Vec<(Uuid, String)>,
    fail_pops: u32,
}

#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<QueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` pops return an error, for exercising the consumer
    /// loop's error backoff.
    pub async fn fail_next_pops(&self, n: u32) {
        self.inner.lock().await.fail_pops = n;
    }

    pub async fn published(&self) -> Vec<(Uuid, String)> {
        self.inner.lock().await.published.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.tiers.values().all(|t| t.is_empty())
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn push_back(&self, priority: Priority, payload: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .tiers
            .entry(priority)
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn pop_next(&self) -> anyhow::Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        if inner.fail_pops > 0 {
            inner.fail_pops -= 1;
            anyhow::bail!("injected queue failure");
        }
        for priority in Priority::ALL {
            if let Some(payload) = inner.tiers.get_mut(&priority).and_then(|t| t.pop_front()) {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    async fn set_cancel_flag(&self, id: Uuid, ttl_secs: u64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .flags
            .insert(id, Instant::now() + Duration::from_secs(ttl_secs));
        Ok(())
    }

    async fn cancel_requested(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.flags.get(&id).copied() {
            Some(expires) if expires > Instant::now() => Ok(true),
            Some(_) => {
                inner.flags.remove(&id);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn clear_cancel_flag(&self, id: Uuid) -> anyhow::Result<()> {
        self.inner.lock().await.flags.remove(&id);
        Ok(())
    }

    async fn publish_log(&self, id: Uuid, message: &str) -> anyhow::Result<()> {
        self.inner
            .lock()
            .await
            .published
            .push((id, message.to_string()));
        Ok(())
    }
}
