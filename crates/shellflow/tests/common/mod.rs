use std::sync::Arc;
use std::time::Duration;

use shellflow::jobs::memory::{MemoryJobStore, MemoryQueue};
use shellflow::jobs::store::{JobStore, QueueStore};
use shellflow::jobs::{
    Job, JobStatus, LifecycleManager, NewJob, Priority, ProcessSupervisor, QueueEntry, RunningJobs,
};
use uuid::Uuid;

/// Memory-backed wiring of the whole engine: the real supervisor and
/// lifecycle manager over the in-memory stores.
pub struct MemoryHarness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    pub running: RunningJobs,
}

#[allow(dead_code)]
impl MemoryHarness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryQueue::new()),
            running: RunningJobs::new(),
        }
    }

    pub fn store_dyn(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn queue_dyn(&self) -> Arc<dyn QueueStore> {
        self.queue.clone()
    }

    pub fn supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(self.store_dyn(), self.queue_dyn(), self.running.clone())
    }

    pub fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(
            self.store_dyn(),
            self.queue_dyn(),
            self.supervisor(),
            "worker-test".to_string(),
        )
    }

    /// Create a job record and push its queue entry, the way the submission
    /// side would.
    pub async fn enqueue(
        &self,
        command: &str,
        parameters: &[&str],
        priority: Priority,
        timeout_seconds: i32,
    ) -> Job {
        let job = self
            .store
            .create(NewJob {
                command: command.to_string(),
                parameters: parameters.iter().map(|s| s.to_string()).collect(),
                priority,
                timeout_seconds,
            })
            .await
            .expect("create job");

        let payload = payload_for(&job);
        self.queue
            .push_back(priority, &payload)
            .await
            .expect("push queue entry");

        job
    }

    pub async fn status_of(&self, id: Uuid) -> Option<JobStatus> {
        self.store
            .get(id)
            .await
            .expect("get job")
            .and_then(|job| job.status())
    }

    pub async fn combined_log(&self, id: Uuid) -> String {
        self.store
            .list_logs(id)
            .await
            .expect("list logs")
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }
}

#[allow(dead_code)]
pub fn payload_for(job: &Job) -> String {
    serde_json::to_string(&QueueEntry::from_job(job)).expect("serialize queue entry")
}

/// Poll until the job reaches the given status, or give up after `timeout`.
#[allow(dead_code)]
pub async fn wait_for_status(
    harness: &MemoryHarness,
    id: Uuid,
    status: JobStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if harness.status_of(id).await == Some(status) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
