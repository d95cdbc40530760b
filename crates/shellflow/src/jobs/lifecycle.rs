//! The per-job state machine: queued -> running -> completed/failed/cancelled.
//!
//! Cancellation is observed at exactly two checkpoints, before the process
//! starts and after it exits. The requester and the worker may be different
//! processes, so the expiring flag in the queue store is the only channel
//! they share; a direct kill through the running-process table is a fast
//! path, never a requirement.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::jobs::model::{JobStatus, QueueEntry};
use crate::jobs::store::{JobStore, QueueStore};
use crate::jobs::supervisor::{ProcessOutcome, ProcessSupervisor, RunningJobs};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Reconcile the three possible terminal causes into one authoritative final
/// status. A cancellation flag observed at exit wins over everything else;
/// an exit code is recorded only when the process exited on its own.
pub fn resolve_final_status(
    outcome: &ProcessOutcome,
    cancel_requested: bool,
) -> (JobStatus, Option<i32>) {
    if cancel_requested {
        return (JobStatus::Cancelled, None);
    }

    match outcome {
        ProcessOutcome::Exited { exit_code: 0 } => (JobStatus::Completed, Some(0)),
        ProcessOutcome::Exited { exit_code } => (JobStatus::Failed, Some(*exit_code)),
        ProcessOutcome::Signaled | ProcessOutcome::TimedOut | ProcessOutcome::Error { .. } => {
            (JobStatus::Failed, None)
        }
    }
}

pub struct LifecycleManager {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueStore>,
    supervisor: ProcessSupervisor,
    worker_id: String,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueStore>,
        supervisor: ProcessSupervisor,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            queue,
            supervisor,
            worker_id,
        }
    }

    pub fn running(&self) -> &RunningJobs {
        self.supervisor.running()
    }

    /// Take one popped queue entry through the full state machine.
    ///
    /// Returns Err only for transient store failures where backing off and
    /// continuing the loop is the right reaction; every per-job failure mode
    /// resolves into a terminal status on the job itself.
    pub async fn dispatch(&self, payload: &str) -> anyhow::Result<()> {
        let entry = match serde_json::from_str::<QueueEntry>(payload) {
            Ok(entry) => entry,
            Err(err) => {
                self.handle_malformed(payload, &err.to_string()).await;
                return Ok(());
            }
        };

        if entry.command.trim().is_empty() {
            self.fail_bad_entry(entry.id, "queue entry has an empty command")
                .await;
            return Ok(());
        }

        // Duplicate delivery of a queue entry must not double-execute: skip
        // anything already owned by this worker or already past `queued`.
        if self.running().contains(entry.id).await {
            println!(
                "[{}] job {} is already running here, skipping duplicate dispatch",
                self.worker_id, entry.id
            );
            return Ok(());
        }

        let Some(job) = self.store.get(entry.id).await? else {
            eprintln!(
                "[{}] queue entry {} has no job record, dropping",
                self.worker_id, entry.id
            );
            return Ok(());
        };

        if job.status() != Some(JobStatus::Queued) {
            println!(
                "[{}] job {} is already {}, skipping duplicate dispatch",
                self.worker_id, entry.id, job.status
            );
            return Ok(());
        }

        // Pre-start checkpoint: a cancel requested before dispatch means the
        // process is never started.
        if self.queue.cancel_requested(entry.id).await? {
            if let Err(e) = self.queue.clear_cancel_flag(entry.id).await {
                eprintln!(
                    "[{}] failed to clear cancel flag for job {}: {e:#}",
                    self.worker_id, entry.id
                );
            }
            self.persist_final(entry.id, JobStatus::Cancelled, None).await;
            println!("[{}] job {} cancelled before start", self.worker_id, entry.id);
            return Ok(());
        }

        // Persist `running` before the spawn so no observer ever sees a
        // process without a durable record of it.
        let became_running = self.store.mark_running(entry.id, Utc::now()).await?;
        if !became_running {
            println!(
                "[{}] job {} left queued state concurrently, skipping",
                self.worker_id, entry.id
            );
            return Ok(());
        }

        let timeout = Duration::from_secs(entry.timeout_seconds.max(1) as u64);
        let outcome = self
            .supervisor
            .execute(entry.id, &entry.command, &entry.parameters, timeout)
            .await;

        // Post-exit checkpoint: the authoritative cancellation backstop. A
        // flag observed here wins regardless of how the process ended.
        let cancelled = match self.queue.cancel_requested(entry.id).await {
            Ok(flag) => flag,
            Err(e) => {
                eprintln!(
                    "[{}] failed to read cancel flag for job {}: {e:#}",
                    self.worker_id, entry.id
                );
                false
            }
        };
        if cancelled {
            if let Err(e) = self.queue.clear_cancel_flag(entry.id).await {
                eprintln!(
                    "[{}] failed to clear cancel flag for job {}: {e:#}",
                    self.worker_id, entry.id
                );
            }
        }

        let (status, exit_code) = resolve_final_status(&outcome, cancelled);
        self.persist_final(entry.id, status, exit_code).await;

        println!(
            "[{}] job {} finished with status {}",
            self.worker_id,
            entry.id,
            status.as_str()
        );
        Ok(())
    }

    /// A payload that does not deserialize still gets a terminal status when
    /// it carries a recognizable job id; otherwise it is dropped with an
    /// operational log line. The loop never crashes over it.
    async fn handle_malformed(&self, payload: &str, err: &str) {
        let id = serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str().map(String::from)))
            .and_then(|s| s.parse::<Uuid>().ok());

        match id {
            Some(id) => {
                self.fail_bad_entry(id, &format!("malformed queue entry: {err}"))
                    .await;
            }
            None => {
                eprintln!(
                    "[{}] dropping malformed queue entry with no job id: {err}",
                    self.worker_id
                );
            }
        }
    }

    async fn fail_bad_entry(&self, id: Uuid, reason: &str) {
        match self.store.get(id).await {
            Ok(Some(_)) => {
                if let Err(e) = self.store.append_log(id, reason, Utc::now()).await {
                    eprintln!(
                        "[{}] failed to record log for job {id}: {e:#}",
                        self.worker_id
                    );
                }
                self.persist_final(id, JobStatus::Failed, None).await;
                println!("[{}] job {id} failed: {reason}", self.worker_id);
            }
            Ok(None) => {
                eprintln!(
                    "[{}] dropping bad queue entry for unknown job {id}: {reason}",
                    self.worker_id
                );
            }
            Err(e) => {
                eprintln!(
                    "[{}] could not look up job {id} for bad entry: {e:#}",
                    self.worker_id
                );
            }
        }
    }

    /// Once a terminal status is decided it is never reversed. The write is
    /// retried a bounded number of times; after that the failure is surfaced
    /// as an operational error and the loop moves on.
    async fn persist_final(&self, id: Uuid, status: JobStatus, exit_code: Option<i32>) {
        let completed_at = Utc::now();

        for attempt in 1..=PERSIST_ATTEMPTS {
            match self
                .store
                .mark_finished(id, status, exit_code, completed_at)
                .await
            {
                Ok(()) => return,
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    eprintln!(
                        "[{}] retrying status write for job {id} (attempt {attempt}): {e:#}",
                        self.worker_id
                    );
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
                Err(e) => {
                    eprintln!(
                        "[{}] giving up on status write for job {id} after {PERSIST_ATTEMPTS} attempts: {e:#}",
                        self.worker_id
                    );
                }
            }
        }
    }
}
