//! Child-process supervision: spawn, stream output, enforce the wall-clock
//! timeout, reconcile the exit.
//!
//! Each command runs in its own process group so a kill reaches the whole
//! tree, not just the immediate child. Output is captured chunk-wise from
//! stdout and stderr by two reader tasks; both are joined before the outcome
//! is reported, so every log entry is durably recorded before the lifecycle
//! manager persists a terminal status.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::jobs::store::{JobStore, QueueStore};

const READ_CHUNK_BYTES: usize = 8192;

/// Terminal outcome of one supervised execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own with a real exit code.
    Exited { exit_code: i32 },
    /// The process was terminated by a signal before producing an exit code
    /// (external kill, shutdown SIGTERM).
    Signaled,
    /// The supervisor killed the process after the wall-clock timeout fired.
    TimedOut,
    /// The process could not be started or communicated with.
    Error { message: String },
}

fn signal_group(pid: i32, signal: Signal) {
    // The child was spawned with process_group(0), so its pid is its pgid.
    let _ = killpg(Pid::from_raw(pid), signal);
}

/// Per-worker table of the processes this instance currently owns: job id to
/// process-group id. Entries are inserted at spawn and removed exactly once,
/// when the terminal outcome is determined. Never shared across instances.
#[derive(Clone, Default)]
pub struct RunningJobs {
    inner: Arc<Mutex<HashMap<Uuid, i32>>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, job_id: Uuid, pid: i32) {
        self.inner.lock().await.insert(job_id, pid);
    }

    async fn remove(&self, job_id: Uuid) {
        self.inner.lock().await.remove(&job_id);
    }

    pub async fn contains(&self, job_id: Uuid) -> bool {
        self.inner.lock().await.contains_key(&job_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Immediate-kill fast path for a single-process deployment where the
    /// cancel requester shares this table. The flag-based protocol remains
    /// the authoritative backstop; this only shortens the wait.
    pub async fn kill(&self, job_id: Uuid) -> bool {
        match self.inner.lock().await.get(&job_id) {
            Some(&pid) if pid > 0 => {
                signal_group(pid, Signal::SIGKILL);
                true
            }
            _ => false,
        }
    }

    /// Shutdown sequencing: SIGTERM every tracked process group, give each a
    /// bounded grace period to exit, then SIGKILL the stragglers. Entries
    /// disappear from the table as their supervisors observe the exits.
    pub async fn shutdown(&self, grace: Duration) {
        let targets: Vec<(Uuid, i32)> = self
            .inner
            .lock()
            .await
            .iter()
            .map(|(id, pid)| (*id, *pid))
            .collect();

        if targets.is_empty() {
            return;
        }

        for (job_id, pid) in &targets {
            println!("[shutdown] sending SIGTERM to job {job_id}");
            if *pid > 0 {
                signal_group(*pid, Signal::SIGTERM);
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.inner.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for (job_id, pid) in targets {
            if self.inner.lock().await.contains_key(&job_id) {
                println!("[shutdown] grace period expired, sending SIGKILL to job {job_id}");
                if pid > 0 {
                    signal_group(pid, Signal::SIGKILL);
                }
            }
        }
    }
}

pub struct ProcessSupervisor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueStore>,
    running: RunningJobs,
}

impl ProcessSupervisor {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn QueueStore>, running: RunningJobs) -> Self {
        Self {
            store,
            queue,
            running,
        }
    }

    pub fn running(&self) -> &RunningJobs {
        &self.running
    }

    /// Run one command to termination. Never returns an error: every failure
    /// mode collapses into a `ProcessOutcome` with a descriptive log entry
    /// already appended.
    pub async fn execute(
        &self,
        job_id: Uuid,
        command: &str,
        parameters: &[String],
        timeout: Duration,
    ) -> ProcessOutcome {
        let mut cmd = Command::new(command);
        cmd.args(parameters)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start process: {e}");
                self.record(job_id, &message).await;
                return ProcessOutcome::Error { message };
            }
        };

        let pid = child.id().map(|p| p as i32).unwrap_or(0);
        self.running.insert(job_id, pid).await;

        let stdout_task = self.spawn_reader(job_id, child.stdout.take());
        let stderr_task = self.spawn_reader(job_id, child.stderr.take());

        let outcome = tokio::select! {
            res = child.wait() => match res {
                Ok(status) => match status.code() {
                    Some(exit_code) => ProcessOutcome::Exited { exit_code },
                    None => {
                        self.record(job_id, "process terminated by signal").await;
                        ProcessOutcome::Signaled
                    }
                },
                Err(e) => {
                    let message = format!("failed waiting for process: {e}");
                    self.record(job_id, &message).await;
                    ProcessOutcome::Error { message }
                }
            },
            _ = tokio::time::sleep(timeout) => {
                if pid > 0 {
                    signal_group(pid, Signal::SIGKILL);
                }
                // Reap the killed process before reporting.
                let _ = child.wait().await;
                let message =
                    format!("process killed after exceeding {}s timeout", timeout.as_secs());
                self.record(job_id, &message).await;
                ProcessOutcome::TimedOut
            }
        };

        // Both streams hit EOF once the process is gone; joining here is what
        // guarantees the terminal status is persisted after every log entry.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        self.running.remove(job_id).await;
        outcome
    }

    fn spawn_reader<R>(&self, job_id: Uuid, reader: Option<R>) -> Option<JoinHandle<()>>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = reader?;
        let store = self.store.clone();
        let queue = self.queue.clone();

        Some(tokio::spawn(async move {
            let mut buf = [0u8; READ_CHUNK_BYTES];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                        if let Err(e) = store.append_log(job_id, &chunk, Utc::now()).await {
                            eprintln!("[supervisor] failed to record output for job {job_id}: {e:#}");
                        }
                        // Advisory only; observers may or may not be listening.
                        let _ = queue.publish_log(job_id, &chunk).await;
                    }
                    Err(e) => {
                        eprintln!("[supervisor] output stream error for job {job_id}: {e}");
                        break;
                    }
                }
            }
        }))
    }

    async fn record(&self, job_id: Uuid, message: &str) {
        if let Err(e) = self.store.append_log(job_id, message, Utc::now()).await {
            eprintln!("[supervisor] failed to record log for job {job_id}: {e:#}");
        }
        let _ = self.queue.publish_log(job_id, message).await;
    }
}
