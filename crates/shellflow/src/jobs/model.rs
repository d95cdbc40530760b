use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub command: String,
    pub parameters: Vec<String>,
    pub priority: String,
    pub timeout_seconds: i32,
    pub status: String,
    pub exit_code: Option<i32>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// completed / failed / cancelled accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status(),
            Some(JobStatus::Completed) | Some(JobStatus::Failed) | Some(JobStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub command: String,
    pub parameters: Vec<String>,
    pub priority: Priority,
    pub timeout_seconds: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Tier precedence is fixed: high is always drained before medium, medium
/// before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn queue_key(&self) -> String {
        format!("jobqueue:{}", self.as_str())
    }
}

/// Serialized snapshot of a job's dispatch-relevant fields, pushed into one
/// priority tier at submission time and popped exactly once by a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub timeout_seconds: i32,
    pub priority: String,
}

impl QueueEntry {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id,
            command: job.command.clone(),
            parameters: job.parameters.clone(),
            timeout_seconds: job.timeout_seconds,
            priority: job.priority.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LogEntry {
    pub job_id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time status counts, served by the admin /metrics endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}
