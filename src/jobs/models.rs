use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a job. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Terminal status for a process that exited on its own.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate that a job status transition is allowed.
pub fn is_valid_transition(from: &JobStatus, to: &JobStatus) -> bool {
    matches!(
        (from, to),
        (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Canceled)
    )
}

/// Which output stream of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

impl std::str::FromStr for LogStream {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" | "out" => Ok(LogStream::Stdout),
            "stderr" | "err" => Ok(LogStream::Stderr),
            _ => anyhow::bail!("Invalid stream '{}'. Valid values: stdout, stderr", s),
        }
    }
}

/// Everything needed to launch one job.
#[derive(Debug, Clone)]
pub struct StartJob {
    /// Label recorded with the job (e.g. "task").
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub binary: String,
    pub log_capacity: usize,
    pub env: Vec<(String, String)>,
}

/// Returned by `start` without waiting for the process.
#[derive(Debug, Clone, Serialize)]
pub struct JobStarted {
    pub id: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub id: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub id: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Result of a stop request. Not an error: callers report it as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotFound,
    NotRunning,
}
