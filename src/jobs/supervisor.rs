use std::collections::HashMap;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use uuid::Uuid;

use super::buffer::{LogBuffer, LogChunk};
use super::models::*;
use crate::errors::JobError;

/// Read size for the output pumps.
const PUMP_CHUNK: usize = 8 * 1024;

/// How long to keep draining pipes after the process exits. A grandchild
/// holding the pipe open must not keep the job `running` forever.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct JobRecord {
    id: String,
    pid: Option<u32>,
    command: String,
    args: Vec<String>,
    working_dir: std::path::PathBuf,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    status: JobStatus,
    /// Set once the process has been waited on; its pid may be reused.
    reaped: bool,
    stdout: LogBuffer,
    stderr: LogBuffer,
}

impl JobRecord {
    fn buffer(&self, stream: LogStream) -> &LogBuffer {
        match stream {
            LogStream::Stdout => &self.stdout,
            LogStream::Stderr => &self.stderr,
        }
    }

    fn buffer_mut(&mut self, stream: LogStream) -> &mut LogBuffer {
        match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        }
    }

    /// Pid to signal, or `None` once the process has been reaped.
    fn signal_target(&self) -> Option<Pid> {
        if self.reaped {
            return None;
        }
        self.pid.map(|pid| Pid::from_raw(pid as i32))
    }

    /// Move to a terminal status. Ignored once the job is terminal.
    fn finish(&mut self, to: JobStatus) -> bool {
        if !is_valid_transition(&self.status, &to) {
            return false;
        }
        self.status = to;
        self.finished_at = Some(Utc::now());
        true
    }

    fn report(&self) -> JobStatusReport {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        let elapsed_secs = (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        JobStatusReport {
            id: self.id.clone(),
            status: self.status,
            exit_code: self.exit_code,
            pid: self.pid,
            command: self.command.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            elapsed_secs,
        }
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, JobRecord>,
    /// The concurrency slot: id of the one job allowed to run.
    running: Option<String>,
}

impl Registry {
    fn release_slot(&mut self, id: &str) {
        if self.running.as_deref() == Some(id) {
            self.running = None;
        }
    }
}

/// Owns every job and the single running slot.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct JobSupervisor {
    registry: Arc<Mutex<Registry>>,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>, JobError> {
        self.registry.lock().map_err(|_| JobError::LockPoisoned)
    }

    /// Spawn a job unless another one is running. Returns without waiting
    /// for the process.
    ///
    /// A spawn failure does not fail the call: the error is written to the
    /// job's stderr and the job is recorded as `failed`.
    pub fn start(&self, req: StartJob) -> Result<JobStarted, JobError> {
        let mut guard = self.lock()?;
        let reg = &mut *guard;
        if let Some(running) = &reg.running {
            return Err(JobError::Busy {
                running: running.clone(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut record = JobRecord {
            id: id.clone(),
            pid: None,
            command: req.command.clone(),
            args: req.args.clone(),
            working_dir: req.working_dir.clone(),
            started_at,
            finished_at: None,
            exit_code: None,
            status: JobStatus::Running,
            reaped: false,
            stdout: LogBuffer::new(req.log_capacity),
            stderr: LogBuffer::new(req.log_capacity),
        };

        let mut cmd = Command::new(&req.binary);
        cmd.args(&req.args)
            .current_dir(&req.working_dir)
            .envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                record.pid = pid;
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();
                reg.jobs.insert(id.clone(), record);
                reg.running = Some(id.clone());
                drop(guard);

                tracing::info!(job_id = %id, ?pid, binary = %req.binary, "job started");
                tokio::spawn(supervise(
                    Arc::clone(&self.registry),
                    id.clone(),
                    child,
                    stdout,
                    stderr,
                ));
                Ok(JobStarted {
                    id,
                    pid,
                    started_at,
                })
            }
            Err(e) => {
                tracing::warn!(job_id = %id, binary = %req.binary, error = %e, "job spawn failed");
                record
                    .stderr
                    .append(format!("Failed to spawn {}: {}\n", req.binary, e).as_bytes());
                record.finish(JobStatus::Failed);
                reg.jobs.insert(id.clone(), record);
                Ok(JobStarted {
                    id,
                    pid: None,
                    started_at,
                })
            }
        }
    }

    pub fn status(&self, id: &str) -> Result<JobStatusReport, JobError> {
        let reg = self.lock()?;
        reg.jobs
            .get(id)
            .map(JobRecord::report)
            .ok_or_else(|| not_found(id))
    }

    /// Incremental read of one stream, for polling tails.
    pub fn stream_logs(
        &self,
        id: &str,
        stream: LogStream,
        offset: usize,
        max_bytes: usize,
    ) -> Result<LogChunk, JobError> {
        let reg = self.lock()?;
        let job = reg.jobs.get(id).ok_or_else(|| not_found(id))?;
        Ok(job.buffer(stream).read(offset, max_bytes))
    }

    /// Everything captured so far. Partial while the job still runs.
    pub fn output(&self, id: &str) -> Result<JobOutput, JobError> {
        let reg = self.lock()?;
        let job = reg.jobs.get(id).ok_or_else(|| not_found(id))?;
        Ok(JobOutput {
            id: job.id.clone(),
            status: job.status,
            exit_code: job.exit_code,
            stdout: job.stdout.to_string_lossy(),
            stderr: job.stderr.to_string_lossy(),
        })
    }

    /// Signal a running job and mark it canceled right away.
    ///
    /// The slot is freed before the OS has reaped the process; poll `status`
    /// if confirmation of death matters.
    pub fn stop(&self, id: &str, signal: Signal) -> Result<StopOutcome, JobError> {
        let mut guard = self.lock()?;
        let reg = &mut *guard;
        let Some(job) = reg.jobs.get_mut(id) else {
            return Ok(StopOutcome::NotFound);
        };
        if job.status != JobStatus::Running {
            return Ok(StopOutcome::NotRunning);
        }

        if let Some(pid) = job.signal_target() {
            if let Err(e) = kill(pid, signal) {
                tracing::warn!(job_id = %id, %pid, %signal, error = %e, "failed to signal job");
            }
        }
        job.finish(JobStatus::Canceled);
        reg.release_slot(id);
        tracing::info!(job_id = %id, %signal, "job canceled");
        Ok(StopOutcome::Stopped)
    }

    pub fn running_id(&self) -> Result<Option<String>, JobError> {
        Ok(self.lock()?.running.clone())
    }

    /// All known jobs, newest first.
    pub fn list(&self) -> Result<Vec<JobStatusReport>, JobError> {
        let reg = self.lock()?;
        let mut jobs: Vec<_> = reg.jobs.values().map(JobRecord::report).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    /// Terminate the running job, if any, on server shutdown.
    pub fn shutdown(&self) {
        let running = match self.running_id() {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(error = %e, "cannot inspect running job on shutdown");
                return;
            }
        };
        if let Some(id) = running {
            tracing::info!(job_id = %id, "stopping running job for shutdown");
            if let Err(e) = self.stop(&id, Signal::SIGTERM) {
                tracing::warn!(job_id = %id, error = %e, "failed to stop job on shutdown");
            }
        }
    }
}

fn not_found(id: &str) -> JobError {
    JobError::NotFound { id: id.to_string() }
}

/// Parse a signal name such as `SIGTERM`, `term` or `kill`.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&full).map_err(|_| anyhow::anyhow!("Unknown signal '{}'", name))
}

async fn supervise(
    registry: Arc<Mutex<Registry>>,
    id: String,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
) {
    let pumps: Vec<_> = [
        stdout.map(|s| tokio::spawn(pump(Arc::clone(&registry), id.clone(), LogStream::Stdout, s))),
        stderr.map(|s| tokio::spawn(pump(Arc::clone(&registry), id.clone(), LogStream::Stderr, s))),
    ]
    .into_iter()
    .flatten()
    .collect();

    let waited = child.wait().await;
    if let Ok(mut reg) = registry.lock()
        && let Some(job) = reg.jobs.get_mut(&id)
    {
        job.reaped = true;
    }

    let deadline = Instant::now() + PIPE_DRAIN_TIMEOUT;
    for mut handle in pumps {
        if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
            tracing::debug!(job_id = %id, "output pipe still open after exit, closing it");
            handle.abort();
            let _ = handle.await;
        }
    }

    let Ok(mut guard) = registry.lock() else {
        tracing::warn!(job_id = %id, "registry lock poisoned, cannot record exit");
        return;
    };
    let reg = &mut *guard;
    if let Some(job) = reg.jobs.get_mut(&id) {
        match waited {
            Ok(status) => {
                job.exit_code = status.code();
                let next = JobStatus::from_exit_code(status.code());
                if job.finish(next) {
                    tracing::info!(job_id = %id, exit_code = ?status.code(), status = %next, "job finished");
                }
            }
            Err(e) => {
                job.stderr
                    .append(format!("Failed to wait for process: {}\n", e).as_bytes());
                job.finish(JobStatus::Failed);
                tracing::warn!(job_id = %id, error = %e, "job wait failed");
            }
        }
    }
    reg.release_slot(&id);
}

async fn pump<R: AsyncRead + Unpin>(
    registry: Arc<Mutex<Registry>>,
    id: String,
    stream: LogStream,
    mut reader: R,
) {
    let mut buf = vec![0u8; PUMP_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(job_id = %id, ?stream, error = %e, "output read failed");
                break;
            }
        };
        let Ok(mut reg) = registry.lock() else {
            break;
        };
        // Buffers are frozen once the job is terminal.
        match reg.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.buffer_mut(stream).append(&buf[..n]);
            }
            _ => break,
        }
    }
}
