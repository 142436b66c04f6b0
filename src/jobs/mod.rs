//! Agent job execution.
//!
//! ```text
//! request ──> sanitize.rs (ArgPolicy) ──> supervisor.rs (JobSupervisor)
//!                                               │ spawn, no shell
//!                                               v
//!                                        agent CLI process
//!                                          │ stdout  │ stderr
//!                                          v         v
//!                                   buffer.rs (LogBuffer, one per stream)
//! ```
//!
//! At most one job runs at a time. Status, log tails and output are read
//! from in-memory state; nothing survives a restart.

pub mod buffer;
pub mod models;
pub mod sanitize;
pub mod supervisor;

pub use buffer::{LogBuffer, LogChunk};
pub use models::{
    JobOutput, JobStarted, JobStatus, JobStatusReport, LogStream, StartJob, StopOutcome,
};
pub use sanitize::{ArgPolicy, sanitize_args};
pub use supervisor::{JobSupervisor, parse_signal};

/// Compose the agent argument vector for a task.
///
/// Order: configured default args, then `-p <prompt>` when a prompt is given,
/// then caller-supplied args.
pub fn build_task_args(
    prompt: Option<&str>,
    default_args: &[String],
    extra: &[String],
) -> Vec<String> {
    let mut args = default_args.to_vec();
    if let Some(prompt) = prompt.map(str::trim).filter(|p| !p.is_empty()) {
        args.push("-p".to_string());
        args.push(prompt.to_string());
    }
    args.extend(extra.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_task_args_order() {
        let defaults = vec!["--output-format".to_string(), "stream-json".to_string()];
        let extra = vec!["--model".to_string(), "sonnet".to_string()];
        let args = build_task_args(Some("build a landing page"), &defaults, &extra);
        assert_eq!(
            args,
            vec![
                "--output-format",
                "stream-json",
                "-p",
                "build a landing page",
                "--model",
                "sonnet"
            ]
        );
    }

    #[test]
    fn test_build_task_args_skips_blank_prompt() {
        let args = build_task_args(Some("   "), &[], &["--verbose".to_string()]);
        assert_eq!(args, vec!["--verbose"]);
    }
}
