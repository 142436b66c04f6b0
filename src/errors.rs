//! Typed error hierarchy for the gateway.
//!
//! Three top-level enums cover the three subsystems:
//! - `JobError`: job registry and process supervisor failures
//! - `SanitizeError`: rejected command-line tokens
//! - `PublishError`: branch publishing failures

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the job registry.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Another job is already running ({running})")]
    Busy { running: String },

    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error("Job registry lock poisoned")]
    LockPoisoned,
}

/// Errors from argument validation. Raised before any subprocess is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("Unsafe token '{token}': contains a shell metacharacter")]
    UnsafeToken { token: String },

    #[error("Flag '{flag}' is not in the allowed flag list")]
    FlagNotAllowed { flag: String },

    #[error("Flag '{flag}' is disallowed (interactive mode)")]
    FlagDisallowed { flag: String },
}

impl SanitizeError {
    /// The token that caused the rejection.
    pub fn token(&self) -> &str {
        match self {
            SanitizeError::UnsafeToken { token } => token,
            SanitizeError::FlagNotAllowed { flag } | SanitizeError::FlagDisallowed { flag } => flag,
        }
    }
}

/// Errors from the branch publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish target {target} escapes preview root {root}")]
    PathEscape { target: PathBuf, root: PathBuf },

    #[error("Git error: {0}")]
    Git(String),

    #[error("'{branch}' is not a local branch")]
    UnknownBranch { branch: String },

    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PublishError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<git2::Error> for PublishError {
    fn from(e: git2::Error) -> Self {
        PublishError::Git(e.message().to_string())
    }
}
