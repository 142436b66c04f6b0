//! Argument validation for the agent CLI.
//!
//! The binary is spawned directly with an argument vector, never through a
//! shell. Tokens are still screened for shell metacharacters, and flags must
//! come from a fixed allowlist minus the interactive-mode denylist.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::SanitizeError;

/// Characters that are never accepted in any token.
pub const SHELL_METACHARACTERS: &[char] = &['`', '|', ';', '&', '<', '>', '$', '\\'];

/// Flags the agent CLI accepts in headless mode.
pub const DEFAULT_ALLOWED_FLAGS: &[&str] = &[
    "-p",
    "--print",
    "--output-format",
    "--input-format",
    "--model",
    "--fallback-model",
    "--max-turns",
    "--verbose",
    "--debug",
    "--allowedTools",
    "--allowed-tools",
    "--disallowedTools",
    "--disallowed-tools",
    "--append-system-prompt",
    "--system-prompt",
    "--permission-mode",
    "--dangerously-skip-permissions",
    "--add-dir",
    "--mcp-config",
];

/// Flags that open an interactive session or reattach to an old one.
pub const DEFAULT_DENIED_FLAGS: &[&str] = &[
    "-c",
    "--continue",
    "-r",
    "--resume",
    "-i",
    "--interactive",
    "--ide",
];

/// Allow/deny sets used by [`sanitize_args`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgPolicy {
    pub allowed_flags: BTreeSet<String>,
    pub denied_flags: BTreeSet<String>,
}

impl Default for ArgPolicy {
    fn default() -> Self {
        Self {
            allowed_flags: DEFAULT_ALLOWED_FLAGS.iter().map(|f| f.to_string()).collect(),
            denied_flags: DEFAULT_DENIED_FLAGS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl ArgPolicy {
    /// Build a policy from optional overrides, falling back to the defaults.
    pub fn from_lists(allowed: Option<&[String]>, denied: Option<&[String]>) -> Self {
        let defaults = Self::default();
        Self {
            allowed_flags: allowed
                .map(|list| list.iter().cloned().collect())
                .unwrap_or(defaults.allowed_flags),
            denied_flags: denied
                .map(|list| list.iter().cloned().collect())
                .unwrap_or(defaults.denied_flags),
        }
    }

    fn check(&self, token: &str) -> Result<(), SanitizeError> {
        if token.contains(SHELL_METACHARACTERS) {
            return Err(SanitizeError::UnsafeToken {
                token: token.to_string(),
            });
        }

        if !token.starts_with('-') {
            return Ok(());
        }

        // `--model=opus` is judged by its flag name
        let flag = token.split_once('=').map_or(token, |(name, _)| name);
        if self.denied_flags.contains(flag) {
            return Err(SanitizeError::FlagDisallowed {
                flag: flag.to_string(),
            });
        }
        if !self.allowed_flags.contains(flag) {
            return Err(SanitizeError::FlagNotAllowed {
                flag: flag.to_string(),
            });
        }
        Ok(())
    }
}

/// Validate every token; returns them unchanged and in order when all pass.
pub fn sanitize_args<S: AsRef<str>>(
    policy: &ArgPolicy,
    tokens: &[S],
) -> Result<Vec<String>, SanitizeError> {
    tokens
        .iter()
        .map(|t| {
            let t = t.as_ref();
            policy.check(t).map(|_| t.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowlisted_flags_and_text() {
        let policy = ArgPolicy::default();
        let args = [
            "-p",
            "Add a contact page with a form",
            "--output-format",
            "stream-json",
            "--verbose",
        ];
        let out = sanitize_args(&policy, &args).unwrap();
        assert_eq!(out, args);
    }

    #[test]
    fn test_every_default_allowed_flag_passes() {
        let policy = ArgPolicy::default();
        for flag in DEFAULT_ALLOWED_FLAGS {
            assert!(sanitize_args(&policy, &[flag]).is_ok(), "{} rejected", flag);
        }
    }

    #[test]
    fn test_rejects_injection_token() {
        let policy = ArgPolicy::default();
        let err = sanitize_args(&policy, &["-p", "; rm -rf /"]).unwrap_err();
        assert_eq!(
            err,
            SanitizeError::UnsafeToken {
                token: "; rm -rf /".into()
            }
        );
    }

    #[test]
    fn test_rejects_each_metacharacter() {
        let policy = ArgPolicy::default();
        for c in SHELL_METACHARACTERS {
            let token = format!("hello{}world", c);
            let err = sanitize_args(&policy, &[token.as_str()]).unwrap_err();
            assert!(matches!(err, SanitizeError::UnsafeToken { .. }), "{} accepted", c);
        }
    }

    #[test]
    fn test_rejects_unknown_flag() {
        let policy = ArgPolicy::default();
        let err = sanitize_args(&policy, &["--exec"]).unwrap_err();
        assert_eq!(err, SanitizeError::FlagNotAllowed { flag: "--exec".into() });
    }

    #[test]
    fn test_denylist_wins_over_allowlist() {
        let mut policy = ArgPolicy::default();
        policy.allowed_flags.insert("--resume".to_string());
        let err = sanitize_args(&policy, &["--resume"]).unwrap_err();
        assert_eq!(err, SanitizeError::FlagDisallowed { flag: "--resume".into() });
    }

    #[test]
    fn test_every_default_denied_flag_rejected() {
        let policy = ArgPolicy::default();
        for flag in DEFAULT_DENIED_FLAGS {
            let err = sanitize_args(&policy, &[flag]).unwrap_err();
            assert!(matches!(err, SanitizeError::FlagDisallowed { .. }));
        }
    }

    #[test]
    fn test_flag_with_inline_value() {
        let policy = ArgPolicy::default();
        assert!(sanitize_args(&policy, &["--model=sonnet"]).is_ok());
        let err = sanitize_args(&policy, &["--continue=yes"]).unwrap_err();
        assert_eq!(err, SanitizeError::FlagDisallowed { flag: "--continue".into() });
    }

    #[test]
    fn test_first_offending_token_reported() {
        let policy = ArgPolicy::default();
        let err = sanitize_args(&policy, &["ok", "--bogus", "a|b"]).unwrap_err();
        assert_eq!(err.token(), "--bogus");
    }

    #[test]
    fn test_empty_args() {
        let policy = ArgPolicy::default();
        let empty: [&str; 0] = [];
        assert!(sanitize_args(&policy, &empty).unwrap().is_empty());
    }

    #[test]
    fn test_from_lists_overrides() {
        let allowed = vec!["--only".to_string()];
        let policy = ArgPolicy::from_lists(Some(&allowed), None);
        assert!(sanitize_args(&policy, &["--only"]).is_ok());
        assert!(sanitize_args(&policy, &["-p"]).is_err());
        assert!(policy.denied_flags.contains("--resume"));
    }
}
