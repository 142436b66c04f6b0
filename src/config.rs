//! Gateway configuration, read from `.gantry/gateway.toml`.
//!
//! Layered file → environment → CLI:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! api_token = "secret"
//! public_url = "https://preview.example.com"
//!
//! [jobs]
//! binary = "claude"
//! log_capacity = 1048576
//! default_args = ["--output-format", "stream-json"]
//! allowed_flags = ["-p", "--model"]
//! denied_flags = ["--resume"]
//!
//! [preview]
//! root = "/srv/preview"
//! default_branch = "main"
//! poll_interval_ms = 2000
//! debounce_ms = 300
//!
//! [logging]
//! dir = ".gantry/logs"
//! format = "text"
//! ```
//!
//! Environment overrides: `CLAUDE_CMD`, `GANTRY_API_TOKEN`,
//! `GANTRY_PREVIEW_ROOT`, `GANTRY_PORT`, `GANTRY_BRANCH`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::jobs::ArgPolicy;
use crate::jobs::buffer::DEFAULT_LOG_CAPACITY;
use crate::preview::{PreviewLayout, resolve_preview_root};

pub const CONFIG_DIR: &str = ".gantry";
pub const CONFIG_FILE: &str = "gateway.toml";

pub const DEFAULT_PORT: u16 = 3141;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_BINARY: &str = "claude";
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Bearer token required on `/api/*` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Externally visible base URL; preview links are built from it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_token: None,
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    /// Agent CLI binary (falls back to `CLAUDE_CMD`, then `claude`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    pub log_capacity: usize,
    pub default_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_flags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_flags: Option<Vec<String>>,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            binary: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
            default_args: Vec::new(),
            allowed_flags: None,
            denied_flags: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub default_branch: String,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            root: None,
            default_branch: DEFAULT_BRANCH.to_string(),
            poll_interval_ms: 2000,
            debounce_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for daily-rolling log files; stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
}

/// Parsed `gateway.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    pub server: ServerSection,
    pub jobs: JobsSection,
    pub preview: PreviewSection,
    pub logging: LoggingSection,
}

impl GatewayToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Values given on the command line; they win over file and env.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_format: Option<LogFormat>,
}

/// Effective configuration for one gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,
    pub toml: GatewayToml,
    /// Publisher branch name when git cannot tell (`GANTRY_BRANCH`).
    pub branch_fallback: Option<String>,
}

impl GatewayConfig {
    /// Load `<workdir>/.gantry/gateway.toml` (or `config_path`), then apply
    /// environment overrides.
    pub fn load(workdir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let workdir = absolute(workdir)?;
        let config_path = match config_path {
            Some(path) => absolute(path)?,
            None => workdir.join(CONFIG_DIR).join(CONFIG_FILE),
        };
        let toml = GatewayToml::load_or_default(&config_path)?;

        let mut config = Self {
            workdir,
            config_path,
            toml,
            branch_fallback: None,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(binary) = lookup("CLAUDE_CMD").filter(|v| !v.is_empty())
            && self.toml.jobs.binary.is_none()
        {
            self.toml.jobs.binary = Some(binary);
        }
        if let Some(token) = lookup("GANTRY_API_TOKEN").filter(|v| !v.is_empty()) {
            self.toml.server.api_token = Some(token);
        }
        if let Some(root) = lookup("GANTRY_PREVIEW_ROOT").filter(|v| !v.is_empty()) {
            self.toml.preview.root = Some(PathBuf::from(root));
        }
        if let Some(port) = lookup("GANTRY_PORT").filter(|v| !v.is_empty()) {
            self.toml.server.port = port
                .parse()
                .with_context(|| format!("Invalid GANTRY_PORT '{}'", port))?;
        }
        self.branch_fallback = lookup("GANTRY_BRANCH").filter(|v| !v.is_empty());
        Ok(())
    }

    pub fn apply_cli(&mut self, overrides: &CliOverrides) {
        if let Some(host) = &overrides.host {
            self.toml.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.toml.server.port = port;
        }
        if let Some(format) = overrides.log_format {
            self.toml.logging.format = format;
        }
    }

    /// Agent binary: file, then `CLAUDE_CMD`, then `claude`.
    pub fn binary(&self) -> String {
        self.toml
            .jobs
            .binary
            .clone()
            .unwrap_or_else(|| DEFAULT_BINARY.to_string())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.toml.server.host, self.toml.server.port)
    }

    pub fn api_token(&self) -> Option<&str> {
        self.toml.server.api_token.as_deref()
    }

    /// Base URL previews are served under.
    pub fn preview_base_url(&self) -> String {
        let base = match &self.toml.server.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind_addr()),
        };
        format!("{}/preview", base)
    }

    pub fn preview_root(&self) -> PathBuf {
        let configured = self.toml.preview.root.as_deref().map(|root| {
            if root.is_absolute() {
                root.to_path_buf()
            } else {
                self.workdir.join(root)
            }
        });
        resolve_preview_root(configured.as_deref())
    }

    pub fn layout(&self) -> PreviewLayout {
        PreviewLayout::new(
            self.preview_root(),
            self.toml.preview.default_branch.clone(),
            self.preview_base_url(),
        )
    }

    pub fn arg_policy(&self) -> ArgPolicy {
        ArgPolicy::from_lists(
            self.toml.jobs.allowed_flags.as_deref(),
            self.toml.jobs.denied_flags.as_deref(),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.toml.preview.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.toml.preview.debounce_ms)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.workdir.join(dir)
            }
        })
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.toml.jobs.log_capacity == 0 {
            warnings.push("jobs.log_capacity is 0: job output will be discarded".to_string());
        }
        if self.toml.preview.poll_interval_ms == 0 {
            warnings.push("preview.poll_interval_ms must be greater than 0".to_string());
        }
        if self.toml.preview.default_branch.trim().is_empty() {
            warnings.push("preview.default_branch is empty".to_string());
        }
        if self.toml.server.api_token.is_none() && self.toml.server.host != DEFAULT_HOST {
            warnings.push(format!(
                "server.host is {} but no api_token is set: the job API is unauthenticated",
                self.toml.server.host
            ));
        }
        warnings
    }

    /// Effective configuration as TOML, with the API token masked.
    pub fn to_toml_string(&self) -> Result<String> {
        let mut shown = self.toml.clone();
        if shown.server.api_token.is_some() {
            shown.server.api_token = Some("********".to_string());
        }
        if shown.jobs.binary.is_none() {
            shown.jobs.binary = Some(self.binary());
        }
        shown.preview.root = Some(self.preview_root());
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", path.display()));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn write_config(dir: &Path, content: &str) {
        let config_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE), content).unwrap();
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn load_file_only(dir: &Path) -> GatewayConfig {
        let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);
        GatewayConfig {
            workdir: dir.to_path_buf(),
            toml: GatewayToml::load_or_default(&config_path).unwrap(),
            config_path,
            branch_fallback: None,
        }
    }

    #[test]
    fn test_defaults() {
        let toml = GatewayToml::default();
        assert_eq!(toml.server.port, 3141);
        assert_eq!(toml.server.host, "127.0.0.1");
        assert!(toml.server.api_token.is_none());
        assert_eq!(toml.jobs.log_capacity, 1024 * 1024);
        assert_eq!(toml.preview.default_branch, "main");
        assert_eq!(toml.preview.poll_interval_ms, 2000);
        assert_eq!(toml.preview.debounce_ms, 300);
        assert_eq!(toml.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.toml.server.port, 3141);
        assert!(config.config_path.ends_with(".gantry/gateway.toml"));
    }

    #[test]
    fn test_load_full() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
[server]
host = "0.0.0.0"
port = 8080
api_token = "secret"
public_url = "https://preview.example.com/"

[jobs]
binary = "/usr/local/bin/agent"
log_capacity = 4096
default_args = ["--output-format", "stream-json"]
allowed_flags = ["-p"]
denied_flags = ["--resume"]

[preview]
root = "site"
default_branch = "trunk"
poll_interval_ms = 500
debounce_ms = 50

[logging]
dir = "logs"
format = "json"
"#,
        );

        let config = load_file_only(dir.path());
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.api_token(), Some("secret"));
        assert_eq!(config.binary(), "/usr/local/bin/agent");
        assert_eq!(config.toml.jobs.log_capacity, 4096);
        assert_eq!(config.toml.jobs.default_args.len(), 2);
        assert_eq!(config.preview_root(), dir.path().join("site"));
        assert_eq!(config.preview_base_url(), "https://preview.example.com/preview");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert_eq!(config.log_dir(), Some(dir.path().join("logs")));
        assert_eq!(config.toml.logging.format, LogFormat::Json);

        let layout = config.layout();
        assert_eq!(layout.default_branch(), "trunk");
        assert_eq!(layout.url("trunk"), "https://preview.example.com/preview/");

        let policy = config.arg_policy();
        assert!(crate::jobs::sanitize_args(&policy, &["-p", "hi"]).is_ok());
        assert!(crate::jobs::sanitize_args(&policy, &["--model"]).is_err());
    }

    #[test]
    fn test_load_partial() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "[server]\nport = 9000\n");
        let config = load_file_only(dir.path());
        assert_eq!(config.toml.server.port, 9000);
        assert_eq!(config.toml.server.host, "127.0.0.1");
        assert_eq!(config.toml.preview.default_branch, "main");
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "not valid toml {{{{");
        let err = GatewayConfig::load(dir.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains("gateway.toml"));
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[preview]\ndefault_branch = \"develop\"\n").unwrap();
        let config = GatewayConfig::load(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.toml.preview.default_branch, "develop");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "[server]\nport = 9000\napi_token = \"file\"\n");
        let mut config = load_file_only(dir.path());
        config
            .apply_env(env(&[
                ("GANTRY_PORT", "7000"),
                ("GANTRY_API_TOKEN", "env-token"),
                ("GANTRY_PREVIEW_ROOT", "/srv/www"),
                ("GANTRY_BRANCH", "staging"),
                ("CLAUDE_CMD", "my-claude"),
            ]))
            .unwrap();

        assert_eq!(config.toml.server.port, 7000);
        assert_eq!(config.api_token(), Some("env-token"));
        assert_eq!(config.preview_root(), PathBuf::from("/srv/www"));
        assert_eq!(config.branch_fallback.as_deref(), Some("staging"));
        assert_eq!(config.binary(), "my-claude");
    }

    #[test]
    fn test_file_binary_wins_over_claude_cmd() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "[jobs]\nbinary = \"from-file\"\n");
        let mut config = load_file_only(dir.path());
        config.apply_env(env(&[("CLAUDE_CMD", "from-env")])).unwrap();
        assert_eq!(config.binary(), "from-file");
    }

    #[test]
    fn test_invalid_env_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load_file_only(dir.path());
        assert!(config.apply_env(env(&[("GANTRY_PORT", "http")])).is_err());
    }

    #[test]
    fn test_cli_overrides_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load_file_only(dir.path());
        config.apply_env(env(&[("GANTRY_PORT", "7000")])).unwrap();
        config.apply_cli(&CliOverrides {
            host: Some("0.0.0.0".into()),
            port: Some(8000),
            log_format: Some(LogFormat::Json),
        });
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.toml.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load_file_only(dir.path());
        assert!(config.validate().is_empty());

        config.toml.server.host = "0.0.0.0".into();
        config.toml.jobs.log_capacity = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("api_token")));
    }

    #[test]
    fn test_toml_string_masks_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load_file_only(dir.path());
        config.toml.server.api_token = Some("hunter2".into());
        let shown = config.to_toml_string().unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("port = 3141"));
        assert!(shown.contains("binary = \"claude\""));

        let reparsed = GatewayToml::parse(&shown).unwrap();
        assert_eq!(reparsed.server.port, 3141);
    }
}
