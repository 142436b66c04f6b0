use std::path::{Component, Path, PathBuf};

use crate::errors::PublishError;

/// Reserved directory under the preview root holding non-default branches.
pub const PREVIEW_NAMESPACE: &str = ".preview";

/// Filesystem-safe rendering of a branch name: every char outside
/// `[A-Za-z0-9._-]` becomes `_`.
pub fn slugify_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The preview root for this process: the configured path made absolute, or
/// `~/.gantry/preview`.
pub fn resolve_preview_root(configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => normalize_lexically(path),
        Some(path) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
            normalize_lexically(&cwd.join(path))
        }
        None => dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".gantry")
            .join("preview"),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Where each branch is published and how it is reached.
#[derive(Debug, Clone)]
pub struct PreviewLayout {
    root: PathBuf,
    default_branch: String,
    base_url: String,
}

impl PreviewLayout {
    pub fn new(
        root: PathBuf,
        default_branch: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            root,
            default_branch: default_branch.into(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.root.join(PREVIEW_NAMESPACE)
    }

    pub fn is_default(&self, branch: &str) -> bool {
        branch == self.default_branch
    }

    /// Target directory for `branch`, checked lexically.
    ///
    /// The default branch maps to the root. Any other branch must land
    /// strictly inside the namespace directory.
    pub fn target_dir(&self, branch: &str) -> Result<PathBuf, PublishError> {
        if self.is_default(branch) {
            return Ok(self.root.clone());
        }
        let namespace = normalize_lexically(&self.namespace_dir());
        let target = normalize_lexically(&namespace.join(slugify_branch(branch)));
        if target == namespace || !target.starts_with(&namespace) {
            return Err(PublishError::PathEscape {
                target,
                root: self.root.clone(),
            });
        }
        Ok(target)
    }

    /// Re-check containment against the real filesystem once `target`
    /// exists, so a symlinked directory cannot redirect the publish.
    pub fn verify_contained(&self, target: &Path) -> Result<PathBuf, PublishError> {
        let root = self
            .root
            .canonicalize()
            .map_err(|e| PublishError::io(&self.root, e))?;
        let resolved = target
            .canonicalize()
            .map_err(|e| PublishError::io(target, e))?;
        if !resolved.starts_with(&root) {
            return Err(PublishError::PathEscape {
                target: resolved,
                root,
            });
        }
        Ok(resolved)
    }

    /// Browsable URL of a branch's published snapshot.
    pub fn url(&self, branch: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.is_default(branch) {
            format!("{}/", base)
        } else {
            format!("{}/{}/{}/", base, PREVIEW_NAMESPACE, slugify_branch(branch))
        }
    }
}
