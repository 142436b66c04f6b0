use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use serde::Serialize;
use walkdir::WalkDir;

use super::git;
use super::paths::{PREVIEW_NAMESPACE, PreviewLayout, slugify_branch};
use crate::errors::PublishError;

/// Guidance file written into a freshly initialized working directory.
pub const GUIDANCE_FILE: &str = "CLAUDE.md";

const GUIDANCE: &str = "\
# Working directory guidance

Everything in this directory is published as a static preview site.

- Keep an `index.html` at the top level; it is the preview's landing page.
- Use relative links so pages work under a branch preview path.
- Each git branch is previewed separately. The default branch is served at
  the preview root, other branches under `/.preview/<branch>/`.
- Commit finished work; switching branches republishes the preview.
";

/// One branch snapshot in the preview root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Publication {
    pub branch: String,
    pub slug: String,
    pub target_dir: PathBuf,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub slug: String,
    pub url: String,
    pub current: bool,
}

/// Copies the working tree of a branch into its preview directory.
#[derive(Debug, Clone)]
pub struct BranchPublisher {
    layout: PreviewLayout,
    /// Branch name to use when git cannot tell (from `GANTRY_BRANCH`).
    branch_fallback: Option<String>,
}

impl BranchPublisher {
    pub fn new(layout: PreviewLayout, branch_fallback: Option<String>) -> Self {
        Self {
            layout,
            branch_fallback,
        }
    }

    pub fn layout(&self) -> &PreviewLayout {
        &self.layout
    }

    /// Initialize a repository (and guidance file) in `dir` if it has none.
    /// Returns whether anything was created.
    pub async fn bootstrap(&self, dir: &Path) -> Result<bool, PublishError> {
        if git::is_repository(dir) {
            return Ok(false);
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PublishError::io(dir, e))?;
        git::init_repository(dir, self.layout.default_branch()).await?;

        let guide = dir.join(GUIDANCE_FILE);
        if !guide.exists() {
            tokio::fs::write(&guide, GUIDANCE)
                .await
                .map_err(|e| PublishError::io(&guide, e))?;
        }
        tracing::info!(dir = %dir.display(), "initialized working directory repository");
        Ok(true)
    }

    /// Current branch from git, else the fallback name, else the default.
    pub fn resolve_branch(&self, dir: &Path) -> String {
        git::current_branch(dir)
            .or_else(|| self.branch_fallback.clone())
            .unwrap_or_else(|| self.layout.default_branch().to_string())
    }

    /// Snapshot the checked-out branch of `dir` into its preview directory.
    pub async fn publish_current_branch(&self, dir: &Path) -> Result<Publication, PublishError> {
        self.bootstrap(dir).await?;

        let branch = self.resolve_branch(dir);
        let target = self.layout.target_dir(&branch)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| PublishError::io(&target, e))?;
        let target = self.layout.verify_contained(&target)?;

        let preserve = self.layout.is_default(&branch).then_some(PREVIEW_NAMESPACE);
        let source = dir.to_path_buf();
        let dest = target.clone();
        let root = self.layout.root().to_path_buf();
        let copied = tokio::task::spawn_blocking(move || {
            clear_dir(&dest, preserve)?;
            copy_tree(&source, &dest, &root)
        })
        .await
        .map_err(|e| anyhow!("publish task panicked: {}", e))??;

        tracing::info!(%branch, target = %target.display(), files = copied, "published branch");
        Ok(Publication {
            url: self.layout.url(&branch),
            slug: slugify_branch(&branch),
            branch,
            target_dir: target,
        })
    }

    /// Check out and publish every local branch, then return to the branch
    /// that was checked out before. Failures are logged and skipped.
    pub async fn publish_all_branches(&self, dir: &Path) -> Vec<Publication> {
        let original = git::current_branch(dir);
        let branches = match git::local_branches(dir) {
            Ok(branches) => branches,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list branches");
                return Vec::new();
            }
        };

        let mut published = Vec::with_capacity(branches.len());
        for branch in &branches {
            if let Err(e) = git::checkout(dir, branch).await {
                tracing::warn!(%branch, error = %e, "skipping branch, checkout failed");
                continue;
            }
            match self.publish_current_branch(dir).await {
                Ok(publication) => published.push(publication),
                Err(e) => tracing::warn!(%branch, error = %e, "skipping branch, publish failed"),
            }
        }

        if let Some(original) = original
            && let Err(e) = git::checkout(dir, &original).await
        {
            tracing::warn!(branch = %original, error = %e, "failed to restore original branch");
        }
        published
    }

    /// Merge `branch` into the default branch and republish the default
    /// branch. The previously checked-out branch is restored afterwards.
    pub async fn promote(&self, dir: &Path, branch: &str) -> Result<Publication, PublishError> {
        let default = self.layout.default_branch().to_string();
        if branch == default {
            return Err(PublishError::Git(format!(
                "'{}' is already the default branch",
                branch
            )));
        }
        // Only local branch names; never a sha, tag, rev expression or option.
        if !git::local_branches(dir)?.iter().any(|name| name == branch) {
            return Err(PublishError::UnknownBranch {
                branch: branch.to_string(),
            });
        }
        let original = git::current_branch(dir);

        git::checkout(dir, &default).await?;
        let result = match git::merge(dir, branch).await {
            Ok(()) => self.publish_current_branch(dir).await,
            Err(e) => Err(e),
        };

        if let Some(original) = original
            && original != default
            && let Err(e) = git::checkout(dir, &original).await
        {
            tracing::warn!(branch = %original, error = %e, "failed to restore branch after promote");
        }
        if result.is_ok() {
            tracing::info!(%branch, into = %default, "promoted branch");
        }
        result
    }

    /// Revert the last commit on the current branch and republish it.
    pub async fn undo(&self, dir: &Path) -> Result<Publication, PublishError> {
        git::revert_head(dir).await?;
        self.publish_current_branch(dir).await
    }

    pub fn branches(&self, dir: &Path) -> Result<Vec<BranchInfo>, PublishError> {
        let current = git::current_branch(dir);
        Ok(git::local_branches(dir)?
            .into_iter()
            .map(|name| BranchInfo {
                slug: slugify_branch(&name),
                url: self.layout.url(&name),
                current: current.as_deref() == Some(name.as_str()),
                name,
            })
            .collect())
    }
}

/// Remove everything in `dir` except the entry named `preserve`.
fn clear_dir(dir: &Path, preserve: Option<&str>) -> Result<(), PublishError> {
    let entries = fs::read_dir(dir).map_err(|e| PublishError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PublishError::io(dir, e))?;
        if preserve.is_some_and(|keep| entry.file_name() == keep) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| PublishError::io(&path, e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| PublishError::io(&path, e))?;
    }
    Ok(())
}

/// Copy `source` into `dest`, skipping `.git`, symlinks, and the preview
/// root when it sits inside the source tree. Returns the number of files.
fn copy_tree(source: &Path, dest: &Path, preview_root: &Path) -> Result<usize, PublishError> {
    let source = source
        .canonicalize()
        .map_err(|e| PublishError::io(source, e))?;
    let excluded = preview_root.canonicalize().ok();

    let walker = WalkDir::new(&source)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry.file_name() != ".git" && excluded.as_deref() != Some(entry.path())
        });

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|e| PublishError::Other(e.into()))?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&source)
            .map_err(|e| PublishError::Other(e.into()))?;
        let target = dest.join(rel);
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| PublishError::io(&target, e))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| PublishError::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
