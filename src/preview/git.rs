//! Git queries (git2) and working-tree mutations (`git` CLI).
//!
//! Reads go through libgit2 so they are cheap enough for the 2 s poll.
//! Checkouts, merges and init shell out to `git` so hooks and the user's
//! config behave as they would on the command line.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use git2::{BranchType, Repository};
use tokio::process::Command;

use crate::errors::PublishError;

const HEADS_PREFIX: &str = "refs/heads/";

/// Name of the checked-out branch. Works on unborn branches; `None` when
/// the directory is not a repository or HEAD is detached.
pub fn current_branch(dir: &Path) -> Option<String> {
    let repo = Repository::open(dir).ok()?;
    let head = repo.find_reference("HEAD").ok()?;
    let target = head.symbolic_target()?;
    target.strip_prefix(HEADS_PREFIX).map(str::to_string)
}

/// Commit hash HEAD resolves to, `None` for unborn branches.
pub fn head_commit(dir: &Path) -> Option<String> {
    let repo = Repository::open(dir).ok()?;
    let head = repo.head().ok()?;
    head.peel_to_commit().ok().map(|c| c.id().to_string())
}

pub fn local_branches(dir: &Path) -> Result<Vec<String>, PublishError> {
    let repo = Repository::open(dir)?;
    let mut names = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// The repository metadata directory (`.git`), whether or not it exists yet.
pub fn git_dir(dir: &Path) -> PathBuf {
    Repository::open(dir)
        .map(|repo| repo.path().to_path_buf())
        .unwrap_or_else(|_| dir.join(".git"))
}

/// Loose ref file HEAD points at, e.g. `.git/refs/heads/main`.
pub fn head_ref_path(git_dir: &Path) -> Option<PathBuf> {
    let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let target = head.trim().strip_prefix("ref:")?.trim();
    Some(git_dir.join(target))
}

pub fn is_repository(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Run `git <args>` in `dir`, returning trimmed stdout.
pub async fn run_git(dir: &Path, args: &[&str]) -> Result<String, PublishError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PublishError::Git(format!("failed to run git {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PublishError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn checkout(dir: &Path, branch: &str) -> Result<(), PublishError> {
    run_git(dir, &["checkout", branch, "--"]).await.map(|_| ())
}

/// `git init -b <branch>`, falling back to a plain `git init` for gits that
/// predate `-b`.
pub async fn init_repository(dir: &Path, default_branch: &str) -> Result<(), PublishError> {
    match run_git(dir, &["init", "-b", default_branch]).await {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::debug!(error = %e, "git init -b unsupported, retrying plain init");
            run_git(dir, &["init"]).await.map(|_| ())
        }
    }
}

/// Merge local `branch` into the checked-out branch; aborts the merge on
/// conflict. The name is always taken as `refs/heads/<branch>`.
pub async fn merge(dir: &Path, branch: &str) -> Result<(), PublishError> {
    let full_ref = format!("{}{}", HEADS_PREFIX, branch);
    if let Err(e) = run_git(dir, &["merge", "--no-edit", &full_ref]).await {
        if let Err(abort) = run_git(dir, &["merge", "--abort"]).await {
            tracing::warn!(error = %abort, "git merge --abort failed");
        }
        return Err(e);
    }
    Ok(())
}

/// Revert the most recent commit with a new commit.
pub async fn revert_head(dir: &Path) -> Result<(), PublishError> {
    run_git(dir, &["revert", "--no-edit", "HEAD"]).await.map(|_| ())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_current_branch_unborn_then_committed() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        assert_eq!(current_branch(dir.path()).as_deref(), Some("main"));
        assert!(head_commit(dir.path()).is_none());

        let sha = commit_file(dir.path(), "index.html", "<h1>hi</h1>", "init");
        assert_eq!(current_branch(dir.path()).as_deref(), Some("main"));
        assert_eq!(head_commit(dir.path()), Some(sha));
    }

    #[test]
    fn test_current_branch_outside_repo() {
        let dir = tempdir().unwrap();
        assert!(current_branch(dir.path()).is_none());
        assert!(head_commit(dir.path()).is_none());
        assert!(!is_repository(dir.path()));
    }

    #[test]
    fn test_current_branch_detached_is_none() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        let sha = commit_file(dir.path(), "a.txt", "a", "init");
        repo.set_head_detached(git2::Oid::from_str(&sha).unwrap())
            .unwrap();
        assert!(current_branch(dir.path()).is_none());
    }

    #[test]
    fn test_local_branches_sorted() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "a.txt", "a", "init");
        create_branch(dir.path(), "feature/x");
        create_branch(dir.path(), "docs");
        assert_eq!(
            local_branches(dir.path()).unwrap(),
            vec!["docs", "feature/x", "main"]
        );
    }

    #[test]
    fn test_head_ref_path() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let git = git_dir(dir.path());
        assert_eq!(
            head_ref_path(&git),
            Some(git.join("refs/heads/main"))
        );
    }

    #[tokio::test]
    async fn test_checkout_and_run_git() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "a.txt", "a", "init");
        create_branch(dir.path(), "feature");

        checkout(dir.path(), "feature").await.unwrap();
        assert_eq!(current_branch(dir.path()).as_deref(), Some("feature"));

        let err = checkout(dir.path(), "does-not-exist").await.unwrap_err();
        assert!(matches!(err, PublishError::Git(_)));
    }

    #[tokio::test]
    async fn test_init_repository_names_default_branch() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repository(dir.path(), "main").await.unwrap();
        assert!(is_repository(dir.path()));
        assert_eq!(current_branch(dir.path()).as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_revert_head_restores_previous_content() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "page.html", "v1", "first");
        commit_file(dir.path(), "page.html", "v2", "second");

        revert_head(dir.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("page.html")).unwrap(),
            "v1"
        );
    }
}
