use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use super::git;

/// Default interval for the HEAD poll fallback.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Invoked on every raw change signal. Carries no arguments and no
/// deduplication; callers coalesce.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// What HEAD looked like at one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadState {
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl HeadState {
    pub fn read(dir: &Path) -> Self {
        Self {
            branch: git::current_branch(dir),
            commit: git::head_commit(dir),
        }
    }
}

/// Poll-side change detection: reports a change only when the observed
/// state differs from the previous observation.
#[derive(Debug, Default)]
pub struct HeadPoll {
    last: Option<HeadState>,
}

impl HeadPoll {
    pub fn new(initial: HeadState) -> Self {
        Self {
            last: Some(initial),
        }
    }

    pub fn observe(&mut self, state: HeadState) -> bool {
        if self.last.as_ref() == Some(&state) {
            return false;
        }
        self.last = Some(state);
        true
    }
}

/// Filesystem watches on the repository refs plus a polling task.
///
/// Dropping the watcher (or calling [`GitWatcher::close`]) stops both.
pub struct GitWatcher {
    fs_watcher: Option<RecommendedWatcher>,
    poll_task: Option<JoinHandle<()>>,
}

impl GitWatcher {
    /// Start watching the repository in `dir`. Watch setup failures are
    /// logged; the poll keeps running regardless.
    pub fn start(dir: &Path, poll_interval: Duration, on_change: ChangeCallback) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };
        let git_dir = git::git_dir(dir);
        let fs_watcher = match watch_refs(&git_dir, on_change.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(git_dir = %git_dir.display(), error = %e, "git ref watch unavailable, relying on polling");
                None
            }
        };
        let poll_task = tokio::spawn(poll_head(dir.to_path_buf(), poll_interval, on_change));

        tracing::info!(dir = %dir.display(), poll_ms = poll_interval.as_millis() as u64, "watching git refs");
        Self {
            fs_watcher,
            poll_task: Some(poll_task),
        }
    }

    pub fn is_watching_fs(&self) -> bool {
        self.fs_watcher.is_some()
    }

    /// Stop all watches and the poll task. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        if self.fs_watcher.take().is_some() {
            tracing::debug!("git watcher closed");
        }
    }
}

impl Drop for GitWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// True for events that can mean the checked-out branch or its tip moved.
fn is_ref_change(git_dir: &Path, event: &Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    let heads = git_dir.join("refs").join("heads");
    event.paths.iter().any(|path| {
        if path.extension().is_some_and(|ext| ext == "lock") {
            return false;
        }
        if path.starts_with(&heads) {
            return true;
        }
        path.parent() == Some(git_dir)
            && path
                .file_name()
                .is_some_and(|name| name == "HEAD" || name == "packed-refs")
    })
}

fn watch_refs(git_dir: &Path, on_change: ChangeCallback) -> notify::Result<RecommendedWatcher> {
    let filter_dir = git_dir.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_ref_change(&filter_dir, &event) => {
            tracing::debug!(paths = ?event.paths, "git ref change");
            on_change();
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "git watch error"),
    })?;

    // HEAD and packed-refs are replaced by rename, so watch their directory.
    watcher.watch(git_dir, RecursiveMode::NonRecursive)?;

    let heads = git_dir.join("refs").join("heads");
    if let Err(e) = watcher.watch(&heads, RecursiveMode::Recursive) {
        tracing::warn!(path = %heads.display(), error = %e, "cannot watch branch refs");
    }
    if let Some(ref_file) = git::head_ref_path(git_dir)
        && let Some(parent) = ref_file.parent()
        && !parent.starts_with(&heads)
        && parent.exists()
        && let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive)
    {
        tracing::warn!(path = %parent.display(), error = %e, "cannot watch HEAD ref");
    }
    Ok(watcher)
}

async fn poll_head(dir: PathBuf, interval: Duration, on_change: ChangeCallback) {
    let mut poll = {
        let dir = dir.clone();
        match tokio::task::spawn_blocking(move || HeadState::read(&dir)).await {
            Ok(state) => HeadPoll::new(state),
            Err(_) => HeadPoll::default(),
        }
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick is immediate; the baseline was just taken.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let dir = dir.clone();
        let Ok(state) = tokio::task::spawn_blocking(move || HeadState::read(&dir)).await else {
            continue;
        };
        if poll.observe(state) {
            tracing::debug!("HEAD changed (poll)");
            on_change();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::git::test_support::*;
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn state(branch: &str, commit: &str) -> HeadState {
        HeadState {
            branch: Some(branch.to_string()),
            commit: Some(commit.to_string()),
        }
    }

    #[test]
    fn test_head_poll_fires_only_on_difference() {
        let mut poll = HeadPoll::new(state("main", "aaa"));
        assert!(!poll.observe(state("main", "aaa")));
        assert!(poll.observe(state("main", "bbb")));
        assert!(!poll.observe(state("main", "bbb")));
        assert!(poll.observe(state("feature", "bbb")));
    }

    #[test]
    fn test_head_poll_without_baseline_fires_first() {
        let mut poll = HeadPoll::default();
        assert!(poll.observe(state("main", "aaa")));
        assert!(!poll.observe(state("main", "aaa")));
    }

    #[test]
    fn test_is_ref_change_filters_paths() {
        let git_dir = PathBuf::from("/repo/.git");
        let event = |path: &str, kind| Event::new(kind).add_path(PathBuf::from(path));
        let modify = EventKind::Modify(ModifyKind::Any);

        assert!(is_ref_change(&git_dir, &event("/repo/.git/HEAD", modify)));
        assert!(is_ref_change(&git_dir, &event("/repo/.git/packed-refs", modify)));
        assert!(is_ref_change(
            &git_dir,
            &event("/repo/.git/refs/heads/feature/x", EventKind::Create(CreateKind::File))
        ));
        assert!(!is_ref_change(&git_dir, &event("/repo/.git/index", modify)));
        assert!(!is_ref_change(&git_dir, &event("/repo/.git/HEAD.lock", modify)));
        assert!(!is_ref_change(&git_dir, &event("/repo/.git/refs/heads/main.lock", modify)));
        assert!(!is_ref_change(
            &git_dir,
            &event("/repo/.git/HEAD", EventKind::Access(AccessKind::Any))
        ));
    }

    #[tokio::test]
    async fn test_poll_detects_new_commit() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "a.txt", "a", "init");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut watcher = GitWatcher::start(
            dir.path(),
            Duration::from_millis(50),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        let before = fired.load(Ordering::SeqCst);

        commit_file(dir.path(), "b.txt", "b", "second");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while fired.load(Ordering::SeqCst) == before && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(fired.load(Ordering::SeqCst) > before);
        watcher.close();
    }

    #[tokio::test]
    async fn test_close_stops_poll() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "a.txt", "a", "init");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut watcher = GitWatcher::start(
            dir.path(),
            Duration::from_millis(20),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        watcher.close();
        watcher.close();
        assert!(!watcher.is_watching_fs());

        let before = fired.load(Ordering::SeqCst);
        commit_file(dir.path(), "b.txt", "b", "second");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), before);
    }
}
