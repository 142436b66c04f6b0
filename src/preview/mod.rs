//! Per-branch preview publishing.
//!
//! ```text
//! watcher.rs (notify + HEAD poll) ──> debounce.rs ──> publisher.rs ──> live.rs
//!                                                          │
//!                                       paths.rs ─────────┤ target dirs, containment
//!                                       git.rs   ─────────┘ branch queries, checkout
//! ```
//!
//! The default branch is copied to the preview root; every other branch to
//! `<root>/.preview/<slug>/`.

pub mod debounce;
pub mod git;
pub mod live;
pub mod paths;
pub mod publisher;
pub mod watcher;

pub use live::LiveReload;
pub use paths::{PREVIEW_NAMESPACE, PreviewLayout, resolve_preview_root, slugify_branch};
pub use publisher::{BranchInfo, BranchPublisher, Publication};
pub use watcher::GitWatcher;
