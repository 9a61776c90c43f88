//! Workspace change tracking and subscriber notification.
//!
//! A [`ChangeTracker`] wraps one git-backed workspace, detects new commits
//! and working-tree changes, and delivers [`ChangeEvent`]s to registered
//! subscribers in registration order. Detection runs either on demand
//! (`check_for_changes`) or from a recursive filesystem watcher filtered by
//! extension. A workspace that is not a git repository stays in the
//! not-initialized state for the tracker's whole lifetime; every operation
//! then degrades to an error result instead of raising.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tracing::{debug, warn};

use crate::io::git::{BranchInfo, Commit, Git, WorkingTreeStatus};

/// Extensions (without dot) whose file events trigger a change check.
pub const DEFAULT_WATCH_EXTENSIONS: [&str; 5] = ["py", "js", "ts", "md", "txt"];

/// One detected repository change, delivered to subscribers. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    NewCommit(Commit),
    FileChanges(WorkingTreeStatus),
    Error { message: String },
}

/// Callback invoked for every delivered event, in registration order.
pub type Subscriber = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Tracks one git-backed workspace identified by an opaque workspace id.
pub struct ChangeTracker {
    workspace_id: String,
    repo_path: PathBuf,
    /// `None` means the path was not a repository at construction; this
    /// never transitions back.
    git: Option<Git>,
    watch_extensions: Vec<String>,
    /// Last observed head commit id; guarded so concurrent watcher and
    /// manual checks cannot double-report or miss a commit.
    last_commit: Mutex<Option<String>>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Serializes whole change checks, not just the head-id read.
    check_serial: Mutex<()>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ChangeTracker {
    /// Open a tracker over `repo_path`. Never fails: a non-repository path
    /// yields a tracker whose operations all degrade.
    pub fn new(workspace_id: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self::with_extensions(workspace_id, repo_path, &DEFAULT_WATCH_EXTENSIONS)
    }

    pub fn with_extensions(
        workspace_id: impl Into<String>,
        repo_path: impl Into<PathBuf>,
        extensions: &[impl AsRef<str>],
    ) -> Self {
        let workspace_id = workspace_id.into();
        let repo_path = repo_path.into();
        let candidate = Git::new(&repo_path);
        let (git, last_commit) = if candidate.is_repository() {
            let head = candidate.head_commit().ok();
            (Some(candidate), head)
        } else {
            debug!(workspace = %workspace_id, path = %repo_path.display(), "not a git repository");
            (None, None)
        };
        Self {
            workspace_id,
            repo_path,
            git,
            watch_extensions: extensions.iter().map(|e| e.as_ref().to_string()).collect(),
            last_commit: Mutex::new(last_commit),
            subscribers: Mutex::new(Vec::new()),
            check_serial: Mutex::new(()),
            watcher: Mutex::new(None),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// True when the workspace was a git repository at construction.
    pub fn is_tracking(&self) -> bool {
        self.git.is_some()
    }

    /// Register a subscriber. Delivery order follows registration order.
    pub fn subscribe(&self, subscriber: Subscriber) {
        lock(&self.subscribers).push(subscriber);
    }

    /// Working-tree changes, or an error when not tracking.
    pub fn status(&self) -> Result<WorkingTreeStatus> {
        self.tracking()?.status()
    }

    /// Most-recent-first commits, at most `count`. Empty (not an error)
    /// when not tracking or on an internal failure.
    pub fn recent_commits(&self, count: usize) -> Vec<Commit> {
        let Some(git) = &self.git else {
            return Vec::new();
        };
        match git.recent_commits(count) {
            Ok(commits) => commits,
            Err(err) => {
                warn!(workspace = %self.workspace_id, err = %format!("{err:#}"), "failed to list commits");
                Vec::new()
            }
        }
    }

    /// Patch for one commit against its first parent. Failures come back as
    /// a human-readable string, never as an error.
    pub fn commit_diff(&self, commit_id: &str) -> String {
        let Some(git) = &self.git else {
            return "Not a git repository".to_string();
        };
        match git.commit_diff(commit_id) {
            Ok(diff) => diff,
            Err(err) => format!("Error getting diff: {err:#}"),
        }
    }

    /// Branch position relative to `origin/main`, or an error when not
    /// tracking or on failure.
    pub fn branch_info(&self) -> Result<BranchInfo> {
        self.tracking()?.branch_info()
    }

    /// Create and checkout a new branch. False on any failure.
    pub fn create_branch(&self, name: &str) -> bool {
        self.branch_op("create branch", |git| git.checkout_new_branch(name))
    }

    /// Checkout an existing branch. False on any failure.
    pub fn switch_branch(&self, name: &str) -> bool {
        self.branch_op("switch branch", |git| git.checkout_branch(name))
    }

    /// Stage all working-tree changes and commit. False on failure or when
    /// there is nothing to commit.
    pub fn commit_all(&self, message: &str) -> bool {
        let Some(git) = &self.git else {
            return false;
        };
        match git.add_all().and_then(|()| git.commit_staged(message)) {
            Ok(committed) => committed,
            Err(err) => {
                warn!(workspace = %self.workspace_id, err = %format!("{err:#}"), "commit failed");
                false
            }
        }
    }

    /// Detect and deliver changes since the last check.
    ///
    /// A head commit different from the last observed one produces a
    /// `NewCommit` event before the working-tree check; a non-empty status
    /// produces a `FileChanges` event on every call while changes exist.
    /// Any internal failure is delivered as an `Error` event, not raised.
    /// Safe to call concurrently; whole checks are serialized.
    pub fn check_for_changes(&self) {
        let Some(git) = &self.git else {
            return;
        };
        let _serial = lock(&self.check_serial);
        if let Err(err) = self.check_inner(git) {
            self.deliver(&ChangeEvent::Error {
                message: format!("{err:#}"),
            });
        }
    }

    fn check_inner(&self, git: &Git) -> Result<()> {
        let head = git.head_commit()?;
        let advanced = {
            let mut last = lock(&self.last_commit);
            if last.as_deref() != Some(head.as_str()) {
                *last = Some(head.clone());
                true
            } else {
                false
            }
        };
        if advanced {
            debug!(workspace = %self.workspace_id, head = %head, "new commit detected");
            let commit = git.commit(&head)?;
            self.deliver(&ChangeEvent::NewCommit(commit));
        }

        let status = git.status()?;
        if !status.is_empty() {
            self.deliver(&ChangeEvent::FileChanges(status));
        }
        Ok(())
    }

    fn deliver(&self, event: &ChangeEvent) {
        let subscribers = lock(&self.subscribers);
        for subscriber in subscribers.iter() {
            subscriber(event);
        }
    }

    /// Attach a recursive filesystem watcher over the workspace that
    /// triggers `check_for_changes` for create/modify/remove events on
    /// watched extensions.
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        if !self.repo_path.exists() {
            return Err(anyhow!(
                "workspace path '{}' does not exist",
                self.repo_path.display()
            ));
        }
        // Weak reference: the watcher callback must not keep the tracker
        // alive past its registry entry.
        let tracker = Arc::downgrade(self);
        let extensions = self.watch_extensions.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<NotifyEvent, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|path| has_watched_extension(path, &extensions))
                {
                    return;
                }
                if let Some(tracker) = tracker.upgrade() {
                    tracker.check_for_changes();
                }
            },
        )?;
        watcher.watch(&self.repo_path, RecursiveMode::Recursive)?;
        debug!(workspace = %self.workspace_id, path = %self.repo_path.display(), "watching workspace");
        *lock(&self.watcher) = Some(watcher);
        Ok(())
    }

    /// Detach the filesystem watcher. Dropping the watcher joins its event
    /// thread, so no callback runs after this returns. Idempotent.
    pub fn stop_watching(&self) {
        if lock(&self.watcher).take().is_some() {
            debug!(workspace = %self.workspace_id, "stopped watching workspace");
        }
    }

    fn tracking(&self) -> Result<&Git> {
        self.git
            .as_ref()
            .ok_or_else(|| anyhow!("not a git repository: {}", self.repo_path.display()))
    }

    fn branch_op(&self, what: &str, op: impl FnOnce(&Git) -> Result<()>) -> bool {
        let Some(git) = &self.git else {
            return false;
        };
        match op(git) {
            Ok(()) => true,
            Err(err) => {
                warn!(workspace = %self.workspace_id, err = %format!("{err:#}"), "{what} failed");
                false
            }
        }
    }
}

fn has_watched_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|watched| watched == ext))
}

/// Owned registry of trackers keyed by workspace id.
///
/// One instance per process lifetime, torn down explicitly; replaces the
/// ambient tracker map of earlier designs.
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: Mutex<HashMap<String, Arc<ChangeTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the tracker for a workspace id.
    pub fn create(
        &self,
        workspace_id: impl Into<String>,
        repo_path: impl Into<PathBuf>,
    ) -> Arc<ChangeTracker> {
        let workspace_id = workspace_id.into();
        let tracker = Arc::new(ChangeTracker::new(workspace_id.clone(), repo_path));
        if let Some(previous) = lock(&self.trackers).insert(workspace_id, tracker.clone()) {
            previous.stop_watching();
        }
        tracker
    }

    pub fn get(&self, workspace_id: &str) -> Option<Arc<ChangeTracker>> {
        lock(&self.trackers).get(workspace_id).cloned()
    }

    /// Remove a tracker, stopping its watcher first.
    pub fn remove(&self, workspace_id: &str) {
        if let Some(tracker) = lock(&self.trackers).remove(workspace_id) {
            tracker.stop_watching();
        }
    }

    /// Tear down every tracker.
    pub fn clear(&self) {
        let trackers: Vec<Arc<ChangeTracker>> =
            lock(&self.trackers).drain().map(|(_, t)| t).collect();
        for tracker in trackers {
            tracker.stop_watching();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
