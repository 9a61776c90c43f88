//! Tracker tests over real git repositories: status classification, commit
//! history, event delivery ordering, branch operations, the registry, and
//! the filesystem watcher.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sandbox_runner::test_support::TestRepo;
use sandbox_runner::tracker::{ChangeEvent, ChangeTracker, Subscriber, TrackerRegistry};

/// Subscriber that accumulates delivered events for later inspection.
#[derive(Clone, Default)]
struct Collector {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl Collector {
    fn subscriber(&self) -> Subscriber {
        let events = self.events.clone();
        Box::new(move |event| events.lock().expect("collector lock").push(event.clone()))
    }

    fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().expect("collector lock").clone()
    }
}

#[test]
fn status_classifies_worktree_entries() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("tracked.txt", "v1").expect("write");
    repo.commit_all("add tracked").expect("commit");

    repo.write_file("tracked.txt", "v2").expect("write");
    repo.write_file("brand_new.txt", "hi").expect("write");
    repo.remove_file("README.md").expect("remove");

    let tracker = ChangeTracker::new("ws", repo.root());
    let status = tracker.status().expect("status");
    assert!(status.modified.contains("tracked.txt"));
    assert!(status.untracked.contains("brand_new.txt"));
    assert!(status.deleted.contains("README.md"));
    assert!(!status.is_empty());
}

#[test]
fn recent_commits_are_newest_first_with_short_hashes() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("a.txt", "a").expect("write");
    repo.commit_all("second commit").expect("commit");
    repo.write_file("b.txt", "b").expect("write");
    repo.commit_all("third commit").expect("commit");

    let tracker = ChangeTracker::new("ws", repo.root());
    let commits = tracker.recent_commits(10);
    assert_eq!(commits.len(), 3);
    assert_eq!(commits[0].message, "third commit");
    assert_eq!(commits[1].message, "second commit");
    for commit in &commits {
        assert_eq!(commit.short_hash.len(), 8);
        assert!(commit.timestamp > 0);
    }

    let limited = tracker.recent_commits(1);
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].message, "third commit");
}

#[test]
fn commit_diff_renders_patch_and_errors_as_text() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("a.txt", "hello diff").expect("write");
    repo.commit_all("add a.txt").expect("commit");

    let tracker = ChangeTracker::new("ws", repo.root());
    let commits = tracker.recent_commits(1);
    let diff = tracker.commit_diff(&commits[0].short_hash);
    assert!(diff.contains("a.txt"));
    assert!(diff.contains("hello diff"));

    let bad = tracker.commit_diff("0000000");
    assert!(bad.starts_with("Error getting diff"));
}

#[test]
fn merge_commit_diff_shows_the_merged_changes() {
    let repo = TestRepo::new().expect("repo");
    let tracker = ChangeTracker::new("ws", repo.root());

    assert!(tracker.create_branch("feature"));
    repo.write_file("feature.txt", "merged content").expect("write");
    repo.commit_all("feature work").expect("commit");
    assert!(tracker.switch_branch("main"));
    repo.git_ok(&["merge", "--no-ff", "feature", "-m", "merge feature"])
        .expect("merge");

    let merge = &tracker.recent_commits(1)[0];
    assert_eq!(merge.message, "merge feature");
    // The merge is diffed against its first parent, so the changes brought
    // in from the merged branch are part of the patch.
    let diff = tracker.commit_diff(&merge.short_hash);
    assert!(diff.contains("feature.txt"), "missing file in diff: {diff}");
    assert!(diff.contains("merged content"));
}

#[test]
fn branch_operations_round_trip() {
    let repo = TestRepo::new().expect("repo");
    let tracker = ChangeTracker::new("ws", repo.root());

    let info = tracker.branch_info().expect("branch info");
    assert_eq!(info.current_branch, "main");
    assert_eq!(info.remote, "No remote");
    assert_eq!(info.ahead, 0);
    assert_eq!(info.behind, 0);

    assert!(tracker.create_branch("feature"));
    assert_eq!(
        tracker.branch_info().expect("branch info").current_branch,
        "feature"
    );
    assert!(tracker.switch_branch("main"));
    assert_eq!(
        tracker.branch_info().expect("branch info").current_branch,
        "main"
    );

    // Checking out a branch that does not exist reports failure, not panic.
    assert!(!tracker.switch_branch("no-such-branch"));
}

#[test]
fn commit_all_stages_and_commits_everything() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("new.txt", "content").expect("write");

    let tracker = ChangeTracker::new("ws", repo.root());
    assert!(tracker.commit_all("track new file"));
    assert!(tracker.status().expect("status").is_empty());
    assert_eq!(tracker.recent_commits(1)[0].message, "track new file");

    // Clean tree: nothing to commit is a false, not an error.
    assert!(!tracker.commit_all("empty"));
}

#[test]
fn new_commit_reported_once_file_changes_every_check() {
    let repo = TestRepo::new().expect("repo");
    let tracker = ChangeTracker::new("ws", repo.root());
    let collector = Collector::default();
    tracker.subscribe(collector.subscriber());

    // Clean tree, unchanged head: no events.
    tracker.check_for_changes();
    assert!(collector.events().is_empty());

    repo.write_file("a.txt", "a").expect("write");
    repo.commit_all("second commit").expect("commit");
    repo.write_file("dirty.txt", "pending").expect("write");

    tracker.check_for_changes();
    let events = collector.events();
    assert_eq!(events.len(), 2);
    // The commit event always precedes the working-tree event.
    let ChangeEvent::NewCommit(commit) = &events[0] else {
        panic!("expected NewCommit first, got {events:?}");
    };
    assert_eq!(commit.message, "second commit");
    let ChangeEvent::FileChanges(status) = &events[1] else {
        panic!("expected FileChanges second, got {events:?}");
    };
    assert!(status.untracked.contains("dirty.txt"));

    // Same head, still-dirty tree: FileChanges repeats, NewCommit does not.
    tracker.check_for_changes();
    let events = collector.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], ChangeEvent::FileChanges(_)));
}

#[test]
fn concurrent_checks_deliver_the_new_commit_exactly_once() {
    let repo = TestRepo::new().expect("repo");
    let tracker = ChangeTracker::new("ws", repo.root());
    let collector = Collector::default();
    tracker.subscribe(collector.subscriber());

    repo.write_file("a.txt", "a").expect("write");
    repo.commit_all("second commit").expect("commit");

    // Simultaneous watcher and manual triggers race on the same check;
    // whole checks are serialized, so the commit is reported once.
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| tracker.check_for_changes());
        }
    });

    let new_commits = collector
        .events()
        .iter()
        .filter(|event| matches!(event, ChangeEvent::NewCommit(_)))
        .count();
    assert_eq!(new_commits, 1);
}

#[test]
fn check_failure_is_delivered_as_an_error_event() {
    let repo = TestRepo::new().expect("repo");
    let tracker = ChangeTracker::new("ws", repo.root());
    let collector = Collector::default();
    tracker.subscribe(collector.subscriber());

    // Break the repository after construction; the check must report the
    // failure to subscribers instead of panicking or staying silent.
    std::fs::remove_dir_all(repo.root().join(".git")).expect("remove git dir");
    tracker.check_for_changes();

    let events = collector.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ChangeEvent::Error { .. }));
}

#[test]
fn subscribers_are_notified_in_registration_order() {
    let repo = TestRepo::new().expect("repo");
    let tracker = ChangeTracker::new("ws", repo.root());

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let first = order.clone();
    tracker.subscribe(Box::new(move |_| first.lock().expect("lock").push("first")));
    let second = order.clone();
    tracker.subscribe(Box::new(move |_| {
        second.lock().expect("lock").push("second");
    }));

    repo.write_file("dirty.txt", "x").expect("write");
    tracker.check_for_changes();

    assert_eq!(*order.lock().expect("lock"), vec!["first", "second"]);
}

#[test]
fn registry_owns_trackers_by_workspace_id() {
    let repo = TestRepo::new().expect("repo");
    let registry = TrackerRegistry::new();

    let tracker = registry.create("ws-1", repo.root());
    let fetched = registry.get("ws-1").expect("present");
    assert!(Arc::ptr_eq(&tracker, &fetched));
    assert!(registry.get("ws-2").is_none());

    // Re-creating the same id replaces the tracker.
    let replacement = registry.create("ws-1", repo.root());
    assert!(!Arc::ptr_eq(&tracker, &replacement));

    registry.remove("ws-1");
    assert!(registry.get("ws-1").is_none());

    registry.create("ws-a", repo.root());
    registry.create("ws-b", repo.root());
    registry.clear();
    assert!(registry.get("ws-a").is_none());
    assert!(registry.get("ws-b").is_none());
}

/// End-to-end watcher test: writing a watched file triggers a change check
/// that delivers a `FileChanges` event, and stopping the watcher stops
/// further deliveries.
#[test]
fn watcher_delivers_events_until_stopped() {
    let repo = TestRepo::new().expect("repo");
    let tracker = Arc::new(ChangeTracker::new("ws", repo.root()));
    let collector = Collector::default();
    tracker.subscribe(collector.subscriber());

    tracker.start_watching().expect("start watching");
    repo.write_file("notes.md", "watched").expect("write");

    // Filesystem notification latency varies by backend; poll generously.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut saw_change = false;
    while Instant::now() < deadline {
        if collector
            .events()
            .iter()
            .any(|event| matches!(event, ChangeEvent::FileChanges(_)))
        {
            saw_change = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(saw_change, "watcher never delivered a change event");

    tracker.stop_watching();
    // Dropping the watcher joins its thread, so the count is stable now.
    std::thread::sleep(Duration::from_millis(300));
    let before = collector.events().len();
    repo.write_file("after.md", "unwatched now").expect("write");
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(collector.events().len(), before);

    // Stopping twice is fine.
    tracker.stop_watching();
}

#[test]
fn start_watching_rejects_missing_path() {
    let tracker = Arc::new(ChangeTracker::new("ws", "/nonexistent/workspace/path"));
    assert!(tracker.start_watching().is_err());
}
