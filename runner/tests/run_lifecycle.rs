//! Lifecycle tests for the task supervisor: ledger outcomes, rate-limit
//! retries, the spawn-failure asymmetry, and interrupt cleanup.
//!
//! Scripted launchers run real `sh` processes so exit codes, pids, and
//! termination signals behave exactly as they would with a real agent.

use std::thread;
use std::time::{Duration, Instant};

use sandbox_runner::cancel::CancelToken;
use sandbox_runner::run::{RunOutcome, Supervisor};
use sandbox_runner::test_support::{FailingLauncher, ScriptedLauncher, TasksDir, test_config};

/// Verifies a mixed run: outcomes land in the right ledger list, in task
/// order, and the summary is internally consistent.
#[test]
fn mixed_run_records_outcomes_in_order() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "first");
    tasks.add_task("bravo", "second");
    tasks.add_task("charlie", "third");
    let config = test_config(tasks.path());
    // Scripts are consumed in execution order, which follows filename order.
    let launcher = ScriptedLauncher::new(vec![
        "exit 0",
        "echo 'assertion failed' >&2; exit 1",
        "exit 0",
    ]);
    let supervisor = Supervisor::new(&launcher, &config, CancelToken::new());

    let RunOutcome::Completed(summary) = supervisor.run_all().expect("run") else {
        panic!("expected completion");
    };
    assert_eq!(summary.completed, vec!["alpha", "charlie"]);
    assert_eq!(summary.failed, vec!["bravo"]);
    assert_eq!(summary.total, 3);
    assert_eq!(launcher.remaining(), 0);
}

/// Verifies the rate-limit path: a first invocation failing with a
/// rate-limit indicator is retried after the backoff and a clean second
/// invocation counts as success, exactly once.
#[test]
fn rate_limited_task_retries_after_backoff_and_succeeds() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let config = test_config(tasks.path());
    let launcher = ScriptedLauncher::new(vec!["echo 'HTTP 429: Too Many Requests' >&2; exit 1", "exit 0"]);
    let supervisor = Supervisor::new(&launcher, &config, CancelToken::new());

    let start = Instant::now();
    let RunOutcome::Completed(summary) = supervisor.run_all().expect("run") else {
        panic!("expected completion");
    };
    // Both scripts consumed: the backoff wait ran exactly once.
    assert_eq!(launcher.remaining(), 0);
    assert!(start.elapsed() >= Duration::from_secs(1), "backoff skipped");
    assert_eq!(summary.completed, vec!["alpha"]);
    assert!(summary.failed.is_empty());
}

/// Verifies retry exhaustion: at the maximum attempt count a rate-limited
/// completion fails immediately, with no further backoff wait.
#[test]
fn rate_limit_at_max_retries_fails_without_waiting() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let mut config = test_config(tasks.path());
    config.max_retries = 1;
    config.rate_limit_backoff_secs = 30;
    let launcher = ScriptedLauncher::new(vec!["echo 'quota exceeded' >&2; exit 1"]);
    let supervisor = Supervisor::new(&launcher, &config, CancelToken::new());

    let start = Instant::now();
    let RunOutcome::Completed(summary) = supervisor.run_all().expect("run") else {
        panic!("expected completion");
    };
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "backoff should not have run"
    );
    assert_eq!(summary.failed, vec!["alpha"]);
    assert!(summary.completed.is_empty());
}

/// Verifies the spawn-failure asymmetry: a task whose agent never spawned is
/// recorded in neither ledger list, and leaves no live-table entry behind.
#[test]
fn spawn_failure_recorded_nowhere() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let config = test_config(tasks.path());
    let launcher = FailingLauncher;
    let supervisor = Supervisor::new(&launcher, &config, CancelToken::new());

    let RunOutcome::Completed(summary) = supervisor.run_all().expect("run") else {
        panic!("expected completion");
    };
    assert_eq!(summary.total, 0);
    assert!(summary.completed.is_empty());
    assert!(summary.failed.is_empty());
    assert!(supervisor.live_tasks().is_empty());
}

/// Verifies summarize is idempotent and consistent after a run.
#[test]
fn summary_is_idempotent() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let config = test_config(tasks.path());
    let launcher = ScriptedLauncher::new(vec!["exit 0"]);
    let supervisor = Supervisor::new(&launcher, &config, CancelToken::new());

    supervisor.run_all().expect("run");
    let first = supervisor.summary();
    let second = supervisor.summary();
    assert_eq!(first, second);
    assert_eq!(first.total, first.completed.len() + first.failed.len());
}

/// Verifies interrupting an in-flight task terminates its process (observed
/// via the process's own TERM handler) and returns without raising.
#[test]
fn interrupt_terminates_in_flight_task() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let config = test_config(tasks.path());
    // The child acknowledges TERM by writing a marker, proving graceful
    // termination was delivered rather than an outright kill.
    let launcher = ScriptedLauncher::new(vec![
        "trap 'touch terminated.marker; exit 0' TERM; sleep 30 >/dev/null 2>&1 & wait $!",
    ]);
    let cancel = CancelToken::new();
    let supervisor = Supervisor::new(&launcher, &config, cancel.clone());

    let outcome = thread::scope(|scope| {
        let run = scope.spawn(|| supervisor.run_all());
        thread::sleep(Duration::from_millis(500));
        cancel.cancel();
        run.join().expect("join run thread")
    })
    .expect("run");

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(supervisor.live_tasks().is_empty());
    assert!(
        tasks.path().join("terminated.marker").exists(),
        "child never saw the terminate signal"
    );
}

/// Verifies a child that ignores the terminate signal is force-killed after
/// the grace window instead of stalling the interrupt path.
#[test]
fn stubborn_child_is_killed_within_grace_window() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let config = test_config(tasks.path());
    let launcher = ScriptedLauncher::new(vec!["trap '' TERM; sleep 30"]);
    let cancel = CancelToken::new();
    let supervisor = Supervisor::new(&launcher, &config, cancel.clone());

    let start = Instant::now();
    let outcome = thread::scope(|scope| {
        let run = scope.spawn(|| supervisor.run_all());
        thread::sleep(Duration::from_millis(500));
        cancel.cancel();
        run.join().expect("join run thread")
    })
    .expect("run");

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(
        start.elapsed() < Duration::from_secs(15),
        "kill escalation did not happen"
    );
}

/// Verifies cancellation before the run starts spawns nothing.
#[test]
fn pre_cancelled_run_spawns_no_tasks() {
    let tasks = TasksDir::new();
    tasks.add_task("alpha", "x");
    let config = test_config(tasks.path());
    let launcher = ScriptedLauncher::new(vec!["exit 0"]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let supervisor = Supervisor::new(&launcher, &config, cancel);

    let outcome = supervisor.run_all().expect("run");
    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(launcher.remaining(), 1);
}
