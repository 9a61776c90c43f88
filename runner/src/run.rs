//! Sequential task supervision: spawn the agent per task, classify the
//! completion, retry on rate limiting, and keep a deterministic ledger.
//!
//! One control thread drives the loop; each task's blocking wait runs on a
//! dedicated worker thread that the control thread immediately joins, so
//! tasks stay strictly sequential while the monitor thread observes live
//! invocations concurrently.

use std::collections::HashMap;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::{CancelToken, InterruptRequested};
use crate::core::classify::{TaskCompletion, classify_exit};
use crate::core::ledger::{RunLedger, RunSummary};
use crate::io::config::RunnerConfig;
use crate::io::process::{self, WaitOutcome, spawn_piped};
use crate::io::tasks::{TaskFile, list_tasks};

/// Interval between backoff cancellation checks.
const BACKOFF_TICK: Duration = Duration::from_millis(500);
/// How often the backoff wait logs remaining time.
const BACKOFF_LOG_EVERY: Duration = Duration::from_secs(60);
/// Interval between monitor shutdown checks (reports follow the
/// configured poll interval; this only bounds shutdown latency).
const MONITOR_TICK: Duration = Duration::from_millis(250);

/// Seam for spawning one agent invocation.
///
/// Decouples the supervisor from the actual agent binary; tests script this
/// with shell commands instead.
pub trait AgentLauncher: Sync {
    fn spawn(&self, task: &TaskFile) -> Result<Child>;
}

/// Launcher that invokes the configured agent binary with its fixed
/// argument template, working directory = the task file's parent.
pub struct CommandLauncher {
    binary: String,
    flags: Vec<String>,
}

impl CommandLauncher {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            binary: config.agent_binary.clone(),
            flags: config.agent_flags.clone(),
        }
    }
}

impl AgentLauncher for CommandLauncher {
    fn spawn(&self, task: &TaskFile) -> Result<Child> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.flags)
            .arg(&task.path)
            .current_dir(task.workdir());
        spawn_piped(cmd)
    }
}

/// One live or just-finished invocation, keyed by task name in the live table.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub task: String,
    pub pid: u32,
    pub started: Instant,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Table of live invocations: written by the supervisor, read by the monitor.
#[derive(Default)]
struct LiveTable {
    inner: Mutex<HashMap<String, RunRecord>>,
}

impl LiveTable {
    fn insert(&self, record: RunRecord) {
        lock(&self.inner).insert(record.task.clone(), record);
    }

    fn remove(&self, task: &str) {
        lock(&self.inner).remove(task);
    }

    fn snapshot(&self) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = lock(&self.inner).values().cloned().collect();
        records.sort_by(|a, b| a.task.cmp(&b.task));
        records
    }

    fn drain(&self) -> Vec<RunRecord> {
        lock(&self.inner).drain().map(|(_, record)| record).collect()
    }
}

/// Terminal outcome of one task, all retries included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
}

/// How a whole run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task reached a terminal outcome; the summary is final.
    Completed(RunSummary),
    /// The run was interrupted; live processes were terminated and no
    /// summary is guaranteed.
    Interrupted,
}

/// Drives agent invocations for a directory of tasks.
pub struct Supervisor<'a, L: AgentLauncher> {
    launcher: &'a L,
    config: &'a RunnerConfig,
    cancel: CancelToken,
    live: LiveTable,
    ledger: Mutex<RunLedger>,
}

impl<'a, L: AgentLauncher> Supervisor<'a, L> {
    pub fn new(launcher: &'a L, config: &'a RunnerConfig, cancel: CancelToken) -> Self {
        Self {
            launcher,
            config,
            cancel,
            live: LiveTable::default(),
            ledger: Mutex::new(RunLedger::new()),
        }
    }

    /// Snapshot the ledger; valid mid-run as well as at the end.
    pub fn summary(&self) -> RunSummary {
        lock(&self.ledger).summarize()
    }

    /// Names of invocations currently in the live table.
    pub fn live_tasks(&self) -> Vec<String> {
        self.live
            .snapshot()
            .into_iter()
            .map(|record| record.task)
            .collect()
    }

    /// Execute every task in the tasks directory, strictly sequentially.
    ///
    /// Fails only on a missing tasks directory or a panicked worker; an
    /// interrupt is reported as [`RunOutcome::Interrupted`], never as an
    /// error, after live processes have been terminated.
    #[instrument(skip_all, fields(tasks_dir = %self.config.tasks_dir.display()))]
    pub fn run_all(&self) -> Result<RunOutcome> {
        let tasks = list_tasks(&self.config.tasks_dir, &self.config.task_extension)?;
        if tasks.is_empty() {
            warn!("no task files found");
            return Ok(RunOutcome::Completed(self.summary()));
        }
        info!(count = tasks.len(), "starting task run");

        let done = AtomicBool::new(false);
        thread::scope(|scope| {
            let monitor = scope.spawn(|| self.monitor_live(&done));

            let mut interrupted = false;
            let mut worker_panicked = false;
            for (index, task) in tasks.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                info!(
                    task = %task.name,
                    position = index + 1,
                    total = tasks.len(),
                    "=== starting task ==="
                );
                // Dedicated worker per task, joined immediately: decouples the
                // blocking wait from this thread without parallelizing tasks.
                let joined = scope.spawn(|| self.run_task(task)).join();
                match joined {
                    Ok(Ok(outcome)) => {
                        debug!(task = %task.name, outcome = ?outcome, "task finished");
                    }
                    Ok(Err(err)) if err.downcast_ref::<InterruptRequested>().is_some() => {
                        interrupted = true;
                        break;
                    }
                    Ok(Err(err)) => {
                        error!(task = %task.name, err = %format!("{err:#}"), "unexpected task error");
                        interrupted = true;
                        break;
                    }
                    Err(_) => {
                        error!(task = %task.name, "task worker panicked");
                        worker_panicked = true;
                        break;
                    }
                }
            }

            done.store(true, Ordering::SeqCst);
            let _ = monitor.join();

            if worker_panicked {
                self.cleanup();
                return Err(anyhow!("task worker panicked"));
            }
            if interrupted {
                info!("run interrupted, cleaning up live processes");
                self.cleanup();
                return Ok(RunOutcome::Interrupted);
            }
            Ok(RunOutcome::Completed(self.summary()))
        })
    }

    /// Run one task to a terminal outcome, retries included.
    ///
    /// Explicit bounded loop over attempts: a rate-limited completion waits
    /// out the backoff window and retries until `max_retries` is reached.
    /// Spawn-level failures return `Failed` without touching the ledger.
    #[instrument(skip_all, fields(task = %task.name))]
    fn run_task(&self, task: &TaskFile) -> Result<TaskOutcome> {
        let mut attempt: u32 = 1;
        loop {
            info!(attempt, "starting agent invocation");
            let child = match self.launcher.spawn(task) {
                Ok(child) => child,
                Err(err) => {
                    // Spawn failures are logged and dropped from both ledger
                    // lists; only classified completions are tallied.
                    error!(err = %format!("{err:#}"), "failed to spawn agent");
                    self.live.remove(&task.name);
                    return Ok(TaskOutcome::Failed);
                }
            };
            self.live.insert(RunRecord {
                task: task.name.clone(),
                pid: child.id(),
                started: Instant::now(),
                attempt,
            });

            let waited = process::supervise(
                child,
                &self.cancel,
                self.config.termination_grace(),
                self.config.output_limit_bytes,
            );
            // The record must be gone on every exit path before returning.
            let output = match waited {
                Ok(WaitOutcome::Exited(output)) => {
                    self.live.remove(&task.name);
                    output
                }
                Ok(WaitOutcome::Interrupted) => {
                    self.live.remove(&task.name);
                    return Err(anyhow::Error::new(InterruptRequested));
                }
                Err(err) => {
                    // Communication failure after spawn: same silent-drop
                    // path as spawn errors.
                    error!(err = %format!("{err:#}"), "agent communication failed");
                    self.live.remove(&task.name);
                    return Ok(TaskOutcome::Failed);
                }
            };

            let stderr = output.stderr_text();
            match classify_exit(output.status.success(), &stderr) {
                TaskCompletion::Succeeded => {
                    info!("task completed successfully");
                    lock(&self.ledger).record_completed(&task.name);
                    return Ok(TaskOutcome::Succeeded);
                }
                TaskCompletion::Failed => {
                    error!(exit_code = ?output.status.code(), "task failed");
                    error!(stderr = %stderr.trim(), "agent stderr");
                    lock(&self.ledger).record_failed(&task.name);
                    return Ok(TaskOutcome::Failed);
                }
                TaskCompletion::RateLimited => {
                    warn!(attempt, "rate limit detected");
                    if attempt >= self.config.max_retries {
                        error!("maximum retries reached");
                        lock(&self.ledger).record_failed(&task.name);
                        return Ok(TaskOutcome::Failed);
                    }
                    if !self.wait_for_backoff() {
                        return Err(anyhow::Error::new(InterruptRequested));
                    }
                    attempt += 1;
                    info!(attempt, "retrying after rate limit backoff");
                }
            }
        }
    }

    /// Block for the configured backoff, logging remaining time once per
    /// minute. Returns false if cancelled before the window elapses.
    fn wait_for_backoff(&self) -> bool {
        let total = self.config.rate_limit_backoff();
        info!(backoff_secs = total.as_secs(), "waiting out rate limit window");
        let deadline = Instant::now() + total;
        let mut last_logged = Instant::now();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            if self.cancel.is_cancelled() {
                info!("backoff wait cancelled");
                return false;
            }
            thread::sleep(BACKOFF_TICK.min(remaining));
            if last_logged.elapsed() >= BACKOFF_LOG_EVERY {
                let left = deadline.saturating_duration_since(Instant::now());
                info!(
                    remaining_secs = left.as_secs(),
                    "rate limit backoff in progress"
                );
                last_logged = Instant::now();
            }
        }
    }

    /// Monitor loop: report each live invocation's runtime at the configured
    /// poll interval. Purely observational; never mutates the table.
    fn monitor_live(&self, done: &AtomicBool) {
        let poll = self.config.monitor_poll();
        let mut last_report = Instant::now();
        while !done.load(Ordering::SeqCst) {
            thread::sleep(MONITOR_TICK);
            if last_report.elapsed() < poll {
                continue;
            }
            last_report = Instant::now();
            for record in self.live.snapshot() {
                info!(
                    task = %record.task,
                    pid = record.pid,
                    attempt = record.attempt,
                    runtime_secs = record.started.elapsed().as_secs(),
                    "task still running"
                );
            }
        }
    }

    /// Terminate anything left in the live table. The in-flight worker
    /// normally terminates its own child on cancellation, so this only
    /// catches stale entries.
    fn cleanup(&self) {
        for record in self.live.drain() {
            warn!(task = %record.task, pid = record.pid, "terminating live agent process");
            process::terminate_pid(record.pid, self.config.termination_grace());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
