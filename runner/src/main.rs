//! Sandboxed coding-agent task runner CLI.
//!
//! `run` executes every task file in the tasks directory sequentially
//! through the configured agent binary; the remaining commands inspect and
//! operate on a git-backed workspace through the change tracker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use sandbox_runner::cancel::CancelToken;
use sandbox_runner::exit_codes;
use sandbox_runner::io::config::{RunnerConfig, load_config};
use sandbox_runner::io::tasks::list_tasks;
use sandbox_runner::logging;
use sandbox_runner::run::{CommandLauncher, RunOutcome, Supervisor};
use sandbox_runner::tracker::{ChangeEvent, ChangeTracker};

const DEFAULT_CONFIG_PATH: &str = "sandbox-runner.toml";

#[derive(Parser)]
#[command(
    name = "sandbox-runner",
    version,
    about = "Supervises sandboxed coding-agent task runs and tracks workspace changes"
)]
struct Cli {
    /// Path to the TOML config file (defaults are used when missing).
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute every task file in the tasks directory, sequentially.
    Run {
        /// Override the configured tasks directory.
        #[arg(long)]
        tasks_dir: Option<PathBuf>,
    },
    /// List discovered task files in execution order.
    Tasks {
        /// Override the configured tasks directory.
        #[arg(long)]
        tasks_dir: Option<PathBuf>,
    },
    /// Show working-tree changes for a workspace.
    Status { path: PathBuf },
    /// Show recent commits for a workspace.
    Log {
        path: PathBuf,
        /// Maximum number of commits to show.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Show the patch for one commit.
    Diff { path: PathBuf, commit: String },
    /// Create and switch to a new branch.
    Branch { path: PathBuf, name: String },
    /// Switch to an existing branch.
    Checkout { path: PathBuf, name: String },
    /// Stage all changes and commit.
    Commit {
        path: PathBuf,
        #[arg(short, long)]
        message: String,
    },
    /// Watch a workspace and print change events as JSON until interrupted.
    Watch { path: PathBuf },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Command::Run { tasks_dir } => {
            if let Some(dir) = tasks_dir {
                config.tasks_dir = dir;
            }
            cmd_run(&config)
        }
        Command::Tasks { tasks_dir } => {
            if let Some(dir) = tasks_dir {
                config.tasks_dir = dir;
            }
            cmd_tasks(&config)
        }
        Command::Status { path } => {
            let tracker = tracker_for(&path);
            let status = tracker.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(exit_codes::OK)
        }
        Command::Log { path, count } => {
            let tracker = tracker_for(&path);
            let commits = tracker.recent_commits(count);
            println!("{}", serde_json::to_string_pretty(&commits)?);
            Ok(exit_codes::OK)
        }
        Command::Diff { path, commit } => {
            let tracker = tracker_for(&path);
            println!("{}", tracker.commit_diff(&commit));
            Ok(exit_codes::OK)
        }
        Command::Branch { path, name } => {
            bool_op(tracker_for(&path).create_branch(&name), "create branch")
        }
        Command::Checkout { path, name } => {
            bool_op(tracker_for(&path).switch_branch(&name), "switch branch")
        }
        Command::Commit { path, message } => {
            bool_op(tracker_for(&path).commit_all(&message), "commit")
        }
        Command::Watch { path } => cmd_watch(&config, &path),
    }
}

fn cmd_run(config: &RunnerConfig) -> Result<i32> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received");
        handler_token.cancel();
    })
    .context("install interrupt handler")?;

    let launcher = CommandLauncher::from_config(config);
    let supervisor = Supervisor::new(&launcher, config, cancel);
    match supervisor.run_all()? {
        RunOutcome::Completed(summary) => {
            print!("{summary}");
            if summary.failed.is_empty() {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::TASKS_FAILED)
            }
        }
        RunOutcome::Interrupted => {
            eprintln!("run interrupted; live processes terminated, no summary");
            Ok(exit_codes::INTERRUPTED)
        }
    }
}

fn cmd_tasks(config: &RunnerConfig) -> Result<i32> {
    let tasks = list_tasks(&config.tasks_dir, &config.task_extension)?;
    for task in &tasks {
        println!("{}\t{}", task.name, task.path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_watch(config: &RunnerConfig, path: &Path) -> Result<i32> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install interrupt handler")?;

    let tracker = Arc::new(ChangeTracker::with_extensions(
        path.display().to_string(),
        path,
        &config.watch_extensions,
    ));
    tracker.subscribe(Box::new(|event: &ChangeEvent| {
        if let Ok(json) = serde_json::to_string(event) {
            println!("{json}");
        }
    }));
    tracker.start_watching()?;
    info!(path = %path.display(), "watching for changes, press ctrl-c to stop");
    while !cancel.is_cancelled() {
        std::thread::sleep(Duration::from_millis(200));
    }
    tracker.stop_watching();
    Ok(exit_codes::OK)
}

fn tracker_for(path: &Path) -> ChangeTracker {
    ChangeTracker::new(path.display().to_string(), path)
}

fn bool_op(ok: bool, what: &str) -> Result<i32> {
    if ok {
        Ok(exit_codes::OK)
    } else {
        eprintln!("{what} failed");
        Ok(exit_codes::ERROR)
    }
}
