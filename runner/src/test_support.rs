//! Test-only helpers: real git repositories in temp directories, task file
//! fixtures, and scripted agent launchers that run shell snippets instead of
//! a real agent binary.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};

use crate::io::config::RunnerConfig;
use crate::io::git::Git;
use crate::io::process::spawn_piped;
use crate::io::tasks::TaskFile;
use crate::run::AgentLauncher;

/// A real git repository in a temp directory, with one initial commit.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git_ok(&["init", "-b", "main"])?;
        repo.git_ok(&["config", "user.name", "Test User"])?;
        repo.git_ok(&["config", "user.email", "test@example.com"])?;
        repo.write_file("README.md", "initial\n")?;
        repo.git_ok(&["add", "-A"])?;
        repo.git_ok(&["commit", "-m", "initial commit"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.root())
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.root().join(rel);
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git_ok(&["add", "-A"])?;
        self.git_ok(&["commit", "-m", message])?;
        Ok(())
    }

    /// Run an arbitrary git command in the repo, failing on nonzero exit.
    pub fn git_ok(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// A temp directory of task files.
pub struct TasksDir {
    dir: tempfile::TempDir,
}

impl TasksDir {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<name>.md` with the given contents.
    pub fn add_task(&self, name: &str, contents: &str) {
        fs::write(self.path().join(format!("{name}.md")), contents).expect("write task file");
    }
}

/// Launcher that runs `sh -c <script>` per spawn, consuming scripts in call
/// order. Real processes, real pids, real exit codes.
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<String>>,
}

impl ScriptedLauncher {
    pub fn new<S: Into<String>>(scripts: Vec<S>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(Into::into).collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl AgentLauncher for ScriptedLauncher {
    fn spawn(&self, task: &TaskFile) -> Result<Child> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| anyhow!("no script left for task '{}'", task.name))?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).current_dir(task.workdir());
        spawn_piped(cmd)
    }
}

/// Launcher whose spawn always fails, for spawn-asymmetry tests.
pub struct FailingLauncher;

impl AgentLauncher for FailingLauncher {
    fn spawn(&self, task: &TaskFile) -> Result<Child> {
        Err(anyhow!("spawn refused for task '{}'", task.name))
    }
}

/// Config with test-friendly timings: 1 s backoff, 1 s poll, 1 s grace.
pub fn test_config(tasks_dir: &Path) -> RunnerConfig {
    RunnerConfig {
        tasks_dir: tasks_dir.to_path_buf(),
        rate_limit_backoff_secs: 1,
        monitor_poll_secs: 1,
        termination_grace_secs: 1,
        ..RunnerConfig::default()
    }
}
