//! Runner configuration stored in a TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to the stock policy constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory holding task definition files.
    pub tasks_dir: PathBuf,

    /// Extension (without dot) that marks a file as a task definition.
    pub task_extension: String,

    /// Agent binary to invoke per task.
    pub agent_binary: String,

    /// Arguments inserted between the binary and the task file path.
    pub agent_flags: Vec<String>,

    /// Seconds between liveness reports from the run monitor.
    pub monitor_poll_secs: u64,

    /// Seconds to wait before retrying a rate-limited task.
    pub rate_limit_backoff_secs: u64,

    /// Maximum attempts per task, counting the first one.
    pub max_retries: u32,

    /// Seconds between a graceful terminate and a forced kill.
    pub termination_grace_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Extensions (without dot) whose file events trigger a change check.
    pub watch_extensions: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            task_extension: "md".to_string(),
            agent_binary: "claude".to_string(),
            agent_flags: vec![
                "code".to_string(),
                "--dangerously-skip-permission".to_string(),
            ],
            monitor_poll_secs: 10,
            rate_limit_backoff_secs: 2 * 60 * 60,
            max_retries: 3,
            termination_grace_secs: 2,
            output_limit_bytes: 100_000,
            watch_extensions: ["py", "js", "ts", "md", "txt"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.task_extension.trim().is_empty() {
            return Err(anyhow!("task_extension must not be empty"));
        }
        if self.agent_binary.trim().is_empty() {
            return Err(anyhow!("agent_binary must not be empty"));
        }
        if self.monitor_poll_secs == 0 {
            return Err(anyhow!("monitor_poll_secs must be > 0"));
        }
        if self.rate_limit_backoff_secs == 0 {
            return Err(anyhow!("rate_limit_backoff_secs must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
