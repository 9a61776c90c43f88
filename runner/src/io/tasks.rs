//! Task discovery: plain-text task files under a flat directory.
//!
//! A task's identity is its file's base name; the filename sort defines
//! execution order. Discovery is read-only and happens once per run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// One unit of work, identified by its file's base name.
///
/// Immutable after discovery; discarded once its run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFile {
    /// Stable identity: filename without the extension.
    pub name: String,
    /// Absolute path to the task definition.
    pub path: PathBuf,
}

impl TaskFile {
    /// Directory the agent runs in for this task.
    pub fn workdir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Typed error for a missing tasks directory; fatal to `run_all`.
///
/// Recovered via `downcast_ref` where callers need to distinguish it from
/// other listing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TasksDirNotFound {
    pub dir: PathBuf,
}

impl std::fmt::Display for TasksDirNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tasks directory '{}' not found", self.dir.display())
    }
}

impl std::error::Error for TasksDirNotFound {}

/// List task files with the given extension directly under `dir`.
///
/// Sorted lexicographically by filename ascending; this, not creation time,
/// defines execution order. Returns an empty list (not an error) when the
/// directory exists but holds no matching files.
pub fn list_tasks(dir: &Path, extension: &str) -> Result<Vec<TaskFile>> {
    if !dir.exists() {
        return Err(anyhow::Error::new(TasksDirNotFound {
            dir: dir.to_path_buf(),
        }));
    }

    let mut tasks = Vec::new();
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!(path = %path.display(), "skipping task file with non-utf8 name");
            continue;
        };
        let absolute = fs::canonicalize(&path)
            .with_context(|| format!("canonicalize {}", path.display()))?;
        tasks.push(TaskFile {
            name: name.to_string(),
            path: absolute,
        });
    }

    tasks.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    debug!(count = tasks.len(), dir = %dir.display(), "discovered task files");
    Ok(tasks)
}

/// Read a task definition, returning the empty string on any I/O failure.
///
/// The failure is logged, not raised. Callers that need to tell "unreadable"
/// from "empty file" must check existence separately.
pub fn read_task_content(task: &TaskFile) -> String {
    match try_read_task(task) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(task = %task.name, err = %format!("{err:#}"), "failed to read task file");
            String::new()
        }
    }
}

fn try_read_task(task: &TaskFile) -> Result<String> {
    fs::read_to_string(&task.path).with_context(|| format!("read {}", task.path.display()))
}
