//! Git adapter for workspace tracking.
//!
//! Change tracking and branch control shell out to `git` through one small,
//! explicit wrapper so every repository read stays observable and testable
//! against real temporary repositories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument};

/// Commits are rendered with an 8-character short hash.
const SHORT_HASH_LEN: usize = 8;

/// Field and record separators for `git log` parsing; neither occurs in
/// commit messages in practice.
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// One commit as surfaced to subscribers and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    /// First 8 characters of the commit id.
    pub short_hash: String,
    /// Full commit message, trimmed.
    pub message: String,
    /// Author name.
    pub author: String,
    /// Commit timestamp, seconds since the epoch.
    pub timestamp: i64,
}

/// Working-tree changes classified into the four status sets.
///
/// Paths are relative to the repository root. Sets (not lists) because a
/// path belongs to at most one category per snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkingTreeStatus {
    pub modified: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    pub untracked: BTreeSet<String>,
}

impl WorkingTreeStatus {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
            && self.added.is_empty()
            && self.deleted.is_empty()
            && self.untracked.is_empty()
    }
}

/// Branch position relative to `origin/main`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub current_branch: String,
    pub remote: String,
    pub ahead: usize,
    pub behind: usize,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when the working directory is inside a git repository.
    pub fn is_repository(&self) -> bool {
        self.run(&["rev-parse", "--git-dir"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Full commit id of HEAD. Errors on an empty repository.
    pub fn head_commit(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Classify `git status --porcelain` into the four change sets.
    #[instrument(skip_all)]
    pub fn status(&self) -> Result<WorkingTreeStatus> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut status = WorkingTreeStatus::default();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let (code, path) = parse_status_line(line)?;
            classify_status_entry(&mut status, &code, path);
        }
        debug!(
            modified = status.modified.len(),
            added = status.added.len(),
            deleted = status.deleted.len(),
            untracked = status.untracked.len(),
            "working tree status"
        );
        Ok(status)
    }

    /// Most-recent-first commits, at most `count` of them.
    pub fn recent_commits(&self, count: usize) -> Result<Vec<Commit>> {
        let limit = count.to_string();
        let format = log_format();
        let out = self.run_capture(&["log", "-n", &limit, &format])?;
        parse_commit_records(&out)
    }

    /// The single commit identified by `id` (any revision syntax).
    pub fn commit(&self, id: &str) -> Result<Commit> {
        let format = log_format();
        let out = self.run_capture(&["log", "-1", &format, id])?;
        parse_commit_records(&out)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no commit found for '{id}'"))
    }

    /// Patch for one commit against its first parent; for a root commit,
    /// against the empty tree.
    pub fn commit_diff(&self, id: &str) -> Result<String> {
        let parent = format!("{id}^");
        if self.ref_exists(&parent)? {
            // `git show` renders merge commits as a combined diff with an
            // empty patch body; diffing against the first parent keeps the
            // merged changes visible.
            self.run_capture(&["diff", &parent, id])
        } else {
            self.run_capture(&["show", "--format=", "--patch", id])
        }
    }

    /// Current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    /// Branch position relative to `origin/main`.
    ///
    /// Ahead/behind counts are 0 when the remote ref does not exist.
    #[instrument(skip_all)]
    pub fn branch_info(&self) -> Result<BranchInfo> {
        let current_branch = self.current_branch()?;
        let remotes = self.run_capture(&["remote"])?;
        let remote = remotes
            .lines()
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("No remote")
            .to_string();

        let (ahead, behind) = if self.ref_exists("origin/main")? {
            (
                self.count_commits("origin/main..HEAD")?,
                self.count_commits("HEAD..origin/main")?,
            )
        } else {
            (0, 0)
        };

        Ok(BranchInfo {
            current_branch,
            remote,
            ahead,
            behind,
        })
    }

    /// Create and checkout a new branch at current HEAD.
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn ref_exists(&self, reference: &str) -> Result<bool> {
        let status = self
            .run(&["rev-parse", "--verify", "--quiet", reference])?
            .status;
        Ok(status.success())
    }

    fn count_commits(&self, range: &str) -> Result<usize> {
        let out = self.run_capture(&["rev-list", "--count", range])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse rev-list count for '{range}'"))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn log_format() -> String {
    format!("--pretty=format:%H{FIELD_SEP}%an{FIELD_SEP}%ct{FIELD_SEP}%B{RECORD_SEP}")
}

fn parse_commit_records(raw: &str) -> Result<Vec<Commit>> {
    let mut commits = Vec::new();
    for record in raw.split(RECORD_SEP) {
        let record = record.trim_matches(['\n', '\r']);
        if record.is_empty() {
            continue;
        }
        let mut fields = record.splitn(4, FIELD_SEP);
        let (Some(hash), Some(author), Some(timestamp), Some(message)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(anyhow!("unexpected git log record: '{record}'"));
        };
        let timestamp: i64 = timestamp
            .trim()
            .parse()
            .with_context(|| format!("parse commit timestamp '{timestamp}'"))?;
        commits.push(Commit {
            short_hash: hash.chars().take(SHORT_HASH_LEN).collect(),
            message: message.trim().to_string(),
            author: author.to_string(),
            timestamp,
        });
    }
    Ok(commits)
}

/// Split a porcelain v1 line into its XY code and path (new path for renames).
fn parse_status_line(line: &str) -> Result<(String, String)> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(("??".to_string(), path.trim().to_string()));
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok((code, path))
}

fn classify_status_entry(status: &mut WorkingTreeStatus, code: &str, path: String) {
    if code == "??" {
        status.untracked.insert(path);
    } else if code.contains('A') {
        status.added.insert(path);
    } else if code.contains('D') {
        status.deleted.insert(path);
    } else {
        // M, R, T, C and conflict codes all surface as modifications.
        status.modified.insert(path);
    }
}
