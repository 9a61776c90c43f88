//! Sandboxed coding-agent task supervisor and workspace change tracker.
//!
//! This crate drives an external coding agent through a directory of task
//! files, one task at a time, with retry handling for upstream rate limiting
//! and a background monitor over live invocations. It also tracks a
//! git-backed workspace and publishes commit/file-change events to
//! registered subscribers. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (completion classification,
//!   the run ledger). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (task discovery, git, process
//!   execution, config). Isolated to enable scripting in tests.
//!
//! Orchestration lives in [`run`] (the sequential supervisor loop) and
//! [`tracker`] (change detection and subscriber delivery).

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tracker;
