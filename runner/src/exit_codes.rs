//! Stable exit codes for runner CLI commands.

/// Command succeeded; for `run`, every task completed successfully.
pub const OK: i32 = 0;
/// Invalid config/arguments, a missing tasks directory, or another error.
pub const ERROR: i32 = 1;
/// The run finished, but at least one task failed.
pub const TASKS_FAILED: i32 = 2;
/// The run was interrupted before completion; no summary was produced.
pub const INTERRUPTED: i32 = 130;
