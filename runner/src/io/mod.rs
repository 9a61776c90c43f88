//! I/O helpers for runner commands.

pub mod config;
pub mod git;
pub mod process;
pub mod tasks;
