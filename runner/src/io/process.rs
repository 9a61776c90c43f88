//! Child process plumbing: spawning with piped output, cancellable waits,
//! bounded output capture, and graceful termination.
//!
//! Output is drained on reader threads while the child runs so pipes can
//! never deadlock; `output_limit_bytes` bounds what is kept in memory.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// Interval between cancellation checks while waiting on a child.
const WAIT_POLL: Duration = Duration::from_millis(200);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Outcome of supervising a child to completion.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The child exited on its own.
    Exited(CommandOutput),
    /// Cancellation was requested; the child has been terminated
    /// (graceful signal, grace window, then kill) and fully reaped.
    Interrupted,
}

/// Spawn a command with stdin closed and stdout/stderr piped.
pub fn spawn_piped(mut cmd: Command) -> Result<Child> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("spawning child process");
    cmd.spawn().context("spawn command")
}

/// Block until `child` exits or `cancel` is set, draining output throughout.
///
/// The wait is chunked so cancellation takes effect within [`WAIT_POLL`].
/// On cancellation the child receives a graceful terminate, then a kill once
/// `grace` elapses. The reader threads are left to drain on their own in
/// that case: a grandchild holding the pipe open must not stall the
/// interrupt path.
pub fn supervise(
    mut child: Child,
    cancel: &CancelToken,
    grace: Duration,
    output_limit_bytes: usize,
) -> Result<WaitOutcome> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let status = loop {
        if cancel.is_cancelled() {
            terminate_gracefully(&mut child, grace)?;
            drop(stdout_handle);
            drop(stderr_handle);
            return Ok(WaitOutcome::Interrupted);
        }
        match child.wait_timeout(WAIT_POLL).context("wait for child")? {
            Some(status) => break status,
            None => continue,
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), "child finished");
    Ok(WaitOutcome::Exited(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    }))
}

/// Terminate a child: graceful signal first, kill after the grace window.
///
/// Guarantees the child is reaped before returning.
pub fn terminate_gracefully(child: &mut Child, grace: Duration) -> Result<()> {
    debug!(pid = child.id(), "terminating child");
    send_terminate(child);
    if child
        .wait_timeout(grace)
        .context("wait for child after terminate")?
        .is_some()
    {
        return Ok(());
    }
    warn!(pid = child.id(), "child ignored terminate, killing");
    child.kill().context("kill child")?;
    child.wait().context("wait for child after kill")?;
    Ok(())
}

/// Terminate a process by pid when no `Child` handle is available
/// (cleanup of stale live-table entries). Best-effort; errors are logged.
pub fn terminate_pid(pid: u32, grace: Duration) {
    send_terminate_pid(pid);
    thread::sleep(grace);
    send_kill_pid(pid);
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    send_terminate_pid(child.id());
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) {
    // No graceful signal on this platform; the caller escalates to kill.
}

#[cfg(unix)]
fn send_terminate_pid(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, err = %err, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate_pid(_pid: u32) {}

#[cfg(unix)]
fn send_kill_pid(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // ESRCH just means the process already exited.
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
        && err != nix::errno::Errno::ESRCH
    {
        warn!(pid, err = %err, "failed to send SIGKILL");
    }
}

#[cfg(not(unix))]
fn send_kill_pid(_pid: u32) {}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
