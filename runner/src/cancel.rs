//! Cooperative cancellation shared between the run loop and its workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag flipped by the interrupt handler and polled at every
/// blocking wait (child-process waits and the rate-limit backoff).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Marker error raised through `anyhow` when the user interrupts a run.
///
/// The orchestration loop recovers it via `downcast_ref` so that no error
/// escapes the loop boundary on interrupt; see [`crate::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptRequested;

impl std::fmt::Display for InterruptRequested {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interrupted by user")
    }
}

impl std::error::Error for InterruptRequested {}
