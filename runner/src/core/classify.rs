//! Pure classification of agent process completions.

/// Fixed indicator substrings that mark upstream throttling in agent stderr.
///
/// Matched case-insensitively. The set is part of the external contract with
/// the agent binary and must not be extended casually.
const RATE_LIMIT_INDICATORS: [&str; 5] = [
    "rate limit",
    "too many requests",
    "quota exceeded",
    "429",
    "rate_limit_exceeded",
];

/// How one agent invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletion {
    /// Clean exit (code 0). Terminal.
    Succeeded,
    /// Nonzero exit whose stderr matches a rate-limit indicator. Retryable.
    RateLimited,
    /// Nonzero exit with no rate-limit indicator. Terminal.
    Failed,
}

/// True when `stderr` contains any rate-limit indicator, in any case.
pub fn is_rate_limit_error(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    RATE_LIMIT_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator))
}

/// Classify an exit. Stderr is only inspected for nonzero exits.
pub fn classify_exit(success: bool, stderr: &str) -> TaskCompletion {
    if success {
        TaskCompletion::Succeeded
    } else if is_rate_limit_error(stderr) {
        TaskCompletion::RateLimited
    } else {
        TaskCompletion::Failed
    }
}
