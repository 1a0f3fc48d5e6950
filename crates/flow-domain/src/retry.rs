use serde::{Deserialize, Serialize};

/// Per-step retry configuration. The decision of *whether* to
/// retry and the audited rationale behind it live in `flow-policies`; this
/// struct only carries the declared policy and the pure arithmetic that
/// follows from it deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
    pub exponential_backoff: bool,
    pub max_delay_ms: u64,
    /// Empty or containing `"*"` matches any error code.
    pub retry_on_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
            exponential_backoff: false,
            max_delay_ms: u64::MAX,
            retry_on_errors: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// True iff the policy allows retrying the given error code at `attempt`
    /// (1-based, the attempt that just failed).
    pub fn allows(&self, attempt: u32, error_code: &str) -> bool {
        if attempt >= self.max_retries + 1 {
            return false;
        }
        self.matches_error_code(error_code)
    }

    pub fn matches_error_code(&self, error_code: &str) -> bool {
        self.retry_on_errors.is_empty()
            || self.retry_on_errors.iter().any(|c| c == "*" || c == error_code)
    }

    /// Delay before attempt `n` (0-indexed):
    /// `min(delay_ms * 2^n, max_delay_ms)` when exponential,
    /// else a constant `delay_ms`.
    pub fn delay_for_attempt(&self, n: u32) -> u64 {
        if !self.exponential_backoff {
            return self.delay_ms;
        }
        let scaled = self.delay_ms.saturating_mul(1u64 << n.min(63));
        scaled.min(self.max_delay_ms)
    }
}
