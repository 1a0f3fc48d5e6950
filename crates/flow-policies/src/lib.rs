//! flow-policies: the auditable retry decision layer.
//!
//! `flow-domain::RetryConfig` carries the declared policy; `flow-core`'s
//! scheduler applies its arithmetic mechanically. What lives here is the
//! *decision record*: a deterministic, hashable explanation of why a given
//! `BlockError` at a given attempt was or wasn't retried, suitable for an
//! audit trail alongside the run.

use flow_core::errors::BlockError;
use flow_domain::RetryConfig;
use serde::{Deserialize, Serialize};

use flow_core::hashing::{hash_str, to_canonical_json};

/// A retry/no-retry verdict plus the reasoning that produced it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Static id of the policy that decided (stable across versions of this
    /// crate; bump only on a behavior change).
    pub policy_id: String,
    /// Canonical hash of the `RetryConfig` that produced this decision, so
    /// two decisions can be compared for "same policy, same input" without
    /// re-deriving them.
    pub config_hash: String,
    pub rationale: RetryRationale,
}

/// Typed explanation of a `RetryDecision`, canonicalizable for persistence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryRationale {
    pub attempt: u32,
    pub error_code: String,
    pub forced_non_retryable: bool,
    pub matched_error_filter: bool,
    pub attempts_exhausted: bool,
    pub delay_ms: u64,
}

impl RetryRationale {
    pub fn to_canonical_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("serialize rationale")
    }
}

/// Contract for a deterministic retry policy: same `(config, attempt,
/// error)` in, same `RetryDecision` out, every time.
pub trait RetryPolicy {
    fn id(&self) -> &'static str;
    fn decide(&self, config: &RetryConfig, attempt: u32, error: &BlockError) -> RetryDecision;
}

/// The default policy: honors `BlockError.retryable`, then
/// `RetryConfig.allows(attempt, error.code)`, and reports the backoff delay
/// for the next attempt via `RetryConfig.delay_for_attempt`.
pub struct DefaultRetryPolicy;

impl DefaultRetryPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn id(&self) -> &'static str {
        "default_retry"
    }

    fn decide(&self, config: &RetryConfig, attempt: u32, error: &BlockError) -> RetryDecision {
        let forced_non_retryable = !error.retryable;
        let matched_error_filter = config.matches_error_code(&error.code);
        let attempts_exhausted = attempt >= config.max_retries + 1;

        let should_retry = !forced_non_retryable && !attempts_exhausted && matched_error_filter;
        let delay_ms = if should_retry { config.delay_for_attempt(attempt) } else { 0 };

        let rationale = RetryRationale {
            attempt,
            error_code: error.code.clone(),
            forced_non_retryable,
            matched_error_filter,
            attempts_exhausted,
            delay_ms,
        };

        RetryDecision {
            should_retry,
            policy_id: self.id().into(),
            config_hash: config_hash(config),
            rationale,
        }
    }
}

/// Canonical hash of a `RetryConfig`, stable across process runs.
pub fn config_hash(config: &RetryConfig) -> String {
    let v = serde_json::to_value(config).expect("config serialize");
    let cj = to_canonical_json(&v);
    hash_str(&cj)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(code: &str, retryable: bool) -> BlockError {
        BlockError { code: code.into(), message: "boom".into(), details: None, retryable, retry_after_ms: None }
    }

    #[test]
    fn retries_within_bounds_on_matching_error() {
        let policy = DefaultRetryPolicy::new();
        let config = RetryConfig {
            max_retries: 2,
            delay_ms: 100,
            exponential_backoff: true,
            max_delay_ms: 10_000,
            retry_on_errors: vec!["ERR_EXEC_FAILED".into()],
        };
        let d1 = policy.decide(&config, 1, &err("ERR_EXEC_FAILED", true));
        assert!(d1.should_retry);
        assert_eq!(d1.rationale.delay_ms, 100);

        let d2 = policy.decide(&config, 2, &err("ERR_EXEC_FAILED", true));
        assert!(d2.should_retry);
        assert_eq!(d2.rationale.delay_ms, 200);

        let d3 = policy.decide(&config, 3, &err("ERR_EXEC_FAILED", true));
        assert!(!d3.should_retry);
        assert!(d3.rationale.attempts_exhausted);
    }

    #[test]
    fn never_retries_when_error_is_marked_non_retryable() {
        let policy = DefaultRetryPolicy::new();
        let config = RetryConfig { max_retries: 5, ..Default::default() };
        let decision = policy.decide(&config, 1, &err("ERR_CONFIG_INVALID", false));
        assert!(!decision.should_retry);
        assert!(decision.rationale.forced_non_retryable);
    }

    #[test]
    fn filters_by_error_code() {
        let policy = DefaultRetryPolicy::new();
        let config = RetryConfig { max_retries: 5, retry_on_errors: vec!["ERR_RATE_LIMIT".into()], ..Default::default() };
        let decision = policy.decide(&config, 1, &err("ERR_EXEC_FAILED", true));
        assert!(!decision.should_retry);
        assert!(!decision.rationale.matched_error_filter);
    }

    #[test]
    fn decisions_are_deterministic_and_config_hash_stable() {
        let policy = DefaultRetryPolicy::new();
        let config = RetryConfig::default();
        let e = err("ERR_EXEC_FAILED", true);
        let d1 = policy.decide(&config, 1, &e);
        let d2 = policy.decide(&config, 1, &e);
        assert_eq!(d1, d2);
        assert!(!d1.config_hash.is_empty());
    }
}
