//! Error taxonomy for the execution core.
//!
//! `CoreEngineError` covers everything the scheduler, validator, and step
//! executor can fail with. Each variant maps to a stable `code()` used as
//! the `error_code` matched against a `RetryConfig.retry_on_errors` entry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CoreEngineError {
    // --- Validator ---
    #[error("workflow graph has a cycle")]
    ProjectHasCycle,
    #[error("workflow graph has an unconnected node")]
    ProjectHasUnconnected,
    #[error("workflow graph has an unreachable node")]
    ProjectHasUnreachable,
    #[error("edge references a port that does not exist")]
    EdgeInvalidPort,
    #[error("source port not found: {0}")]
    SourcePortNotFound(String),
    #[error("target port not found: {0}")]
    TargetPortNotFound(String),
    #[error("branching step must live inside a block group")]
    ProjectBranchOutsideGroup,
    #[error("credential binding missing: {0}")]
    CredentialBindingMissing(String),

    // --- Graph Model / inheritance ---
    #[error("circular inheritance detected in block definition chain")]
    CircularInheritance,
    #[error("inheritance depth exceeded")]
    InheritanceDepthExceeded,

    // --- System ---
    #[error("internal: {0}")]
    Internal(String),
    #[error("system timeout")]
    SystemTimeout,

    // --- Config ---
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
    #[error("missing config: {0}")]
    ConfigMissing(String),

    // --- Input ---
    #[error("invalid input: {0}")]
    InputInvalid(String),
    #[error("missing input: {0}")]
    InputMissing(String),

    // --- Execution ---
    #[error("execution failed: {0}")]
    ExecFailed(String),
    #[error("execution cancelled")]
    ExecCancelled,

    // --- Auth ---
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("credential expired")]
    AuthExpired,

    // --- Rate limiting ---
    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimit { retry_after_ms: Option<u64> },

    // --- Scheduler / run lifecycle ---
    #[error("run already completed")]
    RunCompleted,
    #[error("run has failed previously")]
    RunHasFailed,
    #[error("unknown step id")]
    UnknownStepId,
    #[error("step already terminal")]
    StepAlreadyTerminal,
}

impl CoreEngineError {
    /// Stable code matched against `RetryConfig.retry_on_errors`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreEngineError::ProjectHasCycle => "ERR_PROJECT_HAS_CYCLE",
            CoreEngineError::ProjectHasUnconnected => "ERR_PROJECT_HAS_UNCONNECTED",
            CoreEngineError::ProjectHasUnreachable => "ERR_PROJECT_HAS_UNREACHABLE",
            CoreEngineError::EdgeInvalidPort => "ERR_EDGE_INVALID_PORT",
            CoreEngineError::SourcePortNotFound(_) => "ERR_SOURCE_PORT_NOT_FOUND",
            CoreEngineError::TargetPortNotFound(_) => "ERR_TARGET_PORT_NOT_FOUND",
            CoreEngineError::ProjectBranchOutsideGroup => "ERR_PROJECT_BRANCH_OUTSIDE_GROUP",
            CoreEngineError::CredentialBindingMissing(_) => "ERR_CREDENTIAL_BINDING_MISSING",
            CoreEngineError::CircularInheritance => "ERR_CIRCULAR_INHERITANCE",
            CoreEngineError::InheritanceDepthExceeded => "ERR_INHERITANCE_DEPTH_EXCEEDED",
            CoreEngineError::Internal(_) => "ERR_INTERNAL",
            CoreEngineError::SystemTimeout => "ERR_SYSTEM_TIMEOUT",
            CoreEngineError::ConfigInvalid(_) => "ERR_CONFIG_INVALID",
            CoreEngineError::ConfigMissing(_) => "ERR_CONFIG_MISSING",
            CoreEngineError::InputInvalid(_) => "ERR_INPUT_INVALID",
            CoreEngineError::InputMissing(_) => "ERR_INPUT_MISSING",
            CoreEngineError::ExecFailed(_) => "ERR_EXEC_FAILED",
            CoreEngineError::ExecCancelled => "ERR_EXEC_CANCELLED",
            CoreEngineError::AuthFailed(_) => "ERR_AUTH_FAILED",
            CoreEngineError::AuthExpired => "ERR_AUTH_EXPIRED",
            CoreEngineError::RateLimit { .. } => "ERR_RATE_LIMIT",
            CoreEngineError::RunCompleted => "ERR_RUN_COMPLETED",
            CoreEngineError::RunHasFailed => "ERR_RUN_HAS_FAILED",
            CoreEngineError::UnknownStepId => "ERR_UNKNOWN_STEP_ID",
            CoreEngineError::StepAlreadyTerminal => "ERR_STEP_ALREADY_TERMINAL",
        }
    }

    /// Whether this kind of failure is inherently non-retryable regardless
    /// of policy. Cancellation and validator/config errors are never worth
    /// retrying; the remainder defer to the declared `RetryConfig`.
    pub fn forces_non_retryable(&self) -> bool {
        matches!(
            self,
            CoreEngineError::ExecCancelled
                | CoreEngineError::ConfigInvalid(_)
                | CoreEngineError::ConfigMissing(_)
                | CoreEngineError::ProjectHasCycle
                | CoreEngineError::ProjectHasUnconnected
                | CoreEngineError::ProjectHasUnreachable
        )
    }
}

/// A typed failure carrying the retryability metadata attached to
/// block-level execution errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockError {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

impl BlockError {
    pub fn from_core(err: &CoreEngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
            retryable: !err.forces_non_retryable(),
            retry_after_ms: match err {
                CoreEngineError::RateLimit { retry_after_ms } => *retry_after_ms,
                _ => None,
            },
        }
    }
}
