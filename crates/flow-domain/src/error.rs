use thiserror::Error;

/// Domain-level errors: entity construction and invariant violations.
/// Execution-time errors (retryable BlockErrors, scheduler failures) live in
/// `flow-core`; this enum only covers what can go wrong building or
/// validating the data model itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("unknown step type: {0}")]
    UnknownStepType(String),

    #[error("unknown block group type: {0}")]
    UnknownGroupType(String),

    #[error("edge endpoint must set exactly one of step/group id: {0}")]
    InvalidEdgeEndpoint(String),

    #[error("external error: {0}")]
    ExternalError(String),
}
