//! Error types for the flowsim engine

use flowsim_components::ComponentError;
use flowsim_outcomes::OutcomeError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Tagged error value for engine operations.
///
/// Transport collaborators translate these tags to their own status codes;
/// the core never panics across a worker boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Caller supplied a bad argument (empty ID, bad matcher, unknown aggregation)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Canvas, system, metric, generator, or parameter path does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate ID or name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation requires state that is not present (no active system, no store)
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Corrupted state surfaced by a collaborator
    #[error("Data loss: {0}")]
    DataLoss(String),

    /// Invariant violation inside the algebra or solver
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<OutcomeError> for EngineError {
    fn from(err: OutcomeError) -> Self {
        match err {
            OutcomeError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
            OutcomeError::EmptyDistribution(msg) => EngineError::FailedPrecondition(msg),
            OutcomeError::Internal(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<ComponentError> for EngineError {
    fn from(err: ComponentError) -> Self {
        match err {
            ComponentError::UnknownMethod { .. }
            | ComponentError::UnknownParameter { .. }
            | ComponentError::UnknownKind(_) => EngineError::NotFound(err.to_string()),
            ComponentError::InvalidParameter(msg) => EngineError::InvalidArgument(msg),
            ComponentError::AlreadyRegistered(kind) => EngineError::AlreadyExists(kind),
            ComponentError::Outcome(inner) => inner.into(),
        }
    }
}
