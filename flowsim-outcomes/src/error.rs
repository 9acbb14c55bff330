//! Error types for the outcomes algebra

use thiserror::Error;

/// Result type for outcome operations
pub type OutcomeResult<T> = Result<T, OutcomeError>;

/// Error types for outcome distribution operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OutcomeError {
    /// Caller supplied an invalid argument (negative weight, bad bucket count)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation requires a non-empty distribution
    #[error("Empty distribution: {0}")]
    EmptyDistribution(String),

    /// Invariant violation inside the algebra
    #[error("Internal error: {0}")]
    Internal(String),
}
