//! Error types for component behaviors

use flowsim_outcomes::OutcomeError;
use thiserror::Error;

/// Result type for component operations
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Error types for component behavior operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComponentError {
    /// Method is not in the component's catalog
    #[error("Component {component} has no method {method}")]
    UnknownMethod { component: String, method: String },

    /// Parameter is not declared by the component
    #[error("Component {component} has no parameter {param}")]
    UnknownParameter { component: String, param: String },

    /// Parameter value is out of range or of the wrong type
    #[error("Invalid parameter value: {0}")]
    InvalidParameter(String),

    /// Behavior kind registered twice
    #[error("Behavior kind {0} already registered")]
    AlreadyRegistered(String),

    /// Behavior kind not registered
    #[error("Unknown behavior kind: {0}")]
    UnknownKind(String),

    /// Outcome algebra failure
    #[error("Outcome error: {0}")]
    Outcome(#[from] OutcomeError),
}
