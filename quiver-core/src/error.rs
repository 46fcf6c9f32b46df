//! Error types for the reactive engine.
//!
//! Only misuse of the API is reported through [`ReactiveError`]. Panics raised
//! inside user callbacks (effect bodies, getters, setters, listeners) are not
//! caught: they unwind to the caller of whichever operation triggered them,
//! and the engine's bookkeeping is restored by drop guards on the way out.

use thiserror::Error;

/// Errors reported by reactive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// The operation is not allowed on this value (read-only store key,
    /// computed cell without setter, read-only mixin property).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The value passed in does not satisfy the operation's precondition,
    /// typically because it is not a tracked observable.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
}

impl ReactiveError {
    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_their_message() {
        let err = ReactiveError::invalid_operation("\"count\" is read-only");
        assert_eq!(err.to_string(), "invalid operation: \"count\" is read-only");

        let err = ReactiveError::precondition("value is not an observable");
        assert_eq!(
            err.to_string(),
            "precondition violated: value is not an observable"
        );
    }
}
