//! Engine error types.

use thiserror::Error;

/// Boxed error carried by a failed asynchronous operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Machine-level errors, surfaced to callers of the engine API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("state machine '{machine}' has been disposed")]
    Disposed { machine: String },
}

impl MachineError {
    /// Returns an error code suitable for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            MachineError::Disposed { .. } => "DISPOSED",
        }
    }
}

/// Errors returned by transition closures.
///
/// These are routine outcomes. The engine logs them and leaves the committed
/// state untouched; they never escalate to a [`MachineError`].
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid state transition: cannot {action} while {state}")]
    InvalidStateTransition { state: String, action: String },

    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
}

impl TransitionError {
    /// Builds an [`TransitionError::InvalidStateTransition`].
    pub fn invalid(state: impl Into<String>, action: impl Into<String>) -> Self {
        TransitionError::InvalidStateTransition {
            state: state.into(),
            action: action.into(),
        }
    }

    /// Wraps an operation error.
    pub fn operation<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        TransitionError::Operation(error.into())
    }

    /// Returns an error code suitable for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransitionError::InvalidStateTransition { .. } => "INVALID_TRANSITION",
            TransitionError::Operation(_) => "OPERATION_FAILED",
        }
    }

    /// Returns true for business-rule rejections.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, TransitionError::InvalidStateTransition { .. })
    }
}
