//! Failure logging for rejected and failed transitions.

use crate::error::TransitionError;
use crate::machine::TransitionContext;
use parking_lot::Mutex;
use std::fmt;

/// How a transition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The closure refused to run against the current state, or its
    /// synchronous part returned an error.
    Rejected,
    /// The awaited operation of an async transition failed.
    OperationFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Rejected => "rejected",
            FailureKind::OperationFailed => "operation_failed",
        }
    }
}

/// A failed transition, as reported to a [`TransitionLogger`].
#[derive(Debug)]
pub struct TransitionFailure<'a> {
    pub machine: &'a str,
    pub context: &'a TransitionContext,
    pub kind: FailureKind,
    pub error: &'a TransitionError,
}

impl fmt::Display for TransitionFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] transition {} {}: {}",
            self.machine,
            self.context,
            self.kind.as_str(),
            self.error
        )
    }
}

/// Sink for transition failures.
///
/// Implementations are called on the machine's worker task and must neither
/// block nor panic.
pub trait TransitionLogger: Send + Sync {
    fn transition_failed(&self, failure: &TransitionFailure<'_>);
}

/// Logs failures as `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TransitionLogger for TracingLogger {
    fn transition_failed(&self, failure: &TransitionFailure<'_>) {
        tracing::warn!(
            machine = failure.machine,
            transition = %failure.context,
            kind = failure.kind.as_str(),
            code = failure.error.error_code(),
            "Transition failed: {}",
            failure.error
        );
    }
}

/// Discards all failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl TransitionLogger for NoopLogger {
    fn transition_failed(&self, _failure: &TransitionFailure<'_>) {}
}

/// An owned copy of a logged failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedFailure {
    pub machine: String,
    pub transition: String,
    pub kind: FailureKind,
    pub code: &'static str,
    pub message: String,
}

/// Keeps every failure in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LoggedFailure>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded failures, oldest first.
    pub fn entries(&self) -> Vec<LoggedFailure> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl TransitionLogger for MemoryLogger {
    fn transition_failed(&self, failure: &TransitionFailure<'_>) {
        self.entries.lock().push(LoggedFailure {
            machine: failure.machine.to_string(),
            transition: failure.context.to_string(),
            kind: failure.kind,
            code: failure.error.error_code(),
            message: failure.error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let context = TransitionContext::labeled("go_online");
        let error = TransitionError::invalid("online", "go online");
        let failure = TransitionFailure {
            machine: "driver",
            context: &context,
            kind: FailureKind::Rejected,
            error: &error,
        };
        assert_eq!(
            failure.to_string(),
            "[driver] transition go_online rejected: invalid state transition: cannot go online while online"
        );
    }

    #[test]
    fn test_memory_logger_records() {
        let logger = MemoryLogger::new();
        assert!(logger.is_empty());

        let context = TransitionContext::labeled("mark_ready");
        let error = TransitionError::operation("timeout");
        logger.transition_failed(&TransitionFailure {
            machine: "driver",
            context: &context,
            kind: FailureKind::OperationFailed,
            error: &error,
        });

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transition, "mark_ready");
        assert_eq!(entries[0].kind, FailureKind::OperationFailed);
        assert_eq!(entries[0].code, "OPERATION_FAILED");
        assert_eq!(entries[0].message, "operation failed: timeout");

        logger.clear();
        assert_eq!(logger.len(), 0);
    }
}
