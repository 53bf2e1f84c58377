//! Error types for the OS action boundary.

use thiserror::Error;

use deskpilot_core_types::ErrorKind;

/// Errors surfaced by the OS action boundary.
#[derive(Debug, Error, Clone)]
pub enum ExecError {
    /// The OS call did not finish within its timeout.
    #[error("Action timeout: {0}")]
    Timeout(String),

    /// The target element could not be found on the current screen.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The element reference points at a screen that has since changed.
    #[error("Stale element reference: {0}")]
    StaleElement(String),

    /// Execution was cancelled or the deadline passed.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The boundary does not implement this action kind.
    #[error("Unsupported action: {0}")]
    Unsupported(String),

    /// The OS call failed outright.
    #[error("Action failed: {0}")]
    Failed(String),
}

impl ExecError {
    /// Transient errors are retried by the executor; everything else is
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecError::Timeout(_) | ExecError::ElementNotFound(_) | ExecError::StaleElement(_)
        )
    }

    /// Map into the task-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::TransientExecutionError
        } else {
            ErrorKind::ExecutionFailed
        }
    }
}
