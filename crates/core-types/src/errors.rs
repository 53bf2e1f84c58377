//! Error-kind taxonomy shared across the core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionKind;

/// Classified error kinds carried on results, rewards, and session output.
///
/// This is the task-level taxonomy; each crate keeps its own richer
/// `thiserror` enum and maps into these kinds at its boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed action; never reaches the OS boundary.
    ValidationError,

    /// Timeout or stale element reference; retried inside the executor.
    TransientExecutionError,

    /// Retries and recovery exhausted; surfaced, session continues.
    ExecutionFailed,

    /// Step budget exhausted; fatal for the task, not the process.
    StepBudgetExceeded,

    /// Grounding collaborator unavailable; fatal for the task.
    CaptureUnavailable,

    /// Decision collaborator unavailable; fatal for the task.
    DeciderUnreachable,

    /// Cached plan no longer matches the live screen; triggers fallback.
    CacheStale,
}

impl ErrorKind {
    /// Whether this kind ends the current task.
    pub fn is_task_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::StepBudgetExceeded
                | ErrorKind::CaptureUnavailable
                | ErrorKind::DeciderUnreachable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "validation-error",
            ErrorKind::TransientExecutionError => "transient-execution-error",
            ErrorKind::ExecutionFailed => "execution-failed",
            ErrorKind::StepBudgetExceeded => "step-budget-exceeded",
            ErrorKind::CaptureUnavailable => "capture-unavailable",
            ErrorKind::DeciderUnreachable => "decider-unreachable",
            ErrorKind::CacheStale => "cache-stale",
        };
        f.write_str(name)
    }
}

/// Schema-validation failure for a typed action.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("action '{kind}' is missing required parameter '{param}'")]
    MissingParam {
        kind: ActionKind,
        param: &'static str,
    },

    #[error("action '{kind}' has invalid parameter '{param}': {reason}")]
    InvalidParam {
        kind: ActionKind,
        param: &'static str,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_fatal_kinds() {
        assert!(ErrorKind::StepBudgetExceeded.is_task_fatal());
        assert!(ErrorKind::CaptureUnavailable.is_task_fatal());
        assert!(!ErrorKind::ExecutionFailed.is_task_fatal());
        assert!(!ErrorKind::CacheStale.is_task_fatal());
    }

    #[test]
    fn test_kebab_case_serialization() {
        let json = serde_json::to_string(&ErrorKind::StepBudgetExceeded).unwrap();
        assert_eq!(json, "\"step-budget-exceeded\"");
    }
}
