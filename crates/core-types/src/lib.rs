//! Shared data model for the deskpilot decision-and-replay core.
//!
//! Everything that crosses a crate boundary lives here: observations of the
//! screen, the closed typed action set with its validation rules, execution
//! results, the error-kind taxonomy, and session-level result types.

mod action;
mod errors;
mod observation;
mod result;

pub use action::{Action, ActionKind, Target};
pub use errors::{ErrorKind, ValidationError};
pub use observation::{Observation, Rect, UiElement};
pub use result::{ActionResult, SessionResult, SessionStatus, TrailEntry};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one agent session.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for one task within a session.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for one executed action, used for audit correlation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact learnable key for a screen state.
///
/// Produced by the `fingerprint` crate from an [`Observation`]; recomputed
/// every step and never persisted standalone. Two observations a human would
/// call "the same screen" hash to the same key with high probability.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct StateKey(pub String);

impl StateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
