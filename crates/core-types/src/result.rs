//! Execution results and session-level output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::errors::ErrorKind;
use crate::observation::Observation;
use crate::StateKey;

/// Outcome of executing one action through the retry executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the action ultimately succeeded.
    pub success: bool,

    /// Classified error kind, if failed.
    pub error: Option<ErrorKind>,

    /// Human-readable error detail, if failed.
    pub error_detail: Option<String>,

    /// Wall-clock duration of all attempts in milliseconds.
    pub duration_ms: u64,

    /// Post-action observation, if the follow-up capture succeeded.
    /// Filled in by the session loop, not the executor.
    pub post_observation: Option<Observation>,

    /// Whether the screen changed in an unexpected way.
    pub drift: bool,

    /// Number of attempts made (1 = succeeded first try).
    pub attempts: u32,

    /// Whether a recovery sequence ran before the final attempt.
    pub recovery_invoked: bool,
}

impl ActionResult {
    /// Successful result after `attempts` tries.
    pub fn success(attempts: u32, duration_ms: u64) -> Self {
        Self {
            success: true,
            error: None,
            error_detail: None,
            duration_ms,
            post_observation: None,
            drift: false,
            attempts,
            recovery_invoked: false,
        }
    }

    /// Failed result with a classified kind and detail.
    pub fn failure(
        kind: ErrorKind,
        detail: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            error: Some(kind),
            error_detail: Some(detail.into()),
            duration_ms,
            post_observation: None,
            drift: false,
            attempts,
            recovery_invoked: false,
        }
    }

    pub fn with_recovery(mut self) -> Self {
        self.recovery_invoked = true;
        self
    }

    pub fn with_drift(mut self, drift: bool) -> Self {
        self.drift = drift;
        self
    }

    pub fn with_post_observation(mut self, observation: Observation) -> Self {
        self.post_observation = Some(observation);
        self
    }
}

/// Final status of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Done,
    Failed,
}

/// One step of the session trail: what was done, where, and what it earned.
///
/// The trail doubles as the replay source for retroactive human feedback,
/// so every entry keeps the (state, action-kind) pair the policy saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrailEntry {
    pub step: u32,
    pub state: StateKey,
    pub kind: ActionKind,
    pub success: bool,
    pub reward: f64,
    pub drift: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

/// Session output consumed by the external recorder/reporter and the
/// human-supervision collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResult {
    pub status: SessionStatus,
    pub steps: u32,
    pub elapsed_ms: u64,
    pub trail: Vec<TrailEntry>,

    /// Terminal error kind for failed sessions.
    pub error: Option<ErrorKind>,

    /// Completion or failure message.
    pub message: String,

    /// Last good observation, reported with failures for debugging.
    pub last_observation: Option<Observation>,
}

impl SessionResult {
    pub fn is_done(&self) -> bool {
        self.status == SessionStatus::Done
    }

    /// Sum of all rewards earned over the session.
    pub fn total_reward(&self) -> f64 {
        self.trail.iter().map(|t| t.reward).sum()
    }
}
