//! Boundary traits for the external collaborators.
//!
//! The loop consumes four collaborators it never implements itself: a
//! grounder that captures the screen, a decider that proposes the next
//! action, the OS action boundary (owned by `action-exec`), and an
//! optional verifier consulted before a done-claim is accepted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use deskpilot_core_types::{Action, Observation, TaskId};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DecideError {
    #[error("Decider unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Verification failed to run: {0}")]
    Unavailable(String),
}

/// What the loop is trying to accomplish.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: TaskId,

    /// Stable skill identity for the cache (e.g. `"set_slider"`).
    pub skill_id: String,

    /// Skill parameters; part of the cache key.
    pub params: serde_json::Value,

    /// Natural-language goal passed through to the decider.
    pub goal: String,
}

impl TaskSpec {
    pub fn new(skill_id: impl Into<String>, params: serde_json::Value, goal: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            skill_id: skill_id.into(),
            params,
            goal: goal.into(),
        }
    }
}

/// One already-executed step, passed to the decider as history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub action: Action,
    pub success: bool,
    pub reward: f64,
}

/// Advisory context for the decider, derived from the policy's track
/// record for the current screen.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DecisionHints {
    /// Policy warning about the previously proposed kind, when its track
    /// record here is bad.
    pub policy_warning: Option<String>,

    /// Error detail from the previous step, if it failed.
    pub last_error: Option<String>,

    /// How many times in a row the screen has not changed.
    pub loop_count: u32,
}

/// Captures the current screen state.
#[async_trait]
pub trait Grounder: Send + Sync {
    async fn capture(&self) -> Result<Observation, CaptureError>;
}

/// Proposes the next action. Output is schema-validated by the loop
/// before anything touches the OS.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(
        &self,
        task: &TaskSpec,
        observation: &Observation,
        history: &[StepRecord],
        hints: &DecisionHints,
    ) -> Result<Action, DecideError>;
}

/// Confirms a done-claim against external ground truth.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, task: &TaskSpec, observation: &Observation) -> Result<bool, VerifyError>;
}
