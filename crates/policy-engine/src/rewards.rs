//! Reward composition.
//!
//! Automatic rewards are derived from post-action signals (state change,
//! drift, recovery) and clamped so no single step can swamp the table.
//! Human feedback arrives as a session score in `[0, 1]` and is mapped
//! through an asymmetric curve, then amplified, so that when a human
//! bothers to rate a session their signal dominates the automatic one.

use serde::{Deserialize, Serialize};

use deskpilot_core_types::{ActionKind, StateKey};

/// Task completed and verified.
pub const REWARD_DONE_SUCCESS: f64 = 2.0;
/// Task ended in explicit failure.
pub const REWARD_DONE_FAIL: f64 = -1.5;
/// Action produced a visible state change.
pub const REWARD_STATE_CHANGED: f64 = 0.3;
/// Bonus on top of the change reward for kinds that are supposed to
/// change the screen.
pub const REWARD_CHANGE_BONUS: f64 = 0.2;
/// Change-expecting action produced no visible change.
pub const REWARD_NO_CHANGE: f64 = -0.3;
/// Unexpected drift after the action.
pub const REWARD_DRIFT: f64 = -0.7;
/// Action needed a recovery intervention.
pub const REWARD_RECOVERY_NEEDED: f64 = -1.0;
/// Claimed done but external verification said otherwise.
pub const REWARD_VERIFY_FAIL: f64 = -1.2;
/// Decider output could not be parsed into a valid action.
pub const REWARD_PARSE_FAIL: f64 = -0.2;

/// Per-step rewards are clamped to this band.
pub const REWARD_CLAMP: f64 = 2.0;

/// Amplification applied to human feedback before replay.
pub const HUMAN_MULTIPLIER: f64 = 3.0;

/// Where a reward came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    Automatic,
    Human,
}

/// One reward applied to a (state, kind) pair; emitted for logging.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RewardEvent {
    pub source: RewardSource,
    pub magnitude: f64,
    pub state: StateKey,
    pub kind: ActionKind,
}

/// Post-action signals the reward is computed from.
#[derive(Clone, Copy, Debug, Default)]
pub struct RewardContext {
    pub exec_success: bool,
    pub state_changed: bool,
    pub drift_detected: bool,
    pub recovery_invoked: bool,
}

/// Compute the automatic per-step reward.
///
/// Recovery outweighs drift outweighs change; a silent no-op is only
/// penalized for kinds that are expected to move the screen (a wait or a
/// key press may legitimately change nothing).
pub fn compute_reward(kind: ActionKind, ctx: &RewardContext) -> f64 {
    if !ctx.exec_success {
        return REWARD_DRIFT;
    }

    let mut reward = 0.0;
    if ctx.recovery_invoked {
        reward += REWARD_RECOVERY_NEEDED;
    } else if ctx.drift_detected {
        reward += REWARD_DRIFT;
    } else if ctx.state_changed {
        reward += REWARD_STATE_CHANGED;
        if kind.expects_state_change() {
            reward += REWARD_CHANGE_BONUS;
        }
    } else if kind.expects_state_change() {
        reward += REWARD_NO_CHANGE;
    }

    reward.clamp(-REWARD_CLAMP, REWARD_CLAMP)
}

/// Map a human session score in `[0, 1]` to a reward.
///
/// Asymmetric on purpose: 0.0 → −2.0, 0.5 → 0.0, 1.0 → +3.0, so praise
/// is worth more than the equivalent scorn.
pub fn human_reward(score: f64) -> f64 {
    let s = score.clamp(0.0, 1.0);
    if s >= 0.5 {
        (s - 0.5) * 6.0
    } else {
        (s - 0.5) * 4.0
    }
}
