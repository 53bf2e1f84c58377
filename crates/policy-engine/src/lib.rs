//! Tabular Q-learning policy over fingerprinted screen states.
//!
//! The policy is a lightweight overlay on the external decider, not a
//! replacement for it: it learns which action kinds work in which screen
//! contexts, nudges selection with commonsense priors while the table is
//! cold, and absorbs both automatic per-step rewards and retroactive
//! human feedback through one TD update rule.

mod engine;
mod priors;
mod rewards;
mod table;

pub use engine::{PolicyConfig, PolicyEngine, Trend};
pub use priors::prior_bias;
pub use rewards::{
    compute_reward, human_reward, RewardContext, RewardEvent, RewardSource, HUMAN_MULTIPLIER,
    REWARD_CHANGE_BONUS, REWARD_CLAMP, REWARD_DONE_FAIL, REWARD_DONE_SUCCESS, REWARD_DRIFT,
    REWARD_NO_CHANGE, REWARD_PARSE_FAIL, REWARD_RECOVERY_NEEDED, REWARD_STATE_CHANGED,
    REWARD_VERIFY_FAIL,
};
pub use table::{ActionStats, QTable};
