//! The policy engine: epsilon-greedy selection and TD updates.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use deskpilot_core_types::{ActionKind, StateKey, TrailEntry};

use crate::priors::prior_bias;
use crate::rewards::{human_reward, HUMAN_MULTIPLIER};
use crate::table::{ActionStats, QTable};

/// Learning and exploration knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// TD learning rate (alpha).
    /// Default: 0.15
    pub alpha: f64,

    /// Discount factor (gamma).
    /// Default: 0.9
    pub gamma: f64,

    /// Exploration rate before any episodes have finished.
    /// Default: 0.3
    pub epsilon_initial: f64,

    /// Exploration floor.
    /// Default: 0.05
    pub epsilon_min: f64,

    /// Per-episode multiplicative epsilon decay.
    /// Default: 0.95
    pub epsilon_decay: f64,

    /// Persist automatically every N updates; 0 disables autosave
    /// (end-of-session flush still happens).
    /// Default: 10
    pub autosave_every: u32,

    /// Q-table JSON location; `None` keeps the policy in memory only.
    pub persist_path: Option<PathBuf>,

    /// RNG seed for reproducible exploration in tests.
    pub seed: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            alpha: 0.15,
            gamma: 0.9,
            epsilon_initial: 0.3,
            epsilon_min: 0.05,
            epsilon_decay: 0.95,
            autosave_every: 10,
            persist_path: None,
            seed: None,
        }
    }
}

impl PolicyConfig {
    /// Deterministic config for tests: no exploration, no persistence.
    pub fn greedy() -> Self {
        Self {
            epsilon_initial: 0.0,
            epsilon_min: 0.0,
            seed: Some(0),
            ..Self::default()
        }
    }
}

/// Episode reward trend over a sliding window.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

/// Tabular Q-learner over fingerprinted screen states.
///
/// Single owner: the session loop holds the engine exclusively and all
/// mutation happens on its thread of control. The table is loaded once at
/// construction and flushed after every session termination.
pub struct PolicyEngine {
    config: PolicyConfig,
    table: QTable,
    updates_since_save: u32,
    rng: StdRng,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        let table = match &config.persist_path {
            Some(path) => QTable::load(path),
            None => QTable::default(),
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            states = table.states_seen(),
            entries = table.entries(),
            episodes = table.episode_rewards.len(),
            "policy engine ready"
        );
        Self {
            config,
            table,
            updates_since_save: 0,
            rng,
        }
    }

    /// Current exploration rate: decays multiplicatively with finished
    /// episodes down to the floor.
    pub fn epsilon(&self) -> f64 {
        let episodes = self.table.episode_rewards.len() as i32;
        self.config.epsilon_min
            + (self.config.epsilon_initial - self.config.epsilon_min)
                * self.config.epsilon_decay.powi(episodes)
    }

    /// Epsilon-greedy selection restricted to `candidates`.
    ///
    /// Exploitation ties are broken by commonsense priors for the current
    /// application, then by candidate order, so selection is fully
    /// deterministic once exploration is off.
    pub fn select(
        &mut self,
        state: &StateKey,
        candidates: &[ActionKind],
        app: &str,
    ) -> Option<ActionKind> {
        if candidates.is_empty() {
            return None;
        }

        if self.rng.gen::<f64>() < self.epsilon() {
            let pick = candidates[self.rng.gen_range(0..candidates.len())];
            debug!(%state, kind = %pick, "exploring");
            return Some(pick);
        }

        let mut best = candidates[0];
        let mut best_score = (
            self.table.q_value(state, best),
            prior_bias(app, best),
        );
        for &kind in &candidates[1..] {
            let score = (self.table.q_value(state, kind), prior_bias(app, kind));
            // Strictly-greater keeps the earliest candidate on full ties.
            if score.0 > best_score.0 + 1e-12
                || ((score.0 - best_score.0).abs() <= 1e-12 && score.1 > best_score.1 + 1e-12)
            {
                best = kind;
                best_score = score;
            }
        }
        debug!(%state, kind = %best, q = best_score.0, "exploiting");
        Some(best)
    }

    /// Standard TD update:
    /// `Q(s,a) ← Q(s,a) + α·[r + γ·max_a' Q(s',a') − Q(s,a)]`.
    pub fn update(&mut self, state: &StateKey, kind: ActionKind, reward: f64, next: &StateKey) {
        self.update_inner(state, kind, reward, Some(next));
    }

    fn update_inner(
        &mut self,
        state: &StateKey,
        kind: ActionKind,
        reward: f64,
        next: Option<&StateKey>,
    ) {
        let q_current = self.table.q_value(state, kind);
        let q_next_max = next.map(|s| self.table.max_q(s)).unwrap_or(0.0);
        let td_target = reward + self.config.gamma * q_next_max;
        let q_new = q_current + self.config.alpha * (td_target - q_current);

        self.table.set_q(state, kind, q_new);
        self.table.record_reward(state, kind, reward);

        self.updates_since_save += 1;
        if self.config.autosave_every > 0 && self.updates_since_save >= self.config.autosave_every {
            self.flush();
            self.updates_since_save = 0;
        }
    }

    /// Replay a finished session's trail with an amplified human reward.
    ///
    /// Applied in reverse chronological order with the successor state
    /// chained through, so later steps absorb the signal first and earlier
    /// steps pick it up through the discounted max term.
    pub fn apply_human_feedback(&mut self, trail: &[TrailEntry], score: f64) {
        let reward = human_reward(score) * HUMAN_MULTIPLIER;
        info!(steps = trail.len(), score, reward, "applying human feedback");

        let mut next: Option<StateKey> = None;
        for entry in trail.iter().rev() {
            self.update_inner(&entry.state, entry.kind, reward, next.as_ref());
            next = Some(entry.state.clone());
        }
    }

    /// Record a finished episode and flush the table.
    pub fn end_session(&mut self, episode_reward: f64) {
        self.table.episode_rewards.push(episode_reward);
        self.flush();
        self.updates_since_save = 0;
    }

    /// Persist the table if a path is configured. Failures are logged, not
    /// raised: a failed flush must never corrupt the in-memory state or
    /// kill the session.
    pub fn flush(&self) {
        if let Some(path) = &self.config.persist_path {
            if let Err(err) = self.table.save(path) {
                warn!(path = %path.display(), "policy flush failed: {}", err);
            }
        }
    }

    pub fn q_value(&self, state: &StateKey, kind: ActionKind) -> f64 {
        self.table.q_value(state, kind)
    }

    pub fn best_kind(&self, state: &StateKey) -> Option<ActionKind> {
        self.table.best_kind(state)
    }

    /// Confidence in `[0, 1]`: sigmoid of the Q-value, 0.5 for the unknown.
    pub fn confidence(&self, state: &StateKey, kind: ActionKind) -> f64 {
        let q = self.table.q_value(state, kind);
        1.0 / (1.0 + (-q).exp())
    }

    /// Track-record warning for a proposed kind: fires when the pair has
    /// been tried at least 3 times with an average reward below −0.3,
    /// naming the best-known alternative when one exists.
    pub fn warning(&self, state: &StateKey, kind: ActionKind) -> Option<String> {
        let stats = self.table.stats_for(state, kind)?;
        if stats.count < 3 || stats.avg_reward >= -0.3 {
            return None;
        }
        let alt = self
            .table
            .best_kind(state)
            .filter(|best| *best != kind)
            .map(|best| format!(" Consider '{}' instead.", best))
            .unwrap_or_default();
        Some(format!(
            "'{}' has avg reward {:.2} in this context ({}/{} failures).{}",
            kind, stats.avg_reward, stats.failures, stats.count, alt
        ))
    }

    pub fn stats_for(&self, state: &StateKey, kind: ActionKind) -> Option<&ActionStats> {
        self.table.stats_for(state, kind)
    }

    /// Compare the last `window` episodes against the `window` before them.
    pub fn trend(&self, window: usize) -> Trend {
        let rewards = &self.table.episode_rewards;
        if window == 0 || rewards.len() < window * 2 {
            return Trend::InsufficientData;
        }
        let recent: f64 = rewards[rewards.len() - window..].iter().sum::<f64>() / window as f64;
        let older: f64 = rewards[rewards.len() - window * 2..rewards.len() - window]
            .iter()
            .sum::<f64>()
            / window as f64;
        if recent > older + 0.5 {
            Trend::Improving
        } else if recent < older - 0.5 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    pub fn episodes(&self) -> usize {
        self.table.episode_rewards.len()
    }
}
