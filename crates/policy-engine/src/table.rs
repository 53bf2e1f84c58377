//! The Q-table, per-pair statistics, and JSON persistence.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use deskpilot_core_types::{ActionKind, StateKey};

/// Running statistics for one (state, kind) pair. Feeds the track-record
/// warning and the confidence score.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionStats {
    pub total_reward: f64,
    pub count: u32,
    pub successes: u32,
    pub failures: u32,
    pub last_reward: f64,
    pub avg_reward: f64,
}

impl ActionStats {
    pub fn record(&mut self, reward: f64) {
        self.count += 1;
        self.total_reward += reward;
        self.last_reward = reward;
        self.avg_reward = self.total_reward / self.count as f64;
        if reward > 0.0 {
            self.successes += 1;
        } else if reward < -0.5 {
            self.failures += 1;
        }
    }
}

/// Persisted policy state. The whole struct is written on flush and read
/// back at construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QTable {
    /// Q(state, kind). Absent pairs read as 0.0.
    pub q: HashMap<StateKey, HashMap<ActionKind, f64>>,

    /// Per-pair statistics, keyed `"<state>:<kind>"` for flat JSON.
    pub stats: HashMap<String, ActionStats>,

    /// Cumulative reward per finished episode, oldest first.
    pub episode_rewards: Vec<f64>,

    /// Lifetime reward sum.
    pub total_reward: f64,
}

fn sa_key(state: &StateKey, kind: ActionKind) -> String {
    format!("{}:{}", state, kind)
}

impl QTable {
    pub fn q_value(&self, state: &StateKey, kind: ActionKind) -> f64 {
        self.q
            .get(state)
            .and_then(|actions| actions.get(&kind))
            .copied()
            .unwrap_or(0.0)
    }

    /// Best Q-value over all kinds seen in `state`; 0.0 for unseen states.
    pub fn max_q(&self, state: &StateKey) -> f64 {
        self.q
            .get(state)
            .map(|actions| actions.values().copied().fold(f64::MIN, f64::max))
            .filter(|q| *q > f64::MIN)
            .unwrap_or(0.0)
    }

    /// Kind with the highest Q-value in `state`.
    pub fn best_kind(&self, state: &StateKey) -> Option<ActionKind> {
        self.q.get(state).and_then(|actions| {
            actions
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(kind, _)| *kind)
        })
    }

    pub fn set_q(&mut self, state: &StateKey, kind: ActionKind, value: f64) {
        self.q
            .entry(state.clone())
            .or_default()
            .insert(kind, value);
    }

    pub fn record_reward(&mut self, state: &StateKey, kind: ActionKind, reward: f64) {
        self.stats
            .entry(sa_key(state, kind))
            .or_default()
            .record(reward);
        self.total_reward += reward;
    }

    pub fn stats_for(&self, state: &StateKey, kind: ActionKind) -> Option<&ActionStats> {
        self.stats.get(&sa_key(state, kind))
    }

    /// Load from a JSON file. A missing file yields an empty table; a
    /// corrupt one is logged and yields an empty table, never an error.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no persisted policy, starting empty");
                return Self::default();
            }
            Err(err) => {
                warn!(path = %path.display(), "failed to read policy file: {}", err);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(table) => table,
            Err(err) => {
                warn!(path = %path.display(), "corrupt policy file, starting empty: {}", err);
                Self::default()
            }
        }
    }

    /// Atomically persist as pretty JSON: write to a temp file in the same
    /// directory, then rename over the target.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)?;
        Ok(())
    }

    pub fn states_seen(&self) -> usize {
        self.q.len()
    }

    pub fn entries(&self) -> usize {
        self.q.values().map(|actions| actions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(s: &str) -> StateKey {
        StateKey(s.to_string())
    }

    #[test]
    fn test_unseen_pairs_read_zero() {
        let table = QTable::default();
        assert_eq!(table.q_value(&state("abc"), ActionKind::Click), 0.0);
        assert_eq!(table.max_q(&state("abc")), 0.0);
        assert!(table.best_kind(&state("abc")).is_none());
    }

    #[test]
    fn test_best_kind_and_max_q() {
        let mut table = QTable::default();
        let s = state("abc");
        table.set_q(&s, ActionKind::Click, 0.4);
        table.set_q(&s, ActionKind::Scroll, -0.2);
        assert_eq!(table.best_kind(&s), Some(ActionKind::Click));
        assert!((table.max_q(&s) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_max_q_with_all_negative_values() {
        let mut table = QTable::default();
        let s = state("abc");
        table.set_q(&s, ActionKind::Click, -0.8);
        assert!((table.max_q(&s) + 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_stats_recording() {
        let mut table = QTable::default();
        let s = state("abc");
        table.record_reward(&s, ActionKind::Click, 0.5);
        table.record_reward(&s, ActionKind::Click, -0.7);

        let stats = table.stats_for(&s, ActionKind::Click).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert!((stats.avg_reward + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let mut table = QTable::default();
        table.set_q(&state("abc"), ActionKind::Click, 0.42);
        table.record_reward(&state("abc"), ActionKind::Click, 0.42);
        table.episode_rewards.push(1.5);
        table.save(&path).unwrap();

        let loaded = QTable::load(&path);
        assert!((loaded.q_value(&state("abc"), ActionKind::Click) - 0.42).abs() < 1e-9);
        assert_eq!(loaded.episode_rewards, vec![1.5]);
        assert_eq!(loaded.stats_for(&state("abc"), ActionKind::Click).unwrap().count, 1);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = QTable::load(&dir.path().join("nope.json"));
        assert_eq!(table.states_seen(), 0);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, "{not json").unwrap();
        let table = QTable::load(&path);
        assert_eq!(table.states_seen(), 0);
    }
}
