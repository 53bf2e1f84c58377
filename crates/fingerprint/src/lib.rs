//! Deterministic compression of screen observations into learnable keys.
//!
//! Raw screens have an effectively unbounded state space, so the fingerprint
//! intentionally discards layout precision and keeps only the window title,
//! the element count, and the labels of the most salient elements. That
//! trades a bounded false-merge rate for a state space a tabular learner can
//! actually cover.
//!
//! Two products come out of the same compression:
//! - [`state_key`]: a fixed-size hash used as the Q-table key,
//! - [`Fingerprint`]: the uncompressed summary kept by the skill cache so it
//!   can measure *distance* between a recorded screen and the live one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use deskpilot_core_types::{Observation, StateKey};

/// Tuning knobs for fingerprinting.
///
/// The salience ranking is deliberately configuration rather than a fixed
/// rule: the default takes the first `candidate_window` labeled elements in
/// document order, dedupes and sorts them, and keeps `top_k`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// How many salient labels end up in the key.
    /// Default: 5
    pub top_k: usize,

    /// How many leading labeled elements are considered salient candidates.
    /// Default: 8
    pub candidate_window: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_window: 8,
        }
    }
}

/// Normalized, ordered salient labels for an observation.
fn salient_labels(observation: &Observation, config: &FingerprintConfig) -> Vec<String> {
    let set: BTreeSet<String> = observation
        .labels()
        .take(config.candidate_window)
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    set.into_iter().take(config.top_k).collect()
}

/// Derive the learnable state key for an observation.
///
/// Pure and deterministic: the same title and element-label set always yield
/// the same key, regardless of capture time or element geometry.
pub fn state_key(observation: &Observation, config: &FingerprintConfig) -> StateKey {
    let title = observation.window_title.trim().to_lowercase();
    let labels = salient_labels(observation, config);
    let raw = format!("{}|{}", title, labels.join("|"));

    let digest = Sha256::digest(raw.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    StateKey(hex[..12].to_string())
}

/// Fuzzy summary of a screen, kept alongside cached skills so replay can
/// detect when the recorded screen no longer matches the live one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Normalized window title.
    pub window_title: String,

    /// Total detected element count.
    pub element_count: usize,

    /// Salient labels, normalized and sorted.
    pub top_labels: Vec<String>,

    /// When the underlying observation was captured.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub captured_at: DateTime<Utc>,
}

impl Fingerprint {
    pub fn of(observation: &Observation, config: &FingerprintConfig) -> Self {
        Self {
            window_title: observation.window_title.trim().to_lowercase(),
            element_count: observation.elements.len(),
            top_labels: salient_labels(observation, config),
            captured_at: observation.captured_at,
        }
    }

    /// Distance between two fingerprints in `[0.0, 2.0]`.
    ///
    /// Composed of a binary title-mismatch penalty (1.0), the complement of
    /// the Jaccard overlap between label sets (weight 0.5), and the relative
    /// element-count difference (weight 0.5). Identical screens score 0.0.
    pub fn distance(&self, other: &Fingerprint) -> f64 {
        let title_penalty = if self.window_title == other.window_title {
            0.0
        } else {
            1.0
        };

        let label_term = {
            let a: BTreeSet<&str> = self.top_labels.iter().map(String::as_str).collect();
            let b: BTreeSet<&str> = other.top_labels.iter().map(String::as_str).collect();
            if a.is_empty() && b.is_empty() {
                0.0
            } else {
                let intersection = a.intersection(&b).count() as f64;
                let union = a.union(&b).count() as f64;
                1.0 - intersection / union
            }
        };

        let count_term = {
            let (a, b) = (self.element_count, other.element_count);
            if a == 0 && b == 0 {
                0.0
            } else {
                (a.abs_diff(b)) as f64 / a.max(b) as f64
            }
        };

        title_penalty + 0.5 * label_term + 0.5 * count_term
    }

    /// Staleness check. A distance exactly at the threshold still matches;
    /// one unit above does not.
    pub fn matches(&self, other: &Fingerprint, threshold: f64) -> bool {
        self.distance(other) <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_core_types::{Rect, UiElement};

    fn obs(title: &str, labels: &[&str]) -> Observation {
        Observation::new(
            title,
            labels
                .iter()
                .map(|l| UiElement::new(*l, "button", Rect::default()))
                .collect(),
        )
    }

    #[test]
    fn test_same_content_same_key() {
        let config = FingerprintConfig::default();
        let a = obs("Settings", &["Brightness", "Volume", "Wi-Fi"]);
        let b = obs("Settings", &["Brightness", "Volume", "Wi-Fi"]);
        assert_eq!(state_key(&a, &config), state_key(&b, &config));
    }

    #[test]
    fn test_key_ignores_geometry_and_time() {
        let config = FingerprintConfig::default();
        let a = obs("Settings", &["Brightness"]);
        let mut b = obs("Settings", &["Brightness"]);
        b.elements[0].bounds = Rect::new(500, 500, 30, 30);
        b.captured_at = b.captured_at + chrono::Duration::seconds(90);
        assert_eq!(state_key(&a, &config), state_key(&b, &config));
    }

    #[test]
    fn test_key_normalizes_case_and_order() {
        let config = FingerprintConfig::default();
        let a = obs("Settings", &["Brightness", "Volume"]);
        let b = obs("SETTINGS", &["volume", "BRIGHTNESS"]);
        assert_eq!(state_key(&a, &config), state_key(&b, &config));
    }

    #[test]
    fn test_different_screens_different_keys() {
        let config = FingerprintConfig::default();
        let a = obs("Settings", &["Brightness"]);
        let b = obs("Notepad", &["File", "Edit"]);
        assert_ne!(state_key(&a, &config), state_key(&b, &config));
    }

    #[test]
    fn test_distance_zero_for_identical() {
        let config = FingerprintConfig::default();
        let fp = Fingerprint::of(&obs("Settings", &["Brightness", "Volume"]), &config);
        assert_eq!(fp.distance(&fp), 0.0);
    }

    #[test]
    fn test_title_mismatch_dominates() {
        let config = FingerprintConfig::default();
        let a = Fingerprint::of(&obs("Settings", &["Brightness"]), &config);
        let b = Fingerprint::of(&obs("Notepad", &["Brightness"]), &config);
        assert!(a.distance(&b) >= 1.0);
        assert!(!a.matches(&b, 0.4));
    }

    #[test]
    fn test_matches_is_threshold_inclusive() {
        let config = FingerprintConfig::default();
        // Same title, disjoint label sets, equal counts:
        // distance = 0.5 * (1 - 0) = 0.5 exactly.
        let a = Fingerprint::of(&obs("Settings", &["One", "Two"]), &config);
        let b = Fingerprint::of(&obs("Settings", &["Three", "Four"]), &config);
        let d = a.distance(&b);
        assert!((d - 0.5).abs() < 1e-9);
        assert!(a.matches(&b, 0.5), "exactly at threshold must match");
        assert!(!a.matches(&b, 0.5 - 1e-6), "just below threshold must miss");
    }

    #[test]
    fn test_partial_overlap_within_default_threshold() {
        let config = FingerprintConfig::default();
        // 3 of 4 labels shared, same count: label term = 1 - 3/5 = 0.4,
        // so the distance is 0.2, inside a 0.4 threshold.
        let a = Fingerprint::of(&obs("Settings", &["A", "B", "C", "D"]), &config);
        let b = Fingerprint::of(&obs("Settings", &["A", "B", "C", "E"]), &config);
        assert!(a.matches(&b, 0.4));
    }

    #[test]
    fn test_count_drift_raises_distance() {
        let config = FingerprintConfig::default();
        let small = Fingerprint::of(&obs("Settings", &["A", "B"]), &config);
        let large = Fingerprint::of(
            &obs("Settings", &["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"]),
            &config,
        );
        assert!(small.distance(&large) > 0.4);
    }
}
