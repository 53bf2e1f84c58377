//! Drift detection from successive observations.
//!
//! Compares the screens before and after each action to decide whether
//! anything visibly changed and whether the change looks wrong: a click
//! that moved nothing, an error dialog stealing focus, the same screen
//! repeating step after step.

use deskpilot_core_types::{ActionKind, Observation};
use fingerprint::{state_key, FingerprintConfig};

/// Element-count delta above which the screen counts as changed even when
/// title and key are stable.
const COUNT_CHANGE_THRESHOLD: usize = 5;

/// Identical screens in a row before the loop counts as stuck.
const STUCK_REPEAT_THRESHOLD: u32 = 3;

/// Outcome of one pre/post comparison.
#[derive(Clone, Debug, Default)]
pub struct DriftAssessment {
    pub state_changed: bool,
    pub drift_detected: bool,

    /// Human-readable reason, for the decider hints and logs.
    pub reason: Option<String>,
}

/// Stateful monitor: tracks screen repetition across a session.
pub struct DriftMonitor {
    config: FingerprintConfig,
    last_key: Option<String>,
    repeat_count: u32,
}

impl DriftMonitor {
    pub fn new(config: FingerprintConfig) -> Self {
        Self {
            config,
            last_key: None,
            repeat_count: 0,
        }
    }

    /// How many times in a row the screen has been identical.
    pub fn loop_count(&self) -> u32 {
        self.repeat_count
    }

    /// Assess the transition one executed action produced.
    ///
    /// A missing visible change only counts as drift for kinds that are
    /// supposed to move the screen; sliders, scrolls, and key presses may
    /// legitimately change nothing the fingerprint can see.
    pub fn assess(
        &mut self,
        before: &Observation,
        after: &Observation,
        kind: ActionKind,
    ) -> DriftAssessment {
        let key_before = state_key(before, &self.config);
        let key_after = state_key(after, &self.config);

        let title_changed = before.window_title != after.window_title;
        let count_delta = before.elements.len().abs_diff(after.elements.len());
        let state_changed =
            title_changed || key_before != key_after || count_delta > COUNT_CHANGE_THRESHOLD;

        match &self.last_key {
            Some(last) if *last == key_after.0 => self.repeat_count += 1,
            _ => self.repeat_count = 0,
        }
        self.last_key = Some(key_after.0.clone());

        let mut drift = DriftAssessment {
            state_changed,
            drift_detected: false,
            reason: None,
        };

        if kind == ActionKind::Click && !state_changed {
            drift.drift_detected = true;
            drift.reason = Some("click had no visible effect".to_string());
        }

        if kind == ActionKind::OpenApp && !title_changed {
            drift.drift_detected = true;
            drift.reason = Some("app did not take focus".to_string());
        }

        if title_changed {
            let title = after.window_title.to_lowercase();
            if title.contains("error") || title.contains("alert") {
                drift.drift_detected = true;
                drift.reason = Some(format!("error dialog appeared: '{}'", after.window_title));
            }
        }

        if self.repeat_count >= STUCK_REPEAT_THRESHOLD {
            drift.drift_detected = true;
            drift.reason = Some(format!(
                "screen unchanged for {} consecutive steps",
                self.repeat_count
            ));
        }

        drift
    }
}
