//! Data-driven per-application recovery strategies.
//!
//! When retries are exhausted on a transient failure, the executor consults
//! this table for a corrective action sequence keyed by the current
//! application and the failure signature. Suppression predicates keep
//! recovery from sabotaging in-progress user-visible operations (a rename
//! edit in Explorer, a compose window in a mail client).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use deskpilot_core_types::{Action, Observation};

use crate::errors::ExecError;

/// Which failure a rule applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSignature {
    /// Any transient error kind.
    AnyTransient,
    Timeout,
    ElementNotFound,
    StaleElement,
}

impl FailureSignature {
    pub fn matches(&self, error: &ExecError) -> bool {
        match self {
            FailureSignature::AnyTransient => error.is_transient(),
            FailureSignature::Timeout => matches!(error, ExecError::Timeout(_)),
            FailureSignature::ElementNotFound => matches!(error, ExecError::ElementNotFound(_)),
            FailureSignature::StaleElement => matches!(error, ExecError::StaleElement(_)),
        }
    }
}

/// Predicate that suppresses a rule while it holds on the live observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressWhen {
    /// Some element label contains this needle (case-insensitive).
    ElementLabelContains(String),

    /// The window title contains this needle (case-insensitive).
    TitleContains(String),
}

impl SuppressWhen {
    pub fn holds(&self, observation: &Observation) -> bool {
        match self {
            SuppressWhen::ElementLabelContains(needle) => {
                observation.has_label_containing(needle)
            }
            SuppressWhen::TitleContains(needle) => observation
                .window_title
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

/// One recovery rule: app pattern + failure signature → corrective sequence.
///
/// An empty corrective sequence means "never auto-recover in this app";
/// the rule still shadows the catch-all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryRule {
    /// Substring match against the lowercased window title. Empty matches
    /// everything (catch-all).
    pub app_pattern: String,

    pub signature: FailureSignature,

    /// Corrective actions, executed once each, without retry.
    pub actions: Vec<Action>,

    pub suppress_when: Vec<SuppressWhen>,
}

impl RecoveryRule {
    pub fn suppressed(&self, observation: &Observation) -> bool {
        self.suppress_when.iter().any(|p| p.holds(observation))
    }
}

/// Per-application recovery table with a per-rule attempt budget.
///
/// Rules are matched in insertion order; the first rule whose app pattern
/// and signature match wins, so more specific patterns ("quick settings")
/// must precede general ones ("settings").
pub struct RecoveryTable {
    rules: Vec<RecoveryRule>,
    attempts: HashMap<String, u32>,
    max_attempts_per_rule: u32,
}

impl RecoveryTable {
    pub fn new(rules: Vec<RecoveryRule>, max_attempts_per_rule: u32) -> Self {
        Self {
            rules,
            attempts: HashMap::new(),
            max_attempts_per_rule,
        }
    }

    /// Table with no rules; recovery always declines.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    /// Built-in rules derived from standard desktop UI conventions.
    ///
    /// Browsers get Escape then Alt+Left; editors get Escape then Ctrl+Z;
    /// mail/chat compose surfaces get Escape only (undo would delete typed
    /// text); Explorer, Quick Settings, and the clipboard panel get no
    /// automatic recovery at all (Escape cancels renames or closes the
    /// panel). The catch-all presses Escape then Alt+Left, suppressed while
    /// a rename edit is open.
    pub fn builtin() -> Self {
        let escape = Action::press_key("escape");
        let alt_left = Action::hotkey(vec!["alt", "left"]);
        let ctrl_z = Action::hotkey(vec!["ctrl", "z"]);

        let browser = |pattern: &str| RecoveryRule {
            app_pattern: pattern.to_string(),
            signature: FailureSignature::AnyTransient,
            actions: vec![escape.clone(), alt_left.clone()],
            suppress_when: Vec::new(),
        };
        let editor = |pattern: &str| RecoveryRule {
            app_pattern: pattern.to_string(),
            signature: FailureSignature::AnyTransient,
            actions: vec![escape.clone(), ctrl_z.clone()],
            suppress_when: Vec::new(),
        };
        let escape_only = |pattern: &str| RecoveryRule {
            app_pattern: pattern.to_string(),
            signature: FailureSignature::AnyTransient,
            actions: vec![escape.clone()],
            suppress_when: Vec::new(),
        };
        let none = |pattern: &str| RecoveryRule {
            app_pattern: pattern.to_string(),
            signature: FailureSignature::AnyTransient,
            actions: Vec::new(),
            suppress_when: Vec::new(),
        };

        let rules = vec![
            browser("edge"),
            browser("chrome"),
            browser("firefox"),
            escape_only("outlook"),
            escape_only("teams"),
            editor("word"),
            editor("excel"),
            editor("powerpoint"),
            editor("paint"),
            escape_only("snipping"),
            escape_only("feedback"),
            // Quick Settings must shadow "settings": Escape closes the panel.
            none("quick settings"),
            RecoveryRule {
                app_pattern: "settings".to_string(),
                signature: FailureSignature::AnyTransient,
                actions: vec![escape.clone(), alt_left.clone()],
                suppress_when: Vec::new(),
            },
            browser("store"),
            browser("security"),
            none("explorer"),
            none("clipboard"),
            // Catch-all, held back while a rename edit is in progress.
            RecoveryRule {
                app_pattern: String::new(),
                signature: FailureSignature::AnyTransient,
                actions: vec![escape, alt_left],
                suppress_when: vec![SuppressWhen::ElementLabelContains("rename".to_string())],
            },
        ];

        Self::new(rules, 3)
    }

    /// Look up a corrective plan for the current app and failure.
    ///
    /// Returns `None` when no rule matches, the matching rule is suppressed
    /// or empty, or its attempt budget is spent. An empty-title observation
    /// never recovers (there is no app context to correct within).
    pub fn corrective_plan(
        &self,
        observation: &Observation,
        error: &ExecError,
    ) -> Option<(String, Vec<Action>)> {
        let title = observation.window_title.trim().to_lowercase();
        if title.is_empty() {
            return None;
        }

        let rule = self.rules.iter().find(|rule| {
            (rule.app_pattern.is_empty() || title.contains(&rule.app_pattern))
                && rule.signature.matches(error)
        })?;

        if rule.actions.is_empty() {
            debug!(app = %rule.app_pattern, "recovery disabled for this app");
            return None;
        }
        if rule.suppressed(observation) {
            debug!(app = %rule.app_pattern, "recovery suppressed by predicate");
            return None;
        }

        let key = rule_key(rule, &title);
        if self.attempts.get(&key).copied().unwrap_or(0) >= self.max_attempts_per_rule {
            debug!(rule = %key, "recovery attempt budget spent");
            return None;
        }

        Some((key, rule.actions.clone()))
    }

    /// Record that a corrective plan was attempted.
    pub fn record_attempt(&mut self, key: &str) {
        *self.attempts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Reset attempt counters for a new task.
    pub fn reset(&mut self) {
        self.attempts.clear();
    }
}

fn rule_key(rule: &RecoveryRule, title: &str) -> String {
    if rule.app_pattern.is_empty() {
        format!("default:{}", title)
    } else {
        rule.app_pattern.clone()
    }
}
