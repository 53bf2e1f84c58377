//! Commonsense action priors.
//!
//! A cold Q-table has no opinion, so exploitation ties on unseen states
//! are broken by a static table of per-application kind biases before
//! falling back to candidate order. Biases are small relative to learned
//! Q-values; a few real updates override them.

use once_cell::sync::Lazy;

use deskpilot_core_types::ActionKind;

/// App-pattern → kind biases. Patterns are substring matches against the
/// lowercased window title; first match wins, empty pattern is the
/// catch-all.
static PRIORS: Lazy<Vec<(&'static str, Vec<(ActionKind, f64)>)>> = Lazy::new(|| {
    vec![
        (
            "terminal",
            vec![(ActionKind::TypeText, 0.2), (ActionKind::RunShell, 0.15)],
        ),
        (
            "settings",
            vec![(ActionKind::Click, 0.15), (ActionKind::SetSlider, 0.1)],
        ),
        (
            "edge",
            vec![(ActionKind::Click, 0.15), (ActionKind::Scroll, 0.1)],
        ),
        (
            "chrome",
            vec![(ActionKind::Click, 0.15), (ActionKind::Scroll, 0.1)],
        ),
        (
            "notepad",
            vec![(ActionKind::TypeText, 0.2), (ActionKind::Click, 0.1)],
        ),
        (
            "explorer",
            vec![(ActionKind::DoubleClick, 0.15), (ActionKind::Click, 0.1)],
        ),
        ("", vec![(ActionKind::Click, 0.05)]),
    ]
});

/// Bias for a kind in the given application context. Zero when nothing
/// applies.
pub fn prior_bias(app: &str, kind: ActionKind) -> f64 {
    let app = app.trim().to_lowercase();
    PRIORS
        .iter()
        .find(|(pattern, _)| pattern.is_empty() || app.contains(pattern))
        .map(|(_, biases)| {
            biases
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, b)| *b)
                .unwrap_or(0.0)
        })
        .unwrap_or(0.0)
}
