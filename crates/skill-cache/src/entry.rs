//! Cache entry model and key derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use deskpilot_core_types::Action;
use fingerprint::Fingerprint;

/// One recorded action plus the screen expected after it, used to
/// cross-check replay progress mid-sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    pub action: Action,

    /// Fingerprint observed after this action in the recorded run. `None`
    /// when the recording had no post-step capture; replay then skips the
    /// cross-check for this step.
    pub expected_after: Option<Fingerprint>,
}

impl RecordedStep {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            expected_after: None,
        }
    }

    pub fn with_expected(action: Action, expected: Fingerprint) -> Self {
        Self {
            action,
            expected_after: Some(expected),
        }
    }
}

/// A cached skill execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub skill_id: String,

    /// Key derived from skill id + canonicalized params.
    pub cache_key: String,

    /// Parameters the skill ran with, kept for inspection.
    pub params: serde_json::Value,

    /// Screen the recording started from; a lookup hit requires the live
    /// screen to be within `staleness_threshold` of this.
    pub pre_fingerprint: Fingerprint,

    /// Screen the recording ended on, when captured.
    pub post_fingerprint: Option<Fingerprint>,

    pub steps: Vec<RecordedStep>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_hit: DateTime<Utc>,
    pub hit_count: u32,

    /// Maximum fingerprint distance that still counts as a match
    /// (inclusive).
    pub staleness_threshold: f64,

    /// Stale lookups in a row since the last hit. One stale lookup is
    /// tolerated as a transient UI change; the eviction rule fires on the
    /// second.
    pub consecutive_stale: u32,
}

impl CacheEntry {
    /// True when every recorded step is a terminal marker: nothing would be
    /// replayed against the OS, so the entry is worthless.
    pub fn is_noop(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.action.kind().is_terminal_marker())
    }
}

/// Derive the cache key for a skill + params combination.
///
/// Params are canonicalized through `serde_json::Value` (object keys sort
/// deterministically) so logically equal params always produce the same key.
pub fn cache_key(skill_id: &str, params: &serde_json::Value) -> String {
    let raw = format!("{}:{}", skill_id, params);
    let digest = Sha256::digest(raw.as_bytes());
    digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()[..16]
        .to_string()
}
