//! The skill cache store: lookup, record, invalidation, eviction.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use fingerprint::Fingerprint;

use crate::entry::{cache_key, CacheEntry, RecordedStep};

#[derive(Debug, Error)]
pub enum CacheError {
    /// Another replay of this skill is in flight.
    #[error("Skill '{0}' is busy with another replay")]
    Busy(String),

    /// The recorded sequence contains nothing replayable.
    #[error("Skill '{0}' produced only terminal markers, not cacheable")]
    NotReplayable(String),
}

/// Cache tuning knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkillCacheConfig {
    /// Default staleness threshold stamped onto new entries.
    /// Default: 0.4
    pub staleness_threshold: f64,

    /// Entries not hit for longer than this are evicted.
    /// Default: 14 days
    pub max_age_secs: i64,

    /// Stale lookups in a row before an entry is evicted.
    /// Default: 2
    pub max_consecutive_stale: u32,

    /// Cache JSON location; `None` keeps the cache in memory only.
    pub persist_path: Option<PathBuf>,
}

impl Default for SkillCacheConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: 0.4,
            max_age_secs: 14 * 24 * 3600,
            max_consecutive_stale: 2,
            persist_path: None,
        }
    }
}

/// Lifetime counters, persisted with the entries.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub stores: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.stale;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A replayable plan handed out on a cache hit.
#[derive(Clone, Debug)]
pub struct CachedPlan {
    pub cache_key: String,
    pub skill_id: String,
    pub steps: Vec<RecordedStep>,

    /// Threshold for mid-replay fingerprint cross-checks, copied from the
    /// entry.
    pub staleness_threshold: f64,
}

/// Exclusive access token for one skill id. Dropping it releases the skill.
pub struct SkillGuard {
    skill_id: String,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl Drop for SkillGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.skill_id);
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Fingerprint-keyed cache of recorded action sequences.
///
/// A hit requires the live screen fingerprint to be within the entry's
/// staleness threshold of the recorded pre-fingerprint (inclusive). Stale
/// entries are kept through one mismatch and evicted on the second in a
/// row; replay divergence removes an entry immediately via `invalidate`.
pub struct SkillCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    busy: Arc<Mutex<HashSet<String>>>,
    stats: Arc<RwLock<CacheStats>>,
    config: SkillCacheConfig,
}

impl SkillCache {
    pub fn new(config: SkillCacheConfig) -> Self {
        let file = match &config.persist_path {
            Some(path) => load_file(path),
            None => CacheFile::default(),
        };
        info!(entries = file.entries.len(), "skill cache ready");
        Self {
            entries: Arc::new(RwLock::new(file.entries)),
            busy: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(RwLock::new(file.stats)),
            config,
        }
    }

    /// Claim exclusive replay access for a skill id. Concurrent callers for
    /// the same skill get [`CacheError::Busy`] and must take the live path.
    pub fn acquire(&self, skill_id: &str) -> Result<SkillGuard, CacheError> {
        let mut busy = self.busy.lock();
        if !busy.insert(skill_id.to_string()) {
            return Err(CacheError::Busy(skill_id.to_string()));
        }
        Ok(SkillGuard {
            skill_id: skill_id.to_string(),
            busy: Arc::clone(&self.busy),
        })
    }

    /// Look up a replayable plan for a skill + params against the live
    /// screen.
    ///
    /// A fingerprint mismatch counts the entry stale but keeps it (the UI
    /// change may be transient); `max_consecutive_stale` mismatches in a
    /// row evict it. No-op entries found here are purged outright.
    pub fn lookup(
        &self,
        skill_id: &str,
        params: &serde_json::Value,
        live: &Fingerprint,
    ) -> Option<CachedPlan> {
        let key = cache_key(skill_id, params);
        let mut entries = self.entries.write();

        let entry = match entries.get_mut(&key) {
            Some(entry) => entry,
            None => {
                self.stats.write().misses += 1;
                return None;
            }
        };

        if entry.is_noop() {
            warn!(skill = skill_id, "purging no-op cache entry");
            entries.remove(&key);
            self.stats.write().misses += 1;
            drop(entries);
            self.flush();
            return None;
        }

        if entry.pre_fingerprint.matches(live, entry.staleness_threshold) {
            entry.hit_count += 1;
            entry.last_hit = Utc::now();
            entry.consecutive_stale = 0;
            let plan = CachedPlan {
                cache_key: key.clone(),
                skill_id: entry.skill_id.clone(),
                steps: entry.steps.clone(),
                staleness_threshold: entry.staleness_threshold,
            };
            self.stats.write().hits += 1;
            debug!(skill = skill_id, key = %key, steps = plan.steps.len(), "cache hit");
            drop(entries);
            self.flush();
            Some(plan)
        } else {
            entry.consecutive_stale += 1;
            let evict = entry.consecutive_stale >= self.config.max_consecutive_stale;
            if evict {
                info!(skill = skill_id, key = %key, "evicting repeatedly stale entry");
                entries.remove(&key);
                self.stats.write().evictions += 1;
            }
            self.stats.write().stale += 1;
            drop(entries);
            self.flush();
            None
        }
    }

    /// Record a successful live run. Re-recording an existing key refreshes
    /// it: the staleness clock resets and the hit count carries forward.
    ///
    /// Sequences with no replayable step (only terminal markers) are
    /// refused: they encode "already done", which is state-dependent and
    /// meaningless to replay.
    pub fn record(
        &self,
        skill_id: &str,
        params: &serde_json::Value,
        pre: Fingerprint,
        steps: Vec<RecordedStep>,
        post: Option<Fingerprint>,
    ) -> Result<String, CacheError> {
        if steps
            .iter()
            .all(|s| s.action.kind().is_terminal_marker())
        {
            debug!(skill = skill_id, "refusing to cache no-op sequence");
            return Err(CacheError::NotReplayable(skill_id.to_string()));
        }

        let key = cache_key(skill_id, params);
        let now = Utc::now();
        let mut entries = self.entries.write();
        let carried_hits = entries.get(&key).map(|e| e.hit_count + 1).unwrap_or(0);

        entries.insert(
            key.clone(),
            CacheEntry {
                skill_id: skill_id.to_string(),
                cache_key: key.clone(),
                params: params.clone(),
                pre_fingerprint: pre,
                post_fingerprint: post,
                steps,
                created_at: now,
                last_hit: now,
                hit_count: carried_hits,
                staleness_threshold: self.config.staleness_threshold,
                consecutive_stale: 0,
            },
        );
        self.stats.write().stores += 1;
        drop(entries);
        self.flush();
        info!(skill = skill_id, key = %key, "recorded skill");
        Ok(key)
    }

    /// Remove an entry immediately. Used by the replay path on divergence
    /// or replay failure.
    pub fn invalidate(&self, key: &str) {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.stats.write().evictions += 1;
            info!(key = %key, "invalidated cache entry");
            self.flush();
        }
    }

    /// Evict entries not hit within the configured age.
    pub fn evict_expired(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.config.max_age_secs);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.last_hit >= cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            self.stats.write().evictions += evicted as u64;
            info!(evicted, "evicted expired cache entries");
            drop(entries);
            self.flush();
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Persist now. Failures are logged, never raised.
    pub fn flush(&self) {
        if let Some(path) = &self.config.persist_path {
            let file = CacheFile {
                entries: self.entries.read().clone(),
                stats: *self.stats.read(),
            };
            if let Err(err) = save_file(path, &file) {
                warn!(path = %path.display(), "cache flush failed: {}", err);
            }
        }
    }
}

fn load_file(path: &Path) -> CacheFile {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no persisted cache, starting empty");
            return CacheFile::default();
        }
        Err(err) => {
            warn!(path = %path.display(), "failed to read cache file: {}", err);
            return CacheFile::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), "corrupt cache file, starting empty: {}", err);
            CacheFile::default()
        }
    }
}

fn save_file(path: &Path, file: &CacheFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let json = serde_json::to_string_pretty(file)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path)?;
    Ok(())
}
