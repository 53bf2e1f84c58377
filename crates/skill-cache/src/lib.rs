//! Amortized replay of recorded action sequences.
//!
//! A skill that succeeded on the live decision path is recorded with a
//! fingerprint of the screen it started from. The next time the same skill
//! runs with the same parameters on a matching screen, the recorded
//! sequence is replayed directly, skipping the decider entirely. Staleness
//! detection keeps replay honest: lookups tolerate one transient mismatch,
//! repeated mismatches and replay divergence remove the entry.

mod cache;
mod entry;

pub use cache::{
    CacheError, CachedPlan, CacheStats, SkillCache, SkillCacheConfig, SkillGuard,
};
pub use entry::{cache_key, CacheEntry, RecordedStep};
