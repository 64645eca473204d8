//! Cache configuration.
//!
//! Controls generation collection and event consumption via the `[cache]`
//! section of `snapcache.toml`.

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_COLLECT_MIN_GEN_DELTA: i64 = 8;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Collect old generations automatically when a writer releases the store.
    pub auto_collect: bool,
    /// Minimum distance between the live and the oldest pinned generation
    /// before an automatic collection runs.
    pub collect_min_gen_delta: i64,
    /// Auto-consume interval (ms) for queued change events.
    pub auto_consume_interval_ms: u64,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            auto_collect: true,
            collect_min_gen_delta: DEFAULT_COLLECT_MIN_GEN_DELTA,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            auto_collect: settings.auto_collect,
            collect_min_gen_delta: settings.collect_min_gen_delta,
            auto_consume_interval_ms: settings.auto_consume_interval_ms,
            consume_batch_limit: settings.consume_batch_limit,
        }
    }
}

impl CacheConfig {
    /// Batch limit clamped to at least one event.
    pub fn batch_limit(&self) -> usize {
        self.consume_batch_limit.max(1)
    }
}
