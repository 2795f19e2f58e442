//! Instance-local read cache in front of both backends.
//!
//! The cache is never authoritative: entries are refreshed on every write,
//! dropped on removal, and served only while younger than the caller's
//! `max_age`. Payloads are cached decrypted.
//!
//! Nothing outlives the cache's `ttl`: lookups treat older entries as stale,
//! and expired entries are swept at most once per `ttl` on insert and on
//! every [`ReadCache::stats`] call, so keys that are never read again do
//! not pile up.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use stowage_core::{StorageType, Timestamp};

/// One cached payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub storage_type: StorageType,
    pub cached_at: Timestamp,
}

impl CacheEntry {
    /// Age of the entry, zero if the clock moved backwards.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of lookups that found nothing or a stale entry.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Entries dropped because they were older than the requested age.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lifetime of an entry when none is configured.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    last_sweep: Timestamp,
}

impl Inner {
    fn sweep(&mut self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.age() < ttl);
        let evicted = before - self.entries.len();
        self.stats.expirations += evicted as u64;
        self.last_sweep = Utc::now();
        evicted
    }

    fn sweep_due(&self, ttl: Duration) -> bool {
        (Utc::now() - self.last_sweep)
            .to_std()
            .map_or(false, |since| since >= ttl)
    }
}

/// Key -> payload cache with per-lookup freshness.
#[derive(Debug)]
pub struct ReadCache {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose entries live at most `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
                last_sweep: Utc::now(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached payload for `key` if it is younger than `max_age` (capped at
    /// the cache's ttl).
    ///
    /// A stale entry is evicted and counted as a miss.
    pub fn get(&self, key: &str, max_age: Duration) -> Option<CacheEntry> {
        let Ok(mut inner) = self.inner.write() else {
            return None;
        };
        let max_age = max_age.min(self.ttl);
        let fresh = match inner.entries.get(key) {
            Some(entry) if entry.age() < max_age => Some(entry.clone()),
            Some(_) => {
                inner.entries.remove(key);
                inner.stats.expirations += 1;
                None
            }
            None => None,
        };
        if fresh.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        fresh
    }

    pub fn insert(&self, key: &str, payload: serde_json::Value, storage_type: StorageType) {
        if let Ok(mut inner) = self.inner.write() {
            if inner.sweep_due(self.ttl) {
                inner.sweep(self.ttl);
            }
            inner.entries.insert(
                key.to_string(),
                CacheEntry {
                    key: key.to_string(),
                    payload,
                    storage_type,
                    cached_at: Utc::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner
            .write()
            .map(|mut inner| inner.entries.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop every entry shadowing `storage_type`. Returns how many.
    pub fn purge(&self, storage_type: StorageType) -> usize {
        let Ok(mut inner) = self.inner.write() else {
            return 0;
        };
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.storage_type != storage_type);
        before - inner.entries.len()
    }

    /// Drop every entry older than the ttl. Returns how many.
    pub fn evict_expired(&self) -> usize {
        self.inner
            .write()
            .map(|mut inner| inner.sweep(self.ttl))
            .unwrap_or(0)
    }

    /// Current statistics. Sweeps expired entries first, so `entry_count`
    /// only counts live ones.
    pub fn stats(&self) -> CacheStats {
        self.inner
            .write()
            .map(|mut inner| {
                inner.sweep(self.ttl);
                CacheStats {
                    entry_count: inner.entries.len() as u64,
                    ..inner.stats.clone()
                }
            })
            .unwrap_or_default()
    }
}
