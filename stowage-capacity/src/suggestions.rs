//! Advisory optimization suggestions. Nothing here is applied automatically.

use serde::Serialize;
use stowage_core::{CapacityUsage, DataType, StorageType};
use stowage_storage::CacheStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// A backend is at or above its critical threshold.
    BackendCritical,
    /// A backend is at or above its warning threshold.
    BackendWarning,
    /// The async backend failed to open.
    AsyncUnavailable,
    /// The small sync backend carries most of the data.
    RebalanceBackends,
    /// Records past their retention age are still stored.
    RunCleanup,
    /// The read cache rarely hits.
    CacheIneffective,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub priority: Priority,
    pub kind: SuggestionKind,
    pub message: String,
}

/// Inputs the advisor looks at.
#[derive(Debug, Clone)]
pub struct AdvisorInput<'a> {
    pub usage: &'a CapacityUsage,
    pub async_available: bool,
    /// Per data type, how many records are already past their max age.
    pub expired: &'a [(DataType, usize)],
    pub cache: CacheStats,
}

/// Sync usage share above which rebalancing is suggested.
const SKEW_SYNC_PERCENT: f64 = 50.0;
/// Async usage share below which the async backend counts as underused.
const SKEW_ASYNC_PERCENT: f64 = 10.0;
/// Lookups needed before the cache hit rate is judged.
const MIN_CACHE_LOOKUPS: u64 = 20;
const POOR_HIT_RATE: f64 = 0.5;

/// Derive suggestions, highest priority first.
pub fn advise(input: &AdvisorInput<'_>) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if !input.async_available {
        suggestions.push(Suggestion {
            priority: Priority::High,
            kind: SuggestionKind::AsyncUnavailable,
            message: "The async backend is unavailable; large records are being dropped. \
                      Check the data directory and LMDB map size."
                .to_string(),
        });
    }

    for storage_type in StorageType::ALL {
        let usage = input.usage.backend(storage_type);
        if usage.critical {
            suggestions.push(Suggestion {
                priority: Priority::High,
                kind: SuggestionKind::BackendCritical,
                message: format!(
                    "{} backend is {:.1}% full; free space now or raise its limit",
                    storage_type, usage.percentage
                ),
            });
        } else if usage.warning {
            suggestions.push(Suggestion {
                priority: Priority::Medium,
                kind: SuggestionKind::BackendWarning,
                message: format!(
                    "{} backend is {:.1}% full; consider running cleanup",
                    storage_type, usage.percentage
                ),
            });
        }
    }

    if input.async_available
        && input.usage.sync.percentage > SKEW_SYNC_PERCENT
        && input.usage.async_.percentage < SKEW_ASYNC_PERCENT
    {
        suggestions.push(Suggestion {
            priority: Priority::Low,
            kind: SuggestionKind::RebalanceBackends,
            message: format!(
                "sync backend holds {:.1}% of its limit while async holds {:.1}%; \
                 store bulky records in the async backend",
                input.usage.sync.percentage, input.usage.async_.percentage
            ),
        });
    }

    let expired: Vec<String> = input
        .expired
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(data_type, count)| format!("{} {}", count, data_type))
        .collect();
    if !expired.is_empty() {
        suggestions.push(Suggestion {
            priority: Priority::Medium,
            kind: SuggestionKind::RunCleanup,
            message: format!(
                "records past their retention age are still stored ({}); run cleanup",
                expired.join(", ")
            ),
        });
    }

    let lookups = input.cache.hits + input.cache.misses;
    if lookups >= MIN_CACHE_LOOKUPS && input.cache.hit_rate() < POOR_HIT_RATE {
        suggestions.push(Suggestion {
            priority: Priority::Low,
            kind: SuggestionKind::CacheIneffective,
            message: format!(
                "read cache hit rate is {:.0}% over {} lookups; consider a longer cache TTL",
                input.cache.hit_rate() * 100.0,
                lookups
            ),
        });
    }

    suggestions.sort_by(|a, b| b.priority.cmp(&a.priority));
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stowage_core::BackendUsage;

    fn usage(sync_used: u64, async_used: u64) -> CapacityUsage {
        let sync = BackendUsage::measure(sync_used, 100, 0.8, 0.95);
        let async_ = BackendUsage::measure(async_used, 1000, 0.8, 0.95);
        let total = BackendUsage::measure(sync_used + async_used, 1100, 0.8, 0.95);
        CapacityUsage {
            sync,
            async_,
            total,
            measured_at: Utc::now(),
        }
    }

    fn kinds(suggestions: &[Suggestion]) -> Vec<SuggestionKind> {
        suggestions.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_quiet_when_healthy() {
        let usage = usage(10, 100);
        let input = AdvisorInput {
            usage: &usage,
            async_available: true,
            expired: &[],
            cache: CacheStats::default(),
        };
        assert!(advise(&input).is_empty());
    }

    #[test]
    fn test_priorities_are_ordered() {
        let usage = usage(96, 0);
        let expired = [(DataType::Weather, 3), (DataType::Event, 0)];
        let input = AdvisorInput {
            usage: &usage,
            async_available: true,
            expired: &expired,
            cache: CacheStats {
                hits: 2,
                misses: 30,
                entry_count: 5,
                expirations: 1,
            },
        };
        let suggestions = advise(&input);
        assert_eq!(
            kinds(&suggestions),
            vec![
                SuggestionKind::BackendCritical,
                SuggestionKind::RunCleanup,
                SuggestionKind::RebalanceBackends,
                SuggestionKind::CacheIneffective,
            ]
        );
        assert!(suggestions[1].message.contains("3 weather"));
        assert!(!suggestions[1].message.contains("event"));
    }

    #[test]
    fn test_unavailable_async_replaces_skew_advice() {
        let usage = usage(85, 0);
        let input = AdvisorInput {
            usage: &usage,
            async_available: false,
            expired: &[],
            cache: CacheStats::default(),
        };
        assert_eq!(
            kinds(&advise(&input)),
            vec![SuggestionKind::AsyncUnavailable, SuggestionKind::BackendWarning]
        );
    }
}
