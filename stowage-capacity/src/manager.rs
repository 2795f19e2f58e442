//! Capacity monitoring and scheduled retention cleanup.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use stowage_core::{
    CapacityUsage, DataType, RetentionPolicy, RetentionTable, StorageType, StowageResult, Timestamp,
};
use stowage_events::{EventBus, StorageEvent};
use stowage_storage::{CacheStats, StorageManager};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cleanup::{self, plan_removals, CleanupReport, CleanupStats};
use crate::suggestions::{advise, AdvisorInput, Suggestion};
use crate::usage;

/// Everything the diagnostics surface shows about capacity.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityReport {
    pub usage: CapacityUsage,
    pub stats: CleanupStats,
    pub policies: RetentionTable,
    pub suggestions: Vec<Suggestion>,
    pub cache: CacheStats,
    pub generated_at: Timestamp,
}

struct Monitor {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Measures usage, raises threshold alerts and enforces retention.
pub struct CapacityManager {
    storage: Arc<StorageManager>,
    retention: RetentionTable,
    stats: Mutex<CleanupStats>,
    monitor: Mutex<Option<Monitor>>,
}

impl std::fmt::Debug for CapacityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityManager")
            .field("retention", &self.retention)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl CapacityManager {
    /// A manager enforcing the retention table from the storage config.
    pub fn new(storage: Arc<StorageManager>) -> Self {
        let retention = storage.config().retention.clone();
        Self::with_retention(storage, retention)
    }

    pub fn with_retention(storage: Arc<StorageManager>, retention: RetentionTable) -> Self {
        Self {
            storage,
            retention,
            stats: Mutex::new(CleanupStats::default()),
            monitor: Mutex::new(None),
        }
    }

    fn events(&self) -> &EventBus {
        self.storage.events()
    }

    pub fn retention(&self) -> &RetentionTable {
        &self.retention
    }

    pub fn stats(&self) -> CleanupStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the background monitor.
    ///
    /// The monitor runs cleanup every `cleanup_interval` (first run one
    /// interval from now) and re-checks capacity after every
    /// [`StorageEvent::Updated`]. Calling `init` on a running manager does
    /// nothing.
    pub fn init(self: &Arc<Self>) {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Capacity monitor already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let events = self.events().subscribe();
        let handle = tokio::spawn(Arc::clone(self).monitor_loop(events, shutdown_rx));
        *slot = Some(Monitor {
            shutdown_tx,
            handle,
        });
        info!(
            cleanup_interval_ms = self.storage.config().cleanup_interval_ms,
            policies = self.retention.len(),
            "Capacity monitor started"
        );
    }

    /// Stop the background monitor and wait for it to exit.
    pub async fn shutdown(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(monitor) = monitor else {
            return;
        };
        let _ = monitor.shutdown_tx.send(true);
        if let Err(e) = monitor.handle.await {
            warn!(error = %e, "Capacity monitor ended abnormally");
        }
        info!("Capacity monitor stopped");
    }

    async fn monitor_loop(
        self: Arc<Self>,
        mut events: broadcast::Receiver<StorageEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let period = self.storage.config().cleanup_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.perform_cleanup().await;
                }

                received = events.recv() => match received {
                    Ok(StorageEvent::Updated { .. }) => self.recheck(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Capacity monitor lagged behind storage events");
                        self.recheck();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Capacity monitor loop exited");
    }

    fn recheck(&self) {
        if let Err(e) = self.check_and_notify() {
            warn!(error = %e, "Capacity check failed");
        }
    }

    /// Current usage of both backends.
    pub fn check_capacity(&self) -> StowageResult<CapacityUsage> {
        usage::measure(&self.storage)
    }

    /// Measure usage and publish an alert for every backend past a
    /// threshold. Critical supersedes warning.
    pub fn check_and_notify(&self) -> StowageResult<CapacityUsage> {
        let usage = self.check_capacity()?;
        for storage_type in StorageType::ALL {
            let backend = usage.backend(storage_type);
            if backend.critical {
                warn!(
                    storage_type = %storage_type,
                    percentage = backend.percentage,
                    "Storage capacity critical"
                );
                self.events().publish(StorageEvent::CapacityCritical {
                    storage_type,
                    usage: backend.clone(),
                });
            } else if backend.warning {
                warn!(
                    storage_type = %storage_type,
                    percentage = backend.percentage,
                    "Storage capacity warning"
                );
                self.events().publish(StorageEvent::CapacityWarning {
                    storage_type,
                    usage: backend.clone(),
                });
            }
        }
        Ok(usage)
    }

    /// Apply every retention policy now.
    pub async fn perform_cleanup(&self) -> CleanupReport {
        let report = cleanup::run(&self.storage, &self.retention).await;
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&report);
        self.events().publish(StorageEvent::CleanupCompleted {
            removed: report.total_removed,
            freed: report.total_freed,
        });
        report
    }

    /// Per data type, how many stored records are past their max age.
    async fn expired_counts(&self) -> StowageResult<Vec<(DataType, usize)>> {
        let now = Utc::now();
        let mut counts = Vec::new();
        for (data_type, policy) in self.retention.iter() {
            let age_only = RetentionPolicy {
                max_count: None,
                ..*policy
            };
            let entries = self.storage.entries(data_type).await?;
            counts.push((data_type, plan_removals(&entries, &age_only, now).len()));
        }
        Ok(counts)
    }

    /// Advisory suggestions, highest priority first.
    pub async fn get_optimization_suggestions(&self) -> StowageResult<Vec<Suggestion>> {
        let usage = self.check_capacity()?;
        let expired = self.expired_counts().await?;
        Ok(advise(&AdvisorInput {
            usage: &usage,
            async_available: self.storage.is_async_available(),
            expired: &expired,
            cache: self.storage.cache_stats(),
        }))
    }

    pub async fn get_capacity_report(&self) -> StowageResult<CapacityReport> {
        Ok(CapacityReport {
            usage: self.check_capacity()?,
            stats: self.stats(),
            policies: self.retention.clone(),
            suggestions: self.get_optimization_suggestions().await?,
            cache: self.storage.cache_stats(),
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stowage_storage::StoreOptions;
    use stowage_test_utils::{fixtures, open_stack};

    #[tokio::test]
    async fn test_init_is_idempotent_and_shutdown_stops() {
        let stack = open_stack();
        let manager = Arc::new(CapacityManager::new(stack.storage.clone()));
        manager.init();
        manager.init();
        assert!(manager.is_running());
        assert_eq!(stack.events.subscriber_count(), 1);

        manager.shutdown().await;
        assert!(!manager.is_running());
        assert_eq!(stack.events.subscriber_count(), 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleanup_updates_stats_and_publishes() {
        let stack = open_stack();
        let mut rx = stack.events.subscribe();
        let manager = CapacityManager::new(stack.storage.clone());
        stack
            .storage
            .store("weather_paris", &fixtures::weather("paris", 3), StoreOptions::new())
            .await
            .expect("store");

        let report = manager.perform_cleanup().await;
        assert_eq!(report.for_type(DataType::Weather).removed, 1);
        let stats = manager.stats();
        assert_eq!(stats.cleanup_count, 1);
        assert_eq!(stats.data_freed, report.total_freed);
        assert!(stats.data_freed > 0);

        let mut saw_cleanup = false;
        while let Ok(event) = rx.try_recv() {
            if let StorageEvent::CleanupCompleted { removed, .. } = event {
                assert_eq!(removed, 1);
                saw_cleanup = true;
            }
        }
        assert!(saw_cleanup);
    }

    #[tokio::test]
    async fn test_report_includes_expired_suggestion() {
        let stack = open_stack();
        let manager = CapacityManager::new(stack.storage.clone());
        stack
            .storage
            .store("weather_oslo", &fixtures::weather("oslo", 5), StoreOptions::new())
            .await
            .expect("store");
        stack
            .storage
            .store("settings_theme", &json!("dark"), StoreOptions::new())
            .await
            .expect("store");

        let report = manager.get_capacity_report().await.expect("report");
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.kind == crate::SuggestionKind::RunCleanup));
        assert_eq!(report.stats.cleanup_count, 0);
        assert_eq!(report.policies, stack.config.retention);
    }
}
