//! Backend usage measurement.

use chrono::Utc;
use stowage_core::{BackendUsage, CapacityUsage, StorageError, StowageResult};
use stowage_storage::StorageManager;

/// Measure both backends against their configured limits.
///
/// Sync usage is exact. Async usage is estimated as record count times
/// `async_record_estimate_bytes`; an unavailable async backend counts as
/// empty.
pub fn measure(storage: &StorageManager) -> StowageResult<CapacityUsage> {
    let config = storage.config();
    let (warn_at, crit_at) = (config.warning_threshold, config.critical_threshold);

    let sync_backend = storage.sync_backend();
    let sync = BackendUsage::measure(
        sync_backend.used_bytes()?,
        sync_backend.limit_bytes(),
        warn_at,
        crit_at,
    );

    let records = match storage.async_backend() {
        Some(large) => large.record_count().map_err(StorageError::from)?,
        None => 0,
    };
    let async_ = BackendUsage::measure(
        records.saturating_mul(config.async_record_estimate_bytes),
        config.async_limit_bytes,
        warn_at,
        crit_at,
    );

    let total = BackendUsage::measure(
        sync.used + async_.used,
        sync.limit + async_.limit,
        warn_at,
        crit_at,
    );

    Ok(CapacityUsage {
        sync,
        async_,
        total,
        measured_at: Utc::now(),
    })
}
