//! Retention cleanup.
//!
//! Each policy runs two independent passes over its data type: an age pass
//! removing every record strictly older than `max_age`, then a count pass
//! keeping only the newest `max_count` of the survivors.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use stowage_core::{DataType, RetentionPolicy, RetentionTable, StorageType, StowageResult, Timestamp};
use stowage_storage::{Entry, StorageManager};
use tracing::{debug, error, info};

/// Payload fields consulted, in order, for a record's creation time.
pub const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "created_at", "createdAt"];

/// Outcome for one data type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCleanup {
    pub removed: u64,
    /// Bytes released (key plus stored payload).
    pub freed: u64,
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub by_type: BTreeMap<DataType, TypeCleanup>,
    pub total_removed: u64,
    pub total_freed: u64,
    pub ran_at: Timestamp,
}

impl CleanupReport {
    pub fn for_type(&self, data_type: DataType) -> TypeCleanup {
        self.by_type.get(&data_type).copied().unwrap_or_default()
    }
}

/// Cumulative figures across every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupStats {
    pub last_cleanup: Option<Timestamp>,
    pub cleanup_count: u64,
    /// Total bytes freed.
    pub data_freed: u64,
}

impl CleanupStats {
    pub fn record(&mut self, report: &CleanupReport) {
        self.last_cleanup = Some(report.ran_at);
        self.cleanup_count += 1;
        self.data_freed += report.total_freed;
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

/// When a record was created: the first parseable timestamp field of its
/// payload, else when it was stored.
pub fn record_time(payload: &Value, stored_at: Timestamp) -> Timestamp {
    TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| payload.get(field).and_then(parse_time))
        .unwrap_or(stored_at)
}

/// Select the entries `policy` removes, as of `now`.
pub fn plan_removals<'a>(entries: &'a [Entry], policy: &RetentionPolicy, now: Timestamp) -> Vec<&'a Entry> {
    let max_age_ms = i64::try_from(policy.max_age_ms).unwrap_or(i64::MAX);
    let (mut doomed, mut survivors): (Vec<_>, Vec<_>) = entries
        .iter()
        .map(|entry| (record_time(&entry.payload, entry.stored_at), entry))
        .partition(|(created, _)| (now - *created).num_milliseconds() > max_age_ms);

    if let Some(max_count) = policy.max_count {
        if survivors.len() > max_count {
            survivors.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));
            doomed.extend(survivors.drain(max_count..));
        }
    }

    doomed.into_iter().map(|(_, entry)| entry).collect()
}

async fn clean_type(
    storage: &StorageManager,
    data_type: DataType,
    policy: &RetentionPolicy,
    now: Timestamp,
) -> StowageResult<TypeCleanup> {
    let entries = storage.entries(data_type).await?;
    let doomed = plan_removals(&entries, policy, now);
    if doomed.is_empty() {
        return Ok(TypeCleanup::default());
    }

    let freed: u64 = doomed.iter().map(|e| e.size_bytes).sum();
    let keys: Vec<(String, StorageType)> = doomed
        .iter()
        .map(|e| (e.key.clone(), e.storage_type))
        .collect();
    let removed = storage.remove_many(&keys).await? as u64;
    debug!(data_type = %data_type, examined = entries.len(), removed, freed, "Cleaned data type");
    Ok(TypeCleanup { removed, freed })
}

/// Apply every policy in `retention`.
///
/// A type whose cleanup fails is logged and reported as `{0, 0}`; the
/// other types still run.
pub async fn run(storage: &StorageManager, retention: &RetentionTable) -> CleanupReport {
    let now = Utc::now();
    run_each(retention, now, move |data_type, policy| async move {
        clean_type(storage, data_type, &policy, now).await
    })
    .await
}

async fn run_each<F, Fut>(retention: &RetentionTable, now: Timestamp, mut clean: F) -> CleanupReport
where
    F: FnMut(DataType, RetentionPolicy) -> Fut,
    Fut: Future<Output = StowageResult<TypeCleanup>>,
{
    let mut by_type = BTreeMap::new();
    for (data_type, policy) in retention.iter() {
        let outcome = match clean(data_type, *policy).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(data_type = %data_type, error = %e, "Cleanup failed for data type");
                TypeCleanup::default()
            }
        };
        by_type.insert(data_type, outcome);
    }

    let report = CleanupReport {
        total_removed: by_type.values().map(|c| c.removed).sum(),
        total_freed: by_type.values().map(|c| c.freed).sum(),
        by_type,
        ran_at: now,
    };
    info!(
        removed = report.total_removed,
        freed = report.total_freed,
        "Cleanup complete"
    );
    report
}
