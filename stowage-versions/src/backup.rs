//! Pre-migration snapshots.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use stowage_core::{StorageType, Timestamp, BACKUP_KEY_PREFIX};

/// One captured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub key: String,
    /// Decrypted payload.
    pub payload: serde_json::Value,
    pub storage_type: StorageType,
    /// Whether the record was encrypted at rest when captured.
    pub encrypted: bool,
    pub stored_at: Timestamp,
}

/// Every data-type record as it was at `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: Version,
    pub created_at: Timestamp,
    pub records: Vec<BackupRecord>,
    /// Every data-type key that existed when the snapshot was taken,
    /// including records that could not be read and so were not captured.
    /// Restoring only deletes keys outside this set.
    #[serde(default)]
    pub present_keys: Vec<String>,
}

impl Backup {
    pub fn new(version: Version, records: Vec<BackupRecord>, present_keys: Vec<String>) -> Self {
        Self {
            version,
            created_at: Utc::now(),
            records,
            present_keys,
        }
    }

    /// Keys that existed at capture time but have no captured record.
    pub fn uncaptured(&self) -> Vec<&str> {
        let captured: BTreeSet<&str> = self.records.iter().map(|r| r.key.as_str()).collect();
        self.present_keys
            .iter()
            .map(String::as_str)
            .filter(|key| !captured.contains(key))
            .collect()
    }

    /// Every key that existed when the snapshot was taken.
    pub fn present_key_set(&self) -> BTreeSet<&str> {
        self.present_keys
            .iter()
            .map(String::as_str)
            .chain(self.records.iter().map(|r| r.key.as_str()))
            .collect()
    }

    /// Storage key for this snapshot.
    pub fn key(&self) -> String {
        backup_key(&self.version, &self.created_at)
    }

    /// Whether any captured record was encrypted at rest.
    pub fn has_encrypted(&self) -> bool {
        self.records.iter().any(|r| r.encrypted)
    }
}

/// `backup_<version>_<unix_ms>`
pub fn backup_key(version: &Version, at: &Timestamp) -> String {
    format!("{}{}_{}", BACKUP_KEY_PREFIX, version, at.timestamp_millis())
}

/// Split a backup key into its version and creation time.
pub fn parse_backup_key(key: &str) -> Option<(Version, Timestamp)> {
    let rest = key.strip_prefix(BACKUP_KEY_PREFIX)?;
    let (version, millis) = rest.rsplit_once('_')?;
    let version = Version::parse(version).ok()?;
    let at = Utc.timestamp_millis_opt(millis.parse().ok()?).single()?;
    Some((version, at))
}

/// Summary of a stored backup, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub key: String,
    pub version: Version,
    pub created_at: Timestamp,
    pub storage_type: StorageType,
}
