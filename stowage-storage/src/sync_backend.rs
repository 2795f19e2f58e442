//! Small, quota-limited, namespaced key-value store.
//!
//! Every key is stored as `<namespace><key>` with the record serialized as a
//! JSON string. Usage is the exact byte length of namespaced keys plus
//! values, and writes that would push usage past the limit are rejected with
//! [`StorageError::QuotaExceeded`].
//!
//! The store lives in memory behind an `RwLock`. When opened with a file
//! path, every mutation is written through to that file (write to a sibling
//! temp file, then rename) so values survive a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stowage_core::{Record, StorageError, StorageType, Timestamp};
use tracing::debug;

use crate::backend::{off_runtime, sealed, Backend};

#[derive(Serialize)]
struct StoredValueRef<'a> {
    payload: &'a serde_json::Value,
    stored_at: Timestamp,
    encrypted: bool,
}

#[derive(Deserialize)]
struct StoredValue {
    payload: serde_json::Value,
    stored_at: Timestamp,
    #[serde(default)]
    encrypted: bool,
}

/// Small-record backend. Its own methods are synchronous; the manager
/// reaches it through `Arc<SyncBackend>` as a [`Backend`].
#[derive(Debug)]
pub struct SyncBackend {
    namespace: String,
    limit_bytes: u64,
    entries: RwLock<BTreeMap<String, String>>,
    persist_path: Option<PathBuf>,
}

impl SyncBackend {
    /// Purely in-memory store.
    pub fn in_memory(namespace: impl Into<String>, limit_bytes: u64) -> Self {
        Self {
            namespace: namespace.into(),
            limit_bytes,
            entries: RwLock::new(BTreeMap::new()),
            persist_path: None,
        }
    }

    /// Store persisted to `path`. An absent file starts empty.
    pub fn open(
        path: impl AsRef<Path>,
        namespace: impl Into<String>,
        limit_bytes: u64,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| StorageError::ReadFailed {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?;
            serde_json::from_slice::<BTreeMap<String, String>>(&bytes).map_err(|e| {
                StorageError::ReadFailed {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::WriteFailed {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened sync store");

        Ok(Self {
            namespace: namespace.into(),
            limit_bytes,
            entries: RwLock::new(entries),
            persist_path: Some(path),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries.write().map_err(|_| StorageError::LockPoisoned)
    }

    fn usage_of(&self, entries: &BTreeMap<String, String>) -> u64 {
        entries
            .iter()
            .filter(|(k, _)| k.starts_with(&self.namespace))
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    /// Exact bytes used by this namespace (keys plus values).
    pub fn used_bytes(&self) -> Result<u64, StorageError> {
        let entries = self.read()?;
        Ok(self.usage_of(&entries))
    }

    /// Serialized value exactly as stored.
    pub fn raw_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.read()?;
        Ok(entries.get(&self.namespaced(key)).cloned())
    }

    fn flush(&self, entries: &BTreeMap<String, String>, key: &str) -> Result<(), StorageError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let write_failed = |reason: String| StorageError::WriteFailed {
            key: key.to_string(),
            reason,
        };
        let bytes = serde_json::to_vec(entries).map_err(|e| write_failed(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| write_failed(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| write_failed(e.to_string()))
    }

    pub fn put_record(&self, record: &Record) -> Result<(), StorageError> {
        self.put_records(std::slice::from_ref(record)).map(|_| ())
    }

    /// Write several records under one lock acquisition. Either all of them
    /// land or none do.
    pub fn put_records(&self, records: &[Record]) -> Result<usize, StorageError> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let value = serde_json::to_string(&StoredValueRef {
                payload: &record.payload,
                stored_at: record.stored_at,
                encrypted: record.encrypted,
            })
            .map_err(|e| StorageError::Serialization {
                reason: e.to_string(),
            })?;
            staged.push((self.namespaced(&record.key), value));
        }

        let mut entries = self.write()?;
        let used = self.usage_of(&entries);
        let mut previous = Vec::with_capacity(staged.len());
        for (full_key, value) in staged {
            let old = entries.insert(full_key.clone(), value);
            previous.push((full_key, old));
        }

        let restore = |entries: &mut BTreeMap<String, String>,
                       previous: Vec<(String, Option<String>)>| {
            for (full_key, old) in previous.into_iter().rev() {
                match old {
                    Some(old) => entries.insert(full_key, old),
                    None => entries.remove(&full_key),
                };
            }
        };

        let after = self.usage_of(&entries);
        if after > self.limit_bytes {
            restore(&mut entries, previous);
            return Err(StorageError::QuotaExceeded {
                key: first.key.clone(),
                needed: after.saturating_sub(used),
                available: self.limit_bytes.saturating_sub(used),
            });
        }

        if let Err(e) = self.flush(&entries, &first.key) {
            restore(&mut entries, previous);
            return Err(e);
        }
        Ok(records.len())
    }

    pub fn get_record(&self, key: &str) -> Result<Option<Record>, StorageError> {
        let raw = {
            let entries = self.read()?;
            match entries.get(&self.namespaced(key)) {
                Some(raw) => raw.clone(),
                None => return Ok(None),
            }
        };
        let stored: StoredValue =
            serde_json::from_str(&raw).map_err(|e| StorageError::ReadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(Record {
            key: key.to_string(),
            payload: stored.payload,
            stored_at: stored.stored_at,
            encrypted: stored.encrypted,
        }))
    }

    pub fn delete_key(&self, key: &str) -> Result<bool, StorageError> {
        self.delete_keys(&[key.to_string()]).map(|n| n > 0)
    }

    /// Delete several keys under one lock acquisition and one flush.
    pub fn delete_keys(&self, keys: &[String]) -> Result<usize, StorageError> {
        let mut entries = self.write()?;
        let mut removed = Vec::new();
        for key in keys {
            let full_key = self.namespaced(key);
            if let Some(old) = entries.remove(&full_key) {
                removed.push((full_key, old));
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }
        let label = keys.first().map(String::as_str).unwrap_or_default();
        if let Err(e) = self.flush(&entries, label) {
            entries.extend(removed);
            return Err(e);
        }
        Ok(removed.len())
    }

    /// Remove every key of this namespace. Other namespaces are untouched.
    pub fn clear_all(&self) -> Result<u64, StorageError> {
        let mut entries = self.write()?;
        let before = entries.clone();
        entries.retain(|k, _| !k.starts_with(&self.namespace));
        let removed = (before.len() - entries.len()) as u64;
        if removed > 0 {
            if let Err(e) = self.flush(&entries, &self.namespace) {
                *entries = before;
                return Err(e);
            }
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.read()?;
        Ok(entries
            .keys()
            .filter_map(|k| k.strip_prefix(&self.namespace))
            .map(str::to_string)
            .collect())
    }
}

impl sealed::Sealed for Arc<SyncBackend> {}

#[async_trait]
impl Backend for Arc<SyncBackend> {
    fn storage_type(&self) -> StorageType {
        StorageType::Sync
    }

    async fn put(&self, record: &Record) -> Result<(), StorageError> {
        let record = record.clone();
        off_runtime(self, move |b| b.put_record(&record)).await
    }

    async fn get(&self, key: &str) -> Result<Option<Record>, StorageError> {
        let key = key.to_string();
        off_runtime(self, move |b| b.get_record(&key)).await
    }

    async fn put_many(&self, records: &[Record]) -> Result<usize, StorageError> {
        let records = records.to_vec();
        off_runtime(self, move |b| b.put_records(&records)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.to_string();
        off_runtime(self, move |b| b.delete_key(&key)).await
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        off_runtime(self, |b| b.clear_all()).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        off_runtime(self, |b| b.keys()).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let keys = keys.to_vec();
        off_runtime(self, move |b| b.delete_keys(&keys)).await
    }
}
