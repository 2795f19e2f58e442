//! The storage facade used by the rest of the application.
//!
//! `StorageManager` routes each write to one of the two backends, encrypts
//! sensitive payloads, keeps a TTL read cache in front of both backends and
//! publishes a [`StorageEvent`] for every mutation. Every backend call runs
//! under the configured timeout and is cancelled by [`StorageManager::shutdown`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stowage_core::{
    CryptoError, DataType, Envelope, Partition, Record, StorageError, StorageType, StowageConfig,
    StowageResult, Timestamp,
};
use stowage_events::{EventBus, StorageEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{off_runtime, Backend};
use crate::cache::{CacheStats, ReadCache};
use crate::crypto::EnvelopeCipher;
use crate::lmdb_backend::{LmdbBackend, QueryOptions};
use crate::routing;
use crate::sync_backend::SyncBackend;

/// File holding the persisted sync store, relative to `data_dir`.
pub const SYNC_STORE_FILE: &str = "sync-store.json";

/// Directory holding the LMDB environment, relative to `data_dir`.
pub const LMDB_DIR: &str = "lmdb";

/// Options for [`StorageManager::store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Force a backend instead of routing by key and size.
    pub storage_type: Option<StorageType>,
    /// Encrypt the payload at rest.
    pub sensitive: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_backend(mut self, storage_type: StorageType) -> Self {
        self.storage_type = Some(storage_type);
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Options for [`StorageManager::retrieve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Read only this backend. By default sync is read first, then async.
    pub storage_type: Option<StorageType>,
    /// Maximum age of a cached value. Defaults to, and is capped at, the
    /// configured TTL.
    pub cache_time: Option<Duration>,
    /// Bypass the cache and read the backend.
    pub skip_cache: bool,
}

impl RetrieveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_backend(mut self, storage_type: StorageType) -> Self {
        self.storage_type = Some(storage_type);
        self
    }

    pub fn max_age(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

/// A stored record as seen by the managers: decrypted payload plus where
/// and how it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub payload: serde_json::Value,
    pub stored_at: Timestamp,
    pub storage_type: StorageType,
    /// Whether the payload is encrypted at rest.
    pub encrypted: bool,
    /// Key plus stored payload, in bytes.
    pub size_bytes: u64,
}

/// Unified facade over the sync and async backends.
pub struct StorageManager {
    config: StowageConfig,
    sync: Arc<SyncBackend>,
    large: Option<Arc<LmdbBackend>>,
    cipher: EnvelopeCipher,
    cache: ReadCache,
    events: EventBus,
    cancel: CancellationToken,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("data_dir", &self.config.data_dir)
            .field("async_available", &self.large.is_some())
            .field("shut_down", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl StorageManager {
    /// Open both backends under `config.data_dir`.
    ///
    /// A failure to open the async backend is not fatal: the manager runs
    /// with the sync backend only, async reads miss and async writes are
    /// dropped with a warning.
    pub fn open(config: StowageConfig, events: EventBus) -> StowageResult<Self> {
        config.validate()?;

        let sync = SyncBackend::open(
            config.data_dir.join(SYNC_STORE_FILE),
            config.namespace.clone(),
            config.sync_limit_bytes,
        )?;

        let large = match LmdbBackend::open(config.data_dir.join(LMDB_DIR), config.lmdb_map_size_mb)
        {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!(error = %e, "Async backend unavailable, continuing with sync backend only");
                None
            }
        };

        Ok(Self::with_backends(config, sync, large, events))
    }

    /// Assemble a manager from already-opened backends.
    pub fn with_backends(
        config: StowageConfig,
        sync: SyncBackend,
        large: Option<LmdbBackend>,
        events: EventBus,
    ) -> Self {
        if config.encryption.uses_builtin_secret() {
            warn!("Encryption uses the built-in passphrase; sensitive records are obfuscated, not confidential");
        }
        info!(
            data_dir = %config.data_dir.display(),
            async_available = large.is_some(),
            "Storage manager ready"
        );
        Self {
            cipher: EnvelopeCipher::new(config.encryption.clone()),
            cache: ReadCache::with_ttl(config.cache_ttl()),
            config,
            sync: Arc::new(sync),
            large: large.map(Arc::new),
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &StowageConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn sync_backend(&self) -> &SyncBackend {
        &self.sync
    }

    pub fn async_backend(&self) -> Option<&LmdbBackend> {
        self.large.as_deref()
    }

    pub fn is_async_available(&self) -> bool {
        self.large.is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn backend(&self, storage_type: StorageType) -> Option<&dyn Backend> {
        match storage_type {
            StorageType::Sync => Some(&self.sync as &dyn Backend),
            StorageType::Async => self.large.as_ref().map(|b| b as &dyn Backend),
        }
    }

    /// Run a backend call under the timeout, racing the shutdown token.
    async fn guarded<T, F>(&self, operation: &str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let after = self.config.backend_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled {
                operation: operation.to_string(),
            }),
            result = tokio::time::timeout(after, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(StorageError::Timeout {
                    operation: operation.to_string(),
                    after_ms: after.as_millis() as u64,
                }),
            },
        }
    }

    fn seal(&self, key: &str, data: &serde_json::Value, encrypt: bool) -> StowageResult<Record> {
        if encrypt {
            Ok(Record::sealed(key, &self.cipher.encrypt(data)?))
        } else {
            Ok(Record::new(key, data.clone()))
        }
    }

    /// Decrypt a raw record into an [`Entry`].
    fn open_record(&self, record: Record, storage_type: StorageType) -> StowageResult<Entry> {
        let size_bytes = (record.key.len() + serde_json::to_vec(&record.payload)?.len()) as u64;
        let payload = if record.encrypted {
            let envelope = Envelope::from_value(&record.payload).ok_or_else(|| {
                CryptoError::DecryptionFailed {
                    reason: format!("{} is flagged encrypted but holds no envelope", record.key),
                }
            })?;
            self.cipher.decrypt(&envelope)?
        } else {
            record.payload
        };
        Ok(Entry {
            key: record.key,
            payload,
            stored_at: record.stored_at,
            storage_type,
            encrypted: record.encrypted,
            size_bytes,
        })
    }

    // ========================================================================
    // CORE OPERATIONS
    // ========================================================================

    /// Write `data` under `key`, returning the backend it was routed to.
    ///
    /// A write routed to an unavailable async backend is dropped with a
    /// warning. After a successful write any copy of `key` in the other
    /// backend is deleted so the key keeps naming one record.
    pub async fn store(
        &self,
        key: &str,
        data: &serde_json::Value,
        options: StoreOptions,
    ) -> StowageResult<StorageType> {
        let serialized_len = serde_json::to_vec(data)?.len();
        let storage_type = routing::select_storage_type(
            key,
            serialized_len,
            options.storage_type,
            self.config.large_payload_threshold,
        );

        let encrypt = options.sensitive || routing::is_sensitive_key(key);
        let record = self.seal(key, data, encrypt)?;

        let Some(backend) = self.backend(storage_type) else {
            warn!(key = %key, storage_type = %storage_type, "Backend unavailable, write dropped");
            return Ok(storage_type);
        };

        self.guarded("put", backend.put(&record)).await?;
        self.drop_other_copy(key, storage_type).await;

        self.cache.insert(key, data.clone(), storage_type);
        self.events.publish(StorageEvent::Updated {
            key: key.to_string(),
            storage_type,
        });
        debug!(
            key = %key,
            storage_type = %storage_type,
            encrypted = encrypt,
            bytes = serialized_len,
            "Stored record"
        );
        Ok(storage_type)
    }

    /// Write many records with one atomic batch per backend.
    ///
    /// Routing and encryption follow [`store`](Self::store). Returns the
    /// backend each item was routed to, in input order.
    pub async fn store_batch(
        &self,
        items: Vec<(String, serde_json::Value, StoreOptions)>,
    ) -> StowageResult<Vec<StorageType>> {
        let mut routed = Vec::with_capacity(items.len());
        let mut by_backend: BTreeMap<StorageType, Vec<Record>> = BTreeMap::new();
        for (key, data, options) in &items {
            let storage_type = routing::select_storage_type(
                key,
                serde_json::to_vec(data)?.len(),
                options.storage_type,
                self.config.large_payload_threshold,
            );
            let encrypt = options.sensitive || routing::is_sensitive_key(key);
            by_backend
                .entry(storage_type)
                .or_default()
                .push(self.seal(key, data, encrypt)?);
            routed.push(storage_type);
        }

        for (storage_type, records) in &by_backend {
            let Some(backend) = self.backend(*storage_type) else {
                warn!(
                    storage_type = %storage_type,
                    dropped = records.len(),
                    "Backend unavailable, batch dropped"
                );
                continue;
            };
            self.guarded("put_many", backend.put_many(records)).await?;
        }

        for ((key, data, _), storage_type) in items.into_iter().zip(routed.iter().copied()) {
            if self.backend(storage_type).is_none() {
                continue;
            }
            self.drop_other_copy(&key, storage_type).await;
            self.cache.insert(&key, data, storage_type);
            self.events.publish(StorageEvent::Updated { key, storage_type });
        }
        debug!(records = routed.len(), "Stored batch");
        Ok(routed)
    }

    async fn drop_other_copy(&self, key: &str, kept: StorageType) {
        let other = match kept {
            StorageType::Sync => StorageType::Async,
            StorageType::Async => StorageType::Sync,
        };
        let Some(backend) = self.backend(other) else {
            return;
        };
        match self.guarded("delete", backend.delete(key)).await {
            Ok(true) => debug!(key = %key, from = %other, to = %kept, "Record moved between backends"),
            Ok(false) => {}
            Err(e) => warn!(key = %key, storage_type = %other, error = %e, "Failed to drop stale copy"),
        }
    }

    /// Read the payload stored under `key`.
    ///
    /// Errors, including undecryptable envelopes, are logged and reported
    /// as `None`.
    pub async fn retrieve(&self, key: &str, options: RetrieveOptions) -> Option<serde_json::Value> {
        let max_age = options.cache_time.unwrap_or_else(|| self.config.cache_ttl());
        if !options.skip_cache {
            if let Some(hit) = self.cache.get(key, max_age) {
                if options.storage_type.map_or(true, |st| st == hit.storage_type) {
                    return Some(hit.payload);
                }
            }
        }

        let candidates = match options.storage_type {
            Some(storage_type) => vec![storage_type],
            None => StorageType::ALL.to_vec(),
        };
        for storage_type in candidates {
            match self.read_entry(key, storage_type).await {
                Ok(Some(entry)) => {
                    self.cache.insert(key, entry.payload.clone(), storage_type);
                    return Some(entry.payload);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, storage_type = %storage_type, error = %e, "Read failed");
                }
            }
        }
        None
    }

    /// Read one record from one backend, bypassing the cache.
    pub async fn read_entry(
        &self,
        key: &str,
        storage_type: StorageType,
    ) -> StowageResult<Option<Entry>> {
        let Some(backend) = self.backend(storage_type) else {
            return Ok(None);
        };
        match self.guarded("get", backend.get(key)).await? {
            Some(record) => self.open_record(record, storage_type).map(Some),
            None => Ok(None),
        }
    }

    /// Delete `key` from whichever backend holds it.
    ///
    /// Returns `false` if any backend reported an error.
    pub async fn remove(&self, key: &str) -> bool {
        self.cache.invalidate(key);
        let mut ok = true;
        for storage_type in StorageType::ALL {
            let Some(backend) = self.backend(storage_type) else {
                continue;
            };
            match self.guarded("delete", backend.delete(key)).await {
                Ok(true) => {
                    self.events.publish(StorageEvent::Removed {
                        key: key.to_string(),
                        storage_type,
                    });
                    debug!(key = %key, storage_type = %storage_type, "Removed record");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, storage_type = %storage_type, error = %e, "Remove failed");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Delete every record of one backend.
    pub async fn clear(&self, storage_type: StorageType) -> bool {
        let Some(backend) = self.backend(storage_type) else {
            warn!(storage_type = %storage_type, "Backend unavailable, nothing cleared");
            return false;
        };
        match self.guarded("clear", backend.clear()).await {
            Ok(removed) => {
                let purged = self.cache.purge(storage_type);
                self.events.publish(StorageEvent::Cleared { storage_type });
                info!(
                    storage_type = %storage_type,
                    removed,
                    cache_purged = purged,
                    "Cleared backend"
                );
                true
            }
            Err(e) => {
                error!(storage_type = %storage_type, error = %e, "Clear failed");
                false
            }
        }
    }

    // ========================================================================
    // BULK ACCESS
    // ========================================================================

    /// Keys stored in one backend. An unavailable backend has no keys.
    pub async fn list_keys(&self, storage_type: StorageType) -> StowageResult<Vec<String>> {
        match self.backend(storage_type) {
            Some(backend) => Ok(self.guarded("list_keys", backend.list_keys()).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Every key starting with `prefix`, with the backend holding it.
    pub async fn keys_with_prefix(&self, prefix: &str) -> StowageResult<Vec<(String, StorageType)>> {
        let mut found = Vec::new();
        for storage_type in StorageType::ALL {
            for key in self.list_keys(storage_type).await? {
                if key.starts_with(prefix) {
                    found.push((key, storage_type));
                }
            }
        }
        Ok(found)
    }

    /// Every record of `data_type` in both backends.
    ///
    /// Records whose envelope cannot be decrypted are skipped with a warning.
    pub async fn entries(&self, data_type: DataType) -> StowageResult<Vec<Entry>> {
        let mut entries = Vec::new();
        for (key, storage_type) in self.keys_with_prefix(data_type.key_prefix()).await? {
            match self.read_entry(&key, storage_type).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, storage_type = %storage_type, error = %e, "Skipping unreadable record");
                }
            }
        }
        Ok(entries)
    }

    /// Delete many records, one atomic batch per backend.
    ///
    /// Returns how many records existed and were deleted.
    pub async fn remove_many(&self, keys: &[(String, StorageType)]) -> StowageResult<usize> {
        let mut by_backend: BTreeMap<StorageType, Vec<String>> = BTreeMap::new();
        for (key, storage_type) in keys {
            by_backend
                .entry(*storage_type)
                .or_default()
                .push(key.clone());
        }

        let mut removed = 0;
        for (storage_type, batch) in by_backend {
            let Some(backend) = self.backend(storage_type) else {
                continue;
            };
            removed += self
                .guarded("delete_many", backend.delete_many(&batch))
                .await?;
            for key in batch {
                self.cache.invalidate(&key);
                self.events.publish(StorageEvent::Removed { key, storage_type });
            }
        }
        debug!(requested = keys.len(), removed, "Batch removal");
        Ok(removed)
    }

    // ========================================================================
    // INDEX QUERIES
    // ========================================================================

    /// Async-backend records whose `index` field equals `value`.
    pub async fn query_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &serde_json::Value,
        options: QueryOptions,
    ) -> StowageResult<Vec<Entry>> {
        let Some(large) = self.large.as_ref() else {
            return Ok(Vec::new());
        };
        let index = index.to_string();
        let value = value.clone();
        let records = self
            .guarded(
                "query_by_index",
                off_runtime(large, move |b| {
                    Ok(b.query_by_index(partition, &index, &value, options)?)
                }),
            )
            .await?;
        records
            .into_iter()
            .map(|record| self.open_record(record, StorageType::Async))
            .collect()
    }

    pub async fn count_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &serde_json::Value,
    ) -> StowageResult<usize> {
        let Some(large) = self.large.as_ref() else {
            return Ok(0);
        };
        let index = index.to_string();
        let value = value.clone();
        Ok(self
            .guarded(
                "count_by_index",
                off_runtime(large, move |b| Ok(b.count_by_index(partition, &index, &value)?)),
            )
            .await?)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Cancel in-flight and future backend calls.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!("Storage manager shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stowage_core::{EncryptionConfig, StowageError};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StowageConfig {
        StowageConfig {
            encryption: EncryptionConfig {
                iterations: 1_000,
                ..EncryptionConfig::default()
            },
            lmdb_map_size_mb: 10,
            ..StowageConfig::with_data_dir(dir.path())
        }
    }

    fn open_manager() -> (StorageManager, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let manager =
            StorageManager::open(test_config(&dir), EventBus::new(64)).expect("open manager");
        (manager, dir)
    }

    #[tokio::test]
    async fn test_round_trip_plain_and_sensitive() {
        let (manager, _dir) = open_manager();
        let profile = json!({"name": "Ada", "email": "ada@example.com"});

        manager
            .store("profile_me", &profile, StoreOptions::new())
            .await
            .expect("store plain");
        manager
            .store("profile_card", &profile, StoreOptions::new().sensitive())
            .await
            .expect("store sensitive");

        for key in ["profile_me", "profile_card"] {
            let loaded = manager
                .retrieve(key, RetrieveOptions::new().skip_cache())
                .await;
            assert_eq!(loaded, Some(profile.clone()), "key {}", key);
        }
    }

    #[tokio::test]
    async fn test_encrypted_at_rest() {
        let (manager, _dir) = open_manager();
        manager
            .store("auth_token", &json!("tok-plaintext-123"), StoreOptions::new())
            .await
            .expect("store");

        let raw = manager
            .sync_backend()
            .raw_value("auth_token")
            .expect("raw read")
            .expect("raw value present");
        assert!(!raw.contains("tok-plaintext-123"));
        assert!(raw.contains("\"encrypted\":true"));

        let entry = manager
            .read_entry("auth_token", StorageType::Sync)
            .await
            .expect("read")
            .expect("entry");
        assert!(entry.encrypted);
        assert_eq!(entry.payload, json!("tok-plaintext-123"));
    }

    #[tokio::test]
    async fn test_routing_by_size_and_key() {
        let (manager, _dir) = open_manager();
        let large = json!({"image": "x".repeat(120 * 1024)});

        let routed = manager
            .store("background_1", &large, StoreOptions::new())
            .await
            .expect("store large");
        assert_eq!(routed, StorageType::Async);

        let small = json!({"k": "v"});
        let routed = manager
            .store("api_keys", &small, StoreOptions::new())
            .await
            .expect("store sensitive");
        assert_eq!(routed, StorageType::Sync);
    }

    #[tokio::test]
    async fn test_overwrite_moves_between_backends() {
        let (manager, _dir) = open_manager();
        manager
            .store("background_2", &json!({"small": true}), StoreOptions::new())
            .await
            .expect("store small");
        let large = json!({"image": "y".repeat(110 * 1024)});
        manager
            .store("background_2", &large, StoreOptions::new())
            .await
            .expect("store large");

        assert!(manager
            .read_entry("background_2", StorageType::Sync)
            .await
            .expect("read sync")
            .is_none());
        assert_eq!(
            manager
                .retrieve("background_2", RetrieveOptions::new().skip_cache())
                .await,
            Some(large)
        );
    }

    #[tokio::test]
    async fn test_malformed_envelope_reads_none() {
        let (manager, _dir) = open_manager();
        manager
            .sync_backend()
            .put_record(&Record::sealed("settings_broken", &Envelope::new("%%%".to_string())))
            .expect("seed");
        manager
            .sync_backend()
            .put_record(&Record {
                encrypted: true,
                ..Record::new("settings_bare", json!("not an envelope"))
            })
            .expect("seed");

        for key in ["settings_broken", "settings_bare"] {
            assert!(
                manager
                    .retrieve(key, RetrieveOptions::new().skip_cache())
                    .await
                    .is_none(),
                "key {}",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_cache_serves_until_skipped() {
        let (manager, _dir) = open_manager();
        manager
            .store("settings_theme", &json!("light"), StoreOptions::new())
            .await
            .expect("store");
        manager
            .sync_backend()
            .put_record(&Record::new("settings_theme", json!("dark")))
            .expect("write behind the cache");

        assert_eq!(
            manager.retrieve("settings_theme", RetrieveOptions::new()).await,
            Some(json!("light"))
        );
        assert_eq!(
            manager
                .retrieve("settings_theme", RetrieveOptions::new().max_age(Duration::ZERO))
                .await,
            Some(json!("dark"))
        );
        assert!(manager.cache_stats().hits >= 1);
    }

    #[tokio::test]
    async fn test_cache_forgets_keys_after_ttl() {
        let dir = TempDir::new().expect("temp dir");
        let config = StowageConfig {
            cache_ttl_ms: 50,
            ..test_config(&dir)
        };
        let manager = StorageManager::open(config, EventBus::new(256)).expect("open");
        for i in 0..200 {
            manager
                .store(&format!("settings_{}", i), &json!(i), StoreOptions::new())
                .await
                .expect("store");
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(manager.cache_stats().entry_count, 0);
        assert_eq!(
            manager.retrieve("settings_7", RetrieveOptions::new()).await,
            Some(json!(7))
        );
    }

    #[tokio::test]
    async fn test_remove_publishes_and_clears_cache() {
        let (manager, _dir) = open_manager();
        let mut rx = manager.events().subscribe();

        manager
            .store("event_1", &json!({"title": "standup"}), StoreOptions::new())
            .await
            .expect("store");
        assert!(manager.remove("event_1").await);
        assert!(manager.retrieve("event_1", RetrieveOptions::new()).await.is_none());

        assert_eq!(rx.recv().await.expect("updated").event_type(), "storage:updated");
        let removed = rx.recv().await.expect("removed");
        assert_eq!(
            removed,
            StorageEvent::Removed {
                key: "event_1".to_string(),
                storage_type: StorageType::Sync
            }
        );
    }

    #[tokio::test]
    async fn test_clear_purges_only_that_backend() {
        let (manager, _dir) = open_manager();
        manager
            .store("settings_a", &json!(1), StoreOptions::new())
            .await
            .expect("store sync");
        manager
            .store(
                "weather_x",
                &json!({"location_key": "x"}),
                StoreOptions::new().in_backend(StorageType::Async),
            )
            .await
            .expect("store async");

        assert!(manager.clear(StorageType::Sync).await);
        assert!(manager.retrieve("settings_a", RetrieveOptions::new()).await.is_none());
        assert!(manager.retrieve("weather_x", RetrieveOptions::new()).await.is_some());
    }

    #[tokio::test]
    async fn test_quota_exceeded_propagates() {
        let dir = TempDir::new().expect("temp dir");
        let config = StowageConfig {
            sync_limit_bytes: 256,
            ..test_config(&dir)
        };
        let manager = StorageManager::open(config, EventBus::new(8)).expect("open");

        let err = manager
            .store("settings_big", &json!("z".repeat(1024)), StoreOptions::new())
            .await
            .expect_err("must exceed quota");
        assert!(matches!(
            err,
            StowageError::Storage(StorageError::QuotaExceeded { ref key, .. }) if key == "settings_big"
        ));
    }

    #[tokio::test]
    async fn test_async_unavailable_drops_writes() {
        let dir = TempDir::new().expect("temp dir");
        let config = test_config(&dir);
        let sync = SyncBackend::in_memory(config.namespace.clone(), config.sync_limit_bytes);
        let manager = StorageManager::with_backends(config, sync, None, EventBus::new(8));

        let routed = manager
            .store("conversation_1", &json!({}), StoreOptions::new().in_backend(StorageType::Async))
            .await
            .expect("dropped writes are not errors");
        assert_eq!(routed, StorageType::Async);
        assert!(manager
            .retrieve("conversation_1", RetrieveOptions::new().skip_cache())
            .await
            .is_none());
        assert!(!manager.clear(StorageType::Async).await);
    }

    #[tokio::test]
    async fn test_entries_and_remove_many() {
        let (manager, _dir) = open_manager();
        for i in 0..3 {
            manager
                .store(
                    &DataType::Conversation.key(&i.to_string()),
                    &json!({"conversation_id": "c", "model": "m", "i": i}),
                    StoreOptions::new().in_backend(StorageType::Async),
                )
                .await
                .expect("store");
        }
        manager
            .store("conversation_secret", &json!({"i": 9}), StoreOptions::new())
            .await
            .expect("store sensitive");
        manager
            .store("settings_x", &json!(1), StoreOptions::new())
            .await
            .expect("store other type");

        let entries = manager.entries(DataType::Conversation).await.expect("entries");
        assert_eq!(entries.len(), 4);
        assert_eq!(entries.iter().filter(|e| e.encrypted).count(), 1);

        let keys: Vec<_> = entries
            .iter()
            .filter(|e| e.storage_type == StorageType::Async)
            .map(|e| (e.key.clone(), e.storage_type))
            .collect();
        assert_eq!(manager.remove_many(&keys).await.expect("remove_many"), 3);
        assert_eq!(manager.entries(DataType::Conversation).await.expect("entries").len(), 1);
    }

    #[tokio::test]
    async fn test_store_batch_routes_and_encrypts() {
        let (manager, _dir) = open_manager();
        let routed = manager
            .store_batch(vec![
                ("settings_a".to_string(), json!(1), StoreOptions::new()),
                (
                    "location_home".to_string(),
                    json!({"name": "home"}),
                    StoreOptions::new().in_backend(StorageType::Async),
                ),
                ("profile_me".to_string(), json!({"name": "x"}), StoreOptions::new().sensitive()),
            ])
            .await
            .expect("batch");
        assert_eq!(
            routed,
            vec![StorageType::Sync, StorageType::Async, StorageType::Sync]
        );

        let profile = manager
            .read_entry("profile_me", StorageType::Sync)
            .await
            .expect("read")
            .expect("entry");
        assert!(profile.encrypted);
        assert_eq!(profile.payload, json!({"name": "x"}));
        assert_eq!(
            manager
                .count_by_index(Partition::Locations, "name", &json!("home"))
                .await
                .expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn test_index_pass_through() {
        let (manager, _dir) = open_manager();
        for (i, conv) in ["a", "a", "b"].iter().enumerate() {
            manager
                .store(
                    &format!("transcript_{}", i),
                    &json!({"conversation_id": conv, "text": i}),
                    StoreOptions::new().in_backend(StorageType::Async),
                )
                .await
                .expect("store");
        }
        let hits = manager
            .query_by_index(
                Partition::Conversations,
                "conversation_id",
                &json!("a"),
                QueryOptions::new(),
            )
            .await
            .expect("query");
        assert_eq!(hits.len(), 2);
        assert_eq!(
            manager
                .count_by_index(Partition::Conversations, "conversation_id", &json!("b"))
                .await
                .expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_backend_calls() {
        let (manager, _dir) = open_manager();
        manager.shutdown();
        let err = manager
            .store("settings_late", &json!(1), StoreOptions::new())
            .await
            .expect_err("store after shutdown");
        assert!(matches!(
            err,
            StowageError::Storage(StorageError::Cancelled { .. })
        ));
        assert!(manager.is_shut_down());
    }

    #[tokio::test]
    async fn test_guarded_times_out() {
        let dir = TempDir::new().expect("temp dir");
        let config = StowageConfig {
            backend_timeout_ms: 20,
            ..test_config(&dir)
        };
        let manager = StorageManager::open(config, EventBus::new(8)).expect("open");
        let result: Result<(), StorageError> = manager
            .guarded("stall", std::future::pending())
            .await;
        assert!(matches!(
            result,
            Err(StorageError::Timeout { after_ms: 20, .. })
        ));
    }
}
