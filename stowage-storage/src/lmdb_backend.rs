//! LMDB-backed async store with partitions and secondary indexes.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! transactional key-value store.
//!
//! # Layout
//!
//! Each [`Partition`] owns two named databases in one environment:
//! - `<partition>`: record key -> `[stored_at millis: 8 bytes LE][flags: 1 byte][json payload]`
//! - `<partition>.idx`: `<index>\0<value json>\0<record key>` -> empty
//!
//! A record's index entries are rewritten in the same write transaction as
//! the record itself, so an index never points at a missing record.
//! Records flagged as encrypted are never indexed.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions; every
//! mutation (including a whole [`UnitOfWork`]) runs in a single write
//! transaction.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use stowage_core::{Partition, Record, StorageError, StorageType};
use tracing::{debug, info};

use crate::backend::{off_runtime, sealed, Backend};

const INDEX_SEPARATOR: u8 = 0;
const EMPTY: &[u8] = &[];
const HEADER_LEN: usize = 9;
const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Query against an index the partition does not maintain.
    #[error("Partition {partition} has no index named {index}")]
    UnknownIndex { partition: Partition, index: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Transaction(e.to_string())
    }
}

impl From<LmdbError> for StorageError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::UnknownIndex { partition, index } => StorageError::IndexError {
                reason: format!("not maintained by partition {}", partition),
                index_name: index,
            },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Pagination and ordering for index queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    /// Return matches in descending key order.
    pub reverse: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

struct PartitionDbs {
    records: Database<Bytes, Bytes>,
    index: Database<Bytes, Bytes>,
}

/// High-capacity transactional backend.
pub struct LmdbBackend {
    env: Env,
    partitions: BTreeMap<Partition, PartitionDbs>,
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("path", &self.env.path())
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

fn encode_record(record: &Record) -> Result<Vec<u8>, LmdbError> {
    let value_bytes = serde_json::to_vec(&record.payload)
        .map_err(|e| LmdbError::Serialization(e.to_string()))?;
    let flags = if record.encrypted { FLAG_ENCRYPTED } else { 0 };
    let mut full_bytes = Vec::with_capacity(HEADER_LEN + value_bytes.len());
    full_bytes.extend_from_slice(&record.stored_at.timestamp_millis().to_le_bytes());
    full_bytes.push(flags);
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

fn decode_record(key: &str, bytes: &[u8]) -> Result<Record, LmdbError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbError::Deserialization(format!(
            "record {} is {} bytes, shorter than its header",
            key,
            bytes.len()
        )));
    }
    let timestamp_bytes: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| LmdbError::Deserialization("Invalid timestamp".into()))?;
    let stored_at: DateTime<Utc> =
        DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes)).unwrap_or_else(Utc::now);
    let payload = serde_json::from_slice(&bytes[HEADER_LEN..])
        .map_err(|e| LmdbError::Deserialization(e.to_string()))?;
    Ok(Record {
        key: key.to_string(),
        payload,
        stored_at,
        encrypted: bytes[8] & FLAG_ENCRYPTED != 0,
    })
}

fn index_prefix(index: &str, value: &serde_json::Value) -> Result<Vec<u8>, LmdbError> {
    let value_json =
        serde_json::to_vec(value).map_err(|e| LmdbError::Serialization(e.to_string()))?;
    let mut prefix = Vec::with_capacity(index.len() + value_json.len() + 2);
    prefix.extend_from_slice(index.as_bytes());
    prefix.push(INDEX_SEPARATOR);
    prefix.extend_from_slice(&value_json);
    prefix.push(INDEX_SEPARATOR);
    Ok(prefix)
}

/// Index keys a record contributes to its partition.
fn index_keys(partition: Partition, record: &Record) -> Result<Vec<Vec<u8>>, LmdbError> {
    if record.encrypted {
        return Ok(Vec::new());
    }
    let Some(fields) = record.payload.as_object() else {
        return Ok(Vec::new());
    };
    let mut keys = Vec::new();
    for index in partition.indexes() {
        match fields.get(*index) {
            None | Some(serde_json::Value::Null) => continue,
            Some(value) => {
                let mut entry = index_prefix(index, value)?;
                entry.extend_from_slice(record.key.as_bytes());
                keys.push(entry);
            }
        }
    }
    Ok(keys)
}

impl LmdbBackend {
    /// Open (or create) the environment under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment and its databases cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs((Partition::ALL.len() * 2) as u32)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let mut partitions = BTreeMap::new();
        for partition in Partition::ALL {
            let records: Database<Bytes, Bytes> = env
                .create_database(&mut wtxn, Some(partition.name()))
                .map_err(|e| LmdbError::DbOpen(e.to_string()))?;
            let index_name = format!("{}.idx", partition.name());
            let index: Database<Bytes, Bytes> = env
                .create_database(&mut wtxn, Some(index_name.as_str()))
                .map_err(|e| LmdbError::DbOpen(e.to_string()))?;
            partitions.insert(partition, PartitionDbs { records, index });
        }
        wtxn.commit()?;

        info!(path = %path.as_ref().display(), map_size_mb, "Opened LMDB environment");

        Ok(Self { env, partitions })
    }

    fn dbs(&self, partition: Partition) -> Result<&PartitionDbs, LmdbError> {
        self.partitions
            .get(&partition)
            .ok_or_else(|| LmdbError::DbOpen(format!("partition {} not open", partition)))
    }

    fn get_in(&self, rtxn: &RoTxn, key: &str) -> Result<Option<Record>, LmdbError> {
        let dbs = self.dbs(Partition::for_key(key))?;
        match dbs.records.get(rtxn, key.as_bytes())? {
            Some(bytes) => decode_record(key, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put_in(&self, wtxn: &mut RwTxn, record: &Record) -> Result<(), LmdbError> {
        let partition = Partition::for_key(&record.key);
        let dbs = self.dbs(partition)?;

        if let Some(previous) = self.get_in(wtxn, &record.key)? {
            for stale in index_keys(partition, &previous)? {
                dbs.index.delete(wtxn, &stale)?;
            }
        }

        let bytes = encode_record(record)?;
        dbs.records.put(wtxn, record.key.as_bytes(), &bytes)?;
        for entry in index_keys(partition, record)? {
            dbs.index.put(wtxn, &entry, EMPTY)?;
        }
        Ok(())
    }

    fn delete_in(&self, wtxn: &mut RwTxn, key: &str) -> Result<bool, LmdbError> {
        let partition = Partition::for_key(key);
        let dbs = self.dbs(partition)?;
        let Some(previous) = self.get_in(wtxn, key)? else {
            return Ok(false);
        };
        for stale in index_keys(partition, &previous)? {
            dbs.index.delete(wtxn, &stale)?;
        }
        Ok(dbs.records.delete(wtxn, key.as_bytes())?)
    }

    pub fn put_record(&self, record: &Record) -> Result<(), LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        self.put_in(&mut wtxn, record)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_record(&self, key: &str) -> Result<Option<Record>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        self.get_in(&rtxn, key)
    }

    pub fn delete_record(&self, key: &str) -> Result<bool, LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let existed = self.delete_in(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(existed)
    }

    /// Empty every partition and its index.
    pub fn clear_all(&self) -> Result<u64, LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let mut removed = 0;
        for dbs in self.partitions.values() {
            removed += dbs.records.len(&wtxn)?;
            dbs.records.clear(&mut wtxn)?;
            dbs.index.clear(&mut wtxn)?;
        }
        wtxn.commit()?;
        Ok(removed)
    }

    /// Keys across all partitions, ascending.
    pub fn keys(&self) -> Result<Vec<String>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for dbs in self.partitions.values() {
            for result in dbs.records.iter(&rtxn)? {
                let (key, _) = result?;
                if let Ok(key) = std::str::from_utf8(key) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Number of records across all partitions.
    pub fn record_count(&self) -> Result<u64, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let mut count = 0;
        for dbs in self.partitions.values() {
            count += dbs.records.len(&rtxn)?;
        }
        Ok(count)
    }

    /// Number of records in one partition.
    pub fn partition_count(&self, partition: Partition) -> Result<u64, LmdbError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.dbs(partition)?.records.len(&rtxn)?)
    }

    /// Record keys whose indexed field equals `value`, in key order.
    fn matching_keys(
        &self,
        rtxn: &RoTxn,
        partition: Partition,
        index: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<String>, LmdbError> {
        if !partition.indexes().contains(&index) {
            return Err(LmdbError::UnknownIndex {
                partition,
                index: index.to_string(),
            });
        }
        let dbs = self.dbs(partition)?;
        let prefix = index_prefix(index, value)?;
        let mut keys = Vec::new();
        for result in dbs.index.prefix_iter(rtxn, &prefix)? {
            let (entry, _) = result?;
            if let Ok(key) = std::str::from_utf8(&entry[prefix.len()..]) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Records in `partition` whose `index` field equals `value`.
    pub fn query_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &serde_json::Value,
        options: QueryOptions,
    ) -> Result<Vec<Record>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let mut keys = self.matching_keys(&rtxn, partition, index, value)?;
        if options.reverse {
            keys.reverse();
        }
        let limit = options.limit.unwrap_or(usize::MAX);

        let mut records = Vec::new();
        for key in keys.into_iter().skip(options.offset).take(limit) {
            if let Some(record) = self.get_in(&rtxn, &key)? {
                records.push(record);
            }
        }
        debug!(
            partition = %partition,
            index = index,
            matched = records.len(),
            "Index query"
        );
        Ok(records)
    }

    pub fn count_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &serde_json::Value,
    ) -> Result<usize, LmdbError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.matching_keys(&rtxn, partition, index, value)?.len())
    }

    /// Start buffering writes to apply in one transaction.
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            backend: self,
            ops: Vec::new(),
        }
    }
}

enum PendingOp {
    Put(Record),
    Delete(String),
}

/// What a committed [`UnitOfWork`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub written: usize,
    /// Deletes that hit an existing record.
    pub deleted: usize,
}

/// Buffered writes against an [`LmdbBackend`].
///
/// Nothing touches the environment until [`commit`](Self::commit), which
/// applies every operation in order inside one write transaction. Dropping
/// the unit without committing discards it.
pub struct UnitOfWork<'a> {
    backend: &'a LmdbBackend,
    ops: Vec<PendingOp>,
}

impl<'a> UnitOfWork<'a> {
    pub fn put(&mut self, record: Record) -> &mut Self {
        self.ops.push(PendingOp::Put(record));
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(PendingOp::Delete(key.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply all buffered operations atomically.
    pub fn commit(self) -> Result<CommitSummary, LmdbError> {
        let mut summary = CommitSummary::default();
        if self.ops.is_empty() {
            return Ok(summary);
        }
        let mut wtxn = self.backend.env.write_txn()?;
        for op in &self.ops {
            match op {
                PendingOp::Put(record) => {
                    self.backend.put_in(&mut wtxn, record)?;
                    summary.written += 1;
                }
                PendingOp::Delete(key) => {
                    if self.backend.delete_in(&mut wtxn, key)? {
                        summary.deleted += 1;
                    }
                }
            }
        }
        wtxn.commit()?;
        debug!(
            written = summary.written,
            deleted = summary.deleted,
            "Committed unit of work"
        );
        Ok(summary)
    }

    /// Discard all buffered operations.
    pub fn abort(self) {
        debug!(discarded = self.ops.len(), "Aborted unit of work");
    }
}

impl LmdbBackend {
    fn put_many_now(&self, records: Vec<Record>) -> Result<usize, StorageError> {
        let first = records.first().map(|r| r.key.clone()).unwrap_or_default();
        let mut unit = self.begin();
        for record in records {
            unit.put(record);
        }
        unit.commit()
            .map(|summary| summary.written)
            .map_err(|e| StorageError::WriteFailed {
                key: first,
                reason: e.to_string(),
            })
    }

    fn delete_many_now(&self, keys: Vec<String>) -> Result<usize, StorageError> {
        let mut unit = self.begin();
        for key in keys {
            unit.delete(key);
        }
        Ok(unit.commit()?.deleted)
    }
}

impl sealed::Sealed for Arc<LmdbBackend> {}

#[async_trait]
impl Backend for Arc<LmdbBackend> {
    fn storage_type(&self) -> StorageType {
        StorageType::Async
    }

    async fn put(&self, record: &Record) -> Result<(), StorageError> {
        let record = record.clone();
        off_runtime(self, move |b| {
            b.put_record(&record).map_err(|e| StorageError::WriteFailed {
                key: record.key.clone(),
                reason: e.to_string(),
            })
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Record>, StorageError> {
        let key = key.to_string();
        off_runtime(self, move |b| {
            b.get_record(&key).map_err(|e| StorageError::ReadFailed {
                key: key.clone(),
                reason: e.to_string(),
            })
        })
        .await
    }

    async fn put_many(&self, records: &[Record]) -> Result<usize, StorageError> {
        let records = records.to_vec();
        off_runtime(self, move |b| b.put_many_now(records)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.to_string();
        off_runtime(self, move |b| Ok(b.delete_record(&key)?)).await
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        off_runtime(self, |b| Ok(b.clear_all()?)).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        off_runtime(self, |b| Ok(b.keys()?)).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let keys = keys.to_vec();
        off_runtime(self, move |b| b.delete_many_now(keys)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = LmdbBackend::open(temp_dir.path(), 10).expect("Failed to open backend");
        (backend, temp_dir)
    }

    fn message(key: &str, conversation_id: &str, model: &str) -> Record {
        Record::new(
            key,
            json!({"conversation_id": conversation_id, "model": model, "text": key}),
        )
    }

    #[test]
    fn test_put_and_get() {
        let (backend, _dir) = create_test_backend();
        let record = Record::new("weather_paris", json!({"location_key": "paris", "temp": 21}));
        backend.put_record(&record).expect("put");

        let loaded = backend
            .get_record("weather_paris")
            .expect("get")
            .expect("record should exist");
        assert_eq!(loaded.payload, record.payload);
        assert_eq!(
            loaded.stored_at.timestamp_millis(),
            record.stored_at.timestamp_millis()
        );
        assert_eq!(backend.partition_count(Partition::Weather).expect("count"), 1);
    }

    #[test]
    fn test_get_missing() {
        let (backend, _dir) = create_test_backend();
        assert!(backend.get_record("location_nowhere").expect("get").is_none());
        assert!(!backend.delete_record("location_nowhere").expect("delete"));
    }

    #[test]
    fn test_unknown_prefix_lands_in_conversations() {
        let (backend, _dir) = create_test_backend();
        backend
            .put_record(&Record::new("backup_1.2.0_1700000000000", json!({"records": []})))
            .expect("put");
        assert_eq!(
            backend.partition_count(Partition::Conversations).expect("count"),
            1
        );
    }

    #[test]
    fn test_query_by_index() {
        let (backend, _dir) = create_test_backend();
        for (key, conv) in [
            ("conversation_a1", "a"),
            ("conversation_a2", "a"),
            ("conversation_a3", "a"),
            ("conversation_b1", "b"),
        ] {
            backend.put_record(&message(key, conv, "gpt")).expect("put");
        }

        let all_a = backend
            .query_by_index(Partition::Conversations, "conversation_id", &json!("a"), QueryOptions::new())
            .expect("query");
        let keys: Vec<_> = all_a.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["conversation_a1", "conversation_a2", "conversation_a3"]);

        let page = backend
            .query_by_index(
                Partition::Conversations,
                "conversation_id",
                &json!("a"),
                QueryOptions::new().reversed().with_offset(1).with_limit(1),
            )
            .expect("query");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "conversation_a2");

        assert_eq!(
            backend
                .count_by_index(Partition::Conversations, "model", &json!("gpt"))
                .expect("count"),
            4
        );
    }

    #[test]
    fn test_overwrite_moves_index_entry() {
        let (backend, _dir) = create_test_backend();
        backend
            .put_record(&message("conversation_1", "old", "gpt"))
            .expect("put");
        backend
            .put_record(&message("conversation_1", "new", "gpt"))
            .expect("overwrite");

        let count = |value: &str| {
            backend
                .count_by_index(Partition::Conversations, "conversation_id", &json!(value))
                .expect("count")
        };
        assert_eq!(count("old"), 0);
        assert_eq!(count("new"), 1);

        backend.delete_record("conversation_1").expect("delete");
        assert_eq!(count("new"), 0);
    }

    #[test]
    fn test_unknown_index_is_rejected() {
        let (backend, _dir) = create_test_backend();
        let err = backend
            .count_by_index(Partition::Weather, "mime_type", &json!("image/png"))
            .expect_err("weather does not index mime_type");
        assert!(matches!(err, LmdbError::UnknownIndex { .. }));
        assert!(matches!(
            StorageError::from(err),
            StorageError::IndexError { ref index_name, .. } if index_name == "mime_type"
        ));
    }

    #[test]
    fn test_unit_of_work_commit() {
        let (backend, _dir) = create_test_backend();
        backend
            .put_record(&Record::new("location_home", json!({"name": "home"})))
            .expect("put");

        let mut unit = backend.begin();
        unit.put(Record::new("location_work", json!({"name": "work"})))
            .delete("location_home")
            .delete("location_missing");
        assert_eq!(unit.len(), 3);
        let summary = unit.commit().expect("commit");

        assert_eq!(summary, CommitSummary { written: 1, deleted: 1 });
        assert_eq!(backend.keys().expect("keys"), vec!["location_work"]);
        assert_eq!(
            backend
                .count_by_index(Partition::Locations, "name", &json!("home"))
                .expect("count"),
            0
        );
    }

    #[test]
    fn test_unit_of_work_abort() {
        let (backend, _dir) = create_test_backend();
        let mut unit = backend.begin();
        unit.put(Record::new("background_1", json!({"mime_type": "image/png"})));
        unit.abort();
        assert_eq!(backend.record_count().expect("count"), 0);
    }

    #[test]
    fn test_clear_all() {
        let (backend, _dir) = create_test_backend();
        backend
            .put_record(&Record::new("background_1", json!({"mime_type": "image/png"})))
            .expect("put");
        backend
            .put_record(&Record::new("weather_x", json!({"location_key": "x"})))
            .expect("put");

        assert_eq!(backend.clear_all().expect("clear"), 2);
        assert_eq!(backend.record_count().expect("count"), 0);
        assert_eq!(
            backend
                .count_by_index(Partition::Backgrounds, "mime_type", &json!("image/png"))
                .expect("count"),
            0
        );
    }

    #[test]
    fn test_encrypted_flag_survives_and_skips_index() {
        let (backend, _dir) = create_test_backend();
        let sealed = Record {
            encrypted: true,
            ..message("conversation_s", "secret", "gpt")
        };
        backend.put_record(&sealed).expect("put sealed");
        backend
            .put_record(&message("conversation_p", "open", "gpt"))
            .expect("put plain");

        let loaded = backend.get_record("conversation_s").expect("get").expect("present");
        assert!(loaded.encrypted);
        assert!(!backend.get_record("conversation_p").expect("get").expect("present").encrypted);
        assert_eq!(
            backend
                .count_by_index(Partition::Conversations, "model", &json!("gpt"))
                .expect("count"),
            1
        );
    }

    #[test]
    fn test_reopen_persists() {
        let temp_dir = TempDir::new().expect("temp dir");
        {
            let backend = LmdbBackend::open(temp_dir.path(), 10).expect("open");
            backend
                .put_record(&Record::new("transcript_1", json!({"text": "hello"})))
                .expect("put");
        }
        let backend = LmdbBackend::open(temp_dir.path(), 10).expect("reopen");
        assert!(backend.get_record("transcript_1").expect("get").is_some());
    }

    #[tokio::test]
    async fn test_backend_trait_delete_many() {
        let (backend, _dir) = create_test_backend();
        let backend = Arc::new(backend);
        for i in 0..3 {
            Backend::put(&backend, &Record::new(format!("weather_{}", i), json!({"i": i})))
                .await
                .expect("put");
        }
        let removed = Backend::delete_many(
            &backend,
            &["weather_0".to_string(), "weather_2".to_string()],
        )
        .await
        .expect("delete_many");
        assert_eq!(removed, 2);
        assert_eq!(
            Backend::list_keys(&backend).await.expect("keys"),
            vec!["weather_1"]
        );
    }
}
