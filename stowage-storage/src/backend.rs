//! Backend trait shared by the sync and async stores.
//!
//! The trait is sealed: the only implementations are `Arc<SyncBackend>` and
//! `Arc<LmdbBackend>`, picked by [`StorageType`]. Both stores do blocking
//! work (file writes, LMDB transactions), so every method runs its body on
//! the blocking pool through [`off_runtime`] and never stalls the runtime.
//!
//! [`SyncBackend`]: crate::SyncBackend
//! [`LmdbBackend`]: crate::LmdbBackend

use std::sync::Arc;

use async_trait::async_trait;
use stowage_core::{Record, StorageError, StorageType};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Key-value store holding [`Record`]s.
///
/// Implementations must be thread-safe. A write fully replaces any record
/// previously stored under the same key (last write wins).
#[async_trait]
pub trait Backend: sealed::Sealed + Send + Sync {
    /// Which backend this is.
    fn storage_type(&self) -> StorageType;

    /// Insert or overwrite a record.
    async fn put(&self, record: &Record) -> Result<(), StorageError>;

    /// Fetch a record by key.
    async fn get(&self, key: &str) -> Result<Option<Record>, StorageError>;

    /// Insert or overwrite several records atomically.
    async fn put_many(&self, records: &[Record]) -> Result<usize, StorageError>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete every record. Returns how many were removed.
    async fn clear(&self) -> Result<u64, StorageError>;

    /// All keys currently stored, in ascending order.
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Delete several records atomically. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError>;
}

/// Run a blocking backend body on the blocking pool.
///
/// The returned future only waits for the result, so a caller's timeout or
/// cancellation fires on schedule. A body already running when the caller
/// gives up still finishes in the background.
pub(crate) async fn off_runtime<B, T, F>(backend: &Arc<B>, call: F) -> Result<T, StorageError>
where
    B: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&B) -> Result<T, StorageError> + Send + 'static,
{
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || call(&backend))
        .await
        .map_err(|e| StorageError::TransactionFailed {
            reason: format!("backend task failed: {}", e),
        })?
}
