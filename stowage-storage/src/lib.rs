//! Stowage Storage - Two-Backend Storage Manager
//!
//! A single facade, [`StorageManager`], over two very different stores:
//!
//! - [`SyncBackend`]: small (5 MiB by default), namespaced and synchronous,
//!   for frequently read configuration values and secrets.
//! - [`LmdbBackend`]: high-capacity and transactional, grouped into four
//!   partitions with secondary indexes, for transcripts, images, locations
//!   and cached weather.
//!
//! Writes are routed by key and payload size, sensitive payloads are
//! encrypted with AES-256-GCM, and reads go through a TTL cache.

pub mod backend;
pub mod cache;
pub mod crypto;
pub mod lmdb_backend;
pub mod manager;
pub mod routing;
pub mod sync_backend;

pub use backend::Backend;
pub use cache::{CacheEntry, CacheStats, ReadCache};
pub use crypto::EnvelopeCipher;
pub use lmdb_backend::{CommitSummary, LmdbBackend, LmdbError, QueryOptions, UnitOfWork};
pub use manager::{Entry, RetrieveOptions, StorageManager, StoreOptions};
pub use routing::{is_sensitive_key, select_storage_type, SENSITIVE_KEY_FRAGMENTS};
pub use sync_backend::SyncBackend;
