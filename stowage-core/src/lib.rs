//! Stowage Core - Data Model
//!
//! Pure data structures shared by every Stowage crate: records, envelopes,
//! backend and partition discriminators, data-type key prefixes and the
//! capacity usage shapes carried on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod retention;

pub use config::{EncryptionConfig, StowageConfig};
pub use error::{
    ConfigError, CryptoError, MigrationError, RecordValidationError, StorageError, StowageError,
    StowageResult, ValidationError, ValidationReport,
};
pub use retention::{RetentionPolicy, RetentionTable};

// ============================================================================
// PRIMITIVES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Key under which the installed schema version is recorded.
pub const DATA_VERSION_KEY: &str = "data_version";

/// Companion key holding when `data_version` was last written.
pub const DATA_VERSION_UPDATED_AT_KEY: &str = "data_version_updated_at";

/// Prefix shared by every migration backup key.
pub const BACKUP_KEY_PREFIX: &str = "backup_";

// ============================================================================
// BACKENDS
// ============================================================================

/// Which of the two storage backends a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// Small, capacity-limited, synchronous key-value store.
    Sync,
    /// High-capacity, transactional, indexed store.
    Async,
}

impl StorageType {
    pub const ALL: [StorageType; 2] = [StorageType::Sync, StorageType::Async];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Sync => "sync",
            StorageType::Async => "async",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" | "local" => Ok(StorageType::Sync),
            "async" | "indexed" => Ok(StorageType::Async),
            other => Err(format!("unknown storage type '{}'", other)),
        }
    }
}

// ============================================================================
// PARTITIONS
// ============================================================================

/// Named record groups inside the async backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Conversations,
    Backgrounds,
    Locations,
    Weather,
}

/// Key-prefix dispatch table for the async backend. First match wins.
const PARTITION_PREFIXES: &[(&str, Partition)] = &[
    ("conversation_", Partition::Conversations),
    ("transcript_", Partition::Conversations),
    ("background_", Partition::Backgrounds),
    ("image_", Partition::Backgrounds),
    ("location_", Partition::Locations),
    ("weather_", Partition::Weather),
];

impl Partition {
    pub const ALL: [Partition; 4] = [
        Partition::Conversations,
        Partition::Backgrounds,
        Partition::Locations,
        Partition::Weather,
    ];

    /// Database name of this partition.
    pub fn name(&self) -> &'static str {
        match self {
            Partition::Conversations => "conversations",
            Partition::Backgrounds => "backgrounds",
            Partition::Locations => "locations",
            Partition::Weather => "weather",
        }
    }

    /// Pick the partition for a key. Keys with no known prefix land in
    /// `conversations`.
    pub fn for_key(key: &str) -> Partition {
        PARTITION_PREFIXES
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, partition)| *partition)
            .unwrap_or(Partition::Conversations)
    }

    /// Payload fields maintained as secondary indexes for this partition.
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Partition::Conversations => &["conversation_id", "model"],
            Partition::Backgrounds => &["mime_type"],
            Partition::Locations => &["name"],
            Partition::Weather => &["location_key"],
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Partition::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown partition '{}'", s))
    }
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// Logical record categories. Each owns a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Conversation,
    Background,
    Location,
    Weather,
    UserProfile,
    Event,
    Settings,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Conversation,
        DataType::Background,
        DataType::Location,
        DataType::Weather,
        DataType::UserProfile,
        DataType::Event,
        DataType::Settings,
    ];

    pub fn key_prefix(&self) -> &'static str {
        match self {
            DataType::Conversation => "conversation_",
            DataType::Background => "background_",
            DataType::Location => "location_",
            DataType::Weather => "weather_",
            DataType::UserProfile => "profile_",
            DataType::Event => "event_",
            DataType::Settings => "settings_",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Conversation => "conversation",
            DataType::Background => "background",
            DataType::Location => "location",
            DataType::Weather => "weather",
            DataType::UserProfile => "user_profile",
            DataType::Event => "event",
            DataType::Settings => "settings",
        }
    }

    /// Resolve the data type owning a key, if any.
    pub fn for_key(key: &str) -> Option<DataType> {
        DataType::ALL
            .into_iter()
            .find(|dt| key.starts_with(dt.key_prefix()))
    }

    /// Build a full key for a record id of this type.
    pub fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix(), id)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// One logical record as persisted by either backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub payload: serde_json::Value,
    pub stored_at: Timestamp,
    /// Set when `payload` is an [`Envelope`]. Persisted beside the payload;
    /// never inferred from the payload's shape.
    #[serde(default)]
    pub encrypted: bool,
}

impl Record {
    pub fn new(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            payload,
            stored_at: Utc::now(),
            encrypted: false,
        }
    }

    /// A record holding ciphertext.
    pub fn sealed(key: impl Into<String>, envelope: &Envelope) -> Self {
        Self {
            encrypted: true,
            ..Self::new(key, envelope.to_value())
        }
    }
}

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Wrapper around ciphertext: `{encrypted: true, version, data: base64}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub encrypted: bool,
    pub version: u32,
    /// Base64 of `iv || ciphertext`.
    pub data: String,
}

impl Envelope {
    pub fn new(data: String) -> Self {
        Self {
            encrypted: true,
            version: ENVELOPE_VERSION,
            data,
        }
    }

    /// Parse the payload of a record flagged as encrypted. Returns `None`
    /// for anything that is not an object with `encrypted: true` and a
    /// string `data` field.
    pub fn from_value(value: &serde_json::Value) -> Option<Envelope> {
        let obj = value.as_object()?;
        if obj.get("encrypted").and_then(|v| v.as_bool()) != Some(true) {
            return None;
        }
        let data = obj.get("data")?.as_str()?.to_string();
        let version = obj
            .get("version")
            .and_then(|v| v.as_u64())
            .unwrap_or(ENVELOPE_VERSION as u64) as u32;
        Some(Envelope {
            encrypted: true,
            version,
            data,
        })
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "encrypted": self.encrypted,
            "version": self.version,
            "data": self.data,
        })
    }
}

// ============================================================================
// CAPACITY USAGE
// ============================================================================

/// Usage of one backend (or the total) against its configured limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendUsage {
    /// Bytes used (exact for sync, estimated for async).
    pub used: u64,
    /// Configured limit in bytes.
    pub limit: u64,
    /// `used / limit * 100`.
    pub percentage: f64,
    pub warning: bool,
    pub critical: bool,
}

impl BackendUsage {
    /// Compute flags from thresholds given as fractions (0.8 = 80%).
    pub fn measure(used: u64, limit: u64, warning_threshold: f64, critical_threshold: f64) -> Self {
        let percentage = if limit == 0 {
            100.0
        } else {
            used as f64 / limit as f64 * 100.0
        };
        Self {
            used,
            limit,
            percentage,
            warning: percentage >= warning_threshold * 100.0,
            critical: percentage >= critical_threshold * 100.0,
        }
    }
}

/// Snapshot of both backends plus their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityUsage {
    pub sync: BackendUsage,
    #[serde(rename = "async")]
    pub async_: BackendUsage,
    pub total: BackendUsage,
    pub measured_at: Timestamp,
}

impl CapacityUsage {
    pub fn backend(&self, storage_type: StorageType) -> &BackendUsage {
        match storage_type {
            StorageType::Sync => &self.sync,
            StorageType::Async => &self.async_,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
