//! Stowage Test Utilities
//!
//! Shared test infrastructure for the Stowage workspace:
//! - A temp-dir backed storage stack
//! - Payload fixtures for each data type
//! - Proptest generators for keys and payloads
//! - Assertions on Stowage errors

use std::sync::Arc;

pub use stowage_core::{
    DataType, MigrationError, StorageError, StorageType, StowageConfig, StowageError,
    StowageResult,
};
pub use stowage_events::{EventBus, StorageEvent};
pub use stowage_storage::{RetrieveOptions, StorageManager, StoreOptions};

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

// ============================================================================
// STACK
// ============================================================================

/// A storage manager over fresh backends in a temp directory.
///
/// The directory lives as long as the stack.
pub struct TestStack {
    pub storage: Arc<StorageManager>,
    pub events: EventBus,
    pub config: StowageConfig,
    dir: TempDir,
}

impl TestStack {
    pub fn data_dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Configuration rooted at `dir`, with cheap key derivation and a small map.
pub fn test_config(dir: &std::path::Path) -> StowageConfig {
    let mut config = StowageConfig::with_data_dir(dir);
    config.encryption.iterations = 1_000;
    config.lmdb_map_size_mb = 16;
    config
}

/// Open a stack with the default test configuration.
pub fn open_stack() -> TestStack {
    open_stack_with(|_| {})
}

/// Open a stack after letting the caller adjust the configuration.
pub fn open_stack_with(adjust: impl FnOnce(&mut StowageConfig)) -> TestStack {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(dir.path());
    adjust(&mut config);
    let events = EventBus::new(config.event_capacity);
    let storage = StorageManager::open(config.clone(), events.clone())
        .expect("Failed to open storage manager");
    TestStack {
        storage: Arc::new(storage),
        events,
        config,
        dir,
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Stowage keys and payloads.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_data_type() -> impl Strategy<Value = DataType> {
        proptest::sample::select(DataType::ALL.to_vec())
    }

    pub fn arb_storage_type() -> impl Strategy<Value = StorageType> {
        prop_oneof![Just(StorageType::Sync), Just(StorageType::Async)]
    }

    /// A key for some data type, e.g. `weather_k3x`.
    pub fn arb_key() -> impl Strategy<Value = String> {
        (arb_data_type(), "[a-z0-9]{1,12}").prop_map(|(dt, id)| dt.key(&id))
    }

    /// Arbitrary JSON values, up to a few levels deep.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[ -~]{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Ages in days, as a signed offset from now (positive = in the past).
    pub fn arb_age_days(max: i64) -> impl Strategy<Value = i64> {
        0..=max
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Payload builders for each data type.

    use super::*;

    /// Unix milliseconds `days` ago.
    pub fn millis_days_ago(days: i64) -> i64 {
        (Utc::now() - ChronoDuration::days(days)).timestamp_millis()
    }

    /// RFC 3339 timestamp `days` ago.
    pub fn rfc3339_days_ago(days: i64) -> String {
        (Utc::now() - ChronoDuration::days(days)).to_rfc3339()
    }

    pub fn new_id() -> String {
        uuid::Uuid::now_v7().to_string()
    }

    /// A transcript message stamped `days` ago.
    pub fn conversation(conversation_id: &str, days_ago: i64) -> Value {
        json!({
            "conversation_id": conversation_id,
            "model": "local-small",
            "role": "user",
            "content": "hello",
            "timestamp": millis_days_ago(days_ago),
        })
    }

    /// A conversation shaped for the 2.0.0 schema.
    pub fn conversation_v2(title: &str, message_count: i64) -> Value {
        json!({
            "id": new_id(),
            "title": title,
            "message_count": message_count,
            "created_at": rfc3339_days_ago(0),
        })
    }

    /// A calendar event starting `start_hours` from now and lasting
    /// `duration_hours`.
    pub fn event(title: &str, start_hours: i64, duration_hours: i64) -> Value {
        let start = Utc::now() + ChronoDuration::hours(start_hours);
        let end = start + ChronoDuration::hours(duration_hours);
        json!({
            "id": new_id(),
            "title": title,
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
        })
    }

    pub fn location(name: &str, lat: f64, lon: f64) -> Value {
        json!({"name": name, "latitude": lat, "longitude": lon})
    }

    pub fn weather(location_key: &str, days_ago: i64) -> Value {
        json!({
            "location_key": location_key,
            "temperature": 18.5,
            "created_at": rfc3339_days_ago(days_ago),
        })
    }

    pub fn background(mime_type: Option<&str>, days_ago: i64) -> Value {
        let mut value = json!({
            "name": "wallpaper",
            "data": "iVBORw0KGgo=",
            "timestamp": millis_days_ago(days_ago),
        });
        if let (Some(mime), Some(obj)) = (mime_type, value.as_object_mut()) {
            obj.insert("mime_type".to_string(), json!(mime));
        }
        value
    }

    pub fn profile(name: &str, email: &str) -> Value {
        json!({"id": new_id(), "name": name, "email": email})
    }

    /// A payload whose serialized form exceeds `bytes`.
    pub fn large_payload(bytes: usize) -> Value {
        json!({"blob": "x".repeat(bytes + 1)})
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Stowage results.

    use super::*;

    /// Assert that a StowageResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StowageResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a StowageResult is a migration error.
    #[track_caller]
    pub fn assert_migration_error<T: std::fmt::Debug>(result: &StowageResult<T>) -> MigrationError {
        match result {
            Err(StowageError::Migration(e)) => e.clone(),
            other => panic!("Expected Migration error, got: {:?}", other),
        }
    }

    /// Assert that a StowageResult is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &StowageResult<T>) -> StorageError {
        match result {
            Err(StowageError::Storage(e)) => e.clone(),
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }
}
