//! Migration steps and the registry that chains them.
//!
//! Each step moves every affected record from one schema version to the
//! next. Steps rewrite a record only when its payload actually changes, so
//! re-running a step over already-migrated data writes nothing.

use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde_json::{json, Value};
use stowage_core::{DataType, MigrationError, StowageResult};
use stowage_storage::{StorageManager, StoreOptions};
use tracing::{debug, info};

/// What one step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Records read.
    pub examined: usize,
    /// Records written back with a new payload.
    pub rewritten: usize,
}

/// One hop in the version chain.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn from_version(&self) -> &Version;

    fn to_version(&self) -> &Version;

    fn description(&self) -> &str;

    /// Rewrite stored records into the `to_version` shape.
    async fn apply(&self, storage: &StorageManager) -> StowageResult<StepOutcome>;
}

/// Rewrite every record of `data_type` through `transform`, keeping each
/// record in its backend and with its original sensitivity.
async fn rewrite_type(
    storage: &StorageManager,
    data_type: DataType,
    transform: fn(&Value) -> Option<Value>,
) -> StowageResult<StepOutcome> {
    let entries = storage.entries(data_type).await?;
    let examined = entries.len();
    let batch: Vec<(String, Value, StoreOptions)> = entries
        .into_iter()
        .filter_map(|entry| {
            let payload = transform(&entry.payload)?;
            let mut options = StoreOptions::new().in_backend(entry.storage_type);
            if entry.encrypted {
                options = options.sensitive();
            }
            Some((entry.key, payload, options))
        })
        .collect();
    let rewritten = batch.len();
    if !batch.is_empty() {
        storage.store_batch(batch).await?;
    }
    debug!(data_type = %data_type, examined, rewritten, "Rewrote records");
    Ok(StepOutcome {
        examined,
        rewritten,
    })
}

// ============================================================================
// 1.0.0 -> 1.2.0
// ============================================================================

/// Guess an image MIME type from a `data:` URL, falling back to PNG.
fn infer_mime_type(data: Option<&str>) -> &'static str {
    let Some(rest) = data.and_then(|d| d.strip_prefix("data:")) else {
        return "image/png";
    };
    ["image/jpeg", "image/webp", "image/gif", "image/png"]
        .into_iter()
        .find(|mime| rest.starts_with(mime))
        .unwrap_or("image/png")
}

/// Backgrounds gain a required `mime_type`.
pub fn background_add_mime_type(payload: &Value) -> Option<Value> {
    let obj = payload.as_object()?;
    if obj.get("mime_type").is_some_and(|m| !m.is_null()) {
        return None;
    }
    let mime = infer_mime_type(obj.get("data").and_then(Value::as_str));
    let mut updated = obj.clone();
    updated.insert("mime_type".to_string(), json!(mime));
    Some(Value::Object(updated))
}

/// Locations switch from `latitude`/`longitude` to `lat`/`lon`.
pub fn location_rename_coordinates(payload: &Value) -> Option<Value> {
    let obj = payload.as_object()?;
    if !obj.contains_key("latitude") && !obj.contains_key("longitude") {
        return None;
    }
    let mut updated = obj.clone();
    for (old, new) in [("latitude", "lat"), ("longitude", "lon")] {
        if let Some(value) = updated.remove(old) {
            updated.entry(new.to_string()).or_insert(value);
        }
    }
    Some(Value::Object(updated))
}

pub struct AddMimeTypesAndShortCoordinates {
    from: Version,
    to: Version,
}

impl AddMimeTypesAndShortCoordinates {
    pub fn new() -> Self {
        Self {
            from: Version::new(1, 0, 0),
            to: Version::new(1, 2, 0),
        }
    }
}

impl Default for AddMimeTypesAndShortCoordinates {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MigrationStep for AddMimeTypesAndShortCoordinates {
    fn from_version(&self) -> &Version {
        &self.from
    }

    fn to_version(&self) -> &Version {
        &self.to
    }

    fn description(&self) -> &str {
        "add background mime_type, rename location latitude/longitude to lat/lon"
    }

    async fn apply(&self, storage: &StorageManager) -> StowageResult<StepOutcome> {
        let backgrounds = rewrite_type(storage, DataType::Background, background_add_mime_type).await?;
        let locations = rewrite_type(storage, DataType::Location, location_rename_coordinates).await?;
        Ok(StepOutcome {
            examined: backgrounds.examined + locations.examined,
            rewritten: backgrounds.rewritten + locations.rewritten,
        })
    }
}

// ============================================================================
// 1.2.0 -> 2.0.0
// ============================================================================

pub const DEFAULT_CONVERSATION_TITLE: &str = "Untitled conversation";

pub const DEFAULT_EVENT_CATEGORY: &str = "other";

/// Conversations gain a required `title` and `message_count`.
pub fn conversation_add_summary(payload: &Value) -> Option<Value> {
    let obj = payload.as_object()?;
    let has_title = obj.get("title").and_then(Value::as_str).is_some_and(|t| !t.is_empty());
    let has_count = obj.get("message_count").is_some_and(|c| !c.is_null());
    if has_title && has_count {
        return None;
    }
    let mut updated = obj.clone();
    if !has_title {
        updated.insert("title".to_string(), json!(DEFAULT_CONVERSATION_TITLE));
    }
    if !has_count {
        let count = obj
            .get("messages")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        updated.insert("message_count".to_string(), json!(count));
    }
    Some(Value::Object(updated))
}

/// Events gain a required `category`.
pub fn event_add_category(payload: &Value) -> Option<Value> {
    let obj = payload.as_object()?;
    if obj.get("category").is_some_and(|c| !c.is_null()) {
        return None;
    }
    let mut updated = obj.clone();
    updated.insert("category".to_string(), json!(DEFAULT_EVENT_CATEGORY));
    Some(Value::Object(updated))
}

pub struct AddConversationSummaryAndEventCategory {
    from: Version,
    to: Version,
}

impl AddConversationSummaryAndEventCategory {
    pub fn new() -> Self {
        Self {
            from: Version::new(1, 2, 0),
            to: Version::new(2, 0, 0),
        }
    }
}

impl Default for AddConversationSummaryAndEventCategory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MigrationStep for AddConversationSummaryAndEventCategory {
    fn from_version(&self) -> &Version {
        &self.from
    }

    fn to_version(&self) -> &Version {
        &self.to
    }

    fn description(&self) -> &str {
        "add conversation title/message_count and event category"
    }

    async fn apply(&self, storage: &StorageManager) -> StowageResult<StepOutcome> {
        let conversations =
            rewrite_type(storage, DataType::Conversation, conversation_add_summary).await?;
        let events = rewrite_type(storage, DataType::Event, event_add_category).await?;
        Ok(StepOutcome {
            examined: conversations.examined + events.examined,
            rewritten: conversations.rewritten + events.rewritten,
        })
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Registered steps, searched by `from_version`.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    steps: Vec<Arc<dyn MigrationStep>>,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hops: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{} -> {}", s.from_version(), s.to_version()))
            .collect();
        f.debug_struct("MigrationRegistry").field("steps", &hops).finish()
    }
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The steps shipped with the application: 1.0.0 -> 1.2.0 -> 2.0.0.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AddMimeTypesAndShortCoordinates::new()));
        registry.register(Arc::new(AddConversationSummaryAndEventCategory::new()));
        registry
    }

    pub fn register(&mut self, step: Arc<dyn MigrationStep>) {
        info!(
            from = %step.from_version(),
            to = %step.to_version(),
            "Registered migration step"
        );
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The contiguous chain of steps leading from `from` to `to`.
    ///
    /// An empty chain means the versions are equal. Downgrades and gaps are
    /// [`MigrationError::ChainMissing`].
    pub fn resolve_chain(
        &self,
        from: &Version,
        to: &Version,
    ) -> Result<Vec<Arc<dyn MigrationStep>>, MigrationError> {
        let missing = || MigrationError::ChainMissing {
            from: from.to_string(),
            to: to.to_string(),
        };
        if from > to {
            return Err(missing());
        }

        let mut chain = Vec::new();
        let mut cursor = from.clone();
        while &cursor != to {
            let step = self
                .steps
                .iter()
                .find(|s| {
                    s.from_version() == &cursor && s.to_version() > &cursor && s.to_version() <= to
                })
                .ok_or_else(missing)?;
            cursor = step.to_version().clone();
            chain.push(Arc::clone(step));
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hops(chain: &[Arc<dyn MigrationStep>]) -> Vec<String> {
        chain
            .iter()
            .map(|s| format!("{}->{}", s.from_version(), s.to_version()))
            .collect()
    }

    #[test]
    fn test_resolve_full_chain() {
        let registry = MigrationRegistry::builtin();
        let chain = registry
            .resolve_chain(&Version::new(1, 0, 0), &Version::new(2, 0, 0))
            .expect("chain");
        assert_eq!(hops(&chain), vec!["1.0.0->1.2.0", "1.2.0->2.0.0"]);
    }

    #[test]
    fn test_resolve_same_version_is_empty() {
        let registry = MigrationRegistry::builtin();
        let v = Version::new(1, 2, 0);
        assert!(registry.resolve_chain(&v, &v).expect("chain").is_empty());
    }

    #[test]
    fn test_resolve_gaps_and_downgrades() {
        let registry = MigrationRegistry::builtin();
        let gap = registry.resolve_chain(&Version::new(1, 1, 0), &Version::new(2, 0, 0));
        assert!(matches!(gap, Err(MigrationError::ChainMissing { .. })));

        let past_end = registry.resolve_chain(&Version::new(1, 2, 0), &Version::new(3, 0, 0));
        assert!(matches!(past_end, Err(MigrationError::ChainMissing { .. })));

        let down = registry.resolve_chain(&Version::new(2, 0, 0), &Version::new(1, 2, 0));
        assert!(matches!(down, Err(MigrationError::ChainMissing { from, to }) if from == "2.0.0" && to == "1.2.0"));
    }

    #[test]
    fn test_background_mime_inference() {
        let jpeg = background_add_mime_type(&json!({"data": "data:image/jpeg;base64,/9j/"}))
            .expect("changed");
        assert_eq!(jpeg["mime_type"], json!("image/jpeg"));

        let raw = background_add_mime_type(&json!({"data": "iVBORw0KGgo="})).expect("changed");
        assert_eq!(raw["mime_type"], json!("image/png"));

        assert!(background_add_mime_type(&json!({"mime_type": "image/gif"})).is_none());
    }

    #[test]
    fn test_location_rename_is_idempotent() {
        let renamed = location_rename_coordinates(&json!({"name": "home", "latitude": 1.5, "longitude": 2.5}))
            .expect("changed");
        assert_eq!(renamed, json!({"name": "home", "lat": 1.5, "lon": 2.5}));
        assert!(location_rename_coordinates(&renamed).is_none());
    }

    #[test]
    fn test_conversation_summary_defaults() {
        let updated = conversation_add_summary(&json!({"messages": [1, 2, 3]})).expect("changed");
        assert_eq!(updated["title"], json!(DEFAULT_CONVERSATION_TITLE));
        assert_eq!(updated["message_count"], json!(3));
        assert!(conversation_add_summary(&updated).is_none());

        let kept = conversation_add_summary(&json!({"title": "Trip", "message_count": 4}));
        assert!(kept.is_none());
    }

    #[test]
    fn test_event_category_default() {
        let updated = event_add_category(&json!({"title": "Standup"})).expect("changed");
        assert_eq!(updated["category"], json!("other"));
        assert!(event_add_category(&updated).is_none());
        assert!(event_add_category(&json!("not an object")).is_none());
    }
}
