//! Property-Based Tests for Migration Transforms
//!
//! For any payload, applying a step transform twice SHALL give the same
//! result as applying it once, and the output SHALL satisfy the target
//! schema's required fields for that data type.

use proptest::prelude::*;
use semver::Version;
use serde_json::Value;
use stowage_core::{DataType, ValidationError};
use stowage_test_utils::generators::arb_json;
use stowage_versions::migration::{
    background_add_mime_type, conversation_add_summary, event_add_category,
    location_rename_coordinates,
};
use stowage_versions::{validate_record, SchemaRegistry};

type Transform = fn(&Value) -> Option<Value>;

const TRANSFORMS: [(&str, Transform); 4] = [
    ("background", background_add_mime_type),
    ("location", location_rename_coordinates),
    ("conversation", conversation_add_summary),
    ("event", event_add_category),
];

fn apply(transform: Transform, payload: &Value) -> Value {
    transform(payload).unwrap_or_else(|| payload.clone())
}

fn missing_fields(errors: &[ValidationError]) -> Vec<String> {
    errors
        .iter()
        .filter_map(|e| match e {
            ValidationError::RequiredFieldMissing { field } => Some(field.clone()),
            _ => None,
        })
        .collect()
}

/// Objects with a mix of the fields the transforms look at.
fn arb_record() -> impl Strategy<Value = Value> {
    (
        prop::option::of("[a-z ]{1,20}"),
        prop::option::of(0u32..50),
        prop::option::of(-90.0f64..90.0),
        prop::option::of(-180.0f64..180.0),
        prop::option::of(prop::sample::select(vec!["image/png", "image/gif"])),
        prop::option::of(arb_json()),
    )
        .prop_map(|(title, count, lat, lon, mime, extra)| {
            let mut obj = serde_json::Map::new();
            if let Some(t) = title {
                obj.insert("title".into(), Value::from(t));
            }
            if let Some(c) = count {
                obj.insert("message_count".into(), Value::from(c));
            }
            if let Some(lat) = lat {
                obj.insert("latitude".into(), Value::from(lat));
            }
            if let Some(lon) = lon {
                obj.insert("longitude".into(), Value::from(lon));
            }
            if let Some(m) = mime {
                obj.insert("mime_type".into(), Value::from(m));
            }
            if let Some(extra) = extra {
                obj.insert("extra".into(), extra);
            }
            Value::Object(obj)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_transforms_are_idempotent(payload in arb_record()) {
        for (name, transform) in TRANSFORMS {
            let once = apply(transform, &payload);
            prop_assert!(transform(&once).is_none(), "{} rewrote its own output", name);
        }
    }

    #[test]
    fn prop_transforms_ignore_non_objects(payload in arb_json()) {
        prop_assume!(!payload.is_object());
        for (_, transform) in TRANSFORMS {
            prop_assert!(transform(&payload).is_none());
        }
    }

    #[test]
    fn prop_conversation_output_has_required_fields(payload in arb_record()) {
        let registry = SchemaRegistry::builtin();
        let schema = registry
            .get(&Version::new(2, 0, 0))
            .and_then(|s| s.schema_for(DataType::Conversation))
            .expect("conversation schema");
        let migrated = apply(conversation_add_summary, &payload);
        let errors = validate_record(DataType::Conversation, &migrated, schema);
        prop_assert!(missing_fields(&errors).is_empty(), "missing: {:?}", errors);
    }

    #[test]
    fn prop_background_output_has_mime_type(payload in arb_record()) {
        let migrated = apply(background_add_mime_type, &payload);
        prop_assert!(migrated.get("mime_type").and_then(Value::as_str).is_some());
    }
}
