//! Field, record and event validation.
//!
//! Validators never short-circuit: every problem found is returned so a
//! migration report can list all of them at once.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use stowage_core::{DataType, ValidationError};

use crate::schema::{DataTypeSchema, FieldFormat, FieldRule, FieldType};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex")
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("Invalid UUID regex")
});

static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("Invalid ISO date regex")
});

/// Longest span an event may cover.
pub const MAX_EVENT_SPAN_MS: i64 = 24 * 60 * 60 * 1000;

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a date field: RFC 3339, a bare `YYYY-MM-DD`, or Unix milliseconds.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
        }
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
        FieldType::Date => parse_date(value).is_some(),
    }
}

fn format_matches(format: FieldFormat, s: &str) -> bool {
    match format {
        FieldFormat::Email => EMAIL_RE.is_match(s),
        FieldFormat::Uuid => UUID_RE.is_match(s),
        FieldFormat::IsoDate => {
            ISO_DATE_RE.is_match(s) && parse_date(&Value::String(s.to_string())).is_some()
        }
    }
}

fn format_name(format: FieldFormat) -> &'static str {
    match format {
        FieldFormat::Email => "email address",
        FieldFormat::Uuid => "UUID",
        FieldFormat::IsoDate => "ISO 8601 date",
    }
}

/// Check one field value against its rule.
///
/// `Value::Null` counts as absent: an error for required fields, nothing
/// otherwise. A type mismatch suppresses the remaining checks for the field.
pub fn validate_field(name: &str, value: &Value, rule: &FieldRule) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if value.is_null() {
        if rule.required {
            errors.push(ValidationError::RequiredFieldMissing {
                field: name.to_string(),
            });
        }
        return errors;
    }

    if !type_matches(rule.field_type, value) {
        errors.push(ValidationError::TypeMismatch {
            field: name.to_string(),
            expected: rule.field_type.as_str().to_string(),
            got: json_kind(value).to_string(),
        });
        return errors;
    }

    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = rule.min_length {
            if len < min {
                errors.push(ValidationError::InvalidValue {
                    field: name.to_string(),
                    reason: format!("length {} is below minimum {}", len, min),
                });
            }
        }
        if let Some(max) = rule.max_length {
            if len > max {
                errors.push(ValidationError::InvalidValue {
                    field: name.to_string(),
                    reason: format!("length {} exceeds maximum {}", len, max),
                });
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = rule.min {
            if n < min {
                errors.push(ValidationError::InvalidValue {
                    field: name.to_string(),
                    reason: format!("{} is below minimum {}", n, min),
                });
            }
        }
        if let Some(max) = rule.max {
            if n > max {
                errors.push(ValidationError::InvalidValue {
                    field: name.to_string(),
                    reason: format!("{} exceeds maximum {}", n, max),
                });
            }
        }
    }

    if let (Some(allowed), Some(s)) = (&rule.allowed, value.as_str()) {
        if !allowed.iter().any(|a| a == s) {
            errors.push(ValidationError::InvalidValue {
                field: name.to_string(),
                reason: format!("'{}' is not one of [{}]", s, allowed.join(", ")),
            });
        }
    }

    if let (Some(format), Some(s)) = (rule.format, value.as_str()) {
        if !format_matches(format, s) {
            errors.push(ValidationError::InvalidValue {
                field: name.to_string(),
                reason: format!("'{}' is not a valid {}", s, format_name(format)),
            });
        }
    }

    errors
}

/// Business rules for calendar events: `end` strictly after `start`, and
/// the span at most 24 hours. Missing or unparseable dates are left to the
/// field rules.
pub fn validate_event(value: &Value) -> Vec<ValidationError> {
    let (Some(start), Some(end)) = (
        value.get("start").and_then(parse_date),
        value.get("end").and_then(parse_date),
    ) else {
        return Vec::new();
    };

    if end <= start {
        return vec![ValidationError::ConstraintViolation {
            constraint: "event.end_after_start".to_string(),
            reason: format!("end {} is not after start {}", end.to_rfc3339(), start.to_rfc3339()),
        }];
    }

    let span_ms = (end - start).num_milliseconds();
    if span_ms > MAX_EVENT_SPAN_MS {
        return vec![ValidationError::ConstraintViolation {
            constraint: "event.max_duration".to_string(),
            reason: format!("event spans {} minutes, limit is 24 hours", span_ms / 60_000),
        }];
    }

    Vec::new()
}

/// Validate a whole payload against a data-type schema.
///
/// Events additionally go through [`validate_event`].
pub fn validate_record(
    data_type: DataType,
    payload: &Value,
    schema: &DataTypeSchema,
) -> Vec<ValidationError> {
    let Some(obj) = payload.as_object() else {
        return vec![ValidationError::TypeMismatch {
            field: data_type.as_str().to_string(),
            expected: "object".to_string(),
            got: json_kind(payload).to_string(),
        }];
    };

    let mut errors = Vec::new();
    for (name, rule) in schema.fields() {
        let value = obj.get(name).unwrap_or(&Value::Null);
        errors.extend(validate_field(name, value, rule));
    }
    if data_type == DataType::Event {
        errors.extend(validate_event(payload));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use proptest::prelude::*;
    use semver::Version;
    use serde_json::json;

    #[test]
    fn test_required_and_null() {
        let rule = FieldRule::string().required();
        assert_eq!(
            validate_field("title", &Value::Null, &rule),
            vec![ValidationError::RequiredFieldMissing {
                field: "title".to_string()
            }]
        );
        assert!(validate_field("title", &Value::Null, &FieldRule::string()).is_empty());
    }

    #[test]
    fn test_type_mismatch_stops_further_checks() {
        let rule = FieldRule::string().length(1, 3).format(FieldFormat::Email);
        let errors = validate_field("email", &json!(42), &rule);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ValidationError::TypeMismatch { expected, got, .. } if expected == "string" && got == "integer"
        ));
    }

    #[test]
    fn test_length_range_and_enum() {
        let title = FieldRule::string().length(1, 5);
        assert_eq!(validate_field("t", &json!(""), &title).len(), 1);
        assert_eq!(validate_field("t", &json!("abcdef"), &title).len(), 1);
        assert!(validate_field("t", &json!("abc"), &title).is_empty());

        let lat = FieldRule::number().range(-90.0, 90.0);
        assert!(validate_field("lat", &json!(45.5), &lat).is_empty());
        assert_eq!(validate_field("lat", &json!(91), &lat).len(), 1);

        let category = FieldRule::string().one_of(&["work", "other"]);
        assert!(validate_field("c", &json!("work"), &category).is_empty());
        assert_eq!(validate_field("c", &json!("play"), &category).len(), 1);
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let rule = FieldRule::integer().min(0.0);
        assert!(validate_field("n", &json!(3), &rule).is_empty());
        assert_eq!(validate_field("n", &json!(3.5), &rule).len(), 1);
        assert_eq!(validate_field("n", &json!(-1), &rule).len(), 1);
    }

    #[test]
    fn test_formats() {
        let email = FieldRule::string().format(FieldFormat::Email);
        assert!(validate_field("e", &json!("ann@example.org"), &email).is_empty());
        assert_eq!(validate_field("e", &json!("ann.example.org"), &email).len(), 1);

        let uuid = FieldRule::string().format(FieldFormat::Uuid);
        assert!(validate_field("id", &json!("0190f3a2-7c4e-7b1a-9c55-1f2e3d4c5b6a"), &uuid).is_empty());
        assert_eq!(validate_field("id", &json!("not-a-uuid"), &uuid).len(), 1);

        let iso = FieldRule::string().format(FieldFormat::IsoDate);
        assert!(validate_field("d", &json!("2024-02-29"), &iso).is_empty());
        assert!(validate_field("d", &json!("2024-02-29T10:00:00Z"), &iso).is_empty());
        assert_eq!(validate_field("d", &json!("2023-02-30"), &iso).len(), 1);
        assert_eq!(validate_field("d", &json!("yesterday"), &iso).len(), 1);
    }

    #[test]
    fn test_date_accepts_millis_and_strings() {
        let rule = FieldRule::date().required();
        assert!(validate_field("start", &json!(1_700_000_000_000i64), &rule).is_empty());
        assert!(validate_field("start", &json!("2024-05-01T08:00:00+02:00"), &rule).is_empty());
        assert!(validate_field("start", &json!("2024-05-01"), &rule).is_empty());
        assert_eq!(validate_field("start", &json!("soon"), &rule).len(), 1);
    }

    #[test]
    fn test_event_rules() {
        let ok = json!({"start": "2024-05-01T08:00:00Z", "end": "2024-05-01T09:00:00Z"});
        assert!(validate_event(&ok).is_empty());

        let backwards = json!({"start": "2024-05-01T09:00:00Z", "end": "2024-05-01T08:00:00Z"});
        let errors = validate_event(&backwards);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field(), "event.end_after_start");

        let equal = json!({"start": "2024-05-01T09:00:00Z", "end": "2024-05-01T09:00:00Z"});
        assert_eq!(validate_event(&equal)[0].field(), "event.end_after_start");

        let long = json!({"start": "2024-05-01T08:00:00Z", "end": "2024-05-02T08:00:01Z"});
        assert_eq!(validate_event(&long)[0].field(), "event.max_duration");

        let exactly_a_day = json!({"start": "2024-05-01T08:00:00Z", "end": "2024-05-02T08:00:00Z"});
        assert!(validate_event(&exactly_a_day).is_empty());
    }

    #[test]
    fn test_validate_record_collects_everything() {
        let registry = SchemaRegistry::builtin();
        let schema = registry
            .get(&Version::new(2, 0, 0))
            .and_then(|s| s.schema_for(DataType::Event))
            .expect("event schema");

        let payload = json!({
            "title": "",
            "start": "2024-05-01T09:00:00Z",
            "end": "2024-05-01T08:00:00Z",
            "category": "party",
        });
        let errors = validate_record(DataType::Event, &payload, schema);
        let fields: Vec<&str> = errors.iter().map(|e| e.field()).collect();
        assert_eq!(fields, vec!["category", "title", "event.end_after_start"]);
    }

    #[test]
    fn test_non_object_payload() {
        let schema = DataTypeSchema::new();
        let errors = validate_record(DataType::Location, &json!("home"), &schema);
        assert!(matches!(&errors[0], ValidationError::TypeMismatch { field, .. } if field == "location"));
    }

    proptest! {
        #[test]
        fn prop_events_within_a_day_pass(start in 0i64..4_000_000_000_000, span in 1i64..=MAX_EVENT_SPAN_MS) {
            let event = json!({"start": start, "end": start + span});
            prop_assert!(validate_event(&event).is_empty());
        }

        #[test]
        fn prop_backwards_events_fail(start in 1i64..4_000_000_000_000, back in 0i64..1_000_000) {
            let event = json!({"start": start, "end": start - back});
            let errors = validate_event(&event);
            prop_assert_eq!(errors.len(), 1);
            prop_assert_eq!(errors[0].field(), "event.end_after_start");
        }
    }
}
