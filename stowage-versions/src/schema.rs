//! Per-version schema definitions.
//!
//! A [`SchemaVersion`] maps each data type it covers to a [`DataTypeSchema`]
//! (field name -> [`FieldRule`]). Data types a version does not mention are
//! not validated at that version.

use std::collections::BTreeMap;

use semver::Version;
use serde::Serialize;
use stowage_core::DataType;

/// JSON shape a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    /// RFC 3339 / ISO 8601 string or Unix milliseconds.
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
        }
    }
}

/// Textual formats checked on string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Email,
    Uuid,
    IsoDate,
}

/// Constraints on one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRule {
    pub field_type: FieldType,
    pub required: bool,
    /// Minimum length of a string (in chars) or array.
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Inclusive numeric bounds.
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Closed set of permitted string values.
    pub allowed: Option<Vec<String>>,
    pub format: Option<FieldFormat>,
}

impl FieldRule {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            allowed: None,
            format: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Field rules for one data type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTypeSchema {
    fields: BTreeMap<String, FieldRule>,
}

impl DataTypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, rule: FieldRule) -> Self {
        self.fields.insert(name.to_string(), rule);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields.get(name)
    }
}

/// All data-type schemas of one application version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaVersion {
    pub version: Version,
    types: BTreeMap<DataType, DataTypeSchema>,
}

impl SchemaVersion {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            types: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, data_type: DataType, schema: DataTypeSchema) -> Self {
        self.types.insert(data_type, schema);
        self
    }

    pub fn schema_for(&self, data_type: DataType) -> Option<&DataTypeSchema> {
        self.types.get(&data_type)
    }

    pub fn types(&self) -> impl Iterator<Item = (DataType, &DataTypeSchema)> {
        self.types.iter().map(|(dt, schema)| (*dt, schema))
    }
}

/// Every schema version the application knows, ordered.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    versions: BTreeMap<Version, SchemaVersion>,
}

pub const EVENT_CATEGORIES: &[&str] = &["work", "personal", "health", "other"];

pub const BACKGROUND_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

fn profile_schema() -> DataTypeSchema {
    DataTypeSchema::new()
        .field("id", FieldRule::string().format(FieldFormat::Uuid))
        .field("name", FieldRule::string().length(1, 100))
        .field("email", FieldRule::string().format(FieldFormat::Email))
}

fn weather_schema() -> DataTypeSchema {
    DataTypeSchema::new()
        .field("location_key", FieldRule::string().required().length(1, 200))
        .field("created_at", FieldRule::date())
}

fn event_schema() -> DataTypeSchema {
    DataTypeSchema::new()
        .field("id", FieldRule::string().format(FieldFormat::Uuid))
        .field("title", FieldRule::string().required().length(1, 200))
        .field("start", FieldRule::date().required())
        .field("end", FieldRule::date().required())
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schemas shipped with the application: 1.0.0, 1.2.0 and 2.0.0.
    pub fn builtin() -> Self {
        let v1_0 = SchemaVersion::new(Version::new(1, 0, 0))
            .with_type(
                DataType::Conversation,
                DataTypeSchema::new()
                    .field("id", FieldRule::string().format(FieldFormat::Uuid))
                    .field("title", FieldRule::string().max_length(200)),
            )
            .with_type(
                DataType::Background,
                DataTypeSchema::new().field("name", FieldRule::string().max_length(200)),
            )
            .with_type(
                DataType::Location,
                DataTypeSchema::new()
                    .field("name", FieldRule::string().required().length(1, 200))
                    .field("latitude", FieldRule::number().range(-90.0, 90.0))
                    .field("longitude", FieldRule::number().range(-180.0, 180.0)),
            )
            .with_type(DataType::Weather, weather_schema())
            .with_type(DataType::UserProfile, profile_schema())
            .with_type(DataType::Event, event_schema());

        let v1_2 = SchemaVersion::new(Version::new(1, 2, 0))
            .with_type(
                DataType::Conversation,
                DataTypeSchema::new()
                    .field("id", FieldRule::string().format(FieldFormat::Uuid))
                    .field("title", FieldRule::string().max_length(200))
                    .field("created_at", FieldRule::date()),
            )
            .with_type(
                DataType::Background,
                DataTypeSchema::new()
                    .field("name", FieldRule::string().max_length(200))
                    .field(
                        "mime_type",
                        FieldRule::string().required().one_of(BACKGROUND_MIME_TYPES),
                    ),
            )
            .with_type(
                DataType::Location,
                DataTypeSchema::new()
                    .field("name", FieldRule::string().required().length(1, 200))
                    .field("lat", FieldRule::number().required().range(-90.0, 90.0))
                    .field("lon", FieldRule::number().required().range(-180.0, 180.0)),
            )
            .with_type(DataType::Weather, weather_schema())
            .with_type(DataType::UserProfile, profile_schema())
            .with_type(DataType::Event, event_schema());

        let v2_0 = SchemaVersion::new(Version::new(2, 0, 0))
            .with_type(
                DataType::Conversation,
                DataTypeSchema::new()
                    .field("id", FieldRule::string().format(FieldFormat::Uuid))
                    .field("title", FieldRule::string().required().length(1, 200))
                    .field("message_count", FieldRule::integer().required().min(0.0))
                    .field("created_at", FieldRule::date()),
            )
            .with_type(
                DataType::Background,
                DataTypeSchema::new()
                    .field("name", FieldRule::string().max_length(200))
                    .field(
                        "mime_type",
                        FieldRule::string().required().one_of(BACKGROUND_MIME_TYPES),
                    ),
            )
            .with_type(
                DataType::Location,
                DataTypeSchema::new()
                    .field("name", FieldRule::string().required().length(1, 200))
                    .field("lat", FieldRule::number().required().range(-90.0, 90.0))
                    .field("lon", FieldRule::number().required().range(-180.0, 180.0)),
            )
            .with_type(DataType::Weather, weather_schema())
            .with_type(DataType::UserProfile, profile_schema())
            .with_type(
                DataType::Event,
                event_schema().field(
                    "category",
                    FieldRule::string().required().one_of(EVENT_CATEGORIES),
                ),
            );

        let mut registry = Self::new();
        registry.register(v1_0);
        registry.register(v1_2);
        registry.register(v2_0);
        registry
    }

    pub fn register(&mut self, schema: SchemaVersion) {
        self.versions.insert(schema.version.clone(), schema);
    }

    pub fn get(&self, version: &Version) -> Option<&SchemaVersion> {
        self.versions.get(version)
    }

    pub fn latest(&self) -> Option<&SchemaVersion> {
        self.versions.values().next_back()
    }

    /// Known versions, ascending.
    pub fn versions(&self) -> Vec<Version> {
        self.versions.keys().cloned().collect()
    }
}
