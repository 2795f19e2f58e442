//! Stowage Versions - Schema Versioning and Migrations
//!
//! Keeps stored records in step with the running application's schema:
//!
//! - [`SchemaRegistry`]: per-version field rules for each data type
//! - [`validate`]: field, record and event validators
//! - [`MigrationRegistry`]: version-to-version rewrite steps
//! - [`VersionManager`]: persisted version, backed-up migrations, rollback

pub mod backup;
pub mod manager;
pub mod migration;
pub mod schema;
pub mod validate;

pub use backup::{backup_key, parse_backup_key, Backup, BackupInfo, BackupRecord};
pub use manager::{MigrationOutcome, VersionInfo, VersionManager, VersionState};
pub use migration::{
    AddConversationSummaryAndEventCategory, AddMimeTypesAndShortCoordinates, MigrationRegistry,
    MigrationStep, StepOutcome,
};
pub use schema::{DataTypeSchema, FieldFormat, FieldRule, FieldType, SchemaRegistry, SchemaVersion};
pub use validate::{validate_event, validate_field, validate_record};
