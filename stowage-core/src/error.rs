//! Error types for Stowage operations

use crate::{DataType, StorageType};
use serde::Serialize;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Quota exceeded writing {key}: needs {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },

    #[error("{storage_type} backend is not available")]
    BackendUnavailable { storage_type: StorageType },

    #[error("Write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Index error on {index_name}: {reason}")]
    IndexError { index_name: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Backend operation {operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Backend operation {operation} was cancelled")]
    Cancelled { operation: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Encryption-at-rest errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },
}

/// Schema validation errors for a single field or record.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Type mismatch for {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

impl ValidationError {
    /// The field (or constraint) this error is about.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::RequiredFieldMissing { field }
            | ValidationError::TypeMismatch { field, .. }
            | ValidationError::InvalidValue { field, .. } => field,
            ValidationError::ConstraintViolation { constraint, .. } => constraint,
        }
    }
}

/// A validation error tied to the record it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordValidationError {
    pub data_type: DataType,
    pub key: String,
    pub error: ValidationError,
}

/// Outcome of validating every record against one schema version.
///
/// Validation never stops at the first problem; `errors` holds all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub success: bool,
    /// Number of records examined.
    pub checked: usize,
    pub errors: Vec<RecordValidationError>,
}

impl ValidationReport {
    pub fn from_errors(checked: usize, errors: Vec<RecordValidationError>) -> Self {
        Self {
            success: errors.is_empty(),
            checked,
            errors,
        }
    }
}

/// Schema migration errors. All of these are fatal to startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Invalid schema version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("No registered migration chain from {from} to {to}")]
    ChainMissing { from: String, to: String },

    #[error("Migration step {from} -> {to} failed: {reason}")]
    StepFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error(
        "Migration to {version} failed validation with {} error(s); rolled back to {rolled_back_to}",
        .report.errors.len()
    )]
    ValidationFailed {
        version: String,
        rolled_back_to: String,
        report: ValidationReport,
    },

    #[error("No backup found for version {version}")]
    BackupMissing { version: String },

    #[error("Rollback to {version} failed: {reason}")]
    RollbackFailed { version: String, reason: String },

    #[error("Schema for {data_type} is not defined at version {version}")]
    SchemaMissing { data_type: DataType, version: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    ParseFailed { reason: String },
}

/// Master error type for all Stowage errors.
#[derive(Debug, Clone, Error)]
pub enum StowageError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for StowageError {
    fn from(e: serde_json::Error) -> Self {
        StowageError::Storage(StorageError::Serialization {
            reason: e.to_string(),
        })
    }
}

/// Result type alias for Stowage operations.
pub type StowageResult<T> = Result<T, StowageError>;

// =============================================================================
// TESTS
// =============================================================================
