//! Error types for the command line.

use stowage_core::{ConfigError, StowageError};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Stowage(#[from] StowageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid version '{value}': {reason}")]
    Version { value: String, reason: String },
    #[error("No record stored under {key}")]
    NotFound { key: String },
    #[error("No saved data version; pass --from")]
    NoSavedVersion,
    #[error("Failed to init logging: {0}")]
    Logging(String),
}
