//! Argument definitions and command execution.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use semver::Version;
use stowage_capacity::CapacityManager;
use stowage_core::{StorageType, StowageConfig};
use stowage_events::EventBus;
use stowage_storage::{RetrieveOptions, StorageManager, StoreOptions};
use stowage_versions::{MigrationOutcome, SchemaRegistry, VersionManager};
use tracing::debug;

use crate::error::CliError;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "STOWAGE_CONFIG";

/// Inspect and maintain a Stowage data directory.
#[derive(Debug, Parser)]
#[command(name = "stowage", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML config file (default: $STOWAGE_CONFIG, else built-in defaults)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured data directory
    #[arg(short, long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show saved, current and known schema versions
    Info {
        /// Version of the running application (default: latest known)
        #[arg(long, value_name = "VERSION")]
        app_version: Option<String>,
    },

    /// Show usage, cleanup statistics and suggestions
    Capacity,

    /// Apply retention policies now
    Cleanup,

    /// Migrate stored data between schema versions
    Migrate {
        /// Source version (default: the saved version)
        #[arg(long, value_name = "VERSION")]
        from: Option<String>,
        /// Target version (default: latest known)
        #[arg(long, value_name = "VERSION")]
        to: Option<String>,
    },

    /// Print the payload stored under a key
    Get {
        key: String,
        /// Read only this backend (sync or async)
        #[arg(long)]
        backend: Option<StorageType>,
    },

    /// Store a JSON payload under a key
    Put {
        key: String,
        /// Payload as JSON text
        value: String,
        /// Force a backend (sync or async)
        #[arg(long)]
        backend: Option<StorageType>,
        /// Encrypt at rest
        #[arg(long)]
        sensitive: bool,
    },

    /// Delete a key from whichever backend holds it
    Rm { key: String },

    /// Delete every record of one backend
    Clear { backend: StorageType },
}

/// Resolve configuration: file from `--config` or `$STOWAGE_CONFIG`, else
/// defaults; then `STOWAGE_*` overrides, then `--data-dir`.
pub fn load_config(cli: &Cli) -> Result<StowageConfig, CliError> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let base = match &path {
        Some(path) => StowageConfig::from_path(path)?,
        None => StowageConfig::default(),
    };
    let mut config = base.from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    debug!(config_file = ?path, data_dir = %config.data_dir.display(), "Loaded configuration");
    Ok(config)
}

fn parse_version(value: &str) -> Result<Version, CliError> {
    Version::parse(value).map_err(|e| CliError::Version {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn latest_version() -> Version {
    SchemaRegistry::builtin()
        .latest()
        .map(|schema| schema.version.clone())
        .unwrap_or_else(|| Version::new(0, 0, 0))
}

fn pretty(value: &impl serde::Serialize) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Run one command against the data directory in `config`, returning what
/// to print.
pub async fn execute(command: Commands, config: StowageConfig) -> Result<String, CliError> {
    let events = EventBus::new(config.event_capacity);
    let storage = Arc::new(StorageManager::open(config, events)?);

    let output = match command {
        Commands::Info { app_version } => {
            let current = match app_version {
                Some(v) => parse_version(&v)?,
                None => latest_version(),
            };
            let versions = VersionManager::new(storage.clone(), current);
            pretty(&versions.get_version_info().await?)?
        }
        Commands::Capacity => {
            let capacity = CapacityManager::new(storage.clone());
            pretty(&capacity.get_capacity_report().await?)?
        }
        Commands::Cleanup => {
            let capacity = CapacityManager::new(storage.clone());
            pretty(&capacity.perform_cleanup().await)?
        }
        Commands::Migrate { from, to } => {
            let to = match to {
                Some(v) => parse_version(&v)?,
                None => latest_version(),
            };
            let versions = VersionManager::new(storage.clone(), to.clone());
            let from = match from {
                Some(v) => parse_version(&v)?,
                None => versions
                    .get_saved_version()
                    .await?
                    .ok_or(CliError::NoSavedVersion)?,
            };
            match versions.migrate_data(&from, &to).await? {
                MigrationOutcome::AlreadyCurrent { version } => {
                    format!("Already at {}", version)
                }
                MigrationOutcome::Migrated {
                    from,
                    to,
                    steps_applied,
                    backup,
                } => {
                    let mut line = format!("Migrated {} -> {} in {} step(s)", from, to, steps_applied);
                    if let Some(key) = backup {
                        line.push_str(&format!("; backup kept at {}", key));
                    }
                    line
                }
            }
        }
        Commands::Get { key, backend } => {
            let mut options = RetrieveOptions::new().skip_cache();
            if let Some(storage_type) = backend {
                options = options.from_backend(storage_type);
            }
            let value = storage
                .retrieve(&key, options)
                .await
                .ok_or(CliError::NotFound { key })?;
            pretty(&value)?
        }
        Commands::Put {
            key,
            value,
            backend,
            sensitive,
        } => {
            let data: serde_json::Value = serde_json::from_str(&value)?;
            let mut options = StoreOptions::new();
            if let Some(storage_type) = backend {
                options = options.in_backend(storage_type);
            }
            if sensitive {
                options = options.sensitive();
            }
            let storage_type = storage.store(&key, &data, options).await?;
            format!("Stored {} in {} backend", key, storage_type)
        }
        Commands::Rm { key } => {
            if storage.remove(&key).await {
                format!("Removed {}", key)
            } else {
                format!("Failed to remove {}; see logs", key)
            }
        }
        Commands::Clear { backend } => {
            if storage.clear(backend).await {
                format!("Cleared {} backend", backend)
            } else {
                format!("{} backend was not cleared; see logs", backend)
            }
        }
    };

    storage.shutdown();
    Ok(output)
}
