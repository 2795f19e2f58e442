//! Version tracking and backed-up migrations over a [`StorageManager`].

use std::sync::Arc;

use chrono::Utc;
use semver::Version;
use serde::Serialize;
use serde_json::json;
use stowage_core::{
    DataType, MigrationError, RecordValidationError, StorageType, StowageError, StowageResult,
    ValidationReport, BACKUP_KEY_PREFIX, DATA_VERSION_KEY, DATA_VERSION_UPDATED_AT_KEY,
};
use stowage_storage::{StorageManager, StoreOptions};
use tracing::{debug, error, info, warn};

use crate::backup::{parse_backup_key, Backup, BackupInfo, BackupRecord};
use crate::migration::MigrationRegistry;
use crate::schema::SchemaRegistry;
use crate::validate::validate_record;

/// How the persisted version relates to the running one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VersionState {
    /// First run: nothing recorded yet.
    NoSavedVersion,
    UpToDate,
    NeedsMigration { saved: Version },
}

/// Result of [`VersionManager::migrate_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The store was already at the target version; nothing ran.
    AlreadyCurrent { version: Version },
    Migrated {
        from: Version,
        to: Version,
        steps_applied: usize,
        /// Key of the retained backup, when `keep_backups` is set.
        backup: Option<String>,
    },
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub current: Version,
    pub saved: Option<Version>,
    pub state: VersionState,
    /// When `data_version` was last written (RFC 3339).
    pub updated_at: Option<String>,
    pub known_versions: Vec<Version>,
    pub backups: Vec<BackupInfo>,
}

fn parse_version(value: &str) -> Result<Version, MigrationError> {
    Version::parse(value).map_err(|e| MigrationError::InvalidVersion {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Tracks the installed schema version and migrates stored data to the
/// running one.
pub struct VersionManager {
    storage: Arc<StorageManager>,
    current: Version,
    schemas: SchemaRegistry,
    migrations: MigrationRegistry,
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("current", &self.current)
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

impl VersionManager {
    /// A manager using the built-in schemas and migration steps.
    pub fn new(storage: Arc<StorageManager>, current: Version) -> Self {
        Self::with_registries(
            storage,
            current,
            SchemaRegistry::builtin(),
            MigrationRegistry::builtin(),
        )
    }

    pub fn with_registries(
        storage: Arc<StorageManager>,
        current: Version,
        schemas: SchemaRegistry,
        migrations: MigrationRegistry,
    ) -> Self {
        Self {
            storage,
            current,
            schemas,
            migrations,
        }
    }

    pub fn current_version(&self) -> &Version {
        &self.current
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    /// Bring stored data up to the running version.
    ///
    /// Returns the state found before any action: a first run stamps the
    /// current version, a differing saved version is migrated.
    pub async fn init(&self) -> StowageResult<VersionState> {
        let state = self.state().await?;
        match &state {
            VersionState::NoSavedVersion => {
                info!(version = %self.current, "No saved data version, stamping current");
                self.set_saved_version(&self.current).await?;
            }
            VersionState::UpToDate => {
                debug!(version = %self.current, "Data version up to date");
            }
            VersionState::NeedsMigration { saved } => {
                info!(from = %saved, to = %self.current, "Data version differs, migrating");
                self.migrate_data(saved, &self.current).await?;
            }
        }
        Ok(state)
    }

    async fn state(&self) -> StowageResult<VersionState> {
        Ok(match self.get_saved_version().await? {
            None => VersionState::NoSavedVersion,
            Some(saved) if saved == self.current => VersionState::UpToDate,
            Some(saved) => VersionState::NeedsMigration { saved },
        })
    }

    /// The version recorded in the sync backend, if any.
    pub async fn get_saved_version(&self) -> StowageResult<Option<Version>> {
        let Some(entry) = self
            .storage
            .read_entry(DATA_VERSION_KEY, StorageType::Sync)
            .await?
        else {
            return Ok(None);
        };
        let raw = entry.payload.as_str().ok_or_else(|| MigrationError::InvalidVersion {
            value: entry.payload.to_string(),
            reason: "expected a version string".to_string(),
        })?;
        Ok(Some(parse_version(raw)?))
    }

    /// Record `version` and the time it was written.
    pub async fn set_saved_version(&self, version: &Version) -> StowageResult<()> {
        let sync = StoreOptions::new().in_backend(StorageType::Sync);
        self.storage
            .store(DATA_VERSION_KEY, &json!(version.to_string()), sync)
            .await?;
        self.storage
            .store(
                DATA_VERSION_UPDATED_AT_KEY,
                &json!(Utc::now().to_rfc3339()),
                sync,
            )
            .await?;
        debug!(version = %version, "Saved data version");
        Ok(())
    }

    /// Migrate stored data from `from` to `to`.
    ///
    /// The chain is resolved before anything is written. Every record is
    /// backed up first; a failing step or a failed validation restores the
    /// backup and the saved version before the error is returned.
    pub async fn migrate_data(
        &self,
        from: &Version,
        to: &Version,
    ) -> StowageResult<MigrationOutcome> {
        if from == to || self.get_saved_version().await?.as_ref() == Some(to) {
            debug!(version = %to, "Already at target version");
            return Ok(MigrationOutcome::AlreadyCurrent {
                version: to.clone(),
            });
        }

        let chain = self.migrations.resolve_chain(from, to)?;
        if self.schemas.get(to).is_none() {
            return Err(MigrationError::InvalidVersion {
                value: to.to_string(),
                reason: "no schema registered for this version".to_string(),
            }
            .into());
        }

        let backup_key = self.create_backup(from).await?;
        info!(from = %from, to = %to, steps = chain.len(), backup = %backup_key, "Starting migration");

        for step in &chain {
            match step.apply(&self.storage).await {
                Ok(outcome) => {
                    info!(
                        from = %step.from_version(),
                        to = %step.to_version(),
                        examined = outcome.examined,
                        rewritten = outcome.rewritten,
                        "Applied migration step: {}",
                        step.description()
                    );
                }
                Err(e) => {
                    error!(
                        from = %step.from_version(),
                        to = %step.to_version(),
                        error = %e,
                        "Migration step failed, rolling back"
                    );
                    self.rollback_after_failure(from, &backup_key).await?;
                    return Err(MigrationError::StepFailed {
                        from: step.from_version().to_string(),
                        to: step.to_version().to_string(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        }

        self.set_saved_version(to).await?;

        let report = self.validate_migration(to).await?;
        if !report.success {
            error!(
                version = %to,
                errors = report.errors.len(),
                checked = report.checked,
                "Migrated data failed validation, rolling back"
            );
            self.rollback_after_failure(from, &backup_key).await?;
            return Err(MigrationError::ValidationFailed {
                version: to.to_string(),
                rolled_back_to: from.to_string(),
                report,
            }
            .into());
        }

        let backup = self.finish_with_backup(&backup_key).await;
        info!(from = %from, to = %to, "Migration complete");
        Ok(MigrationOutcome::Migrated {
            from: from.clone(),
            to: to.clone(),
            steps_applied: chain.len(),
            backup,
        })
    }

    async fn rollback_after_failure(&self, version: &Version, backup_key: &str) -> StowageResult<()> {
        self.rollback_backup(version).await?;
        self.finish_with_backup(backup_key).await;
        Ok(())
    }

    /// Drop a backup that is no longer needed, unless configured to keep it.
    async fn finish_with_backup(&self, backup_key: &str) -> Option<String> {
        if self.storage.config().keep_backups {
            return Some(backup_key.to_string());
        }
        if !self.storage.remove(backup_key).await {
            warn!(backup = %backup_key, "Failed to discard backup");
        }
        None
    }

    /// Check every record of every data type `version` defines a schema for.
    pub async fn validate_migration(&self, version: &Version) -> StowageResult<ValidationReport> {
        let schema = self
            .schemas
            .get(version)
            .ok_or_else(|| MigrationError::InvalidVersion {
                value: version.to_string(),
                reason: "no schema registered for this version".to_string(),
            })?;

        let mut checked = 0;
        let mut errors = Vec::new();
        for (data_type, type_schema) in schema.types() {
            for entry in self.storage.entries(data_type).await? {
                checked += 1;
                for error in validate_record(data_type, &entry.payload, type_schema) {
                    warn!(key = %entry.key, data_type = %data_type, error = %error, "Validation error");
                    errors.push(RecordValidationError {
                        data_type,
                        key: entry.key.clone(),
                        error,
                    });
                }
            }
        }

        let report = ValidationReport::from_errors(checked, errors);
        debug!(
            version = %version,
            checked = report.checked,
            errors = report.errors.len(),
            "Validated stored data"
        );
        Ok(report)
    }

    /// Snapshot every data-type record into one backup blob.
    ///
    /// The blob also lists every data-type key present, so records that
    /// could not be read are left alone on rollback. It is encrypted when
    /// any captured record was, and kept in the async backend when that is
    /// available. Returns its key.
    pub async fn create_backup(&self, version: &Version) -> StowageResult<String> {
        let mut records = Vec::new();
        let mut present_keys = Vec::new();
        for data_type in DataType::ALL {
            for (key, _) in self.storage.keys_with_prefix(data_type.key_prefix()).await? {
                present_keys.push(key);
            }
            for entry in self.storage.entries(data_type).await? {
                records.push(BackupRecord {
                    key: entry.key,
                    payload: entry.payload,
                    storage_type: entry.storage_type,
                    encrypted: entry.encrypted,
                    stored_at: entry.stored_at,
                });
            }
        }

        let backup = Backup::new(version.clone(), records, present_keys);
        let uncaptured = backup.uncaptured();
        if !uncaptured.is_empty() {
            warn!(
                count = uncaptured.len(),
                keys = ?uncaptured,
                "Unreadable records left out of backup; rollback will not touch them"
            );
        }
        let key = backup.key();
        let mut options = StoreOptions::new();
        if backup.has_encrypted() {
            options = options.sensitive();
        }
        options = if self.storage.is_async_available() {
            options.in_backend(StorageType::Async)
        } else {
            options.in_backend(StorageType::Sync)
        };
        let storage_type = self
            .storage
            .store(&key, &serde_json::to_value(&backup)?, options)
            .await?;
        info!(
            backup = %key,
            records = backup.records.len(),
            storage_type = %storage_type,
            "Created backup"
        );
        Ok(key)
    }

    /// Every stored backup, oldest key first.
    pub async fn list_backups(&self) -> StowageResult<Vec<BackupInfo>> {
        let mut backups: Vec<BackupInfo> = self
            .storage
            .keys_with_prefix(BACKUP_KEY_PREFIX)
            .await?
            .into_iter()
            .filter_map(|(key, storage_type)| {
                let (version, created_at) = parse_backup_key(&key)?;
                Some(BackupInfo {
                    key,
                    version,
                    created_at,
                    storage_type,
                })
            })
            .collect();
        backups.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(backups)
    }

    /// Restore the latest backup taken at `version`.
    ///
    /// Data-type records created after the backup are deleted, every
    /// captured record is written back to its original backend with its
    /// original sensitivity, and the saved version is reset to `version`.
    /// Records that existed but could not be captured are left as they are.
    pub async fn rollback_backup(&self, version: &Version) -> StowageResult<()> {
        let info = self
            .list_backups()
            .await?
            .into_iter()
            .filter(|b| &b.version == version)
            .max_by(|a, b| a.key.cmp(&b.key))
            .ok_or_else(|| MigrationError::BackupMissing {
                version: version.to_string(),
            })?;

        self.restore(&info, version).await.map_err(|e| match e {
            StowageError::Migration(MigrationError::BackupMissing { .. }) => e,
            other => MigrationError::RollbackFailed {
                version: version.to_string(),
                reason: other.to_string(),
            }
            .into(),
        })
    }

    async fn restore(&self, info: &BackupInfo, version: &Version) -> StowageResult<()> {
        let entry = self
            .storage
            .read_entry(&info.key, info.storage_type)
            .await?
            .ok_or_else(|| MigrationError::BackupMissing {
                version: version.to_string(),
            })?;
        let backup: Backup = serde_json::from_value(entry.payload)?;

        let present = backup.present_key_set();
        let mut stale = Vec::new();
        for data_type in DataType::ALL {
            for (key, storage_type) in self.storage.keys_with_prefix(data_type.key_prefix()).await? {
                if !present.contains(key.as_str()) {
                    stale.push((key, storage_type));
                }
            }
        }
        let removed = self.storage.remove_many(&stale).await?;

        let restored = backup.records.len();
        let items = backup
            .records
            .into_iter()
            .map(|record| {
                let mut options = StoreOptions::new().in_backend(record.storage_type);
                if record.encrypted {
                    options = options.sensitive();
                }
                (record.key, record.payload, options)
            })
            .collect();
        self.storage.store_batch(items).await?;
        self.set_saved_version(version).await?;

        warn!(
            backup = %info.key,
            version = %version,
            restored,
            removed,
            "Rolled back to backup"
        );
        Ok(())
    }

    /// Current, saved and known versions plus stored backups.
    pub async fn get_version_info(&self) -> StowageResult<VersionInfo> {
        let saved = self.get_saved_version().await?;
        let state = match &saved {
            None => VersionState::NoSavedVersion,
            Some(v) if v == &self.current => VersionState::UpToDate,
            Some(v) => VersionState::NeedsMigration { saved: v.clone() },
        };
        let updated_at = self
            .storage
            .read_entry(DATA_VERSION_UPDATED_AT_KEY, StorageType::Sync)
            .await?
            .and_then(|entry| entry.payload.as_str().map(str::to_string));

        Ok(VersionInfo {
            current: self.current.clone(),
            saved,
            state,
            updated_at,
            known_versions: self.schemas.versions(),
            backups: self.list_backups().await?,
        })
    }
}
