//! Configuration types

use crate::error::{ConfigError, StowageResult};
use crate::retention::RetentionTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Passphrase used when none is configured.
///
/// This ships inside every client build, so records encrypted under it are
/// obfuscated rather than confidential. Deployments that need real
/// confidentiality must supply their own passphrase (for example from a
/// platform keystore) through `STOWAGE_ENCRYPTION_PASSPHRASE`.
pub const BUILTIN_PASSPHRASE: &str = "stowage-local-obfuscation-key";

/// Salt paired with [`BUILTIN_PASSPHRASE`].
pub const BUILTIN_SALT: &str = "stowage-salt-v1";

/// PBKDF2 iteration count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Key derivation settings for encryption at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    pub passphrase: String,
    pub salt: String,
    pub iterations: u32,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            passphrase: BUILTIN_PASSPHRASE.to_string(),
            salt: BUILTIN_SALT.to_string(),
            iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

impl EncryptionConfig {
    /// True when the compiled-in passphrase is still in use.
    pub fn uses_builtin_secret(&self) -> bool {
        self.passphrase == BUILTIN_PASSPHRASE
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StowageConfig {
    // Backends
    /// Directory holding the LMDB environment of the async backend.
    pub data_dir: PathBuf,
    /// Prefix applied to every sync-backend key.
    pub namespace: String,
    pub sync_limit_bytes: u64,
    pub async_limit_bytes: u64,
    pub lmdb_map_size_mb: usize,
    /// Payloads serializing larger than this route to the async backend.
    pub large_payload_threshold: usize,
    pub backend_timeout_ms: u64,

    // Read cache
    pub cache_ttl_ms: u64,

    // Capacity
    /// Fraction of a backend's limit at which a warning is raised.
    pub warning_threshold: f64,
    /// Fraction of a backend's limit at which a critical alert is raised.
    pub critical_threshold: f64,
    pub cleanup_interval_ms: u64,
    /// Per-record size used to estimate async-backend usage.
    pub async_record_estimate_bytes: u64,
    pub retention: RetentionTable,

    // Migration
    /// Keep the pre-migration backup after a successful migration.
    pub keep_backups: bool,

    // Events
    pub event_capacity: usize,

    pub encryption: EncryptionConfig,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("stowage-data"),
            namespace: "stowage_".to_string(),
            sync_limit_bytes: 5 * 1024 * 1024,
            async_limit_bytes: 50 * 1024 * 1024,
            lmdb_map_size_mb: 512,
            large_payload_threshold: 100 * 1024,
            backend_timeout_ms: 5_000,
            cache_ttl_ms: 60_000,
            warning_threshold: 0.8,
            critical_threshold: 0.95,
            cleanup_interval_ms: 24 * 60 * 60 * 1000,
            async_record_estimate_bytes: 1024,
            retention: RetentionTable::default(),
            keep_backups: false,
            event_capacity: 256,
            encryption: EncryptionConfig::default(),
        }
    }
}

impl StowageConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load a TOML file. Missing fields take their defaults.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// Overlay `STOWAGE_*` environment variables on top of `self`.
    ///
    /// Environment variables:
    /// - `STOWAGE_DATA_DIR`
    /// - `STOWAGE_NAMESPACE`
    /// - `STOWAGE_SYNC_LIMIT_BYTES`
    /// - `STOWAGE_ASYNC_LIMIT_BYTES`
    /// - `STOWAGE_CACHE_TTL_MS`
    /// - `STOWAGE_BACKEND_TIMEOUT_MS`
    /// - `STOWAGE_CLEANUP_INTERVAL_MS`
    /// - `STOWAGE_KEEP_BACKUPS`
    /// - `STOWAGE_ENCRYPTION_PASSPHRASE`
    /// - `STOWAGE_ENCRYPTION_SALT`
    pub fn from_env(mut self) -> Self {
        if let Ok(dir) = std::env::var("STOWAGE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(ns) = std::env::var("STOWAGE_NAMESPACE") {
            self.namespace = ns;
        }
        self.sync_limit_bytes = env_parse("STOWAGE_SYNC_LIMIT_BYTES").unwrap_or(self.sync_limit_bytes);
        self.async_limit_bytes =
            env_parse("STOWAGE_ASYNC_LIMIT_BYTES").unwrap_or(self.async_limit_bytes);
        self.cache_ttl_ms = env_parse("STOWAGE_CACHE_TTL_MS").unwrap_or(self.cache_ttl_ms);
        self.backend_timeout_ms =
            env_parse("STOWAGE_BACKEND_TIMEOUT_MS").unwrap_or(self.backend_timeout_ms);
        self.cleanup_interval_ms =
            env_parse("STOWAGE_CLEANUP_INTERVAL_MS").unwrap_or(self.cleanup_interval_ms);
        if let Ok(keep) = std::env::var("STOWAGE_KEEP_BACKUPS") {
            self.keep_backups = keep == "1" || keep.eq_ignore_ascii_case("true");
        }
        if let Ok(passphrase) = std::env::var("STOWAGE_ENCRYPTION_PASSPHRASE") {
            self.encryption.passphrase = passphrase;
        }
        if let Ok(salt) = std::env::var("STOWAGE_ENCRYPTION_SALT") {
            self.encryption.salt = salt;
        }
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StowageResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(invalid("namespace", &self.namespace, "must not be empty"));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(invalid("data_dir", "", "must not be empty"));
        }
        if self.sync_limit_bytes == 0 {
            return Err(invalid("sync_limit_bytes", "0", "must be greater than 0"));
        }
        if self.async_limit_bytes == 0 {
            return Err(invalid("async_limit_bytes", "0", "must be greater than 0"));
        }
        if self.lmdb_map_size_mb == 0 {
            return Err(invalid("lmdb_map_size_mb", "0", "must be greater than 0"));
        }
        if self.large_payload_threshold == 0 {
            return Err(invalid("large_payload_threshold", "0", "must be greater than 0"));
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold <= 1.0) {
            return Err(invalid(
                "warning_threshold",
                &self.warning_threshold.to_string(),
                "must be in (0.0, 1.0]",
            ));
        }
        if !(self.critical_threshold > 0.0 && self.critical_threshold <= 1.0) {
            return Err(invalid(
                "critical_threshold",
                &self.critical_threshold.to_string(),
                "must be in (0.0, 1.0]",
            ));
        }
        if self.warning_threshold >= self.critical_threshold {
            return Err(invalid(
                "warning_threshold",
                &self.warning_threshold.to_string(),
                "must be below critical_threshold",
            ));
        }
        if self.backend_timeout_ms == 0 {
            return Err(invalid("backend_timeout_ms", "0", "must be positive"));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(invalid("cleanup_interval_ms", "0", "must be positive"));
        }
        if self.async_record_estimate_bytes == 0 {
            return Err(invalid("async_record_estimate_bytes", "0", "must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "0", "must be positive"));
        }
        if self.encryption.iterations == 0 {
            return Err(invalid("encryption.iterations", "0", "must be positive"));
        }
        if self.encryption.passphrase.is_empty() {
            return Err(invalid("encryption.passphrase", "", "must not be empty"));
        }
        if self.encryption.salt.is_empty() {
            return Err(invalid("encryption.salt", "", "must not be empty"));
        }
        for (data_type, policy) in self.retention.iter() {
            if policy.max_age_ms == 0 {
                return Err(invalid(
                    &format!("retention.{}.max_age_ms", data_type),
                    "0",
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::StowageError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataType, StowageError};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = StowageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.large_payload_threshold, 102_400);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert!(config.encryption.uses_builtin_secret());
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let config = StowageConfig {
            warning_threshold: 0.95,
            critical_threshold: 0.8,
            ..StowageConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            StowageError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "warning_threshold"
        ));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let mut config = StowageConfig::default();
        config.encryption.iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
namespace = "app_"
sync_limit_bytes = 1024

[retention.conversation]
max_age_ms = 5000
max_count = 3
"#
        )
        .expect("write config");

        let config = StowageConfig::from_path(file.path()).expect("config should load");
        assert_eq!(config.namespace, "app_");
        assert_eq!(config.sync_limit_bytes, 1024);
        assert_eq!(config.cache_ttl_ms, 60_000);
        let policy = config
            .retention
            .get(DataType::Conversation)
            .expect("conversation policy");
        assert_eq!(policy.max_count, Some(3));
        // A table in the file replaces the default table wholesale.
        assert!(config.retention.get(DataType::Weather).is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = StowageConfig::from_toml_str("colour = \"blue\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = StowageConfig::from_path(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed { .. }));
    }
}
