//! `dbview` Configuration Module
//!
//! Provides configuration file support via `dbview.toml`, environment variables,
//! and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (CLI flags)
//! 2. Environment variables (`DBVIEW_*`, sections separated by `__`)
//! 3. Configuration file (`dbview.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// A path in the configuration could not be resolved.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// How row data fields are named in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNaming {
    /// `<prefix><ordinal>`, e.g. `col0`, `col1` (default).
    #[default]
    Ordinal,
    /// Sanitized column name, suffixed with `_<ordinal>` on collision.
    ColumnName,
}

/// Filesystem locations used by the viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory that relative SIARD paths are resolved against.
    pub upload_dir: PathBuf,
    /// Directory where large objects are written.
    pub lob_dir: PathBuf,
    /// Directory where conversion reports are written.
    pub report_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            lob_dir: PathBuf::from("./lobs"),
            report_dir: PathBuf::from("./reports"),
        }
    }
}

/// Index write configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Documents per batch submitted to the store.
    pub batch_size: usize,
    /// Flush a partial batch once this much time has passed since the last flush.
    pub flush_interval_ms: u64,
    /// Binary/CLOB values larger than this (bytes) are stored externally.
    pub inline_lob_threshold: usize,
    /// Field naming strategy for row data fields.
    pub field_naming: FieldNaming,
    /// Prefix for row data fields.
    pub field_prefix: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval_ms: 5000,
            inline_lob_threshold: 16 * 1024,
            field_naming: FieldNaming::Ordinal,
            field_prefix: "col".to_string(),
        }
    }
}

impl IndexConfig {
    /// Flush interval as a [`Duration`].
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Retry behaviour for batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay.
    pub add_jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Job polling configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Interval at which progress pollers refresh, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main viewer configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ViewerConfig {
    /// Filesystem paths.
    pub paths: PathsConfig,
    /// Index write settings.
    pub index: IndexConfig,
    /// Retry settings for batch submission.
    pub retry: RetrySettings,
    /// Job polling settings.
    pub jobs: JobsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ViewerConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("dbview.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Self::layered()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("DBVIEW_").split("__")),
        )
    }

    /// Creates a configuration from a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Self::extract(Self::layered().merge(Toml::string(toml_str)))
    }

    fn layered() -> Figment {
        Figment::new().merge(Serialized::defaults(Self::default()))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Checks value ranges and enumerations. Called before any index mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let index = &self.index;
        if !(1..=100_000).contains(&index.batch_size) {
            return Err(invalid(
                "index.batch_size",
                format!("value {} is out of range [1, 100000]", index.batch_size),
            ));
        }

        let prefix_ok = !index.field_prefix.is_empty()
            && index
                .field_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !prefix_ok {
            return Err(invalid(
                "index.field_prefix",
                format!(
                    "value '{}' must be non-empty and alphanumeric",
                    index.field_prefix
                ),
            ));
        }

        let retry = &self.retry;
        if retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                format!("value {} must be >= 1.0", retry.backoff_multiplier),
            ));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(invalid(
                "retry.initial_delay_ms",
                format!(
                    "value {} exceeds retry.max_delay_ms ({})",
                    retry.initial_delay_ms, retry.max_delay_ms
                ),
            ));
        }

        if self.jobs.poll_interval_secs == 0 {
            return Err(invalid(
                "jobs.poll_interval_secs",
                "value must be greater than 0".to_string(),
            ));
        }

        one_of(
            "logging.level",
            &self.logging.level,
            &["error", "warn", "info", "debug", "trace"],
        )?;
        one_of("logging.format", &self.logging.format, &["text", "json"])
    }

    /// Resolves a SIARD location against the upload directory.
    ///
    /// Absolute paths are kept as they are. The resolved file must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PathNotFound`] if the resolved file does not exist.
    pub fn resolve_upload(&self, local_path: &Path) -> Result<PathBuf, ConfigError> {
        let resolved = if local_path.is_absolute() {
            local_path.to_path_buf()
        } else {
            self.paths.upload_dir.join(local_path)
        };

        if resolved.is_file() {
            Ok(resolved)
        } else {
            Err(ConfigError::PathNotFound(resolved.display().to_string()))
        }
    }

    /// Path of the conversion report for a database. The UUID is cleaned
    /// so the report always lands directly in the report directory.
    #[must_use]
    pub fn report_path(&self, database_uuid: &str) -> PathBuf {
        let name = path_component(database_uuid);
        self.paths.report_dir.join(format!("report-{name}.md"))
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Makes `raw` safe to use as a single path component: separators become
/// `_`, and empty or dot-only names become `_`.
#[must_use]
pub fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

fn one_of(key: &str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            key,
            format!("value '{value}' is invalid, expected one of: {allowed:?}"),
        ))
    }
}
