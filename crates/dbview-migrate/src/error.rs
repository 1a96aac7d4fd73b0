//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Missing or invalid configuration, raised before any index mutation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The source could not be read.
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// The store kept refusing a batch after every retry.
    #[error("Ingest failed for collection {collection}")]
    Ingest {
        /// Collection being written.
        collection: String,
        /// Last store error.
        #[source]
        source: dbview_core::Error,
    },

    /// Index store error outside batch submission.
    #[error("Index store error: {0}")]
    Store(#[from] dbview_core::Error),

    /// Migration stopped on request.
    #[error("Migration cancelled")]
    Cancelled,

    /// A job for the same database is still running.
    #[error("A migration for database {0} is already running")]
    AlreadyRunning(String),

    /// The database is already stored past `METADATA_ONLY`; only a restart,
    /// which purges it first, may write it again.
    #[error("Database {database} already exists with status {status}")]
    AlreadyExists {
        /// Database UUID.
        database: String,
        /// Stored status.
        status: dbview_core::DatabaseStatus,
    },

    /// No job registered under the given key.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job exists but is not running.
    #[error("Job {0} is not running")]
    JobNotRunning(String),

    /// No conversion report for the database.
    #[error("The database {0} does not have a conversion report")]
    ReportNotFound(String),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MigrationError {
    /// Creates an [`MigrationError::Ingest`] error.
    pub fn ingest(collection: impl Into<String>, source: dbview_core::Error) -> Self {
        Self::Ingest {
            collection: collection.into(),
            source,
        }
    }

    /// Returns true for a requested stop rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Format error with full details including error chain.
    #[must_use]
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<dbview_core::ConfigError> for MigrationError {
    fn from(err: dbview_core::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
