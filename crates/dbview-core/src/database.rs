//! The database entity and its status machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::structure::DatabaseStructure;

/// Lifecycle status of a database in the viewer.
///
/// Transitions only move forward:
/// `MetadataOnly → Ingesting → {Available | Error | Cancelled}`, plus
/// `MetadataOnly → {Error | Cancelled}` for failures before ingest starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabaseStatus {
    /// Structure loaded, no rows indexed.
    MetadataOnly,
    /// Rows are being indexed.
    Ingesting,
    /// All rows indexed.
    Available,
    /// Migration failed.
    Error,
    /// Migration stopped on request.
    Cancelled,
}

impl DatabaseStatus {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MetadataOnly => "METADATA_ONLY",
            Self::Ingesting => "INGESTING",
            Self::Available => "AVAILABLE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Available | Self::Error | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::MetadataOnly, Self::Ingesting)
                | (Self::MetadataOnly, Self::Error)
                | (Self::MetadataOnly, Self::Cancelled)
                | (Self::Ingesting, Self::Available)
                | (Self::Ingesting, Self::Error)
                | (Self::Ingesting, Self::Cancelled)
        )
    }
}

impl fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "METADATA_ONLY" => Ok(Self::MetadataOnly),
            "INGESTING" => Ok(Self::Ingesting),
            "AVAILABLE" => Ok(Self::Available),
            "ERROR" => Ok(Self::Error),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(Error::Serialization(format!("unknown status '{other}'"))),
        }
    }
}

/// Ingest counters, current and total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestCounters {
    /// Schemas fully ingested.
    pub ingested_schemas: u64,
    /// Tables fully ingested.
    pub ingested_tables: u64,
    /// Rows read and processed.
    pub ingested_rows: u64,
    /// Schemas to ingest.
    pub total_schemas: u64,
    /// Tables to ingest.
    pub total_tables: u64,
    /// Rows to ingest.
    pub total_rows: u64,
}

/// A database known to the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerDatabase {
    uuid: String,
    status: DatabaseStatus,
    metadata: DatabaseStructure,
    siard_path: Option<String>,
    siard_size: u64,
    current_schema_name: String,
    current_table_name: String,
    counters: IngestCounters,
}

impl ViewerDatabase {
    /// Creates an entity in [`DatabaseStatus::MetadataOnly`].
    #[must_use]
    pub fn new(uuid: impl Into<String>, metadata: DatabaseStructure) -> Self {
        Self {
            uuid: uuid.into(),
            status: DatabaseStatus::MetadataOnly,
            metadata,
            siard_path: None,
            siard_size: 0,
            current_schema_name: String::new(),
            current_table_name: String::new(),
            counters: IngestCounters::default(),
        }
    }

    /// Rebuilds an entity from stored parts, without transition checks.
    #[must_use]
    pub fn restore(
        uuid: impl Into<String>,
        status: DatabaseStatus,
        metadata: DatabaseStructure,
        counters: IngestCounters,
    ) -> Self {
        Self {
            status,
            counters,
            ..Self::new(uuid, metadata)
        }
    }

    /// Sets the stored source location while rebuilding an entity.
    #[must_use]
    pub fn with_source(mut self, path: Option<String>, size: u64) -> Self {
        self.siard_path = path;
        self.siard_size = size;
        self
    }

    /// Sets the stored current schema and table while rebuilding an entity.
    #[must_use]
    pub fn with_current(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.current_schema_name = schema.into();
        self.current_table_name = table.into();
        self
    }

    /// Database identifier.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> DatabaseStatus {
        self.status
    }

    /// Structure description.
    #[must_use]
    pub const fn metadata(&self) -> &DatabaseStructure {
        &self.metadata
    }

    /// SIARD location, if known.
    #[must_use]
    pub fn siard_path(&self) -> Option<&str> {
        self.siard_path.as_deref()
    }

    /// SIARD file size in bytes.
    #[must_use]
    pub const fn siard_size(&self) -> u64 {
        self.siard_size
    }

    /// Schema being ingested.
    #[must_use]
    pub fn current_schema_name(&self) -> &str {
        &self.current_schema_name
    }

    /// Table being ingested.
    #[must_use]
    pub fn current_table_name(&self) -> &str {
        &self.current_table_name
    }

    /// Ingest counters.
    #[must_use]
    pub const fn counters(&self) -> IngestCounters {
        self.counters
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the move is not forward.
    pub fn transition(&mut self, next: DatabaseStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records the source location.
    ///
    /// # Errors
    ///
    /// Fails once the entity is terminal.
    pub fn set_source(&mut self, path: impl Into<String>, size: u64) -> Result<()> {
        self.ensure_mutable()?;
        self.siard_path = Some(path.into());
        self.siard_size = size;
        Ok(())
    }

    /// Records the schema and table being ingested.
    ///
    /// # Errors
    ///
    /// Fails once the entity is terminal.
    pub fn set_current(&mut self, schema: &str, table: &str) -> Result<()> {
        self.ensure_mutable()?;
        schema.clone_into(&mut self.current_schema_name);
        table.clone_into(&mut self.current_table_name);
        Ok(())
    }

    /// Replaces the counters.
    ///
    /// # Errors
    ///
    /// Fails once the entity is terminal.
    pub fn set_counters(&mut self, counters: IngestCounters) -> Result<()> {
        self.ensure_mutable()?;
        self.counters = counters;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: self.status.to_string(),
            });
        }
        Ok(())
    }
}
