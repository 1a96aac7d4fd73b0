//! Source backed by a JSON or YAML dump of a parsed archive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use dbview_core::{DatabaseStructure, Row, TableStructure};

use super::{SiardSource, SourceLocation};
use crate::error::{MigrationError, Result};

/// Maximum dump size (1 GiB).
pub const MAX_DUMP_SIZE: u64 = 1024 * 1024 * 1024;

/// Parsed structure plus rows keyed by table UUID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDump {
    /// Database structure.
    pub structure: DatabaseStructure,
    /// Rows per table UUID, in table order.
    #[serde(default)]
    pub rows: HashMap<String, Vec<Row>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpFormat {
    Json,
    Yaml,
}

impl DumpFormat {
    fn of(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

/// Reads a [`SourceDump`] from disk or memory.
pub struct DumpSource {
    path: Option<PathBuf>,
    size: u64,
    pending: Option<SourceDump>,
    rows: HashMap<String, VecDeque<Row>>,
    opened: bool,
}

impl DumpSource {
    /// Source reading `path` on [`open`](SiardSource::open). `.yaml` and
    /// `.yml` files are read as YAML, anything else as JSON.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            size: 0,
            pending: None,
            rows: HashMap::new(),
            opened: false,
        }
    }

    /// Source over an in-memory dump.
    #[must_use]
    pub fn from_dump(dump: SourceDump) -> Self {
        Self {
            path: None,
            size: 0,
            pending: Some(dump),
            rows: HashMap::new(),
            opened: false,
        }
    }

    async fn read_dump(path: &Path) -> Result<(SourceDump, u64)> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            MigrationError::SourceRead(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_DUMP_SIZE {
            return Err(MigrationError::SourceRead(format!(
                "'{}' is {} bytes, larger than the {} byte limit",
                path.display(),
                metadata.len(),
                MAX_DUMP_SIZE
            )));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MigrationError::SourceRead(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        let dump = match DumpFormat::of(path) {
            DumpFormat::Json => serde_json::from_str(&content).map_err(|e| {
                MigrationError::SourceRead(format!("Invalid JSON dump '{}': {}", path.display(), e))
            })?,
            DumpFormat::Yaml => serde_yaml::from_str(&content).map_err(|e| {
                MigrationError::SourceRead(format!("Invalid YAML dump '{}': {}", path.display(), e))
            })?,
        };
        Ok((dump, metadata.len()))
    }
}

#[async_trait]
impl SiardSource for DumpSource {
    fn source_type(&self) -> &'static str {
        "dump"
    }

    fn location(&self) -> SourceLocation {
        SourceLocation {
            path: self
                .path
                .as_ref()
                .map_or_else(|| "memory://dump".to_string(), |p| p.display().to_string()),
            size: self.size,
        }
    }

    async fn open(&mut self) -> Result<DatabaseStructure> {
        let dump = match (&self.path, self.pending.take()) {
            (_, Some(dump)) => dump,
            (Some(path), None) => {
                let (dump, size) = Self::read_dump(path).await?;
                self.size = size;
                dump
            }
            (None, None) => {
                return Err(MigrationError::SourceRead(
                    "Dump source already consumed".to_string(),
                ))
            }
        };

        self.rows = dump
            .rows
            .into_iter()
            .map(|(table, rows)| (table, VecDeque::from(rows)))
            .collect();
        self.opened = true;

        info!(
            database = %dump.structure.name,
            tables = dump.structure.table_count(),
            "Opened dump source"
        );
        Ok(dump.structure)
    }

    async fn next_rows(&mut self, table: &TableStructure, max_rows: usize) -> Result<Vec<Row>> {
        if !self.opened {
            return Err(MigrationError::SourceRead("Source not opened".to_string()));
        }
        let Some(queue) = self.rows.get_mut(&table.uuid) else {
            return Ok(Vec::new());
        };

        let take = max_rows.min(queue.len());
        let batch: Vec<Row> = queue.drain(..take).collect();
        debug!(table = %table.name, rows = batch.len(), remaining = queue.len(), "Read rows");
        Ok(batch)
    }

    async fn close(&mut self) -> Result<()> {
        self.rows.clear();
        self.opened = false;
        Ok(())
    }
}

#[cfg(test)]
#[path = "dump_tests.rs"]
mod tests;
