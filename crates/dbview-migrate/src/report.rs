//! Conversion report written at the end of every migration.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use dbview_core::ViewerConfig;

use crate::error::{MigrationError, Result};

/// Entries kept per report; later ones are only counted.
pub const MAX_REPORT_ENTRIES: usize = 10_000;

/// One non-fatal finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportEntry {
    /// Column type not recognised, indexed as string.
    UnsupportedType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared type.
        type_name: String,
    },
    /// Cell written as null.
    Conversion {
        /// Table name.
        table: String,
        /// Row index.
        row: u64,
        /// Field name.
        field: String,
        /// Reason.
        message: String,
    },
    /// Row skipped.
    Structural {
        /// Table name.
        table: String,
        /// Row index.
        row: u64,
        /// Reason.
        message: String,
    },
}

/// How the migration ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// All tables committed.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// Stopped by an error.
    Failed(String),
}

/// Counts for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    /// Table name.
    pub table: String,
    /// Rows read from the source.
    pub rows_read: u64,
    /// Documents committed.
    pub documents_written: u64,
    /// Rows skipped for structural errors.
    pub rows_skipped: u64,
}

/// Findings of one migration.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    database_uuid: String,
    database_name: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    tables: Vec<TableSummary>,
    entries: Vec<ReportEntry>,
    dropped: usize,
    outcome: Option<ReportOutcome>,
}

impl ConversionReport {
    /// Starts a report now.
    pub fn new(database_uuid: impl Into<String>) -> Self {
        Self {
            database_uuid: database_uuid.into(),
            database_name: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            tables: Vec::new(),
            entries: Vec::new(),
            dropped: 0,
            outcome: None,
        }
    }

    /// Sets the archived database name.
    pub fn set_database_name(&mut self, name: impl Into<String>) {
        self.database_name = name.into();
    }

    /// Adds an entry.
    pub fn push(&mut self, entry: ReportEntry) {
        if self.entries.len() < MAX_REPORT_ENTRIES {
            self.entries.push(entry);
        } else {
            self.dropped += 1;
        }
    }

    /// Records a table's final counts.
    pub fn table_done(&mut self, summary: TableSummary) {
        self.tables.push(summary);
    }

    /// Closes the report.
    pub fn finish(&mut self, outcome: ReportOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    /// Kept entries.
    #[must_use]
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Total findings, dropped ones included.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.entries.len() + self.dropped
    }

    /// Outcome, once finished.
    #[must_use]
    pub fn outcome(&self) -> Option<&ReportOutcome> {
        self.outcome.as_ref()
    }

    /// Markdown rendering.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Conversion report");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Database: {} ({})", self.database_name, self.database_uuid);
        let _ = writeln!(out, "- Started: {}", self.started_at.to_rfc3339());
        if let Some(finished) = self.finished_at {
            let _ = writeln!(out, "- Finished: {}", finished.to_rfc3339());
        }
        let outcome = match &self.outcome {
            None => "RUNNING".to_string(),
            Some(ReportOutcome::Completed) => "COMPLETED".to_string(),
            Some(ReportOutcome::Cancelled) => "CANCELLED".to_string(),
            Some(ReportOutcome::Failed(reason)) => format!("FAILED: {reason}"),
        };
        let _ = writeln!(out, "- Outcome: {outcome}");
        let _ = writeln!(out, "- Warnings: {}", self.warning_count());

        if !self.tables.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Tables");
            let _ = writeln!(out);
            let _ = writeln!(out, "| Table | Rows read | Documents | Skipped |");
            let _ = writeln!(out, "|---|---|---|---|");
            for t in &self.tables {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    t.table, t.rows_read, t.documents_written, t.rows_skipped
                );
            }
        }

        if !self.entries.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Warnings");
            let _ = writeln!(out);
            for entry in &self.entries {
                let line = match entry {
                    ReportEntry::UnsupportedType {
                        table,
                        column,
                        type_name,
                    } => format!(
                        "- Unsupported type `{type_name}` in {table}.{column}, indexed as string"
                    ),
                    ReportEntry::Conversion {
                        table,
                        row,
                        field,
                        message,
                    } => format!("- {table} row {row}, field {field}: {message}"),
                    ReportEntry::Structural {
                        table,
                        row,
                        message,
                    } => format!("- {table} row {row} skipped: {message}"),
                };
                let _ = writeln!(out, "{line}");
            }
            if self.dropped > 0 {
                let _ = writeln!(out, "- ... {} more not listed", self.dropped);
            }
        }
        out
    }

    /// Writes the rendering to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        debug!(path = %path.display(), "Wrote conversion report");
        Ok(())
    }
}

/// Writes `report` to the configured location, logging instead of failing.
pub fn save_report(config: &ViewerConfig, report: &ConversionReport) -> Option<std::path::PathBuf> {
    let path = config.report_path(&report.database_uuid);
    match report.write_to(&path) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not write conversion report");
            None
        }
    }
}

/// Contents of the report of a database.
///
/// # Errors
///
/// Returns [`MigrationError::ReportNotFound`] if no report exists.
pub fn read_report(config: &ViewerConfig, database_uuid: &str) -> Result<String> {
    let path = config.report_path(database_uuid);
    fs::read_to_string(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => MigrationError::ReportNotFound(database_uuid.to_string()),
        _ => MigrationError::Io(e),
    })
}
