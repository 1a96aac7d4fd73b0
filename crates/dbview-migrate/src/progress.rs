//! Progress snapshots for polling clients.
//!
//! The migration owns its working copy and publishes immutable snapshots;
//! readers never observe a half-updated `(current, total)` pair.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::Serialize;

use dbview_core::{DatabaseStatus, IngestCounters, ViewerDatabase};

/// Progress of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProgress {
    /// Table UUID.
    pub table_uuid: String,
    /// Table name.
    pub table_name: String,
    /// Rows read so far, skipped rows included.
    pub rows_processed: u64,
    /// Rows to read.
    pub rows_to_process: u64,
}

impl TableProgress {
    /// Table not started yet.
    pub fn new(table_uuid: impl Into<String>, table_name: impl Into<String>, rows: u64) -> Self {
        Self {
            table_uuid: table_uuid.into(),
            table_name: table_name.into(),
            rows_processed: 0,
            rows_to_process: rows,
        }
    }

    /// Counts `rows` more processed rows. A source yielding more rows than
    /// declared raises the total with it.
    pub fn advance(&mut self, rows: u64) {
        self.rows_processed += rows;
        self.rows_to_process = self.rows_to_process.max(self.rows_processed);
    }
}

/// Progress of one database migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseProgress {
    /// Database UUID.
    pub database_uuid: String,
    /// Current status.
    pub status: DatabaseStatus,
    /// Aggregate counters.
    pub counters: IngestCounters,
    /// Schema being ingested.
    pub current_schema: String,
    /// Table being ingested.
    pub current_table: String,
    /// Per-table progress, in ingest order.
    pub tables: Vec<TableProgress>,
}

impl DatabaseProgress {
    /// Snapshot of `database` with the given tables.
    #[must_use]
    pub fn of(database: &ViewerDatabase, tables: Vec<TableProgress>) -> Self {
        Self {
            database_uuid: database.uuid().to_string(),
            status: database.status(),
            counters: database.counters(),
            current_schema: database.current_schema_name().to_string(),
            current_table: database.current_table_name().to_string(),
            tables,
        }
    }

    /// Refreshes the entity part from `database`.
    pub fn sync(&mut self, database: &ViewerDatabase) {
        self.status = database.status();
        self.counters = database.counters();
        database
            .current_schema_name()
            .clone_into(&mut self.current_schema);
        database
            .current_table_name()
            .clone_into(&mut self.current_table);
    }

    /// Fraction of rows processed, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        let (done, total) = self
            .tables
            .iter()
            .fold((0_u64, 0_u64), |(d, t), table| {
                (d + table.rows_processed, t + table.rows_to_process)
            });
        if total == 0 {
            if self.status == DatabaseStatus::Available {
                1.0
            } else {
                0.0
            }
        } else {
            done as f64 / total as f64
        }
    }
}

/// Latest snapshot per database.
#[derive(Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<String, Arc<ArcSwap<DatabaseProgress>>>>,
}

impl ProgressTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a snapshot, replacing the previous one.
    pub fn publish(&self, snapshot: DatabaseProgress) {
        if let Some(slot) = self.entries.read().get(&snapshot.database_uuid) {
            slot.store(Arc::new(snapshot));
            return;
        }
        self.entries
            .write()
            .insert(
                snapshot.database_uuid.clone(),
                Arc::new(ArcSwap::from_pointee(snapshot)),
            );
    }

    /// Latest snapshot of a database.
    #[must_use]
    pub fn snapshot(&self, database_uuid: &str) -> Option<Arc<DatabaseProgress>> {
        self.entries
            .read()
            .get(database_uuid)
            .map(|slot| slot.load_full())
    }

    /// Per-table progress; empty for an unknown database.
    #[must_use]
    pub fn progress(&self, database_uuid: &str) -> Vec<TableProgress> {
        self.snapshot(database_uuid)
            .map(|s| s.tables.clone())
            .unwrap_or_default()
    }

    /// Forgets a database.
    pub fn remove(&self, database_uuid: &str) {
        self.entries.write().remove(database_uuid);
    }

    /// UUIDs of tracked databases.
    #[must_use]
    pub fn databases(&self) -> Vec<String> {
        let mut uuids: Vec<String> = self.entries.read().keys().cloned().collect();
        uuids.sort();
        uuids
    }
}
