//! Migration orchestration.
//!
//! A migration opens the source, stores the database entity as
//! `METADATA_ONLY`, moves it to `INGESTING`, then writes every selected table
//! in declaration order. It ends `AVAILABLE`, `ERROR` or `CANCELLED`, and a
//! conversion report is written in every case.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use dbview_core::{
    DatabaseStatus, DatabaseStructure, IndexStore, IngestCounters, TableStructure, ViewerConfig,
    ViewerDatabase,
};

use crate::error::{MigrationError, Result};
use crate::index_manager::IndexManager;
use crate::lob::{FsLobSink, LobSink};
use crate::progress::{DatabaseProgress, ProgressTracker, TableProgress};
use crate::report::{save_report, ConversionReport, ReportEntry, ReportOutcome, TableSummary};
use crate::retry::RetryConfig;
use crate::source::{DumpSource, SiardSource};
use crate::transform::RecordTransformer;
use crate::typemap::TypeMapper;

/// What to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationRequest {
    /// Database UUID.
    pub database_uuid: String,
    /// Restrict the migration to one table.
    pub table_uuid: Option<String>,
}

impl MigrationRequest {
    /// Whole-database request.
    pub fn new(database_uuid: impl Into<String>) -> Self {
        Self {
            database_uuid: database_uuid.into(),
            table_uuid: None,
        }
    }

    /// Whole-database request under a fresh random UUID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Restricts the request to one table.
    #[must_use]
    pub fn with_table(mut self, table_uuid: impl Into<String>) -> Self {
        self.table_uuid = Some(table_uuid.into());
        self
    }

    /// Returns true if `table_uuid` is part of the request.
    #[must_use]
    pub fn includes(&self, table_uuid: &str) -> bool {
        self.table_uuid.as_deref().map_or(true, |t| t == table_uuid)
    }
}

/// Migration statistics.
#[derive(Debug, Default, Clone)]
pub struct MigrationStats {
    /// Tables committed.
    pub tables: u64,
    /// Rows read from the source.
    pub rows_read: u64,
    /// Documents committed.
    pub documents_written: u64,
    /// Rows skipped for structural errors.
    pub rows_skipped: u64,
    /// Non-fatal findings.
    pub warnings: u64,
    /// Row batches read.
    pub batches: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationStats {
    /// Calculate throughput (rows per second).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.rows_read as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Result of a finished migration.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// Final entity.
    pub database: ViewerDatabase,
    /// Counts.
    pub stats: MigrationStats,
}

/// Runs migrations against one index store.
pub struct Orchestrator {
    config: ViewerConfig,
    manager: Arc<IndexManager>,
    mapper: TypeMapper,
    lobs: Arc<dyn LobSink>,
    tracker: Arc<ProgressTracker>,
}

impl Orchestrator {
    /// Creates an orchestrator writing into `store`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Configuration`] if the configuration is invalid.
    pub fn new(config: ViewerConfig, store: Arc<dyn IndexStore>) -> Result<Self> {
        config.validate()?;
        let manager = IndexManager::new(store, &config.index, RetryConfig::from(&config.retry));
        Ok(Self {
            mapper: TypeMapper::new(&config.index),
            lobs: Arc::new(FsLobSink::new(config.paths.lob_dir.clone())),
            tracker: Arc::new(ProgressTracker::new()),
            manager: Arc::new(manager),
            config,
        })
    }

    /// Replaces the large-object sink.
    #[must_use]
    pub fn with_lob_sink(mut self, lobs: Arc<dyn LobSink>) -> Self {
        self.lobs = lobs;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Index manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    /// Progress tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Per-table progress of a database; empty when unknown.
    #[must_use]
    pub fn progress(&self, database_uuid: &str) -> Vec<TableProgress> {
        self.tracker.progress(database_uuid)
    }

    /// Loads and stores the structure only. The entity stays `METADATA_ONLY`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::AlreadyExists`] if the UUID is already stored.
    pub async fn load_metadata(
        &self,
        source: &mut dyn SiardSource,
        database_uuid: &str,
    ) -> Result<ViewerDatabase> {
        let request = MigrationRequest::new(database_uuid);
        let database = self.prepare(source, &request, Stored::Reject).await;
        close_source(source).await;

        let database = database?;
        // Not started: zero of zero for every table.
        let tables = database
            .metadata()
            .tables()
            .map(|(_, table)| TableProgress::new(&table.uuid, &table.name, 0))
            .collect();
        self.tracker
            .publish(DatabaseProgress::of(&database, tables));
        info!(database = %database_uuid, "Loaded metadata");
        Ok(database)
    }

    /// Resolves `local_path` against the upload directory and stores its
    /// structure. A fresh UUID is used when `database_uuid` is `None`.
    pub async fn load_metadata_from_local(
        &self,
        local_path: &Path,
        database_uuid: Option<String>,
    ) -> Result<ViewerDatabase> {
        let path = self.config.resolve_upload(local_path)?;
        let uuid = database_uuid.unwrap_or_else(|| MigrationRequest::random().database_uuid);
        let mut source = DumpSource::from_path(path);
        self.load_metadata(&mut source, &uuid).await
    }

    /// Resolves `local_path` against the upload directory and migrates it.
    /// A fresh UUID is used when `database_uuid` is `None`.
    pub async fn load_from_local(
        &self,
        local_path: &Path,
        database_uuid: Option<String>,
    ) -> Result<MigrationOutcome> {
        let path = self.config.resolve_upload(local_path)?;
        let request = database_uuid.map_or_else(MigrationRequest::random, MigrationRequest::new);
        let mut source = DumpSource::from_path(path);
        self.migrate(&mut source, &request).await
    }

    /// Runs a full migration.
    pub async fn migrate(
        &self,
        source: &mut dyn SiardSource,
        request: &MigrationRequest,
    ) -> Result<MigrationOutcome> {
        self.migrate_with_cancel(source, request, None).await
    }

    /// Runs a full migration that stops when `cancel` turns true.
    ///
    /// The flag is checked before each table and between row batches. A
    /// database stored as `METADATA_ONLY` is continued from its stored
    /// structure; any later status is rejected with
    /// [`MigrationError::AlreadyExists`] and left as it is.
    pub async fn migrate_with_cancel(
        &self,
        source: &mut dyn SiardSource,
        request: &MigrationRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationOutcome> {
        let start = Instant::now();
        let mut report = ConversionReport::new(&request.database_uuid);
        let mut stats = MigrationStats::default();

        info!(database = %request.database_uuid, table = ?request.table_uuid, "Starting migration");

        let mut database = match self.prepare(source, request, Stored::Continue).await {
            Ok(database) => database,
            Err(e @ MigrationError::AlreadyExists { .. }) => {
                warn!(database = %request.database_uuid, error = %e, "Migration refused");
                close_source(source).await;
                return Err(e);
            }
            Err(e) => {
                error!(database = %request.database_uuid, error = %e, "Migration could not start");
                report.finish(ReportOutcome::Failed(e.to_string()));
                save_report(&self.config, &report);
                close_source(source).await;
                return Err(e);
            }
        };
        report.set_database_name(&database.metadata().name);

        let mut progress = DatabaseProgress::of(
            &database,
            table_progress(database.metadata(), request),
        );
        let result = match self.begin_ingest(&mut database, request).await {
            Ok(()) => {
                progress.sync(&database);
                self.tracker.publish(progress.clone());
                self.ingest(
                    source,
                    request,
                    &mut database,
                    &mut progress,
                    &mut report,
                    &mut stats,
                    cancel.as_ref(),
                )
                .await
            }
            Err(e) => Err(e),
        };
        close_source(source).await;

        let (status, outcome) = match &result {
            Ok(()) => (DatabaseStatus::Available, ReportOutcome::Completed),
            Err(MigrationError::Cancelled) => (DatabaseStatus::Cancelled, ReportOutcome::Cancelled),
            Err(e) => (DatabaseStatus::Error, ReportOutcome::Failed(e.to_string())),
        };
        database.transition(status)?;
        let persisted = self.manager.put_database(&database).await;
        progress.sync(&database);
        self.tracker.publish(progress);

        stats.duration_secs = start.elapsed().as_secs_f64();
        report.finish(outcome);
        save_report(&self.config, &report);

        match (result, persisted) {
            (Ok(()), Ok(())) => {
                info!(
                    database = %database.uuid(),
                    tables = stats.tables,
                    rows = stats.rows_read,
                    documents = stats.documents_written,
                    skipped = stats.rows_skipped,
                    warnings = stats.warnings,
                    "Migration completed in {:.2}s ({:.0} rows/s)",
                    stats.duration_secs,
                    stats.throughput()
                );
                Ok(MigrationOutcome { database, stats })
            }
            (Ok(()), Err(e)) => {
                error!(database = %database.uuid(), error = %e, "Could not store final status");
                Err(e)
            }
            (Err(e), persisted) => {
                if let Err(store_error) = persisted {
                    warn!(database = %database.uuid(), error = %store_error, "Could not store final status");
                }
                if e.is_cancelled() {
                    info!(database = %database.uuid(), "Migration cancelled");
                } else {
                    error!(database = %database.uuid(), "{}", e.format_detailed());
                }
                Err(e)
            }
        }
    }

    /// Opens the source, builds the entity and stores it as `METADATA_ONLY`.
    ///
    /// An entity already stored under the UUID is never overwritten: it is
    /// either continued (`METADATA_ONLY` only) or refused, before the source
    /// is read.
    async fn prepare(
        &self,
        source: &mut dyn SiardSource,
        request: &MigrationRequest,
        stored: Stored,
    ) -> Result<ViewerDatabase> {
        let existing = self.manager.get_database(&request.database_uuid).await?;
        if let Some(database) = &existing {
            let resumable = stored == Stored::Continue
                && database.status() == DatabaseStatus::MetadataOnly;
            if !resumable {
                return Err(MigrationError::AlreadyExists {
                    database: request.database_uuid.clone(),
                    status: database.status(),
                });
            }
        }

        let structure = source.open().await?;
        structure
            .validate()
            .map_err(|e| MigrationError::SourceRead(e.to_string()))?;

        let mut database = match existing {
            Some(database) => {
                debug!(database = %request.database_uuid, "Continuing from stored metadata");
                database
            }
            None => ViewerDatabase::new(&request.database_uuid, structure),
        };

        if let Some(table_uuid) = &request.table_uuid {
            if database.metadata().table(table_uuid).is_none() {
                return Err(MigrationError::Configuration(format!(
                    "Table {table_uuid} is not part of database {}",
                    request.database_uuid
                )));
            }
        }

        let location = source.location();
        database.set_source(location.path, location.size)?;
        self.manager.put_database(&database).await?;

        debug!(
            database = %request.database_uuid,
            source = source.source_type(),
            tables = database.metadata().table_count(),
            "Stored metadata"
        );
        Ok(database)
    }

    async fn begin_ingest(
        &self,
        database: &mut ViewerDatabase,
        request: &MigrationRequest,
    ) -> Result<()> {
        let structure = database.metadata();
        let selected = || {
            structure
                .tables()
                .filter(|(_, table)| request.includes(&table.uuid))
        };
        // Counted by position: schema UUIDs may be empty or repeated.
        let schemas = structure
            .schemas
            .iter()
            .filter(|schema| schema.tables.iter().any(|t| request.includes(&t.uuid)))
            .count();

        let totals = IngestCounters {
            total_schemas: schemas as u64,
            total_tables: selected().count() as u64,
            total_rows: selected().map(|(_, table)| table.rows).sum(),
            ..IngestCounters::default()
        };

        database.transition(DatabaseStatus::Ingesting)?;
        database.set_counters(totals)?;
        self.manager.put_database(database).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn ingest(
        &self,
        source: &mut dyn SiardSource,
        request: &MigrationRequest,
        database: &mut ViewerDatabase,
        progress: &mut DatabaseProgress,
        report: &mut ConversionReport,
        stats: &mut MigrationStats,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<()> {
        let structure = database.metadata().clone();
        let mut position = 0;

        for schema in &structure.schemas {
            let tables: Vec<&TableStructure> = schema
                .tables
                .iter()
                .filter(|table| request.includes(&table.uuid))
                .collect();
            if tables.is_empty() {
                continue;
            }

            for table in tables {
                if is_cancelled(cancel) {
                    return Err(MigrationError::Cancelled);
                }

                database.set_current(&schema.name, &table.name)?;
                self.manager.put_database(database).await?;
                progress.sync(database);
                self.tracker.publish(progress.clone());
                info!(schema = %schema.name, table = %table.name, rows = table.rows, "Ingesting table");

                let table_ctx = TableContext {
                    table,
                    position,
                    cancel,
                };
                self.ingest_table(source, database, progress, report, stats, &table_ctx)
                    .await?;
                position += 1;

                let mut counters = database.counters();
                counters.ingested_tables += 1;
                database.set_counters(counters)?;
                stats.tables += 1;
            }

            let mut counters = database.counters();
            counters.ingested_schemas += 1;
            database.set_counters(counters)?;
            self.manager.put_database(database).await?;
            progress.sync(database);
            self.tracker.publish(progress.clone());
        }

        Ok(())
    }

    async fn ingest_table(
        &self,
        source: &mut dyn SiardSource,
        database: &mut ViewerDatabase,
        progress: &mut DatabaseProgress,
        report: &mut ConversionReport,
        stats: &mut MigrationStats,
        ctx: &TableContext<'_>,
    ) -> Result<()> {
        let table = ctx.table;
        let transformer =
            RecordTransformer::new(&self.mapper, database.uuid(), table, Arc::clone(&self.lobs));
        for assignment in transformer.mapping().unsupported() {
            report.push(ReportEntry::UnsupportedType {
                table: table.name.clone(),
                column: assignment.column_name.clone(),
                type_name: table.columns[assignment.column_index].type_name.clone(),
            });
            stats.warnings += 1;
        }

        let mut writer = self
            .manager
            .open_table(database.uuid(), &table.uuid, transformer.mapping().definitions())
            .await?;
        let mut summary = TableSummary {
            table: table.name.clone(),
            rows_read: 0,
            documents_written: 0,
            rows_skipped: 0,
        };

        loop {
            if is_cancelled(ctx.cancel) {
                if let Err(e) = writer.abandon().await {
                    warn!(table = %table.name, error = %e, "Could not delete cancelled table");
                }
                return Err(MigrationError::Cancelled);
            }

            let rows = match source.next_rows(table, self.manager.batch_size()).await {
                Ok(rows) => rows,
                Err(e) => {
                    writer.fail();
                    return Err(e);
                }
            };
            if rows.is_empty() {
                break;
            }
            let count = rows.len() as u64;
            stats.batches += 1;

            for row in &rows {
                match transformer.transform(row) {
                    Ok(transformed) => {
                        for warning in transformed.warnings {
                            report.push(ReportEntry::Conversion {
                                table: table.name.clone(),
                                row: row.index,
                                field: warning.field,
                                message: warning.message,
                            });
                            stats.warnings += 1;
                        }
                        writer.push(transformed.document);
                    }
                    Err(e) => {
                        warn!(table = %table.name, row = row.index, error = %e, "Skipping row");
                        report.push(ReportEntry::Structural {
                            table: table.name.clone(),
                            row: row.index,
                            message: e.to_string(),
                        });
                        summary.rows_skipped += 1;
                        stats.warnings += 1;
                    }
                }
            }

            let flushed = match writer.flush_if_due().await {
                Ok(flushed) => flushed,
                Err(e) => {
                    writer.fail();
                    return Err(e);
                }
            };

            summary.rows_read += count;
            stats.rows_read += count;
            if let Some(table_progress) = progress.tables.get_mut(ctx.position) {
                table_progress.advance(count);
            }
            let mut counters = database.counters();
            counters.ingested_rows += count;
            counters.total_rows = counters.total_rows.max(counters.ingested_rows);
            database.set_counters(counters)?;
            if flushed > 0 {
                progress.sync(database);
                self.tracker.publish(progress.clone());
            }
        }

        let documents = writer.commit().await?;
        progress.sync(database);
        self.tracker.publish(progress.clone());
        summary.documents_written = documents;
        stats.documents_written += documents;
        stats.rows_skipped += summary.rows_skipped;
        report.table_done(summary);
        Ok(())
    }
}

/// What `prepare` does with an entity already stored under the UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stored {
    /// Refuse it.
    Reject,
    /// Continue it while it is still `METADATA_ONLY`.
    Continue,
}

struct TableContext<'a> {
    table: &'a TableStructure,
    position: usize,
    cancel: Option<&'a watch::Receiver<bool>>,
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

fn table_progress(structure: &DatabaseStructure, request: &MigrationRequest) -> Vec<TableProgress> {
    structure
        .tables()
        .filter(|(_, table)| request.includes(&table.uuid))
        .map(|(_, table)| TableProgress::new(&table.uuid, &table.name, table.rows))
        .collect()
}

async fn close_source(source: &mut dyn SiardSource) {
    if let Err(e) = source.close().await {
        warn!(error = %e, "Could not close source");
    }
}
