//! End-to-end migrations against the in-memory index store.

#![allow(clippy::pedantic)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use dbview_core::{
    CellValue, ColumnStructure, DatabaseStatus, DatabaseStructure, Document, FieldDefinition,
    IndexStore, MemoryIndexStore, Row, SchemaStructure, TableStructure, ViewerConfig,
};
use dbview_migrate::index_manager::table_collection;
use dbview_migrate::{
    read_report, CollectionState, DumpSource, JobKey, JobRegistry, JobStatus, MigrationError,
    MigrationRequest, Orchestrator, ProgressTracker, SiardSource, SourceDump, SourceFactory,
    SourceLocation,
};
use tempfile::TempDir;

fn config(dir: &Path, batch_size: usize) -> ViewerConfig {
    let mut config = ViewerConfig::default();
    config.paths.upload_dir = dir.join("uploads");
    config.paths.lob_dir = dir.join("lobs");
    config.paths.report_dir = dir.join("reports");
    config.index.batch_size = batch_size;
    config.retry.max_retries = 1;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.add_jitter = false;
    config
}

fn table(uuid: &str, rows: u64) -> TableStructure {
    TableStructure {
        uuid: uuid.to_string(),
        name: format!("table_{uuid}"),
        columns: vec![
            ColumnStructure {
                name: "id".to_string(),
                type_name: "INTEGER".to_string(),
                ..ColumnStructure::default()
            },
            ColumnStructure {
                name: "title".to_string(),
                type_name: "VARCHAR(200)".to_string(),
                ..ColumnStructure::default()
            },
        ],
        rows,
        ..TableStructure::default()
    }
}

fn rows(table_uuid: &str, count: u64) -> Vec<Row> {
    (0..count)
        .map(|i| {
            Row::new(format!("{table_uuid}-r{i}"), i)
                .with_cell(0, CellValue::Integer(i as i64))
                .with_cell(1, CellValue::Text(format!("title {i}")))
        })
        .collect()
}

/// `tables` tables of `rows_per_table` rows each, in one schema.
fn dump(tables: usize, rows_per_table: u64) -> SourceDump {
    let uuids: Vec<String> = (1..=tables).map(|i| format!("t{i}")).collect();
    SourceDump {
        structure: DatabaseStructure {
            name: "library".to_string(),
            schemas: vec![SchemaStructure {
                uuid: "s1".to_string(),
                name: "public".to_string(),
                tables: uuids.iter().map(|u| table(u, rows_per_table)).collect(),
                ..SchemaStructure::default()
            }],
            ..DatabaseStructure::default()
        },
        rows: uuids
            .iter()
            .map(|u| (u.clone(), rows(u, rows_per_table)))
            .collect(),
    }
}

/// Store whose table writes start failing from the `fail_from`-th call.
struct FlakyStore {
    inner: MemoryIndexStore,
    fail_from: usize,
    table_writes: AtomicUsize,
}

impl FlakyStore {
    fn new(fail_from: usize) -> Self {
        Self {
            inner: MemoryIndexStore::new(),
            fail_from,
            table_writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IndexStore for FlakyStore {
    async fn create_collection(&self, name: &str) -> dbview_core::Result<()> {
        self.inner.create_collection(name).await
    }

    async fn define_field(
        &self,
        collection: &str,
        field: FieldDefinition,
    ) -> dbview_core::Result<()> {
        self.inner.define_field(collection, field).await
    }

    async fn add_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> dbview_core::Result<()> {
        if collection.starts_with("dbv-table-") {
            let call = self.table_writes.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_from {
                return Err(dbview_core::Error::Unavailable("disk full".to_string()));
            }
        }
        self.inner.add_documents(collection, documents).await
    }

    async fn commit(&self, collection: &str) -> dbview_core::Result<()> {
        self.inner.commit(collection).await
    }

    async fn delete_collection(&self, collection: &str) -> dbview_core::Result<()> {
        self.inner.delete_collection(collection).await
    }

    async fn list_collections(&self) -> dbview_core::Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> dbview_core::Result<Option<Document>> {
        self.inner.get_document(collection, id).await
    }

    async fn documents(&self, collection: &str) -> dbview_core::Result<Vec<Document>> {
        self.inner.documents(collection).await
    }
}

/// Raises the cancel flag once `table` has returned `after_batches` batches.
struct CancellingSource {
    inner: DumpSource,
    table: String,
    after_batches: usize,
    batches: usize,
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl SiardSource for CancellingSource {
    fn source_type(&self) -> &'static str {
        "cancelling"
    }

    fn location(&self) -> SourceLocation {
        self.inner.location()
    }

    async fn open(&mut self) -> dbview_migrate::Result<DatabaseStructure> {
        self.inner.open().await
    }

    async fn next_rows(
        &mut self,
        table: &TableStructure,
        max_rows: usize,
    ) -> dbview_migrate::Result<Vec<Row>> {
        let rows = self.inner.next_rows(table, max_rows).await?;
        if table.uuid == self.table {
            if self.batches == self.after_batches {
                self.cancel.send_replace(true);
            }
            self.batches += 1;
        }
        Ok(rows)
    }

    async fn close(&mut self) -> dbview_migrate::Result<()> {
        self.inner.close().await
    }
}

/// Blocks in `open` until the gate is notified.
struct GatedSource {
    inner: DumpSource,
    gate: Arc<Notify>,
}

#[async_trait]
impl SiardSource for GatedSource {
    fn source_type(&self) -> &'static str {
        "gated"
    }

    fn location(&self) -> SourceLocation {
        self.inner.location()
    }

    async fn open(&mut self) -> dbview_migrate::Result<DatabaseStructure> {
        self.gate.notified().await;
        self.inner.open().await
    }

    async fn next_rows(
        &mut self,
        table: &TableStructure,
        max_rows: usize,
    ) -> dbview_migrate::Result<Vec<Row>> {
        self.inner.next_rows(table, max_rows).await
    }

    async fn close(&mut self) -> dbview_migrate::Result<()> {
        self.inner.close().await
    }
}

/// Progress of the first table and of the database, as seen by a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observation {
    rows_processed: u64,
    rows_to_process: u64,
    ingested_rows: u64,
    total_rows: u64,
}

/// Records the published progress every time rows are requested.
struct ObservingSource {
    inner: DumpSource,
    tracker: Arc<ProgressTracker>,
    database_uuid: String,
    seen: Vec<Observation>,
}

impl ObservingSource {
    fn observe(&mut self) {
        let Some(snapshot) = self.tracker.snapshot(&self.database_uuid) else {
            return;
        };
        let table = &snapshot.tables[0];
        self.seen.push(Observation {
            rows_processed: table.rows_processed,
            rows_to_process: table.rows_to_process,
            ingested_rows: snapshot.counters.ingested_rows,
            total_rows: snapshot.counters.total_rows,
        });
    }
}

#[async_trait]
impl SiardSource for ObservingSource {
    fn source_type(&self) -> &'static str {
        "observing"
    }

    fn location(&self) -> SourceLocation {
        self.inner.location()
    }

    async fn open(&mut self) -> dbview_migrate::Result<DatabaseStructure> {
        self.inner.open().await
    }

    async fn next_rows(
        &mut self,
        table: &TableStructure,
        max_rows: usize,
    ) -> dbview_migrate::Result<Vec<Row>> {
        self.observe();
        self.inner.next_rows(table, max_rows).await
    }

    async fn close(&mut self) -> dbview_migrate::Result<()> {
        self.inner.close().await
    }
}

fn orchestrator(dir: &TempDir, batch_size: usize) -> (Orchestrator, Arc<MemoryIndexStore>) {
    let store = Arc::new(MemoryIndexStore::new());
    let index: Arc<dyn IndexStore> = store.clone();
    let orchestrator = Orchestrator::new(config(dir.path(), batch_size), index).unwrap();
    (orchestrator, store)
}

#[tokio::test]
async fn test_row_with_extra_cell_is_skipped() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    let mut data = dump(1, 3);
    data.rows.get_mut("t1").unwrap()[1]
        .cells
        .insert(7, CellValue::Text("stray".to_string()));
    let mut source = DumpSource::from_dump(data);

    // Act
    let outcome = orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1"))
        .await
        .unwrap();

    // Assert
    let collection = table_collection("d1", "t1");
    let documents = store.documents(&collection).await.unwrap();
    assert_eq!(outcome.database.status(), DatabaseStatus::Available);
    assert_eq!(documents.len(), 2);
    assert!(store.get_document(&collection, "t1-r1").await.unwrap().is_none());
    assert_eq!(
        orchestrator.manager().collection_state(&collection),
        Some(CollectionState::Committed)
    );
    assert_eq!(outcome.stats.rows_skipped, 1);
    assert_eq!(outcome.database.counters().ingested_rows, 3);

    let report = read_report(orchestrator.config(), "d1").unwrap();
    assert!(report.contains("Outcome: COMPLETED"));
    assert!(report.contains("table_t1 row 1 skipped"));
}

#[tokio::test]
async fn test_documents_carry_converted_cells() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 2);
    let mut source = DumpSource::from_dump(dump(1, 3));

    orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1"))
        .await
        .unwrap();

    let doc = store
        .get_document(&table_collection("d1", "t1"), "t1-r2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.get_i64("col0"), Some(2));
    assert_eq!(doc.get_str("col1"), Some("title 2"));
    assert_eq!(doc.get_str("tableId"), Some("t1"));
}

#[tokio::test]
async fn test_failed_flush_leaves_table_uncommitted() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FlakyStore::new(2));
    let index: Arc<dyn IndexStore> = store.clone();
    let orchestrator = Orchestrator::new(config(dir.path(), 1), index).unwrap();
    let mut source = DumpSource::from_dump(dump(1, 3));

    // Act
    let err = orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1"))
        .await
        .unwrap_err();

    // Assert
    let collection = table_collection("d1", "t1");
    assert!(matches!(err, MigrationError::Ingest { ref collection, .. } if collection.contains("t1")));
    assert_eq!(
        orchestrator.manager().collection_state(&collection),
        Some(CollectionState::Writing)
    );
    assert!(store.documents(&collection).await.unwrap().is_empty());

    let database = orchestrator.manager().get_database("d1").await.unwrap().unwrap();
    assert_eq!(database.status(), DatabaseStatus::Error);

    let report = read_report(orchestrator.config(), "d1").unwrap();
    assert!(report.contains("Outcome: FAILED"));
}

#[tokio::test]
async fn test_empty_database_becomes_available() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let mut source = DumpSource::from_dump(SourceDump {
        structure: DatabaseStructure {
            name: "empty".to_string(),
            ..DatabaseStructure::default()
        },
        rows: HashMap::new(),
    });

    let outcome = orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1"))
        .await
        .unwrap();

    let stored = orchestrator.manager().get_database("d1").await.unwrap().unwrap();
    assert_eq!(outcome.database.status(), DatabaseStatus::Available);
    assert_eq!(stored.status(), DatabaseStatus::Available);
    assert_eq!(stored.counters().total_tables, 0);
    assert_eq!(stored.counters().ingested_tables, 0);
    assert_eq!(stored.counters().total_rows, 0);
}

#[tokio::test]
async fn test_schemas_without_uuid_are_counted_separately() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let mut data = dump(2, 1);
    let second = data.structure.schemas[0].tables.pop().unwrap();
    data.structure.schemas[0].uuid = String::new();
    data.structure.schemas.push(SchemaStructure {
        name: "archive".to_string(),
        tables: vec![second],
        ..SchemaStructure::default()
    });

    let outcome = orchestrator
        .migrate(&mut DumpSource::from_dump(data), &MigrationRequest::new("d1"))
        .await
        .unwrap();

    let counters = outcome.database.counters();
    assert_eq!(counters.total_schemas, 2);
    assert_eq!(counters.ingested_schemas, 2);
    assert_eq!(counters.ingested_tables, 2);
}

#[tokio::test]
async fn test_cancel_between_tables() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    let (cancel, cancel_rx) = watch::channel(false);
    // The second read of t2 is the empty one that ends the table.
    let mut source = CancellingSource {
        inner: DumpSource::from_dump(dump(5, 2)),
        table: "t2".to_string(),
        after_batches: 1,
        batches: 0,
        cancel,
    };

    // Act
    let err = orchestrator
        .migrate_with_cancel(&mut source, &MigrationRequest::new("d1"), Some(cancel_rx))
        .await
        .unwrap_err();

    // Assert
    assert!(err.is_cancelled());
    let manager = orchestrator.manager();
    for committed in ["t1", "t2"] {
        assert_eq!(
            manager.collection_state(&table_collection("d1", committed)),
            Some(CollectionState::Committed)
        );
    }
    for untouched in ["t3", "t4", "t5"] {
        assert_eq!(manager.collection_state(&table_collection("d1", untouched)), None);
    }
    let collections = store.list_collections().await.unwrap();
    assert!(!collections.contains(&table_collection("d1", "t3")));

    let database = manager.get_database("d1").await.unwrap().unwrap();
    assert_eq!(database.status(), DatabaseStatus::Cancelled);
    assert_eq!(database.counters().ingested_tables, 2);

    let report = read_report(orchestrator.config(), "d1").unwrap();
    assert!(report.contains("Outcome: CANCELLED"));
}

#[tokio::test]
async fn test_cancel_mid_table_deletes_it() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 1);
    let (cancel, cancel_rx) = watch::channel(false);
    let mut source = CancellingSource {
        inner: DumpSource::from_dump(dump(1, 3)),
        table: "t1".to_string(),
        after_batches: 0,
        batches: 0,
        cancel,
    };

    let err = orchestrator
        .migrate_with_cancel(&mut source, &MigrationRequest::new("d1"), Some(cancel_rx))
        .await
        .unwrap_err();

    let collection = table_collection("d1", "t1");
    assert!(err.is_cancelled());
    assert_eq!(
        orchestrator.manager().collection_state(&collection),
        Some(CollectionState::Deleted)
    );
    assert!(!store.list_collections().await.unwrap().contains(&collection));
}

#[tokio::test]
async fn test_single_table_request() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    let mut source = DumpSource::from_dump(dump(3, 2));

    let outcome = orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1").with_table("t2"))
        .await
        .unwrap();

    let collections = store.list_collections().await.unwrap();
    assert!(collections.contains(&table_collection("d1", "t2")));
    assert!(!collections.contains(&table_collection("d1", "t1")));
    assert_eq!(outcome.database.counters().total_tables, 1);
    assert_eq!(orchestrator.progress("d1").len(), 1);
}

#[tokio::test]
async fn test_unknown_table_is_rejected_before_writing() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    let mut source = DumpSource::from_dump(dump(1, 1));

    let err = orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1").with_table("nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::Configuration(_)));
    assert!(store.list_collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_progress_before_and_after_migration() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 2);

    // Act
    let unknown = orchestrator.progress("d1");
    orchestrator
        .load_metadata(&mut DumpSource::from_dump(dump(2, 3)), "d1")
        .await
        .unwrap();
    let loaded = orchestrator.progress("d1");
    orchestrator
        .migrate(
            &mut DumpSource::from_dump(dump(2, 3)),
            &MigrationRequest::new("d1"),
        )
        .await
        .unwrap();
    let done = orchestrator.progress("d1");

    // Assert
    assert!(unknown.is_empty());
    assert_eq!(loaded.len(), 2);
    assert!(loaded
        .iter()
        .all(|t| t.rows_processed == 0 && t.rows_to_process == 0));
    assert!(done
        .iter()
        .all(|t| t.rows_processed == 3 && t.rows_to_process == 3));
}

#[tokio::test]
async fn test_load_metadata_keeps_metadata_only() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);

    let database = orchestrator
        .load_metadata(&mut DumpSource::from_dump(dump(2, 3)), "d1")
        .await
        .unwrap();

    let stored = orchestrator.manager().get_database("d1").await.unwrap().unwrap();
    assert_eq!(database.status(), DatabaseStatus::MetadataOnly);
    assert_eq!(stored.metadata(), database.metadata());
    assert_eq!(stored.siard_path(), Some("memory://dump"));
    assert_eq!(store.list_collections().await.unwrap(), ["dbv-database-d1"]);
}

#[tokio::test]
async fn test_load_metadata_refuses_migrated_database() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    orchestrator
        .migrate(
            &mut DumpSource::from_dump(dump(1, 2)),
            &MigrationRequest::new("d1"),
        )
        .await
        .unwrap();

    // Act
    let err = orchestrator
        .load_metadata(&mut DumpSource::from_dump(dump(1, 2)), "d1")
        .await
        .unwrap_err();

    // Assert
    assert!(matches!(
        err,
        MigrationError::AlreadyExists { ref database, status: DatabaseStatus::Available }
            if database == "d1"
    ));
    let stored = orchestrator.manager().get_database("d1").await.unwrap().unwrap();
    assert_eq!(stored.status(), DatabaseStatus::Available);
    let documents = store.documents(&table_collection("d1", "t1")).await.unwrap();
    assert_eq!(documents.len(), 2);
}

#[tokio::test]
async fn test_second_migration_leaves_available_database_intact() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    let request = MigrationRequest::new("d1");
    orchestrator
        .migrate(&mut DumpSource::from_dump(dump(1, 2)), &request)
        .await
        .unwrap();

    // Act
    let err = orchestrator
        .migrate(&mut DumpSource::from_dump(dump(1, 2)), &request)
        .await
        .unwrap_err();

    // Assert
    let collection = table_collection("d1", "t1");
    assert!(matches!(err, MigrationError::AlreadyExists { .. }));
    let stored = orchestrator.manager().get_database("d1").await.unwrap().unwrap();
    assert_eq!(stored.status(), DatabaseStatus::Available);
    assert_eq!(
        orchestrator.manager().collection_state(&collection),
        Some(CollectionState::Committed)
    );
    assert_eq!(store.documents(&collection).await.unwrap().len(), 2);
    assert!(read_report(orchestrator.config(), "d1")
        .unwrap()
        .contains("Outcome: COMPLETED"));
}

#[tokio::test]
async fn test_single_table_continues_from_loaded_metadata() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, store) = orchestrator(&dir, 10);
    let loaded = orchestrator
        .load_metadata(&mut DumpSource::from_dump(dump(3, 2)), "d1")
        .await
        .unwrap();

    // Act
    let outcome = orchestrator
        .migrate(
            &mut DumpSource::from_dump(dump(3, 2)),
            &MigrationRequest::new("d1").with_table("t2"),
        )
        .await
        .unwrap();

    // Assert
    let collections = store.list_collections().await.unwrap();
    assert_eq!(outcome.database.status(), DatabaseStatus::Available);
    assert_eq!(outcome.database.metadata(), loaded.metadata());
    assert_eq!(outcome.database.counters().ingested_rows, 2);
    assert!(collections.contains(&table_collection("d1", "t2")));
    assert!(!collections.contains(&table_collection("d1", "t1")));
}

#[tokio::test]
async fn test_ingested_rows_never_exceed_total() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 2);
    let mut data = dump(1, 5);
    // Declares fewer rows than the source yields.
    data.structure.schemas[0].tables[0].rows = 2;
    let mut source = ObservingSource {
        inner: DumpSource::from_dump(data),
        tracker: Arc::clone(orchestrator.tracker()),
        database_uuid: "d1".to_string(),
        seen: Vec::new(),
    };

    // Act
    let outcome = orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1"))
        .await
        .unwrap();

    // Assert
    let seen = source.seen;
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().any(|o| o.rows_to_process > 2));
    for o in &seen {
        assert!(o.rows_processed <= o.rows_to_process, "{o:?}");
        assert!(o.ingested_rows <= o.total_rows, "{o:?}");
    }
    for pair in seen.windows(2) {
        assert!(pair[0].rows_processed <= pair[1].rows_processed, "{pair:?}");
        assert!(pair[0].ingested_rows <= pair[1].ingested_rows, "{pair:?}");
        assert!(pair[0].total_rows <= pair[1].total_rows, "{pair:?}");
    }
    let counters = outcome.database.counters();
    assert_eq!((counters.ingested_rows, counters.total_rows), (5, 5));
    let done = &orchestrator.progress("d1")[0];
    assert_eq!((done.rows_processed, done.rows_to_process), (5, 5));
}

#[tokio::test]
async fn test_progress_waits_for_flushed_batches() {
    let dir = TempDir::new().unwrap();
    let mut settings = config(dir.path(), 10);
    settings.index.flush_interval_ms = 60_000;
    let orchestrator = Orchestrator::new(settings, Arc::new(MemoryIndexStore::new())).unwrap();
    let mut source = ObservingSource {
        inner: DumpSource::from_dump(dump(1, 3)),
        tracker: Arc::clone(orchestrator.tracker()),
        database_uuid: "d1".to_string(),
        seen: Vec::new(),
    };

    orchestrator
        .migrate(&mut source, &MigrationRequest::new("d1"))
        .await
        .unwrap();

    // Three buffered rows stay below the batch size until the commit.
    assert_eq!(source.seen.len(), 2);
    assert!(source.seen.iter().all(|o| o.rows_processed == 0));
    assert_eq!(orchestrator.progress("d1")[0].rows_processed, 3);
}

#[tokio::test]
async fn test_load_from_local_resolves_upload_dir() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let upload_dir = &orchestrator.config().paths.upload_dir;
    std::fs::create_dir_all(upload_dir).unwrap();
    let json = serde_json::to_string(&dump(1, 2)).unwrap();
    std::fs::write(upload_dir.join("library.json"), &json).unwrap();

    let outcome = orchestrator
        .load_from_local(Path::new("library.json"), None)
        .await
        .unwrap();

    assert_eq!(outcome.database.status(), DatabaseStatus::Available);
    assert_eq!(outcome.database.uuid().len(), 36);
    assert_eq!(outcome.database.siard_size(), json.len() as u64);

    let missing = orchestrator
        .load_from_local(Path::new("missing.json"), Some("d2".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(missing, MigrationError::Configuration(_)));
}

#[tokio::test]
async fn test_missing_report_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);

    let err = read_report(orchestrator.config(), "never-migrated").unwrap_err();

    assert!(matches!(err, MigrationError::ReportNotFound(_)));
}

fn gated_factory(gate: &Arc<Notify>) -> SourceFactory {
    let gate = Arc::clone(gate);
    Arc::new(move || {
        Box::new(GatedSource {
            inner: DumpSource::from_dump(dump(1, 2)),
            gate: Arc::clone(&gate),
        }) as Box<dyn SiardSource>
    })
}

#[tokio::test]
async fn test_duplicate_job_is_rejected() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let registry = JobRegistry::new(Arc::new(orchestrator));
    let gate = Arc::new(Notify::new());
    registry
        .start(MigrationRequest::new("d1"), gated_factory(&gate))
        .unwrap();

    // Act
    let duplicate = registry.start(
        MigrationRequest::new("d1").with_table("t1"),
        gated_factory(&gate),
    );
    gate.notify_one();
    let finished = registry.wait(&JobKey::from(&MigrationRequest::new("d1"))).await.unwrap();

    // Assert
    assert!(matches!(duplicate, Err(MigrationError::AlreadyRunning(ref id)) if id == "d1"));
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(registry.jobs().len(), 1);
}

#[tokio::test]
async fn test_stop_cancels_running_job() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let registry = JobRegistry::new(Arc::new(orchestrator));
    let gate = Arc::new(Notify::new());
    let request = MigrationRequest::new("d1");
    let key = JobKey::from(&request);
    registry.start(request, gated_factory(&gate)).unwrap();

    registry.stop(&key).unwrap();
    gate.notify_one();
    let info = registry.wait(&key).await.unwrap();

    assert_eq!(info.status, JobStatus::Cancelled);
    assert!(matches!(
        registry.stop(&key),
        Err(MigrationError::JobNotRunning(_))
    ));
    assert!(matches!(
        registry.stop(&JobKey::from(&MigrationRequest::new("d9"))),
        Err(MigrationError::JobNotFound(_))
    ));
    let database = registry
        .orchestrator()
        .manager()
        .get_database("d1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(database.status(), DatabaseStatus::Cancelled);
}

#[tokio::test]
async fn test_restart_runs_again_from_scratch() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let registry = JobRegistry::new(Arc::new(orchestrator));
    let gate = Arc::new(Notify::new());
    let request = MigrationRequest::new("d1");
    let key = JobKey::from(&request);
    registry.start(request, gated_factory(&gate)).unwrap();
    gate.notify_one();
    registry.wait(&key).await.unwrap();

    let restarted = registry.restart(&key).await.unwrap();
    gate.notify_one();
    let info = registry.wait(&key).await.unwrap();

    assert_eq!(restarted.status, JobStatus::Running);
    assert_eq!(info.status, JobStatus::Completed);
    let database = registry
        .orchestrator()
        .manager()
        .get_database("d1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(database.status(), DatabaseStatus::Available);
    assert_eq!(registry.progress("d1")[0].rows_processed, 2);
}

#[tokio::test]
async fn test_finished_job_started_again_keeps_database() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let registry = JobRegistry::new(Arc::new(orchestrator));
    let gate = Arc::new(Notify::new());
    let request = MigrationRequest::new("d1");
    let key = JobKey::from(&request);
    registry.start(request.clone(), gated_factory(&gate)).unwrap();
    gate.notify_one();
    registry.wait(&key).await.unwrap();

    registry.start(request, gated_factory(&gate)).unwrap();
    let info = registry.wait(&key).await.unwrap();

    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.error.unwrap().contains("already exists"));
    let database = registry
        .orchestrator()
        .manager()
        .get_database("d1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(database.status(), DatabaseStatus::Available);
    assert_eq!(registry.progress("d1")[0].rows_processed, 2);
}

#[tokio::test]
async fn test_reconcile_marks_interrupted_ingest_as_failed() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let (orchestrator, _store) = orchestrator(&dir, 10);
    let manager = Arc::clone(orchestrator.manager());
    let mut interrupted = dbview_core::ViewerDatabase::new("d1", dump(1, 1).structure);
    interrupted.transition(DatabaseStatus::Ingesting).unwrap();
    manager.put_database(&interrupted).await.unwrap();
    let finished = dbview_core::ViewerDatabase::new("d2", DatabaseStructure::default());
    manager.put_database(&finished).await.unwrap();
    let registry = JobRegistry::new(Arc::new(orchestrator));

    // Act
    let changed = registry.reconcile().await.unwrap();

    // Assert
    assert_eq!(changed, ["d1"]);
    let d1 = manager.get_database("d1").await.unwrap().unwrap();
    let d2 = manager.get_database("d2").await.unwrap().unwrap();
    assert_eq!(d1.status(), DatabaseStatus::Error);
    assert_eq!(d2.status(), DatabaseStatus::MetadataOnly);
}
