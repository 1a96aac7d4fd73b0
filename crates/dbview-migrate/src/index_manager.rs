//! Collection lifecycle, batching and commit on top of an [`IndexStore`].
//!
//! Each table is written through a [`TableWriter`]: documents are buffered,
//! flushed in batches with retry, and become visible only on
//! [`TableWriter::commit`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use dbview_core::config::IndexConfig;
use dbview_core::document::{Document, FieldDefinition, FieldType};
use dbview_core::{Error, IndexStore, ViewerDatabase};

use crate::error::{MigrationError, Result};
use crate::retry::{with_retry, RetryConfig};
use crate::transform::{metadata_definitions, to_metadata_document};

/// Prefix shared by every collection of the viewer.
pub const COLLECTION_PREFIX: &str = "dbv";

/// Name of the metadata collection of a database.
#[must_use]
pub fn database_collection(database_uuid: &str) -> String {
    format!("{COLLECTION_PREFIX}-database-{database_uuid}")
}

/// Name of the row collection of a table.
#[must_use]
pub fn table_collection(database_uuid: &str, table_uuid: &str) -> String {
    format!("{COLLECTION_PREFIX}-table-{database_uuid}-{table_uuid}")
}

/// Database UUID of a metadata collection name.
#[must_use]
pub fn database_uuid_of(collection: &str) -> Option<&str> {
    collection.strip_prefix("dbv-database-")
}

/// Lifecycle of a table collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionState {
    /// Created, nothing submitted.
    Created,
    /// At least one batch submitted, not yet visible.
    Writing,
    /// All documents visible.
    Committed,
    /// Removed.
    Deleted,
}

impl CollectionState {
    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Writing)
                | (Self::Writing, Self::Writing)
                | (Self::Writing, Self::Committed)
                | (Self::Created | Self::Writing, Self::Deleted)
        )
    }
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Writing => "WRITING",
            Self::Committed => "COMMITTED",
            Self::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// Writes databases and tables into an index store.
pub struct IndexManager {
    store: Arc<dyn IndexStore>,
    retry: RetryConfig,
    batch_size: usize,
    flush_interval: Duration,
    states: Mutex<HashMap<String, CollectionState>>,
}

impl IndexManager {
    /// Creates a manager over `store`.
    pub fn new(store: Arc<dyn IndexStore>, config: &IndexConfig, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Documents per batch.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Last known state of a table collection.
    #[must_use]
    pub fn collection_state(&self, collection: &str) -> Option<CollectionState> {
        self.states.lock().get(collection).copied()
    }

    fn set_state(&self, collection: &str, next: CollectionState) -> Result<()> {
        let mut states = self.states.lock();
        if let Some(current) = states.get(collection).copied() {
            if !current.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    from: current.to_string(),
                    to: next.to_string(),
                }
                .into());
            }
        }
        states.insert(collection.to_string(), next);
        Ok(())
    }

    /// Writes the metadata document of `database` and makes it visible.
    ///
    /// The metadata collection is created on first use.
    pub async fn put_database(&self, database: &ViewerDatabase) -> Result<()> {
        let collection = database_collection(database.uuid());
        self.ensure_collection(&collection, metadata_definitions())
            .await?;

        let document = to_metadata_document(database)?;
        self.submit(&collection, &[document]).await?;
        self.commit_collection(&collection).await?;
        debug!(
            database = %database.uuid(),
            status = %database.status(),
            "Stored database metadata"
        );
        Ok(())
    }

    /// Reads a database entity back from its metadata collection.
    pub async fn get_database(&self, database_uuid: &str) -> Result<Option<ViewerDatabase>> {
        let collection = database_collection(database_uuid);
        let document = match self.store.get_document(&collection, database_uuid).await {
            Ok(document) => document,
            Err(Error::CollectionNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        document
            .map(|d| crate::transform::database_from_document(&d).map_err(MigrationError::from))
            .transpose()
    }

    /// UUIDs of every database with a metadata collection.
    pub async fn database_uuids(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_collections()
            .await?
            .iter()
            .filter_map(|c| database_uuid_of(c).map(str::to_string))
            .collect())
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        definitions: Vec<FieldDefinition>,
    ) -> Result<()> {
        match self.store.create_collection(collection).await {
            Ok(()) | Err(Error::CollectionExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        for definition in definitions {
            self.store.define_field(collection, definition).await?;
        }
        Ok(())
    }

    /// Creates the collection of a table and returns its writer.
    ///
    /// `definitions` is the catalogue of fields the table may use; each one
    /// is registered with the store right before its first write.
    pub async fn open_table(
        &self,
        database_uuid: &str,
        table_uuid: &str,
        definitions: Vec<FieldDefinition>,
    ) -> Result<TableWriter<'_>> {
        let collection = table_collection(database_uuid, table_uuid);
        self.store.create_collection(&collection).await?;
        self.states
            .lock()
            .insert(collection.clone(), CollectionState::Created);
        debug!(collection = %collection, "Created table collection");

        Ok(TableWriter {
            manager: self,
            catalogue: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            defined: HashSet::new(),
            buffer: Vec::with_capacity(self.batch_size),
            last_flush: Instant::now(),
            documents_flushed: 0,
            finished: false,
            collection,
        })
    }

    /// Removes the metadata collection and every table collection of a
    /// database, and forgets their states. Returns how many collections
    /// were deleted.
    ///
    /// Table collections are named from the stored structure, so other
    /// databases whose UUID merely starts with `database_uuid` are untouched.
    pub async fn delete_database(&self, database_uuid: &str) -> Result<usize> {
        let mut targets = vec![database_collection(database_uuid)];
        if let Some(database) = self.get_database(database_uuid).await? {
            targets.extend(
                database
                    .metadata()
                    .tables()
                    .map(|(_, table)| table_collection(database_uuid, &table.uuid)),
            );
        }
        let existing: HashSet<String> = self.store.list_collections().await?.into_iter().collect();
        targets.retain(|collection| existing.contains(collection));

        let results = futures::future::join_all(
            targets
                .iter()
                .map(|collection| self.store.delete_collection(collection)),
        )
        .await;

        let mut deleted = 0;
        for (collection, result) in targets.iter().zip(results) {
            match result {
                Ok(()) | Err(Error::CollectionNotFound(_)) => {
                    self.states.lock().remove(collection);
                    deleted += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(database = %database_uuid, collections = deleted, "Deleted database collections");
        Ok(deleted)
    }

    async fn submit(&self, collection: &str, documents: &[Document]) -> Result<()> {
        let store = Arc::clone(&self.store);
        with_retry(&self.retry, "add_documents", collection, || {
            let store = Arc::clone(&store);
            let documents = documents.to_vec();
            async move { store.add_documents(collection, documents).await }
        })
        .await
        .map_err(|e| MigrationError::ingest(collection, e))
    }

    async fn commit_collection(&self, collection: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        with_retry(&self.retry, "commit", collection, || {
            let store = Arc::clone(&store);
            async move { store.commit(collection).await }
        })
        .await
        .map_err(|e| MigrationError::ingest(collection, e))
    }
}

/// Owned handle on one table collection being written.
///
/// Must end in [`commit`](Self::commit), [`abandon`](Self::abandon) or
/// [`fail`](Self::fail).
pub struct TableWriter<'a> {
    manager: &'a IndexManager,
    collection: String,
    catalogue: HashMap<String, FieldDefinition>,
    defined: HashSet<String>,
    buffer: Vec<Document>,
    last_flush: Instant,
    documents_flushed: u64,
    finished: bool,
}

impl TableWriter<'_> {
    /// Collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Documents submitted so far.
    #[must_use]
    pub const fn documents_flushed(&self) -> u64 {
        self.documents_flushed
    }

    /// Documents waiting in the buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffers a document.
    pub fn push(&mut self, document: Document) {
        self.buffer.push(document);
    }

    /// Returns true when the buffer is full or the flush interval elapsed.
    #[must_use]
    pub fn should_flush(&self) -> bool {
        self.buffer.len() >= self.manager.batch_size
            || (!self.buffer.is_empty() && self.last_flush.elapsed() >= self.manager.flush_interval)
    }

    /// Flushes if [`should_flush`](Self::should_flush); returns the number
    /// of documents submitted.
    pub async fn flush_if_due(&mut self) -> Result<usize> {
        if self.should_flush() {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Submits the buffered documents, registering new fields first.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        self.define_new_fields().await?;
        self.manager
            .set_state(&self.collection, CollectionState::Writing)?;

        let count = self.buffer.len();
        self.manager.submit(&self.collection, &self.buffer).await?;
        self.buffer.clear();

        self.documents_flushed += count as u64;
        self.last_flush = Instant::now();
        debug!(
            collection = %self.collection,
            batch = count,
            total = self.documents_flushed,
            "Flushed batch"
        );
        Ok(count)
    }

    async fn define_new_fields(&mut self) -> Result<()> {
        let mut new_fields: Vec<&str> = self
            .buffer
            .iter()
            .flat_map(|d| d.fields.keys())
            .map(String::as_str)
            .filter(|name| !self.defined.contains(*name))
            .collect();
        new_fields.sort_unstable();
        new_fields.dedup();

        let definitions: Vec<FieldDefinition> = new_fields
            .into_iter()
            .map(|name| {
                self.catalogue.get(name).cloned().unwrap_or_else(|| {
                    warn!(
                        collection = %self.collection,
                        field = %name,
                        "Field missing from the table layout, defining as string"
                    );
                    FieldDefinition::single(name, FieldType::String)
                })
            })
            .collect();

        for definition in definitions {
            let name = definition.name.clone();
            self.manager
                .store
                .define_field(&self.collection, definition)
                .await?;
            self.defined.insert(name);
        }
        Ok(())
    }

    /// Flushes the remainder and makes every document visible.
    ///
    /// On failure the collection stays uncommitted, as with [`Self::fail`].
    pub async fn commit(mut self) -> Result<u64> {
        self.finished = true;
        if let Err(e) = self.finish_commit().await {
            warn!(collection = %self.collection, error = %e, "Commit failed, table left uncommitted");
            return Err(e);
        }

        info!(
            collection = %self.collection,
            documents = self.documents_flushed,
            "Committed table"
        );
        Ok(self.documents_flushed)
    }

    async fn finish_commit(&mut self) -> Result<()> {
        self.flush().await?;
        if self.manager.collection_state(&self.collection) == Some(CollectionState::Created) {
            self.manager
                .set_state(&self.collection, CollectionState::Writing)?;
        }
        self.manager.commit_collection(&self.collection).await?;
        self.manager
            .set_state(&self.collection, CollectionState::Committed)
    }

    /// Deletes the collection and everything staged in it.
    pub async fn abandon(mut self) -> Result<()> {
        self.finished = true;
        self.buffer.clear();
        match self.manager.store.delete_collection(&self.collection).await {
            Ok(()) | Err(Error::CollectionNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.manager
            .set_state(&self.collection, CollectionState::Deleted)?;
        info!(collection = %self.collection, "Abandoned table");
        Ok(())
    }

    /// Leaves the collection as it is, uncommitted.
    pub fn fail(mut self) {
        self.finished = true;
        warn!(
            collection = %self.collection,
            flushed = self.documents_flushed,
            pending = self.buffer.len(),
            "Table left uncommitted"
        );
    }
}

impl Drop for TableWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                collection = %self.collection,
                "Table writer dropped without commit, abandon or fail"
            );
        }
    }
}
