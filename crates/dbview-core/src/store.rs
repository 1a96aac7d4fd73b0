//! Index store interface and an in-memory implementation.
//!
//! The store is document oriented: named collections, explicit field
//! definitions (schema-on-write), staged writes that become visible on
//! `commit`.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::document::{Document, FieldDefinition};
use crate::error::{Error, Result};

/// Operations the migration needs from a search index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Creates an empty collection.
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Defines a field. Redefining with an identical definition is a no-op.
    async fn define_field(&self, collection: &str, field: FieldDefinition) -> Result<()>;

    /// Stages a batch. The whole batch is rejected if any document is invalid.
    async fn add_documents(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Makes every staged document visible.
    async fn commit(&self, collection: &str) -> Result<()>;

    /// Drops a collection with all its documents.
    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// Names of all collections.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Reads a committed document.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Reads all committed documents in insertion order.
    async fn documents(&self, collection: &str) -> Result<Vec<Document>>;
}

#[derive(Debug, Default)]
struct MemoryCollection {
    fields: BTreeMap<String, FieldDefinition>,
    committed: IndexMap<String, Document>,
    staged: Vec<Document>,
}

/// In-memory [`IndexStore`].
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryIndexStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged, not yet visible, documents.
    #[must_use]
    pub fn pending_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |c| c.staged.len())
    }

    /// Field definitions of a collection.
    #[must_use]
    pub fn fields(&self, collection: &str) -> Vec<FieldDefinition> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.fields.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Writes every collection's committed documents to `dir`.
    ///
    /// Each collection becomes `<name>.jsonl` (one document per line) and
    /// `<name>.fields.json` (its field definitions).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a file cannot be written.
    pub fn export_to_dir(&self, dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(dir)?;
        let collections = self.collections.read();

        for (name, collection) in collections.iter() {
            let file = std::fs::File::create(dir.join(format!("{name}.jsonl")))?;
            let mut writer = BufWriter::new(file);
            for doc in collection.committed.values() {
                serde_json::to_writer(&mut writer, doc)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;

            let fields: Vec<&FieldDefinition> = collection.fields.values().collect();
            let file = std::fs::File::create(dir.join(format!("{name}.fields.json")))?;
            serde_json::to_writer_pretty(file, &fields)?;
        }

        debug!("Exported {} collections to {:?}", collections.len(), dir);
        Ok(collections.len())
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), MemoryCollection::default());
        Ok(())
    }

    async fn define_field(&self, collection: &str, field: FieldDefinition) -> Result<()> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        match target.fields.get(&field.name) {
            Some(existing) if *existing == field => Ok(()),
            Some(_) => Err(Error::FieldConflict {
                collection: collection.to_string(),
                field: field.name,
            }),
            None => {
                target.fields.insert(field.name.clone(), field);
                Ok(())
            }
        }
    }

    async fn add_documents(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        for doc in &documents {
            if let Some(name) = doc.fields.keys().find(|f| !target.fields.contains_key(*f)) {
                return Err(Error::UndefinedField {
                    collection: collection.to_string(),
                    field: name.clone(),
                });
            }
        }

        target.staged.extend(documents);
        Ok(())
    }

    async fn commit(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        for doc in target.staged.drain(..) {
            target.committed.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.collections
            .write()
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.collections.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(target.committed.get(id).cloned())
    }

    async fn documents(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(target.committed.values().cloned().collect())
    }
}
