//! Database entity to metadata document, and back.
//!
//! The structure travels as canonical JSON in the `metadata` field; status,
//! source location and counters sit in their own fields so they can be
//! queried without parsing it.

use dbview_core::document::{fields, Document, FieldDefinition, FieldType, FieldValue};
use dbview_core::{DatabaseStatus, DatabaseStructure, Error, IngestCounters, Result, ViewerDatabase};

/// Field definitions of the metadata collection.
#[must_use]
pub fn metadata_definitions() -> Vec<FieldDefinition> {
    let mut definitions = vec![
        FieldDefinition::single(fields::UUID, FieldType::String),
        FieldDefinition::single(fields::METADATA, FieldType::String),
        FieldDefinition::single(fields::STATUS, FieldType::String),
        FieldDefinition::single(fields::SIARD_PATH, FieldType::String),
        FieldDefinition::single(fields::SIARD_SIZE, FieldType::Long),
        FieldDefinition::single(fields::CURRENT_SCHEMA, FieldType::String),
        FieldDefinition::single(fields::CURRENT_TABLE, FieldType::String),
    ];
    definitions.extend(
        [
            fields::INGESTED_SCHEMAS,
            fields::INGESTED_TABLES,
            fields::INGESTED_ROWS,
            fields::TOTAL_SCHEMAS,
            fields::TOTAL_TABLES,
            fields::TOTAL_ROWS,
        ]
        .into_iter()
        .map(|name| FieldDefinition::single(name, FieldType::Long)),
    );
    definitions
}

/// Serializes the entity into a document keyed by its UUID.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the structure cannot be encoded.
pub fn to_metadata_document(database: &ViewerDatabase) -> Result<Document> {
    let metadata = serde_json::to_string(database.metadata())?;
    let counters = database.counters();

    let mut document = Document::new(database.uuid());
    document.set(fields::UUID, database.uuid());
    document.set(fields::METADATA, metadata);
    document.set(fields::STATUS, database.status().as_str());
    document.set(
        fields::SIARD_PATH,
        database
            .siard_path()
            .map_or(FieldValue::Null, FieldValue::from),
    );
    document.set(fields::SIARD_SIZE, to_long(database.siard_size()));
    document.set(fields::CURRENT_SCHEMA, database.current_schema_name());
    document.set(fields::CURRENT_TABLE, database.current_table_name());
    document.set(fields::INGESTED_SCHEMAS, to_long(counters.ingested_schemas));
    document.set(fields::INGESTED_TABLES, to_long(counters.ingested_tables));
    document.set(fields::INGESTED_ROWS, to_long(counters.ingested_rows));
    document.set(fields::TOTAL_SCHEMAS, to_long(counters.total_schemas));
    document.set(fields::TOTAL_TABLES, to_long(counters.total_tables));
    document.set(fields::TOTAL_ROWS, to_long(counters.total_rows));
    Ok(document)
}

/// Reads the structure back from a metadata document.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the field is missing or malformed.
pub fn from_metadata_document(document: &Document) -> Result<DatabaseStructure> {
    let metadata = document.get_str(fields::METADATA).ok_or_else(|| {
        Error::Serialization(format!(
            "metadata document '{}' has no {} field",
            document.id,
            fields::METADATA
        ))
    })?;
    Ok(serde_json::from_str(metadata)?)
}

/// Rebuilds the whole entity, status and counters included.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the structure or status is malformed.
pub fn database_from_document(document: &Document) -> Result<ViewerDatabase> {
    let metadata = from_metadata_document(document)?;
    let status: DatabaseStatus = document
        .get_str(fields::STATUS)
        .unwrap_or(DatabaseStatus::MetadataOnly.as_str())
        .parse()?;
    let counter = |name: &str| {
        document
            .get_i64(name)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or_default()
    };
    let counters = IngestCounters {
        ingested_schemas: counter(fields::INGESTED_SCHEMAS),
        ingested_tables: counter(fields::INGESTED_TABLES),
        ingested_rows: counter(fields::INGESTED_ROWS),
        total_schemas: counter(fields::TOTAL_SCHEMAS),
        total_tables: counter(fields::TOTAL_TABLES),
        total_rows: counter(fields::TOTAL_ROWS),
    };
    let uuid = document.get_str(fields::UUID).unwrap_or(&document.id);

    Ok(ViewerDatabase::restore(uuid, status, metadata, counters)
        .with_source(
            document.get_str(fields::SIARD_PATH).map(str::to_string),
            counter(fields::SIARD_SIZE),
        )
        .with_current(
            document.get_str(fields::CURRENT_SCHEMA).unwrap_or_default(),
            document.get_str(fields::CURRENT_TABLE).unwrap_or_default(),
        ))
}

fn to_long(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
