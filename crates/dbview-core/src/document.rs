//! Index documents and field definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known field names shared by every collection.
pub mod fields {
    /// Row UUID on row documents, database UUID on metadata documents.
    pub const UUID: &str = "uuid";
    /// Position of the row within its table.
    pub const ROW_INDEX: &str = "rowIndex";
    /// UUID of the table a row document belongs to.
    pub const TABLE_ID: &str = "tableId";
    /// Serialized structure on metadata documents.
    pub const METADATA: &str = "metadata";
    /// Database status on metadata documents.
    pub const STATUS: &str = "status";
    /// Path of the SIARD file.
    pub const SIARD_PATH: &str = "siardPath";
    /// Size in bytes of the SIARD file.
    pub const SIARD_SIZE: &str = "siardSize";
    /// Schema currently being ingested.
    pub const CURRENT_SCHEMA: &str = "currentSchemaName";
    /// Table currently being ingested.
    pub const CURRENT_TABLE: &str = "currentTableName";
    /// Ingest counters.
    pub const INGESTED_SCHEMAS: &str = "ingestedSchemas";
    /// Ingest counters.
    pub const INGESTED_TABLES: &str = "ingestedTables";
    /// Ingest counters.
    pub const INGESTED_ROWS: &str = "ingestedRows";
    /// Ingest totals.
    pub const TOTAL_SCHEMAS: &str = "totalSchemas";
    /// Ingest totals.
    pub const TOTAL_TABLES: &str = "totalTables";
    /// Ingest totals.
    pub const TOTAL_ROWS: &str = "totalRows";
    /// Store-internal version field.
    pub const VERSION: &str = "_version_";
}

/// Field names that row data fields must never take.
pub const RESERVED_FIELDS: &[&str] = &[
    fields::UUID,
    fields::ROW_INDEX,
    fields::TABLE_ID,
    fields::METADATA,
    fields::STATUS,
    fields::VERSION,
    "id",
];

/// Returns true if `name` is reserved, ignoring ASCII case.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Type of an index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Exact-match string.
    String,
    /// Tokenized full text.
    Text,
    /// 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// Boolean.
    Boolean,
    /// Date/time in `yyyy-MM-dd'T'HH:mm:ss`.
    DateTime,
    /// Base64 binary, stored but not searchable.
    Binary,
}

/// Definition of one field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name.
    pub name: String,
    /// Value type.
    pub field_type: FieldType,
    /// Whether the field holds a list of values.
    pub multi_valued: bool,
}

impl FieldDefinition {
    /// Single-valued field.
    #[must_use]
    pub fn single(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            multi_valued: false,
        }
    }

    /// Multi-valued field.
    #[must_use]
    pub fn multi(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            multi_valued: true,
        }
    }
}

/// A value stored in a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent value.
    Null,
    /// Boolean.
    Boolean(bool),
    /// Integer.
    Long(i64),
    /// Float.
    Double(f64),
    /// Text, including formatted dates and base64 binaries.
    String(String),
    /// Repeated values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns the inner string, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the inner integer, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Plain-text rendering used when showing a value as a cell.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Boolean(b) => b.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::String(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::to_display_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// One unit of content in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier, unique within its collection.
    pub id: String,
    /// Fields ordered by name.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Reads a string field.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Reads an integer field.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }
}
