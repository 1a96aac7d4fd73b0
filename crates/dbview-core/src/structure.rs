//! Structural description of an archived database.
//!
//! The tree is produced by an external SIARD reader and is read-only once
//! constructed: Database → Schema → (Table, View, Routine), Table → Column,
//! PrimaryKey, ForeignKey, Trigger, CheckConstraint.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Root of the structure tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseStructure {
    /// Database name as recorded in the archive.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Person who archived the database.
    pub archiver: Option<String>,
    /// Contact of the archiver.
    pub archiver_contact: Option<String>,
    /// Archival date (ISO-8601 text).
    pub archival_date: Option<String>,
    /// Owner of the data.
    pub data_owner: Option<String>,
    /// Application that produced the archive.
    pub producer_application: Option<String>,
    /// Source database product name.
    pub database_product: Option<String>,
    /// Schemas in declaration order.
    pub schemas: Vec<SchemaStructure>,
}

/// A schema and the objects it contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaStructure {
    /// Stable identifier.
    pub uuid: String,
    /// Schema name.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Tables in declaration order.
    pub tables: Vec<TableStructure>,
    /// Views.
    pub views: Vec<ViewStructure>,
    /// Stored routines.
    pub routines: Vec<RoutineStructure>,
}

/// A table description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableStructure {
    /// Stable identifier.
    pub uuid: String,
    /// Table name.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Columns; a column's position is its index.
    pub columns: Vec<ColumnStructure>,
    /// Primary key, if any.
    pub primary_key: Option<PrimaryKey>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Triggers.
    pub triggers: Vec<Trigger>,
    /// Check constraints.
    pub check_constraints: Vec<CheckConstraint>,
    /// Declared row count.
    pub rows: u64,
}

/// A column description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnStructure {
    /// Column name.
    pub name: String,
    /// SQL:2008 type name, e.g. `CHARACTER VARYING(255)`.
    pub type_name: String,
    /// Type name in the source DBMS.
    pub original_type_name: Option<String>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default value expression.
    pub default_value: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
}

/// Ordered set of column indexes forming the primary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimaryKey {
    /// Constraint name.
    pub name: Option<String>,
    /// Column indexes in key order.
    pub column_indexes: Vec<usize>,
    /// Free-text description.
    pub description: Option<String>,
}

/// One `(source column, referenced column)` pair of a foreign key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reference {
    /// Column index in the owning table.
    pub source_column_index: usize,
    /// Column index in the referenced table.
    pub referenced_column_index: usize,
}

/// A foreign key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// UUID of the referenced table.
    pub referenced_table_uuid: String,
    /// Column pairs in key order.
    pub references: Vec<Reference>,
    /// `FULL`, `PARTIAL` or `SIMPLE`.
    pub match_type: Option<String>,
    /// Referential action on delete.
    pub delete_action: Option<String>,
    /// Referential action on update.
    pub update_action: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
}

/// A trigger definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Trigger {
    /// Trigger name.
    pub name: String,
    /// `BEFORE`, `AFTER` or `INSTEAD OF`.
    pub action_time: String,
    /// Triggering event.
    pub trigger_event: String,
    /// Old/new alias list.
    pub alias_list: Option<String>,
    /// Triggered SQL.
    pub triggered_action: String,
    /// Free-text description.
    pub description: Option<String>,
}

/// A check constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckConstraint {
    /// Constraint name.
    pub name: String,
    /// Condition expression.
    pub condition: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
}

/// A view definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewStructure {
    /// View name.
    pub name: String,
    /// Normalized query text.
    pub query: Option<String>,
    /// Query text as written in the source DBMS.
    pub query_original: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// View columns.
    pub columns: Vec<ColumnStructure>,
}

/// A stored routine parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutineParameter {
    /// Parameter name.
    pub name: String,
    /// `IN`, `OUT` or `INOUT`.
    pub mode: String,
    /// SQL:2008 type name.
    pub type_name: String,
    /// Free-text description.
    pub description: Option<String>,
}

/// A stored routine (procedure or function).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutineStructure {
    /// Routine name.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Original source text.
    pub source: Option<String>,
    /// Routine body.
    pub body: Option<String>,
    /// Characteristic clause.
    pub characteristic: Option<String>,
    /// Return type for functions.
    pub return_type: Option<String>,
    /// Parameters in declaration order.
    pub parameters: Vec<RoutineParameter>,
}

impl DatabaseStructure {
    /// Iterates `(schema, table)` pairs in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = (&SchemaStructure, &TableStructure)> {
        self.schemas
            .iter()
            .flat_map(|schema| schema.tables.iter().map(move |table| (schema, table)))
    }

    /// Finds a table by UUID.
    #[must_use]
    pub fn table(&self, uuid: &str) -> Option<&TableStructure> {
        self.tables()
            .map(|(_, table)| table)
            .find(|table| table.uuid == uuid)
    }

    /// Number of tables across all schemas.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    /// Sum of declared row counts.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables().map(|(_, table)| table.rows).sum()
    }

    /// Checks that table UUIDs are unique and that key column indexes
    /// resolve to real columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStructure`] naming the first offending table or key.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (schema, table) in self.tables() {
            if !seen.insert(table.uuid.as_str()) {
                return Err(Error::InvalidStructure(format!(
                    "table {}.{} reuses table UUID '{}'",
                    schema.name, table.name, table.uuid
                )));
            }
        }

        for (schema, table) in self.tables() {
            let width = table.columns.len();

            if let Some(pk) = &table.primary_key {
                if let Some(bad) = pk.column_indexes.iter().find(|&&i| i >= width) {
                    return Err(Error::InvalidStructure(format!(
                        "primary key of {}.{} references column {} but the table has {} columns",
                        schema.name, table.name, bad, width
                    )));
                }
            }

            for fk in &table.foreign_keys {
                let referenced = self.table(&fk.referenced_table_uuid).ok_or_else(|| {
                    Error::InvalidStructure(format!(
                        "foreign key {} of {}.{} references unknown table {}",
                        fk.name, schema.name, table.name, fk.referenced_table_uuid
                    ))
                })?;

                for reference in &fk.references {
                    if reference.source_column_index >= width {
                        return Err(Error::InvalidStructure(format!(
                            "foreign key {} of {}.{} uses column {} but the table has {} columns",
                            fk.name, schema.name, table.name, reference.source_column_index, width
                        )));
                    }
                    if reference.referenced_column_index >= referenced.columns.len() {
                        return Err(Error::InvalidStructure(format!(
                            "foreign key {} of {}.{} references column {} of {} which has {} columns",
                            fk.name,
                            schema.name,
                            table.name,
                            reference.referenced_column_index,
                            referenced.name,
                            referenced.columns.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
