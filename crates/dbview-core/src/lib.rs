//! # `dbview` Core
//!
//! Data model and index-store interface for the database-preservation viewer.
//!
//! An archived database (SIARD) arrives as a parsed [`DatabaseStructure`]
//! plus a stream of [`Row`]s. The viewer keeps one [`ViewerDatabase`] entity
//! per archive, whose [`DatabaseStatus`] only ever moves forward, and writes
//! [`Document`]s into collections of an [`IndexStore`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dbview_core::{Document, FieldDefinition, FieldType, IndexStore, MemoryIndexStore};
//!
//! let store = MemoryIndexStore::new();
//! store.create_collection("dbv-table-db-t").await?;
//! store
//!     .define_field("dbv-table-db-t", FieldDefinition::single("col0", FieldType::Long))
//!     .await?;
//!
//! let mut doc = Document::new("row-1");
//! doc.set("col0", 42_i64);
//! store.add_documents("dbv-table-db-t", vec![doc]).await?;
//! store.commit("dbv-table-db-t").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod database;
#[cfg(test)]
mod database_tests;
pub mod document;
pub mod error;
#[cfg(test)]
mod error_tests;
pub mod store;
pub mod structure;
pub mod value;
#[cfg(test)]
mod value_tests;

pub use config::{ConfigError, FieldNaming, ViewerConfig};
pub use database::{DatabaseStatus, IngestCounters, ViewerDatabase};
pub use document::{Document, FieldDefinition, FieldType, FieldValue};
pub use error::{Error, Result};
pub use store::{IndexStore, MemoryIndexStore};
pub use structure::{
    CheckConstraint, ColumnStructure, DatabaseStructure, ForeignKey, PrimaryKey, Reference,
    RoutineParameter, RoutineStructure, SchemaStructure, TableStructure, Trigger, ViewStructure,
};
pub use value::{CellValue, Row};
