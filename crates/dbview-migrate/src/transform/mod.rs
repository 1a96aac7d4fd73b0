//! Conversions between source data and index documents.

pub mod record;
pub mod structure;

pub use record::{
    coerce, display_cell, CellWarning, RecordTransformer, RowView, StructuralError,
    TransformedRow,
};
pub use structure::{
    database_from_document, from_metadata_document, metadata_definitions, to_metadata_document,
};
