//! Readers that produce a parsed structure and its rows.
//!
//! The SIARD container itself is read by an external component; anything
//! that can hand over a [`DatabaseStructure`] and stream [`Row`]s per table
//! implements [`SiardSource`].

pub mod dump;

use async_trait::async_trait;
use serde::Serialize;

use dbview_core::{DatabaseStructure, Row, TableStructure};

use crate::error::Result;

pub use dump::{DumpSource, SourceDump};

/// Where a source reads from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Path or URI of the archive.
    pub path: String,
    /// Size in bytes, 0 when unknown.
    pub size: u64,
}

/// A parsed archive: structure first, then rows table by table.
#[async_trait]
pub trait SiardSource: Send {
    /// Short name of the source kind.
    fn source_type(&self) -> &'static str;

    /// Location recorded on the database entity.
    fn location(&self) -> SourceLocation;

    /// Opens the source and returns the structure.
    async fn open(&mut self) -> Result<DatabaseStructure>;

    /// Returns up to `max_rows` further rows of `table`; empty when the
    /// table is exhausted.
    async fn next_rows(&mut self, table: &TableStructure, max_rows: usize) -> Result<Vec<Row>>;

    /// Releases resources.
    async fn close(&mut self) -> Result<()>;
}
