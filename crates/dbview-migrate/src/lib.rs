// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # `dbview` Migration Engine
//!
//! `dbview-migrate` is a CLI tool and library that turns parsed SIARD
//! archives into searchable index collections.
//!
//! ## Collections
//!
//! | Collection | Content |
//! |------------|---------|
//! | `dbv-database-<db>` | One metadata document per archive |
//! | `dbv-table-<db>-<table>` | One document per row |
//!
//! ## Quick Start
//!
//! ```bash
//! # Full migration of a dump in the upload directory
//! dbview-migrate run --source library.json
//!
//! # Structure only
//! dbview-migrate run --source library.json --metadata-only
//!
//! # Read the conversion report afterwards
//! dbview-migrate report <database-uuid>
//! ```
//!
//! ## Library use
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dbview_core::{MemoryIndexStore, ViewerConfig};
//! use dbview_migrate::{DumpSource, MigrationRequest, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(ViewerConfig::default(), Arc::new(MemoryIndexStore::new()))?;
//! let mut source = DumpSource::from_path("library.json");
//! let outcome = orchestrator.migrate(&mut source, &MigrationRequest::random()).await?;
//! println!("{}", outcome.database.status());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod index_manager;
pub mod jobs;
pub mod lob;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod retry;
pub mod source;
pub mod transform;
pub mod typemap;

pub use error::{MigrationError, Result};
pub use index_manager::{CollectionState, IndexManager, TableWriter};
pub use jobs::{JobInfo, JobKey, JobRegistry, JobStatus, SourceFactory};
pub use lob::{FsLobSink, LobKey, LobSink, MemoryLobSink};
pub use pipeline::{MigrationOutcome, MigrationRequest, MigrationStats, Orchestrator};
pub use progress::{DatabaseProgress, ProgressTracker, TableProgress};
pub use report::{read_report, save_report, ConversionReport, ReportEntry, ReportOutcome};
pub use retry::RetryConfig;
pub use source::{DumpSource, SiardSource, SourceDump, SourceLocation};
pub use transform::RecordTransformer;
pub use typemap::{SourceType, StorageKind, TableMapping, TypeMapper};
