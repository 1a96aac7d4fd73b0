//! Error types for `dbview`.
//!
//! This module provides a unified error type for the data model and the
//! index store, with stable codes so failures can be rendered in reports.

use thiserror::Error;

/// Result type alias for `dbview` core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
///
/// Error codes follow the pattern `DBV-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Collection already exists (DBV-001).
    #[error("[DBV-001] Collection '{0}' already exists")]
    CollectionExists(String),

    /// Collection not found (DBV-002).
    #[error("[DBV-002] Collection '{0}' not found")]
    CollectionNotFound(String),

    /// Document references a field that was never defined (DBV-003).
    #[error("[DBV-003] Field '{field}' is not defined in collection '{collection}'")]
    UndefinedField {
        /// Collection the write targeted.
        collection: String,
        /// Offending field name.
        field: String,
    },

    /// Field defined twice with different types (DBV-004).
    #[error("[DBV-004] Field '{field}' already defined with a different type in '{collection}'")]
    FieldConflict {
        /// Collection name.
        collection: String,
        /// Field name.
        field: String,
    },

    /// Store temporarily unable to accept writes (DBV-005).
    #[error("[DBV-005] Index store unavailable: {0}")]
    Unavailable(String),

    /// Store rejected a batch (DBV-006).
    #[error("[DBV-006] Batch rejected: {0}")]
    Rejected(String),

    /// Structure description is inconsistent (DBV-007).
    #[error("[DBV-007] Invalid structure: {0}")]
    InvalidStructure(String),

    /// Database status change not allowed (DBV-008).
    #[error("[DBV-008] Invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Configuration error (DBV-009).
    #[error("[DBV-009] Configuration error: {0}")]
    Config(String),

    /// Requested entity not found (DBV-010).
    #[error("[DBV-010] Not found: {0}")]
    NotFound(String),

    /// IO error (DBV-011).
    #[error("[DBV-011] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (DBV-012).
    #[error("[DBV-012] Serialization error: {0}")]
    Serialization(String),

    /// Internal error (DBV-013).
    ///
    /// Indicates an unexpected internal error. Please report if encountered.
    #[error("[DBV-013] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "DBV-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CollectionExists(_) => "DBV-001",
            Self::CollectionNotFound(_) => "DBV-002",
            Self::UndefinedField { .. } => "DBV-003",
            Self::FieldConflict { .. } => "DBV-004",
            Self::Unavailable(_) => "DBV-005",
            Self::Rejected(_) => "DBV-006",
            Self::InvalidStructure(_) => "DBV-007",
            Self::InvalidTransition { .. } => "DBV-008",
            Self::Config(_) => "DBV-009",
            Self::NotFound(_) => "DBV-010",
            Self::Io(_) => "DBV-011",
            Self::Serialization(_) => "DBV-012",
            Self::Internal(_) => "DBV-013",
        }
    }

    /// Returns true if retrying the same store call may succeed.
    ///
    /// Only transient store conditions qualify; schema and structure
    /// errors will fail the same way every time.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Rejected(_) | Self::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
