//! Source rows and cell values.
//!
//! A [`Row`] is transient: read from the source, turned into a document,
//! dropped. Cell values are a closed sum type so every conversion is
//! exhaustive.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format used for every date/time value written to or read from the index.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Formats a timestamp with [`DATE_TIME_FORMAT`].
#[must_use]
pub fn format_date_time(value: &NaiveDateTime) -> String {
    value.format(DATE_TIME_FORMAT).to_string()
}

/// Parses a timestamp written with [`DATE_TIME_FORMAT`].
///
/// # Errors
///
/// Returns the chrono parse error if the text does not match the format.
pub fn parse_date_time(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT)
}

/// A single cell value with its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// SQL NULL.
    Null,
    /// Character data.
    Text(String),
    /// Exact integer.
    Integer(i64),
    /// Exact numeric kept as text to preserve precision.
    Decimal(String),
    /// Approximate numeric.
    Float(f64),
    /// Boolean.
    Boolean(bool),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Date and time without zone.
    Timestamp(NaiveDateTime),
    /// Binary data.
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Array elements in order.
    Array(Vec<CellValue>),
    /// Structured-type attributes in declaration order.
    Struct(Vec<CellValue>),
}

impl CellValue {
    /// Short name of the variant, used in warnings.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::Binary(_) => "binary",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
        }
    }

    /// Returns true for [`CellValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Stable row identifier.
    pub uuid: String,
    /// Position of the row in its table.
    pub index: u64,
    /// Cells keyed by column index.
    #[serde(default)]
    pub cells: BTreeMap<usize, CellValue>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new(uuid: impl Into<String>, index: u64) -> Self {
        Self {
            uuid: uuid.into(),
            index,
            cells: BTreeMap::new(),
        }
    }

    /// Adds a cell, builder style.
    #[must_use]
    pub fn with_cell(mut self, column_index: usize, value: CellValue) -> Self {
        self.cells.insert(column_index, value);
        self
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
