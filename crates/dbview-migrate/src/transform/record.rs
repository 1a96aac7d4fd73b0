//! Row to document conversion.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use dbview_core::document::{fields, Document, FieldType, FieldValue};
use dbview_core::structure::TableStructure;
use dbview_core::value::{format_date_time, CellValue, Row};

use crate::lob::{LobKey, LobSink};
use crate::typemap::{FieldAssignment, NestedField, Storage, TableMapping, TypeMapper};

/// The row does not fit the table declaration. The row is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row_index} has a cell at column {column_index} but the table declares {column_count} columns")]
pub struct StructuralError {
    /// Position of the offending row.
    pub row_index: u64,
    /// First out-of-range column.
    pub column_index: usize,
    /// Declared column count.
    pub column_count: usize,
}

/// A cell that could not be converted. The field is written as null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWarning {
    /// Column position.
    pub column_index: usize,
    /// Field that received null.
    pub field: String,
    /// What went wrong.
    pub message: String,
}

/// Result of converting one row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    /// Document ready for submission.
    pub document: Document,
    /// Cells that degraded to null.
    pub warnings: Vec<CellWarning>,
}

/// Display form of a row document, keyed by field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    /// Row UUID.
    pub uuid: String,
    /// Row position.
    pub index: u64,
    /// Non-null data fields.
    pub cells: BTreeMap<String, String>,
}

/// Converts rows of one table into documents.
///
/// Conversion is a pure function of the row and the configuration: the same
/// row always produces the same document, and large objects land at the same
/// external path.
pub struct RecordTransformer {
    database_uuid: String,
    mapper: TypeMapper,
    mapping: TableMapping,
    column_count: usize,
    lobs: Arc<dyn LobSink>,
}

impl RecordTransformer {
    /// Prepares a transformer for `table`.
    pub fn new(
        mapper: &TypeMapper,
        database_uuid: impl Into<String>,
        table: &TableStructure,
        lobs: Arc<dyn LobSink>,
    ) -> Self {
        Self {
            database_uuid: database_uuid.into(),
            mapper: mapper.clone(),
            mapping: mapper.map_table(table),
            column_count: table.columns.len(),
            lobs,
        }
    }

    /// Field layout in use.
    #[must_use]
    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    /// Converts one row.
    ///
    /// # Errors
    ///
    /// Returns [`StructuralError`] if the row carries cells beyond the
    /// declared columns.
    pub fn transform(&self, row: &Row) -> Result<TransformedRow, StructuralError> {
        if let Some((&column_index, _)) = row.cells.range(self.column_count..).next() {
            return Err(StructuralError {
                row_index: row.index,
                column_index,
                column_count: self.column_count,
            });
        }

        let mut document = Document::new(&row.uuid);
        document.set(fields::UUID, row.uuid.as_str());
        document.set(
            fields::ROW_INDEX,
            i64::try_from(row.index).unwrap_or(i64::MAX),
        );
        document.set(fields::TABLE_ID, self.mapping.table_uuid.as_str());

        let mut warnings = Vec::new();
        for assignment in &self.mapping.assignments {
            let value = row
                .cells
                .get(&assignment.column_index)
                .unwrap_or(&CellValue::Null);
            self.write_cell(&mut document, row, assignment, value, &mut warnings);
        }

        if !warnings.is_empty() {
            debug!(
                table = %self.mapping.table_uuid,
                row = row.index,
                count = warnings.len(),
                "Row converted with null cells"
            );
        }

        Ok(TransformedRow { document, warnings })
    }

    fn write_cell(
        &self,
        document: &mut Document,
        row: &Row,
        assignment: &FieldAssignment,
        value: &CellValue,
        warnings: &mut Vec<CellWarning>,
    ) {
        let mut warn = |field: &str, message: String| {
            warnings.push(CellWarning {
                column_index: assignment.column_index,
                field: field.to_string(),
                message,
            });
        };

        match &assignment.storage {
            Storage::Inline => {
                let converted = coerce(value, assignment.field_type).unwrap_or_else(|message| {
                    warn(&assignment.field_name, message);
                    FieldValue::Null
                });
                document.set(&assignment.field_name, converted);
            }
            Storage::Repeated => {
                let items: Vec<&CellValue> = match value {
                    CellValue::Null => {
                        document.set(&assignment.field_name, FieldValue::Null);
                        return;
                    }
                    CellValue::Array(items) => items.iter().collect(),
                    single => vec![single],
                };
                let list = items
                    .into_iter()
                    .map(|item| {
                        coerce(item, assignment.field_type).unwrap_or_else(|message| {
                            warn(&assignment.field_name, message);
                            FieldValue::Null
                        })
                    })
                    .collect();
                document.set(&assignment.field_name, FieldValue::List(list));
            }
            Storage::Nested(nested) => {
                let attributes: &[CellValue] = match value {
                    CellValue::Null => &[],
                    CellValue::Struct(values) => {
                        if values.len() > nested.len() {
                            warn(
                                &assignment.field_name,
                                format!(
                                    "structured value has {} attributes, {} declared",
                                    values.len(),
                                    nested.len()
                                ),
                            );
                        }
                        values.as_slice()
                    }
                    other => {
                        warn(
                            &assignment.field_name,
                            format!("expected a structured value, got {}", other.kind()),
                        );
                        &[]
                    }
                };
                for (position, NestedField { name, field_type, .. }) in nested.iter().enumerate() {
                    let attribute = attributes.get(position).unwrap_or(&CellValue::Null);
                    let converted = coerce(attribute, *field_type).unwrap_or_else(|message| {
                        warn(name, message);
                        FieldValue::Null
                    });
                    document.set(name, converted);
                }
            }
            Storage::LargeObject { reference_field } => {
                let bytes: Option<&[u8]> = match value {
                    CellValue::Text(text) => Some(text.as_bytes()),
                    CellValue::Binary(bytes) => Some(bytes.as_slice()),
                    _ => None,
                };

                let (inline, reference) = match bytes {
                    Some(bytes) if self.mapper.requires_external(assignment, bytes.len()) => {
                        let key = LobKey {
                            database_uuid: &self.database_uuid,
                            table_uuid: &self.mapping.table_uuid,
                            row_uuid: &row.uuid,
                            column_index: assignment.column_index,
                        };
                        match self.lobs.store(&key, bytes) {
                            Ok(reference) => (FieldValue::Null, FieldValue::String(reference)),
                            Err(e) => {
                                warn(
                                    &assignment.field_name,
                                    format!("could not store large object: {e}"),
                                );
                                (FieldValue::Null, FieldValue::Null)
                            }
                        }
                    }
                    _ => {
                        let converted =
                            coerce(value, assignment.field_type).unwrap_or_else(|message| {
                                warn(&assignment.field_name, message);
                                FieldValue::Null
                            });
                        (converted, FieldValue::Null)
                    }
                };
                document.set(&assignment.field_name, inline);
                document.set(reference_field, reference);
            }
        }
    }

    /// Rebuilds the display form of a row document of this table.
    #[must_use]
    pub fn to_row_view(&self, document: &Document) -> RowView {
        let uuid = document
            .get_str(fields::UUID)
            .unwrap_or(&document.id)
            .to_string();
        let index = document
            .get_i64(fields::ROW_INDEX)
            .and_then(|i| u64::try_from(i).ok())
            .unwrap_or_default();

        let cells = self
            .mapping
            .assignments
            .iter()
            .flat_map(FieldAssignment::definitions)
            .filter_map(|definition| {
                let value = document.get(&definition.name)?;
                if matches!(value, FieldValue::Null) {
                    return None;
                }
                Some((definition.name, value.to_display_string()))
            })
            .collect();

        RowView { uuid, index, cells }
    }
}

/// Converts a cell to a field value of `target` type.
///
/// # Errors
///
/// Returns a message when the value cannot be represented.
pub fn coerce(value: &CellValue, target: FieldType) -> Result<FieldValue, String> {
    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    match target {
        FieldType::String | FieldType::Text => match value {
            CellValue::Binary(bytes) => String::from_utf8(bytes.clone())
                .map(FieldValue::String)
                .map_err(|_| "binary value is not valid UTF-8".to_string()),
            other => Ok(FieldValue::String(display_cell(other))),
        },
        FieldType::Long => match value {
            CellValue::Integer(v) => Ok(FieldValue::Long(*v)),
            CellValue::Boolean(b) => Ok(FieldValue::Long(i64::from(*b))),
            CellValue::Float(f) => whole_number(*f).map(FieldValue::Long),
            CellValue::Text(s) | CellValue::Decimal(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(v) => Ok(FieldValue::Long(v)),
                    Err(_) => s
                        .parse::<f64>()
                        .map_err(|_| format!("'{s}' is not a number"))
                        .and_then(whole_number)
                        .map(FieldValue::Long),
                }
            }
            other => Err(mismatch(other, target)),
        },
        FieldType::Double => match value {
            #[allow(clippy::cast_precision_loss)]
            CellValue::Integer(v) => Ok(FieldValue::Double(*v as f64)),
            CellValue::Float(f) => Ok(FieldValue::Double(*f)),
            CellValue::Text(s) | CellValue::Decimal(s) => s
                .trim()
                .parse::<f64>()
                .map(FieldValue::Double)
                .map_err(|_| format!("'{}' is not a number", s.trim())),
            other => Err(mismatch(other, target)),
        },
        FieldType::Boolean => match value {
            CellValue::Boolean(b) => Ok(FieldValue::Boolean(*b)),
            CellValue::Integer(0) => Ok(FieldValue::Boolean(false)),
            CellValue::Integer(1) => Ok(FieldValue::Boolean(true)),
            CellValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(FieldValue::Boolean(true)),
                "false" | "f" | "no" | "n" | "0" => Ok(FieldValue::Boolean(false)),
                other => Err(format!("'{other}' is not a boolean")),
            },
            other => Err(mismatch(other, target)),
        },
        FieldType::DateTime => match value {
            CellValue::Timestamp(ts) => Ok(FieldValue::String(format_date_time(ts))),
            CellValue::Date(d) => Ok(FieldValue::String(format_date_time(
                &d.and_time(NaiveTime::MIN),
            ))),
            CellValue::Text(s) => parse_lenient_date_time(s)
                .map(|ts| FieldValue::String(format_date_time(&ts)))
                .ok_or_else(|| format!("'{}' is not a date or timestamp", s.trim())),
            other => Err(mismatch(other, target)),
        },
        FieldType::Binary => match value {
            CellValue::Binary(bytes) => Ok(FieldValue::String(STANDARD.encode(bytes))),
            CellValue::Text(s) => Ok(FieldValue::String(STANDARD.encode(s.as_bytes()))),
            other => Err(mismatch(other, target)),
        },
    }
}

fn mismatch(value: &CellValue, target: FieldType) -> String {
    format!("cannot store a {} value in a {target:?} field", value.kind())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn whole_number(f: f64) -> Result<i64, String> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(format!("{f} is not a whole number in range"))
    }
}

fn parse_lenient_date_time(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let text = text.trim().trim_end_matches('Z');

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Plain-text rendering of a cell, used for string fields.
#[must_use]
pub fn display_cell(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        CellValue::Text(s) | CellValue::Decimal(s) => s.clone(),
        CellValue::Integer(v) => v.to_string(),
        CellValue::Float(v) => v.to_string(),
        CellValue::Boolean(b) => b.to_string(),
        CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        CellValue::Time(t) => t.format("%H:%M:%S").to_string(),
        CellValue::Timestamp(ts) => format_date_time(ts),
        CellValue::Binary(bytes) => STANDARD.encode(bytes),
        CellValue::Array(items) => format!(
            "[{}]",
            items.iter().map(display_cell).collect::<Vec<_>>().join(", ")
        ),
        CellValue::Struct(items) => format!(
            "({})",
            items.iter().map(display_cell).collect::<Vec<_>>().join(", ")
        ),
    }
}
