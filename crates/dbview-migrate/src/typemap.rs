//! Mapping of SQL:2008 column types to index field types.
//!
//! Every column gets a field name derived from its ordinal position (or,
//! optionally, from its sanitized name) and a storage strategy:
//!
//! | Source type                     | Field type | Storage       |
//! |---------------------------------|------------|---------------|
//! | BOOLEAN                         | boolean    | inline        |
//! | SMALLINT, INTEGER, BIGINT       | long       | inline        |
//! | DECIMAL(p,0), p <= 18           | long       | inline        |
//! | DECIMAL(p,s), p <= 15           | double     | inline        |
//! | wider DECIMAL                   | string     | inline        |
//! | REAL, FLOAT, DOUBLE PRECISION   | double     | inline        |
//! | CHARACTER [VARYING], INTERVAL   | string     | inline        |
//! | TIME                            | string     | inline        |
//! | DATE, TIMESTAMP                 | date_time  | inline        |
//! | BINARY [VARYING]                | binary     | inline        |
//! | CLOB, XML                       | text       | large object  |
//! | BLOB                            | binary     | large object  |
//! | `T ARRAY[n]`                    | type of T  | repeated      |
//! | `ROW(a T, ...)`                 | per attr   | nested        |
//!
//! Anything else is indexed as a string with a logged warning.

use std::collections::HashSet;

use tracing::warn;

use dbview_core::config::{FieldNaming, IndexConfig};
use dbview_core::document::{fields, is_reserved, FieldDefinition, FieldType};
use dbview_core::structure::{ColumnStructure, TableStructure};

/// Parsed SQL:2008 column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceType {
    /// BOOLEAN.
    Boolean,
    /// Exact integer types.
    Integer,
    /// DECIMAL / NUMERIC.
    Decimal {
        /// Declared precision.
        precision: Option<u32>,
        /// Declared scale.
        scale: Option<u32>,
    },
    /// Approximate numeric types.
    Float,
    /// Fixed or varying character data.
    Character,
    /// Character large object.
    Clob,
    /// Fixed or varying binary data.
    Binary,
    /// Binary large object.
    Blob,
    /// DATE.
    Date,
    /// TIME, with or without zone.
    Time,
    /// TIMESTAMP, with or without zone.
    Timestamp,
    /// Any INTERVAL type.
    Interval,
    /// `T ARRAY[n]`.
    Array {
        /// Element type.
        element: Box<SourceType>,
        /// Declared maximum cardinality.
        cardinality: Option<u32>,
    },
    /// `ROW(name T, ...)` structured type.
    Row(Vec<(String, SourceType)>),
    /// Not recognised; keeps the declared name.
    Unknown(String),
}

impl SourceType {
    /// Parses a declared type name. Never fails; unrecognised names become
    /// [`SourceType::Unknown`].
    #[must_use]
    pub fn parse(type_name: &str) -> Self {
        let collapsed = type_name.split_whitespace().collect::<Vec<_>>().join(" ");
        let upper = collapsed.to_ascii_uppercase();

        if let Some((element_end, cardinality)) = array_suffix(&upper) {
            let element = Self::parse(&collapsed[..element_end]);
            return Self::Array {
                element: Box::new(element),
                cardinality,
            };
        }

        if upper.starts_with("ROW") && upper.ends_with(')') {
            if let Some(open) = upper.find('(') {
                if upper[3..open].trim().is_empty() {
                    let inner = &collapsed[open + 1..collapsed.len() - 1];
                    if let Some(attributes) = parse_attributes(inner) {
                        return Self::Row(attributes);
                    }
                }
            }
            return Self::Unknown(type_name.trim().to_string());
        }

        let (base, params) = match upper.find('(') {
            Some(open) => {
                let close = upper[open..].find(')').map_or(upper.len(), |c| open + c);
                (upper[..open].trim(), Some(&upper[open + 1..close]))
            }
            None => (upper.as_str(), None),
        };

        scalar_type(base, params).unwrap_or_else(|| Self::Unknown(type_name.trim().to_string()))
    }

    /// Index field type for values of this type.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Boolean => FieldType::Boolean,
            Self::Integer => FieldType::Long,
            Self::Decimal { precision, scale } => match (precision, scale.unwrap_or(0)) {
                (Some(p), 0) if *p <= 18 => FieldType::Long,
                (Some(p), _) if *p <= 15 => FieldType::Double,
                (None, _) => FieldType::Double,
                _ => FieldType::String,
            },
            Self::Float => FieldType::Double,
            Self::Clob => FieldType::Text,
            Self::Binary | Self::Blob => FieldType::Binary,
            Self::Date | Self::Timestamp => FieldType::DateTime,
            Self::Array { element, .. } => match element.as_ref() {
                Self::Array { .. } | Self::Row(_) => FieldType::String,
                scalar => scalar.field_type(),
            },
            Self::Character
            | Self::Time
            | Self::Interval
            | Self::Row(_)
            | Self::Unknown(_) => FieldType::String,
        }
    }

    /// Returns true for types the mapper does not recognise.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// Returns the end of the element type and the cardinality for `T ARRAY[n]`.
fn array_suffix(upper: &str) -> Option<(usize, Option<u32>)> {
    let at = upper.rfind(" ARRAY")?;
    let rest = upper[at + " ARRAY".len()..].trim();
    if rest.is_empty() {
        return Some((at, None));
    }
    let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
    let cardinality = inner.trim().parse().ok()?;
    Some((at, Some(cardinality)))
}

/// Parses `name T, name T` at top level, honouring nested parentheses.
fn parse_attributes(inner: &str) -> Option<Vec<(String, SourceType)>> {
    let mut attributes = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    let bytes = inner.as_bytes();

    for (i, byte) in bytes.iter().enumerate() {
        match byte {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b',' if depth == 0 => {
                attributes.push(parse_attribute(&inner[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    attributes.push(parse_attribute(&inner[start..])?);
    Some(attributes)
}

fn parse_attribute(part: &str) -> Option<(String, SourceType)> {
    let part = part.trim();
    let (name, type_name) = part.split_once(' ')?;
    Some((name.trim_matches('"').to_string(), SourceType::parse(type_name)))
}

fn scalar_type(base: &str, params: Option<&str>) -> Option<SourceType> {
    let source = match base {
        "BOOLEAN" | "BOOL" => SourceType::Boolean,
        "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "TINYINT" => SourceType::Integer,
        "DECIMAL" | "NUMERIC" | "DEC" => {
            let mut numbers = params
                .unwrap_or_default()
                .split(',')
                .map(|p| p.trim().parse::<u32>().ok());
            SourceType::Decimal {
                precision: numbers.next().flatten(),
                scale: numbers.next().flatten(),
            }
        }
        "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => SourceType::Float,
        "CHARACTER" | "CHAR" | "CHARACTER VARYING" | "CHAR VARYING" | "VARCHAR"
        | "NATIONAL CHARACTER" | "NATIONAL CHAR" | "NCHAR" | "NATIONAL CHARACTER VARYING"
        | "NATIONAL CHAR VARYING" | "NCHAR VARYING" | "NVARCHAR" => SourceType::Character,
        "CHARACTER LARGE OBJECT" | "CHAR LARGE OBJECT" | "CLOB" | "NATIONAL CHARACTER LARGE OBJECT"
        | "NCHAR LARGE OBJECT" | "NCLOB" | "XML" => SourceType::Clob,
        "BINARY" | "BINARY VARYING" | "VARBINARY" | "BIT" | "BIT VARYING" => SourceType::Binary,
        "BINARY LARGE OBJECT" | "BLOB" => SourceType::Blob,
        "DATE" => SourceType::Date,
        "TIME" | "TIME WITH TIME ZONE" | "TIME WITHOUT TIME ZONE" => SourceType::Time,
        "TIMESTAMP" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITHOUT TIME ZONE" => {
            SourceType::Timestamp
        }
        b if b.starts_with("INTERVAL") => SourceType::Interval,
        _ => return None,
    };
    Some(source)
}

/// How a column's values are laid out in a row document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// One single-valued field.
    Inline,
    /// One multi-valued field.
    Repeated,
    /// One field per structured-type attribute.
    Nested(Vec<NestedField>),
    /// Inline field for small values, plus a reference field for values
    /// written to external LOB storage.
    LargeObject {
        /// Field holding the external LOB path.
        reference_field: String,
    },
}

/// Storage strategy without field details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// See [`Storage::Inline`].
    Inline,
    /// See [`Storage::Repeated`].
    Repeated,
    /// See [`Storage::Nested`].
    Nested,
    /// See [`Storage::LargeObject`].
    LargeObject,
}

impl Storage {
    /// Strategy of this layout.
    #[must_use]
    pub const fn kind(&self) -> StorageKind {
        match self {
            Self::Inline => StorageKind::Inline,
            Self::Repeated => StorageKind::Repeated,
            Self::Nested(_) => StorageKind::Nested,
            Self::LargeObject { .. } => StorageKind::LargeObject,
        }
    }
}

/// Field for one attribute of a structured column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedField {
    /// Index field name.
    pub name: String,
    /// Declared attribute name.
    pub attribute: String,
    /// Index field type.
    pub field_type: FieldType,
}

/// Field layout chosen for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAssignment {
    /// Column position in the table.
    pub column_index: usize,
    /// Declared column name.
    pub column_name: String,
    /// Main field name.
    pub field_name: String,
    /// Parsed column type.
    pub source_type: SourceType,
    /// Main field type.
    pub field_type: FieldType,
    /// Layout of the values.
    pub storage: Storage,
}

impl FieldAssignment {
    /// Field definitions this column contributes.
    #[must_use]
    pub fn definitions(&self) -> Vec<FieldDefinition> {
        match &self.storage {
            Storage::Inline => vec![FieldDefinition::single(&self.field_name, self.field_type)],
            Storage::Repeated => vec![FieldDefinition::multi(&self.field_name, self.field_type)],
            Storage::Nested(nested) => nested
                .iter()
                .map(|n| FieldDefinition::single(&n.name, n.field_type))
                .collect(),
            Storage::LargeObject { reference_field } => vec![
                FieldDefinition::single(&self.field_name, self.field_type),
                FieldDefinition::single(reference_field, FieldType::String),
            ],
        }
    }
}

/// Field layout of a whole table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    /// Table UUID.
    pub table_uuid: String,
    /// One assignment per column, in column order.
    pub assignments: Vec<FieldAssignment>,
}

impl TableMapping {
    /// All field definitions of the table collection, well-known fields first.
    #[must_use]
    pub fn definitions(&self) -> Vec<FieldDefinition> {
        let mut definitions = vec![
            FieldDefinition::single(fields::UUID, FieldType::String),
            FieldDefinition::single(fields::ROW_INDEX, FieldType::Long),
            FieldDefinition::single(fields::TABLE_ID, FieldType::String),
        ];
        definitions.extend(self.assignments.iter().flat_map(FieldAssignment::definitions));
        definitions
    }

    /// Columns whose declared type was not recognised.
    pub fn unsupported(&self) -> impl Iterator<Item = &FieldAssignment> {
        self.assignments.iter().filter(|a| a.source_type.is_unknown())
    }
}

/// Deterministic mapper from column declarations to field layouts.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    naming: FieldNaming,
    prefix: String,
    inline_lob_threshold: usize,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(&IndexConfig::default())
    }
}

impl TypeMapper {
    /// Creates a mapper from the index configuration.
    #[must_use]
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            naming: config.field_naming,
            prefix: config.field_prefix.clone(),
            inline_lob_threshold: config.inline_lob_threshold,
        }
    }

    /// Size above which large objects leave the document.
    #[must_use]
    pub const fn inline_lob_threshold(&self) -> usize {
        self.inline_lob_threshold
    }

    /// Field type and storage strategy for a declared type name.
    #[must_use]
    pub fn map_type(&self, type_name: &str) -> (FieldType, StorageKind) {
        let source = SourceType::parse(type_name);
        (source.field_type(), storage_kind(&source))
    }

    /// Whether a value of `len` bytes in this column goes to LOB storage.
    #[must_use]
    pub fn requires_external(&self, assignment: &FieldAssignment, len: usize) -> bool {
        matches!(assignment.storage, Storage::LargeObject { .. }) && len > self.inline_lob_threshold
    }

    /// Assigns fields to every column of `table`.
    #[must_use]
    pub fn map_table(&self, table: &TableStructure) -> TableMapping {
        let mut taken = HashSet::new();
        let assignments = table
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| self.assign(&table.name, index, column, &mut taken))
            .collect();

        TableMapping {
            table_uuid: table.uuid.clone(),
            assignments,
        }
    }

    /// Assigns fields to one column on its own, without the collision
    /// context of its table.
    #[must_use]
    pub fn map_column(&self, column: &ColumnStructure, ordinal: usize) -> FieldAssignment {
        self.assign("", ordinal, column, &mut HashSet::new())
    }

    fn assign(
        &self,
        table_name: &str,
        index: usize,
        column: &ColumnStructure,
        taken: &mut HashSet<String>,
    ) -> FieldAssignment {
        let source_type = SourceType::parse(&column.type_name);
        if let SourceType::Unknown(type_name) = &source_type {
            warn!(
                table = %table_name,
                column = %column.name,
                type_name = %type_name,
                "Unsupported column type, indexing as string"
            );
        }

        let base = match self.naming {
            FieldNaming::Ordinal => format!("{}{}", self.prefix, index),
            FieldNaming::ColumnName => self.sanitize(&column.name, index),
        };
        let field_name = claim(taken, base, index);

        let storage = match &source_type {
            SourceType::Array { .. } => Storage::Repeated,
            SourceType::Row(attributes) => Storage::Nested(
                attributes
                    .iter()
                    .enumerate()
                    .map(|(position, (attribute, attribute_type))| NestedField {
                        name: claim(taken, format!("{field_name}_{position}"), index),
                        attribute: attribute.clone(),
                        field_type: match attribute_type {
                            SourceType::Array { .. } | SourceType::Row(_) => FieldType::String,
                            scalar => scalar.field_type(),
                        },
                    })
                    .collect(),
            ),
            SourceType::Clob | SourceType::Blob => Storage::LargeObject {
                reference_field: claim(taken, format!("{field_name}_lob"), index),
            },
            _ => Storage::Inline,
        };

        FieldAssignment {
            column_index: index,
            column_name: column.name.clone(),
            field_name,
            field_type: source_type.field_type(),
            source_type,
            storage,
        }
    }

    fn sanitize(&self, name: &str, index: usize) -> String {
        let mut out = String::with_capacity(name.len());
        for c in name.chars() {
            let c = if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            };
            if c == '_' && out.ends_with('_') {
                continue;
            }
            out.push(c);
        }
        let out = out.trim_matches('_');

        match out.chars().next() {
            None => format!("{}{}", self.prefix, index),
            Some(first) if first.is_ascii_digit() => format!("{}{}", self.prefix, out),
            Some(_) => out.to_string(),
        }
    }
}

fn storage_kind(source: &SourceType) -> StorageKind {
    match source {
        SourceType::Array { .. } => StorageKind::Repeated,
        SourceType::Row(_) => StorageKind::Nested,
        SourceType::Clob | SourceType::Blob => StorageKind::LargeObject,
        _ => StorageKind::Inline,
    }
}

/// Reserves `base`, suffixing `_<ordinal>` until it is free.
fn claim(taken: &mut HashSet<String>, base: String, ordinal: usize) -> String {
    let mut name = base;
    while is_reserved(&name) || taken.contains(&name.to_ascii_lowercase()) {
        name = format!("{name}_{ordinal}");
    }
    taken.insert(name.to_ascii_lowercase());
    name
}
