//! Tests for `value` module

use super::value::*;
use chrono::NaiveDate;

#[test]
fn test_date_time_format_roundtrip() {
    // Arrange
    let ts = NaiveDate::from_ymd_opt(2019, 3, 7)
        .unwrap()
        .and_hms_opt(14, 5, 9)
        .unwrap();

    // Act
    let text = format_date_time(&ts);
    let parsed = parse_date_time(&text).expect("parse");

    // Assert
    assert_eq!(text, "2019-03-07T14:05:09");
    assert_eq!(parsed, ts);
}

#[test]
fn test_parse_date_time_rejects_other_formats() {
    assert!(parse_date_time("2019-03-07").is_err());
    assert!(parse_date_time("07/03/2019 14:05").is_err());
}

#[test]
fn test_cell_value_tagged_json() {
    let value = CellValue::Integer(7);

    let json = serde_json::to_string(&value).expect("serialize");

    assert_eq!(json, r#"{"type":"integer","value":7}"#);
}

#[test]
fn test_null_cell_json_has_no_value() {
    let parsed: CellValue = serde_json::from_str(r#"{"type":"null"}"#).expect("deserialize");

    assert!(parsed.is_null());
}

#[test]
fn test_binary_cell_is_base64() {
    // Arrange
    let value = CellValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]);

    // Act
    let json = serde_json::to_string(&value).expect("serialize");
    let back: CellValue = serde_json::from_str(&json).expect("deserialize");

    // Assert
    assert!(json.contains("3q2+7w=="));
    assert_eq!(back, value);
}

#[test]
fn test_row_builder() {
    let row = Row::new("r-1", 3)
        .with_cell(0, CellValue::Integer(1))
        .with_cell(2, CellValue::Text("x".into()));

    assert_eq!(row.uuid, "r-1");
    assert_eq!(row.index, 3);
    assert_eq!(row.cells.len(), 2);
    assert_eq!(row.cells.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
}

#[test]
fn test_kind_names() {
    assert_eq!(CellValue::Null.kind(), "null");
    assert_eq!(CellValue::Array(vec![]).kind(), "array");
    assert_eq!(CellValue::Struct(vec![]).kind(), "struct");
}
