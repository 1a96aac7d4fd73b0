//! Tests for `error` module

use super::error::*;

#[test]
fn test_error_codes_are_unique() {
    // Arrange - create all error variants
    let errors: Vec<Error> = vec![
        Error::CollectionExists("test".into()),
        Error::CollectionNotFound("test".into()),
        Error::UndefinedField {
            collection: "c".into(),
            field: "f".into(),
        },
        Error::FieldConflict {
            collection: "c".into(),
            field: "f".into(),
        },
        Error::Unavailable("test".into()),
        Error::Rejected("test".into()),
        Error::InvalidStructure("test".into()),
        Error::InvalidTransition {
            from: "AVAILABLE".into(),
            to: "INGESTING".into(),
        },
        Error::Config("test".into()),
        Error::NotFound("test".into()),
        Error::Io(std::io::Error::other("test")),
        Error::Serialization("test".into()),
        Error::Internal("test".into()),
    ];

    // Act
    let codes: Vec<&str> = errors.iter().map(Error::code).collect();

    // Assert
    let mut unique_codes = codes.clone();
    unique_codes.sort_unstable();
    unique_codes.dedup();
    assert_eq!(codes.len(), unique_codes.len(), "Error codes must be unique");
    for code in &codes {
        assert!(code.starts_with("DBV-"), "Code {code} should start with DBV-");
    }
}

#[test]
fn test_error_display_includes_code() {
    // Arrange
    let err = Error::CollectionNotFound("dbv-table-a-b".into());

    // Act
    let display = format!("{err}");

    // Assert
    assert!(display.contains("DBV-002"));
    assert!(display.contains("dbv-table-a-b"));
}

#[test]
fn test_invalid_transition_display() {
    let err = Error::InvalidTransition {
        from: "AVAILABLE".into(),
        to: "INGESTING".into(),
    };

    let display = err.to_string();

    assert!(display.contains("AVAILABLE"));
    assert!(display.contains("INGESTING"));
}

#[test]
fn test_only_transient_errors_are_recoverable() {
    assert!(Error::Unavailable("down".into()).is_recoverable());
    assert!(Error::Rejected("busy".into()).is_recoverable());
    assert!(Error::Io(std::io::Error::other("reset")).is_recoverable());

    assert!(!Error::UndefinedField {
        collection: "c".into(),
        field: "f".into()
    }
    .is_recoverable());
    assert!(!Error::CollectionNotFound("c".into()).is_recoverable());
    assert!(!Error::Internal("bug".into()).is_recoverable());
}

#[test]
fn test_serde_json_error_converts_to_serialization() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();

    let err: Error = json_err.into();

    assert_eq!(err.code(), "DBV-012");
}
