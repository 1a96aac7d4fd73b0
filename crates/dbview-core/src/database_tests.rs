//! Tests for `database` module

use super::database::*;
use super::structure::DatabaseStructure;

const ALL: [DatabaseStatus; 5] = [
    DatabaseStatus::MetadataOnly,
    DatabaseStatus::Ingesting,
    DatabaseStatus::Available,
    DatabaseStatus::Error,
    DatabaseStatus::Cancelled,
];

#[test]
fn test_new_database_is_metadata_only() {
    let db = ViewerDatabase::new("db-1", DatabaseStructure::default());

    assert_eq!(db.status(), DatabaseStatus::MetadataOnly);
    assert_eq!(db.counters(), IngestCounters::default());
    assert_eq!(db.uuid(), "db-1");
}

#[test]
fn test_forward_path_to_available() {
    // Arrange
    let mut db = ViewerDatabase::new("db-1", DatabaseStructure::default());

    // Act
    db.transition(DatabaseStatus::Ingesting).expect("ingesting");
    db.transition(DatabaseStatus::Available).expect("available");

    // Assert
    assert_eq!(db.status(), DatabaseStatus::Available);
}

#[test]
fn test_no_transition_leaves_a_terminal_state() {
    for terminal in [
        DatabaseStatus::Available,
        DatabaseStatus::Error,
        DatabaseStatus::Cancelled,
    ] {
        for next in ALL {
            assert!(
                !terminal.can_transition_to(next),
                "{terminal} -> {next} must be rejected"
            );
        }
    }
}

#[test]
fn test_backward_transition_rejected() {
    let mut db = ViewerDatabase::new("db-1", DatabaseStructure::default());
    db.transition(DatabaseStatus::Ingesting).unwrap();

    let err = db.transition(DatabaseStatus::MetadataOnly).unwrap_err();

    assert_eq!(err.code(), "DBV-008");
    assert_eq!(db.status(), DatabaseStatus::Ingesting);
}

#[test]
fn test_self_transition_rejected() {
    for status in ALL {
        assert!(!status.can_transition_to(status));
    }
}

#[test]
fn test_terminal_entity_is_immutable() {
    let mut db = ViewerDatabase::new("db-1", DatabaseStructure::default());
    db.transition(DatabaseStatus::Error).unwrap();

    assert!(db.set_current("s", "t").is_err());
    assert!(db
        .set_counters(IngestCounters {
            ingested_rows: 1,
            ..Default::default()
        })
        .is_err());
    assert!(db.set_source("x.siard", 3).is_err());
}

#[test]
fn test_mutators_while_ingesting() {
    let mut db = ViewerDatabase::new("db-1", DatabaseStructure::default());
    db.set_source("/data/x.siard", 2048).unwrap();
    db.transition(DatabaseStatus::Ingesting).unwrap();

    db.set_current("public", "book").unwrap();

    assert_eq!(db.siard_path(), Some("/data/x.siard"));
    assert_eq!(db.siard_size(), 2048);
    assert_eq!(db.current_schema_name(), "public");
    assert_eq!(db.current_table_name(), "book");
}

#[test]
fn test_status_string_roundtrip() {
    for status in ALL {
        let parsed: DatabaseStatus = status.as_str().parse().expect("parse");
        assert_eq!(parsed, status);
    }
    assert!("DONE".parse::<DatabaseStatus>().is_err());
}

#[test]
fn test_status_serde_uses_upper_case() {
    let json = serde_json::to_string(&DatabaseStatus::MetadataOnly).unwrap();

    assert_eq!(json, "\"METADATA_ONLY\"");
}

#[test]
fn test_restore_keeps_terminal_entity_details() {
    let db = ViewerDatabase::restore(
        "db-9",
        DatabaseStatus::Available,
        DatabaseStructure::default(),
        IngestCounters {
            ingested_rows: 7,
            total_rows: 7,
            ..IngestCounters::default()
        },
    )
    .with_source(Some("/uploads/a.siard".to_string()), 10)
    .with_current("s", "t");

    assert_eq!(db.status(), DatabaseStatus::Available);
    assert_eq!(db.siard_path(), Some("/uploads/a.siard"));
    assert_eq!(db.current_table_name(), "t");
    assert_eq!(db.counters().ingested_rows, 7);
}
