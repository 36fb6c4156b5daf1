//! Handle lifecycle tests
//!
//! Validates release ordering across the database -> connection -> statement
//! -> result -> row chain:
//! - release is idempotent at every level
//! - children fail with InvalidHandleState once an ancestor is gone
//! - rows are tied to their cursor position

#![allow(missing_docs)]

use kuzu_bridge::loopback::{self, LoopbackEngine};
use kuzu_bridge::sys::NativeApi;
use kuzu_bridge::{
    Database, Error, HandleKind, LogicalTypeId, Result, SystemConfig, Value,
};

fn people() -> LoopbackEngine {
    LoopbackEngine::new()
        .statement(
            "MATCH (p:Person) RETURN p.name AS Name",
            &[],
            &[("Name", LogicalTypeId::String)],
            |_| {
                Ok(vec![
                    vec![Value::from("Alice")],
                    vec![Value::from("Bob")],
                ])
            },
        )
        .statement(
            "MATCH (p:Person) WHERE p.name = $name RETURN p.name",
            &[("name", LogicalTypeId::String)],
            &[("p.name", LogicalTypeId::String)],
            |call| Ok(vec![vec![call.param("name").cloned().unwrap_or(Value::Null(LogicalTypeId::String))]]),
        )
}

fn assert_invalid(err: Error, expected: HandleKind, fragment: &str) {
    match err {
        Error::InvalidHandleState { kind, reason } => {
            assert_eq!(kind, expected);
            assert!(reason.contains(fragment), "{reason}");
        }
        other => panic!("expected InvalidHandleState, got {other:?}"),
    }
}

#[test]
fn release_is_idempotent_at_every_level() -> Result<()> {
    let db = people().open()?;
    let conn = db.connect()?;
    let stmt = conn.prepare("MATCH (p:Person) WHERE p.name = $name RETURN p.name")?;
    let result = conn.query("MATCH (p:Person) RETURN p.name AS Name")?;

    assert!(result.close());
    assert!(!result.close());
    assert!(stmt.close());
    assert!(!stmt.close());
    assert!(conn.close());
    assert!(!conn.close());
    assert!(db.close());
    assert!(!db.close());
    assert!(db.is_closed() && conn.is_closed() && stmt.is_closed() && result.is_closed());
    Ok(())
}

#[test]
fn closing_the_database_invalidates_connections() -> Result<()> {
    let db = people().open()?;
    let conn = db.connect()?;
    db.close();
    let err = conn.query("MATCH (p:Person) RETURN p.name AS Name").unwrap_err();
    assert_invalid(err, HandleKind::Connection, "parent database");
    let err = conn.interrupt_handle().interrupt().unwrap_err();
    assert_invalid(err, HandleKind::Connection, "parent database");
    // the orphan can still be released
    assert!(conn.close());
    Ok(())
}

#[test]
fn results_fail_after_their_connection_closes() -> Result<()> {
    let db = people().open()?;
    let conn = db.connect()?;
    let mut result = conn.query("MATCH (p:Person) RETURN p.name AS Name")?;
    conn.close();
    assert_invalid(result.has_next().unwrap_err(), HandleKind::QueryResult, "parent connection");
    assert!(result.next().is_err());
    assert!(result.close());
    Ok(())
}

#[test]
fn rows_fail_once_an_ancestor_is_released() -> Result<()> {
    let db = people().open()?;
    let conn = db.connect()?;
    let mut result = conn.query("MATCH (p:Person) RETURN p.name AS Name")?;
    let row = result.next()?;
    assert_eq!(row.get_as::<String, _>("Name")?, "Alice");
    conn.close();
    assert_invalid(row.get(0).unwrap_err(), HandleKind::Tuple, "parent connection");
    Ok(())
}

#[test]
fn values_borrowed_from_a_row_share_its_validity() -> Result<()> {
    let db = people().open()?;
    let conn = db.connect()?;
    let mut result = conn.query("MATCH (p:Person) RETURN p.name AS Name")?;
    let row = result.next()?;
    let view = row.value(0)?;
    assert_eq!(view.get_as::<String>()?, "Alice");
    let owned = view.to_owned_native()?;
    db.close();
    assert!(view.decode().is_err());
    // owned copies are roots of their own
    assert_eq!(owned.decode()?, Value::from("Alice"));
    Ok(())
}

#[test]
fn database_clones_share_one_native_instance() -> Result<()> {
    let db = people().open()?;
    let clone = db.clone();
    drop(db);
    let conn = clone.connect()?;
    assert_eq!(conn.query_as_names()?, vec!["Alice", "Bob"]);
    clone.close();
    assert!(conn.database().is_closed());
    Ok(())
}

trait NamesExt {
    fn query_as_names(&self) -> Result<Vec<String>>;
}

impl NamesExt for kuzu_bridge::Connection {
    fn query_as_names(&self) -> Result<Vec<String>> {
        self.query("MATCH (p:Person) RETURN p.name AS Name")?
            .rows()
            .map(|row| row?.get_as::<String, _>(0))
            .collect()
    }
}

#[test]
fn connections_outlive_dropped_database_handles() -> Result<()> {
    let conn = people().open()?.connect()?;
    assert_eq!(conn.query_as_names()?.len(), 2);
    Ok(())
}

#[test]
fn statements_are_bound_to_their_connection() -> Result<()> {
    let db = people().open()?;
    let first = db.connect()?;
    let second = db.connect()?;
    let mut stmt = first.prepare("MATCH (p:Person) WHERE p.name = $name RETURN p.name")?;
    stmt.bind("name", "Bob")?;
    assert!(matches!(
        second.execute(&stmt),
        Err(Error::InvalidArgument { .. })
    ));
    assert_eq!(first.execute_scalar::<String>(&stmt)?, "Bob");
    stmt.close();
    assert_invalid(first.execute(&stmt).unwrap_err(), HandleKind::Statement, "already released");
    Ok(())
}

#[test]
fn open_rejects_foreign_abi_revisions() {
    let foreign: &'static NativeApi = Box::leak(Box::new(NativeApi {
        abi_version: 99,
        ..*loopback::api()
    }));
    let err = Database::open(foreign, "loopback:0", &SystemConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");
    assert!(Database::open(loopback::api(), "", &SystemConfig::default()).is_err());
}

#[test]
fn open_reports_engine_diagnostics_verbatim() {
    let err = Database::open(loopback::api(), "loopback:missing", &SystemConfig::default())
        .unwrap_err();
    match err {
        Error::NativeCallFailed { stage, message } => {
            assert_eq!(stage, "Open database");
            assert!(message.starts_with("IO exception"), "{message}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn engine_version_is_readable() -> Result<()> {
    let db = people().open()?;
    assert!(db.version().starts_with("loopback-"));
    assert!(db.path().starts_with("loopback:"));
    Ok(())
}
