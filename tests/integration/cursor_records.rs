//! Cursor and record projection tests
//!
//! - forward-only iteration with exhaustion reporting
//! - projection into records by member name or alias
//! - scalar shape checks
//! - engine failures surface with their text intact

#![allow(missing_docs)]

use kuzu_bridge::loopback::LoopbackEngine;
use kuzu_bridge::{Connection, Error, HandleKind, LogicalTypeId, Result, Value};

const PEOPLE: &str = "MATCH (p:Person) RETURN p.name AS Name, p.age AS Age, p.city AS City";
const COUNT: &str = "MATCH (p:Person) RETURN count(*)";
const TWO_BY_TWO: &str = "UNWIND [1, 2] AS x RETURN x, x * 2";
const NOTHING: &str = "MATCH (p:Person) WHERE false RETURN p.name";
const BROKEN: &str = "MATCH (p:Person) RETURN p.salary";

kuzu_bridge::record! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Person {
        pub name: String,
        #[alias("Age")]
        pub age_years: i64,
        pub email: Option<String>,
    }
}

fn connect() -> Connection {
    let db = LoopbackEngine::new()
        .statement(
            PEOPLE,
            &[],
            &[
                ("Name", LogicalTypeId::String),
                ("Age", LogicalTypeId::Int64),
                ("City", LogicalTypeId::String),
            ],
            |_| {
                Ok(vec![
                    vec![Value::from("Alice"), Value::Int64(30), Value::from("Oslo")],
                    vec![Value::from("Bob"), Value::Int64(41), Value::Null(LogicalTypeId::String)],
                    vec![Value::from("Carol"), Value::Int64(27), Value::from("Lima")],
                ])
            },
        )
        .statement(COUNT, &[], &[("count(*)", LogicalTypeId::Int64)], |_| {
            Ok(vec![vec![Value::Int64(3)]])
        })
        .statement(
            TWO_BY_TWO,
            &[],
            &[("x", LogicalTypeId::Int64), ("x * 2", LogicalTypeId::Int64)],
            |_| {
                Ok(vec![
                    vec![Value::Int64(1), Value::Int64(2)],
                    vec![Value::Int64(2), Value::Int64(4)],
                ])
            },
        )
        .statement(NOTHING, &[], &[("p.name", LogicalTypeId::String)], |_| Ok(Vec::new()))
        .statement(BROKEN, &[], &[("p.salary", LogicalTypeId::Int64)], |_| {
            Err("Binder exception: Cannot find property salary for p.".to_string())
        })
        .open()
        .expect("open loopback engine");
    db.connect().expect("connect")
}

#[test]
fn cursors_are_forward_only_and_report_exhaustion() -> Result<()> {
    let conn = connect();
    let mut result = conn.query(PEOPLE)?;
    assert_eq!(result.column_names(), ["Name", "Age", "City"]);
    assert_eq!(result.columns()[1].logical_type(), Some(LogicalTypeId::Int64));
    assert_eq!(result.num_tuples()?, 3);

    let mut names = Vec::new();
    while result.has_next()? {
        let row = result.next()?;
        assert_eq!(row.len(), 3);
        names.push(row.get_as::<String, _>("Name")?);
    }
    assert_eq!(names, ["Alice", "Bob", "Carol"]);
    assert_eq!(result.rows_read(), 3);
    match result.next() {
        Err(Error::CursorExhausted { rows_read }) => assert_eq!(rows_read, 3),
        Err(other) => panic!("unexpected: {other:?}"),
        Ok(_) => panic!("cursor should be exhausted"),
    }
    // exhaustion does not release the result
    assert!(!result.has_next()?);
    Ok(())
}

#[test]
fn closed_results_reject_every_access() -> Result<()> {
    let conn = connect();
    let mut result = conn.query(PEOPLE)?;
    assert!(result.close());
    for err in [
        result.has_next().unwrap_err(),
        result.num_tuples().unwrap_err(),
        result.summary().unwrap_err(),
    ] {
        assert!(
            matches!(err, Error::InvalidHandleState { kind: HandleKind::QueryResult, .. }),
            "{err}"
        );
    }
    assert!(result.next().is_err());
    Ok(())
}

#[test]
fn nullable_columns_decode_as_options() -> Result<()> {
    let conn = connect();
    let cities: Vec<Option<String>> = conn
        .query(PEOPLE)?
        .rows()
        .map(|row| row?.get_as::<Option<String>, _>("City"))
        .collect::<Result<_>>()?;
    assert_eq!(cities, [Some("Oslo".to_string()), None, Some("Lima".to_string())]);

    let mut result = conn.query(PEOPLE)?;
    result.next()?;
    let bob = result.next()?;
    match bob.get_as::<String, _>(2) {
        Err(Error::TypeMismatch { context, found, .. }) => {
            assert_eq!(context, "column 'City'");
            assert_eq!(found, "NULL");
        }
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn records_project_by_name_and_alias() -> Result<()> {
    let conn = connect();
    let people: Vec<Person> = conn.query_as(PEOPLE)?;
    assert_eq!(
        people[0],
        Person {
            name: "Alice".into(),
            age_years: 30,
            email: None,
        }
    );
    assert_eq!(people.iter().map(|p| p.age_years).sum::<i64>(), 98);

    // lazily, from an explicit result
    let mut records = conn.query(PEOPLE)?.records::<Person>();
    assert_eq!(records.next().transpose()?.map(|p| p.name), Some("Alice".into()));
    drop(records);
    Ok(())
}

#[test]
fn owned_rows_outlive_the_cursor() -> Result<()> {
    let conn = connect();
    let mut result = conn.query(PEOPLE)?;
    let first = result.next_row()?.expect("first row");
    let second = result.next_row()?.expect("second row");
    assert!(result.close());
    assert_eq!(first.get_as::<String, _>("Name")?, "Alice");
    assert_eq!(second.get("Age")?, &Value::Int64(41));
    assert_eq!(first.columns()[2].name, "City");
    assert!(result.next_row().is_err());
    Ok(())
}

#[test]
fn scalars_require_one_row_and_one_column() -> Result<()> {
    let conn = connect();
    assert_eq!(conn.query_scalar::<i64>(COUNT)?, 3);
    assert_eq!(conn.query_scalar::<u32>(COUNT)?, 3);

    match conn.query_scalar::<i64>(TWO_BY_TWO) {
        Err(Error::UnexpectedShape { rows, columns }) => assert_eq!((rows, columns), (2, 2)),
        other => panic!("unexpected: {other:?}"),
    }
    match conn.query_scalar::<String>(NOTHING) {
        Err(Error::UnexpectedShape { rows, columns }) => assert_eq!((rows, columns), (0, 1)),
        other => panic!("unexpected: {other:?}"),
    }
    match conn.query_scalar::<i64>(PEOPLE) {
        Err(Error::UnexpectedShape { rows, columns }) => assert_eq!((rows, columns), (2, 3)),
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn engine_failures_keep_their_diagnostic() {
    let conn = connect();
    match conn.query(BROKEN) {
        Err(Error::NativeCallFailed { stage, message }) => {
            assert_eq!(stage, "Query");
            assert_eq!(message, "Binder exception: Cannot find property salary for p.");
        }
        other => panic!("unexpected: {other:?}"),
    }
    match conn.query("MATCH (x) RETURN x") {
        Err(Error::NativeCallFailed { message, .. }) => {
            assert!(message.starts_with("Parser exception"), "{message}")
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(conn.query(""), Err(Error::InvalidArgument { .. })));
}

#[test]
fn summaries_are_available_before_and_after_iteration() -> Result<()> {
    let conn = connect();
    let mut result = conn.query(PEOPLE)?;
    let before = result.summary()?;
    while result.has_next()? {
        result.next()?;
    }
    let after = result.summary()?;
    assert_eq!(before, after);
    assert!(after.compiling_time_ms >= 0.0 && after.execution_time_ms >= 0.0);
    Ok(())
}
