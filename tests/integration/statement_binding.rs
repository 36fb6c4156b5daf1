//! Statement binding tests
//!
//! Covers declared-type checked binding, record auto-binding and batches.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use kuzu_bridge::loopback::LoopbackEngine;
use kuzu_bridge::{Connection, Error, LogicalTypeId, Result, Value};

const CREATE: &str = "CREATE (:Person {name: $name, age: $age})";
const WIDE: &str = "RETURN $big AS big";
const SMALL: &str = "RETURN $small AS small";
const NESTED: &str = "CREATE (:Team {title: $title, lead: $lead})";

kuzu_bridge::record! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Person {
        pub name: String,
        #[alias("Age")]
        pub age_years: i64,
        pub nickname: Option<String>,
    }
}

kuzu_bridge::record! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Team {
        pub title: String,
        pub lead: Person,
    }
}

fn echo(name: &'static str) -> impl Fn(&kuzu_bridge::loopback::Invocation<'_>) -> kuzu_bridge::loopback::HandlerResult {
    move |call| {
        Ok(vec![vec![call
            .param(name)
            .cloned()
            .ok_or_else(|| format!("Runtime exception: Parameter {name} not found."))?]])
    }
}

/// Engine whose CREATE fails on a repeated name, like a primary key would.
fn connect() -> (Connection, Arc<Mutex<Vec<Value>>>) {
    let created = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let sink = Arc::clone(&created);
    let db = LoopbackEngine::new()
        .statement(
            CREATE,
            &[("name", LogicalTypeId::String), ("age", LogicalTypeId::Int64)],
            &[],
            move |call| {
                let name: String = call.param_as("name")?;
                if !seen.lock().insert(name.clone()) {
                    return Err(format!(
                        "Runtime exception: Found duplicated primary key value {name}, which violates the uniqueness constraint of the primary key column."
                    ));
                }
                sink.lock().push(call.param("age").cloned().unwrap_or(Value::Null(LogicalTypeId::Int64)));
                Ok(Vec::new())
            },
        )
        .statement(WIDE, &[("big", LogicalTypeId::Int128)], &[("big", LogicalTypeId::Int128)], echo("big"))
        .statement(SMALL, &[("small", LogicalTypeId::Int8)], &[("small", LogicalTypeId::Int8)], echo("small"))
        .statement(
            NESTED,
            &[("title", LogicalTypeId::String), ("lead", LogicalTypeId::Struct)],
            &[],
            |_| Ok(Vec::new()),
        )
        .open()
        .expect("open loopback engine");
    (db.connect().expect("connect"), created)
}

fn person(name: &str, age: i64) -> Person {
    Person {
        name: name.into(),
        age_years: age,
        nickname: None,
    }
}

#[test]
fn unknown_parameters_are_rejected_before_the_engine() -> Result<()> {
    let (conn, _) = connect();
    let mut stmt = conn.prepare(CREATE)?;
    match stmt.bind("Name", "Alice") {
        Err(Error::UnknownParameter { name }) => assert_eq!(name, "Name"),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(stmt.bind("", 1i64), Err(Error::InvalidArgument { .. })));
    let names: Vec<_> = stmt.parameters().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["name", "age"]);
    assert_eq!(stmt.parameters()[1].logical_type(), Some(LogicalTypeId::Int64));
    Ok(())
}

#[test]
fn prepare_failures_carry_the_engine_message() {
    let (conn, _) = connect();
    match conn.prepare("MATCH (n) RETURN") {
        Err(Error::PrepareFailed { message }) => {
            assert!(message.starts_with("Parser exception"), "{message}")
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(conn.prepare("  "), Err(Error::InvalidArgument { .. })));
}

#[test]
fn executing_with_missing_bindings_fails_in_the_engine() -> Result<()> {
    let (conn, _) = connect();
    let mut stmt = conn.prepare(CREATE)?;
    stmt.bind("name", "Alice")?;
    match conn.execute(&stmt) {
        Err(Error::NativeCallFailed { stage, message }) => {
            assert_eq!(stage, "Execute");
            assert!(message.contains("Parameter age not found"), "{message}");
        }
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn int128_accepts_its_full_range_only() -> Result<()> {
    let (conn, _) = connect();
    let mut stmt = conn.prepare(WIDE)?;
    for v in [i128::MIN, i128::MAX] {
        stmt.bind("big", v)?;
        assert_eq!(conn.execute_scalar::<i128>(&stmt)?, v);
    }
    stmt.bind("big", i128::MAX as u128)?;
    match stmt.bind("big", i128::MAX as u128 + 1) {
        Err(Error::Overflow { context, target, .. }) => {
            assert_eq!(context, "parameter 'big'");
            assert_eq!(target, "INT128");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(Value::parse_int128("-170141183460469231731687303715884105729").is_err());
    assert_eq!(
        Value::parse_int128("-170141183460469231731687303715884105728")?,
        Value::Int128(i128::MIN)
    );
    Ok(())
}

#[test]
fn values_coerce_to_the_declared_type_only_when_lossless() -> Result<()> {
    let (conn, _) = connect();
    let mut stmt = conn.prepare(SMALL)?;
    stmt.bind("small", 100i64)?;
    assert_eq!(stmt.bound_value("small"), Some(&Value::Int8(100)));
    assert!(matches!(
        stmt.bind("small", 300i64),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        stmt.bind("small", "100"),
        Err(Error::TypeMismatch { .. })
    ));
    stmt.bind("small", None::<i64>)?;
    assert_eq!(stmt.bound_value("small"), Some(&Value::Null(LogicalTypeId::Int8)));
    assert_eq!(conn.execute_scalar::<Option<i8>>(&stmt)?, None);
    Ok(())
}

#[test]
fn the_last_binding_wins() -> Result<()> {
    let (conn, _) = connect();
    let mut stmt = conn.prepare(SMALL)?;
    stmt.bind("small", 1i8)?;
    stmt.bind("small", 2i8)?;
    assert_eq!(conn.execute_scalar::<i8>(&stmt)?, 2);
    // bindings persist across executions
    assert_eq!(conn.execute_scalar::<i8>(&stmt)?, 2);
    Ok(())
}

#[test]
fn records_bind_by_alias_ignoring_case() -> Result<()> {
    let (conn, created) = connect();
    let mut stmt = conn.prepare(CREATE)?;
    assert_eq!(stmt.bind_record(&person("Alice", 30))?, 2);
    conn.execute(&stmt)?;
    assert_eq!(created.lock().as_slice(), &[Value::Int64(30)]);
    Ok(())
}

#[test]
fn nested_records_are_not_auto_bound() -> Result<()> {
    let (conn, _) = connect();
    let mut stmt = conn.prepare(NESTED)?;
    let team = Team {
        title: "core".into(),
        lead: person("Alice", 30),
    };
    match stmt.bind_record(&team) {
        Err(Error::UnsupportedBindType { name, type_name }) => {
            assert_eq!(name, "lead");
            assert_eq!(type_name, "Person");
        }
        other => panic!("unexpected: {other:?}"),
    }
    // nothing was bound
    assert!(stmt.bound_value("title").is_none());
    // explicit binding of a record is allowed and becomes a STRUCT
    stmt.bind("lead", team.lead.clone())?;
    assert!(matches!(stmt.bound_value("lead"), Some(Value::Struct(_))));
    Ok(())
}

#[test]
fn batches_stop_at_the_first_failure() -> Result<()> {
    let (conn, created) = connect();
    let mut stmt = conn.prepare(CREATE)?;
    let people = [person("Alice", 30), person("Alice", 31), person("Bob", 40)];
    let err = conn.execute_batch(&mut stmt, &people).unwrap_err();
    assert!(err.to_string().contains("duplicated primary key"), "{err}");
    assert_eq!(created.lock().len(), 1);
    Ok(())
}

#[test]
fn tolerant_batches_report_each_failure_with_its_index() -> Result<()> {
    let (conn, created) = connect();
    let mut stmt = conn.prepare(CREATE)?;
    let people = [person("Alice", 30), person("Alice", 31), person("Bob", 40)];
    let mut failures = Vec::new();
    let succeeded = conn.execute_batch_tolerant(&mut stmt, &people, |item, index, err| {
        failures.push((index, item.age_years, err.to_string()));
    });
    assert_eq!(succeeded, 2);
    assert_eq!(failures.len(), 1);
    let (index, age, message) = &failures[0];
    assert_eq!((*index, *age), (1, 31));
    assert!(message.contains("duplicated primary key value Alice"), "{message}");
    assert_eq!(created.lock().as_slice(), &[Value::Int64(30), Value::Int64(40)]);
    Ok(())
}
