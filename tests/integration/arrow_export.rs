//! Arrow C Data Interface export tests
//!
//! - schema fields carry names, formats and nullability
//! - chunks share the cursor with row iteration
//! - validity bitmaps and typed buffer access
//! - descriptors stay tied to the result that produced them

#![allow(missing_docs)]
#![allow(unsafe_code)]

use kuzu_bridge::loopback::{self, LoopbackEngine};
use kuzu_bridge::{Database, Error, HandleKind, LogicalTypeId, Result, SystemConfig, Text, Value};

const PEOPLE: &str = "MATCH (p:Person) RETURN p.name AS name, p.age AS age, p.score AS score";
const EMPTY: &str = "MATCH (p:Person) WHERE false RETURN p.age AS age";
const FLAGS: &str = "MATCH (p:Person) RETURN p.active AS active";
const TAGS: &str = "MATCH (p:Person) RETURN p.tags AS tags";

fn engine() -> LoopbackEngine {
    LoopbackEngine::new()
        .statement(
            PEOPLE,
            &[],
            &[
                ("name", LogicalTypeId::String),
                ("age", LogicalTypeId::Int64),
                ("score", LogicalTypeId::Double),
            ],
            |_| {
                Ok(vec![
                    vec![Value::from("Alice"), Value::Int64(30), Value::Double(1.5)],
                    vec![Value::from("Bob"), Value::Null(LogicalTypeId::Int64), Value::Double(2.5)],
                    vec![Value::from(""), Value::Int64(27), Value::Null(LogicalTypeId::Double)],
                ])
            },
        )
        .statement(EMPTY, &[], &[("age", LogicalTypeId::Int64)], |_| Ok(Vec::new()))
        .statement(FLAGS, &[], &[("active", LogicalTypeId::Bool)], |_| {
            Ok(vec![
                vec![Value::Bool(true)],
                vec![Value::Null(LogicalTypeId::Bool)],
                vec![Value::Bool(false)],
            ])
        })
        .statement(TAGS, &[], &[("tags", LogicalTypeId::List)], |_| {
            Ok(vec![vec![Value::List(vec![Value::from("a")])]])
        })
}

#[test]
fn schema_describes_every_column() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let result = conn.query(PEOPLE)?;
    let schema = result.try_get_schema()?.expect("loopback exports arrow");
    assert_eq!(schema.format()?, "+s");
    let fields = schema.fields()?;
    let described: Vec<_> = fields
        .iter()
        .map(|f| (f.name.as_str(), f.format.as_str(), f.nullable))
        .collect();
    assert_eq!(
        described,
        [("name", "u", true), ("age", "l", true), ("score", "g", true)]
    );
    Ok(())
}

#[test]
fn chunks_advance_the_shared_cursor() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    let schema = result.try_get_schema()?.expect("schema");

    let first = result.try_get_next_chunk(2)?.expect("chunk");
    assert_eq!(first.len()?, 2);
    assert_eq!(first.n_children()?, 3);
    assert_eq!(result.rows_read(), 2);

    let second = result.try_get_next_chunk(2)?.expect("chunk");
    assert_eq!(second.len()?, 1);
    assert_eq!(result.rows_read(), 3);
    assert!(!result.has_next()?);

    let last = result.try_get_next_chunk(2)?.expect("chunk");
    assert!(last.is_empty()?);
    assert_eq!(result.rows_read(), 3);

    let names = first.column(0, &schema)?;
    assert_eq!(names.name()?, "name");
    assert_eq!(
        names.strings()?,
        [Some(Text::from("Alice")), Some(Text::from("Bob"))]
    );
    assert_eq!(
        second.column(0, &schema)?.strings()?,
        [Some(Text::from(""))]
    );
    Ok(())
}

#[test]
fn rows_and_chunks_interleave() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    let schema = result.try_get_schema()?.expect("schema");
    assert_eq!(result.next()?.get_as::<String, _>("name")?, "Alice");
    let rest = result.try_get_next_chunk(10)?.expect("chunk");
    assert_eq!(rest.len()?, 2);
    assert_eq!(rest.column(1, &schema)?.values::<i64>()?, [None, Some(27)]);
    assert!(matches!(
        result.next(),
        Err(Error::CursorExhausted { rows_read: 3 })
    ));
    Ok(())
}

#[test]
fn validity_is_present_only_when_needed() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    let schema = result.try_get_schema()?.expect("schema");
    let chunk = result.try_get_next_chunk(3)?.expect("chunk");

    let names = chunk.column(0, &schema)?;
    assert!(!names.has_validity()?);
    assert_eq!(names.null_count()?, 0);

    let ages = chunk.column(1, &schema)?;
    assert!(ages.has_validity()?);
    assert_eq!(ages.null_count()?, 1);
    assert!(ages.is_valid(0)? && !ages.is_valid(1)? && ages.is_valid(2)?);
    assert!(matches!(ages.is_valid(3), Err(Error::InvalidArgument { .. })));
    assert_eq!(ages.values::<i64>()?, [Some(30), None, Some(27)]);
    // zero-copy access sees the raw buffer, nulls included
    assert_eq!(ages.with_values(|raw: &[i64]| (raw.len(), raw[0], raw[2]))?, (3, 30, 27));

    let scores = chunk.column(2, &schema)?;
    assert_eq!(scores.values::<f64>()?, [Some(1.5), Some(2.5), None]);
    Ok(())
}

#[test]
fn typed_reads_check_the_column_format() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    let schema = result.try_get_schema()?.expect("schema");
    let chunk = result.try_get_next_chunk(3)?.expect("chunk");
    assert!(matches!(
        chunk.column(1, &schema)?.values::<i32>(),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        chunk.column(1, &schema)?.strings(),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        chunk.column(3, &schema),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

#[test]
fn booleans_are_bit_packed() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(FLAGS)?;
    let schema = result.try_get_schema()?.expect("schema");
    let chunk = result.try_get_next_chunk(8)?.expect("chunk");
    let active = chunk.column(0, &schema)?;
    assert_eq!(active.format()?, "b");
    assert_eq!(active.bools()?, [Some(true), None, Some(false)]);
    Ok(())
}

#[test]
fn empty_results_produce_empty_chunks() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(EMPTY)?;
    let schema = result.try_get_schema()?.expect("schema");
    let chunk = result.try_get_next_chunk(4)?.expect("chunk");
    assert!(chunk.is_empty()?);
    let ages = chunk.column(0, &schema)?;
    assert_eq!(ages.values::<i64>()?, Vec::<Option<i64>>::new());
    Ok(())
}

#[test]
fn chunk_size_must_be_positive() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    for size in [0, -1] {
        assert!(matches!(
            result.try_get_next_chunk(size),
            Err(Error::InvalidArgument { .. })
        ));
    }
    assert_eq!(result.rows_read(), 0);
    Ok(())
}

#[test]
fn columns_without_a_columnar_form_fail_export() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let result = conn.query(TAGS)?;
    match result.try_get_schema() {
        Err(Error::NativeCallFailed { message, .. }) => {
            assert!(message.starts_with("Not implemented"), "{message}")
        }
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn engines_without_arrow_report_none() -> Result<()> {
    let path = engine().register();
    let db = Database::open(loopback::api_without_arrow(), &path, &SystemConfig::default())?;
    let conn = db.connect()?;
    let mut result = conn.query(PEOPLE)?;
    assert!(result.try_get_schema()?.is_none());
    assert!(result.try_get_next_chunk(2)?.is_none());
    // rows are still readable the usual way
    assert_eq!(result.rows().count(), 3);
    Ok(())
}

#[test]
fn descriptors_fail_once_their_result_is_released() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    let schema = result.try_get_schema()?.expect("schema");
    let chunk = result.try_get_next_chunk(3)?.expect("chunk");
    result.close();
    match chunk.len() {
        Err(Error::InvalidHandleState { kind, .. }) => assert_eq!(kind, HandleKind::QueryResult),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(schema.fields().is_err());
    assert!(chunk.column(0, &schema).is_err());
    Ok(())
}

#[test]
fn exported_descriptors_are_released_by_the_consumer() -> Result<()> {
    let conn = engine().open()?.connect()?;
    let mut result = conn.query(PEOPLE)?;
    let mut schema = result.try_get_schema()?.expect("schema").export()?;
    let mut array = result.try_get_next_chunk(3)?.expect("chunk").export()?;
    assert!(!schema.is_released() && !array.is_released());
    assert_eq!(array.length, 3);
    assert_eq!(schema.n_children, 3);

    let release_schema = schema.release.expect("live schema");
    let release_array = array.release.expect("live array");
    // SAFETY: both descriptors are live and exclusively ours.
    unsafe {
        release_array(&mut array);
        release_schema(&mut schema);
    }
    assert!(schema.is_released() && array.is_released());
    Ok(())
}
