//! Value round-trip tests
//!
//! Every host value bound as a parameter and echoed back by the engine must
//! decode to the same value, including byte-exact strings.

#![allow(missing_docs)]

use proptest::prelude::*;
use time::{Date, OffsetDateTime};

use kuzu_bridge::loopback::LoopbackEngine;
use kuzu_bridge::{
    Connection, Decimal, InternalId, Interval, LogicalTypeId, NativeValue, Node, Rel, Result, Text,
    Value,
};

const ECHO: &str = "RETURN $v AS v";
const GRAPH: &str = "MATCH (a)-[r]->(b) RETURN a, r";

fn connect() -> Connection {
    let db = LoopbackEngine::new()
        .statement(ECHO, &[("v", LogicalTypeId::Any)], &[("v", LogicalTypeId::Any)], |call| {
            Ok(vec![vec![call
                .param("v")
                .cloned()
                .ok_or_else(|| "Runtime exception: Parameter v not found.".to_string())?]])
        })
        .statement(
            GRAPH,
            &[],
            &[("a", LogicalTypeId::Node), ("r", LogicalTypeId::Rel)],
            |_| {
                let alice = InternalId::new(0, 1);
                let bob = InternalId::new(0, 2);
                Ok(vec![vec![
                    Value::Node(Box::new(Node {
                        id: alice,
                        label: "Person".into(),
                        properties: vec![
                            ("name".into(), Value::from("Alice")),
                            ("age".into(), Value::Int64(30)),
                        ],
                    })),
                    Value::Rel(Box::new(Rel {
                        id: InternalId::new(1, 0),
                        src: alice,
                        dst: bob,
                        label: "Knows".into(),
                        properties: vec![("since".into(), Value::Int32(2019))],
                    })),
                ]])
            },
        )
        .open()
        .expect("open loopback engine");
    db.connect().expect("connect")
}

fn echo(conn: &Connection, value: &Value) -> Result<Value> {
    let mut stmt = conn.prepare(ECHO)?;
    stmt.bind("v", value)?;
    conn.execute_scalar::<Value>(&stmt)
}

fn date_from_days(days: i32) -> Date {
    Date::from_julian_day(2_440_588 + days).expect("date in range")
}

fn timestamp_from_micros(micros: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000).expect("timestamp in range")
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i8>().prop_map(Value::Int8),
        any::<i16>().prop_map(Value::Int16),
        any::<i32>().prop_map(Value::Int32),
        any::<i64>().prop_map(Value::Int64),
        any::<u8>().prop_map(Value::UInt8),
        any::<u16>().prop_map(Value::UInt16),
        any::<u32>().prop_map(Value::UInt32),
        any::<u64>().prop_map(Value::UInt64),
        any::<i128>().prop_map(Value::Int128),
        any::<u128>().prop_map(Value::Uuid),
        any::<f32>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(Value::Float),
        any::<f64>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(Value::Double),
        (any::<i64>(), 0u8..=18).prop_map(|(raw, scale)| {
            let unscaled = i128::from(raw % 1_000_000_000_000_000_000);
            Value::Decimal(Decimal::new(unscaled, 38, scale).expect("decimal fits"))
        }),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(|bytes| Value::String(Text::from_bytes(bytes))),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(Value::Blob),
        (-1_000_000i32..1_000_000).prop_map(|days| Value::Date(date_from_days(days))),
        (-50_000_000_000_000_000i64..200_000_000_000_000_000)
            .prop_map(|micros| Value::Timestamp(timestamp_from_micros(micros))),
        (any::<i32>(), any::<i32>(), any::<i64>()).prop_map(|(months, days, micros)| {
            Value::Interval(Interval {
                months,
                days,
                micros,
            })
        }),
        (any::<u64>(), any::<u64>()).prop_map(|(table, offset)| Value::InternalId(InternalId::new(table, offset))),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => arb_scalar(),
        1 => prop::collection::vec(any::<i64>(), 0..8)
            .prop_map(|items| Value::List(items.into_iter().map(Value::Int64).collect())),
        1 => prop::collection::vec(("[a-z]{1,6}", arb_scalar()), 0..4).prop_map(Value::Struct),
        1 => prop::collection::btree_map(any::<i32>(), arb_scalar(), 0..4).prop_map(|entries| {
            Value::Map(entries.into_iter().map(|(k, v)| (Value::Int32(k), v)).collect())
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_bound_values_echo_unchanged(value in arb_value()) {
        let conn = connect();
        prop_assert_eq!(echo(&conn, &value).unwrap(), value);
    }

    #[test]
    fn prop_native_values_decode_unchanged(value in arb_value()) {
        let conn = connect();
        let native = NativeValue::encode(conn.database().api(), &value).unwrap();
        prop_assert_eq!(native.decode().unwrap(), value);
    }
}

#[test]
fn strings_keep_embedded_nul_and_invalid_utf8() -> Result<()> {
    let conn = connect();
    let raw = vec![b'a', 0, b'b', 0xff, 0xfe, b'c'];
    let back = echo(&conn, &Value::String(Text::from_bytes(raw.clone())))?;
    let Value::String(text) = back else {
        panic!("expected a STRING, got {back:?}");
    };
    assert_eq!(text.as_bytes(), raw.as_slice());
    assert!(text.as_str().is_none());
    assert_eq!(text.to_string_lossy(), "a\0b\u{fffd}\u{fffd}c");
    Ok(())
}

#[test]
fn int128_extremes_survive() -> Result<()> {
    let conn = connect();
    for v in [i128::MIN, i128::MIN + 1, -1, 0, i128::MAX] {
        assert_eq!(echo(&conn, &Value::Int128(v))?, Value::Int128(v));
    }
    Ok(())
}

#[test]
fn float_specials_keep_their_bits() -> Result<()> {
    let conn = connect();
    for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, f64::MIN_POSITIVE, f64::MAX] {
        match echo(&conn, &Value::Double(v))? {
            Value::Double(back) => assert_eq!(back.to_bits(), v.to_bits()),
            other => panic!("expected a DOUBLE, got {other:?}"),
        }
    }
    for v in [f32::NAN, f32::NEG_INFINITY, -0.0f32] {
        match echo(&conn, &Value::Float(v))? {
            Value::Float(back) => assert_eq!(back.to_bits(), v.to_bits()),
            other => panic!("expected a FLOAT, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn typed_nulls_keep_their_type() -> Result<()> {
    let conn = connect();
    for ty in [LogicalTypeId::Int64, LogicalTypeId::String, LogicalTypeId::Date, LogicalTypeId::List] {
        assert_eq!(echo(&conn, &Value::Null(ty))?, Value::Null(ty));
    }
    Ok(())
}

#[test]
fn timestamp_units_follow_the_type() -> Result<()> {
    let conn = connect();
    let ts = timestamp_from_micros(1_700_000_000_123_456);
    let seconds = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("in range");
    assert_eq!(echo(&conn, &Value::TimestampTz(ts))?, Value::TimestampTz(ts));
    assert_eq!(echo(&conn, &Value::TimestampSec(seconds))?, Value::TimestampSec(seconds));
    // seconds cannot carry sub-second precision
    assert!(echo(&conn, &Value::TimestampSec(ts)).is_err());
    Ok(())
}

#[test]
fn nodes_and_relationships_decode_with_properties() -> Result<()> {
    let conn = connect();
    let mut result = conn.query(GRAPH)?;
    let row = result.next()?;
    let Value::Node(node) = row.get("a")? else {
        panic!("expected a node");
    };
    assert_eq!(node.label, "Person");
    assert_eq!(node.id, InternalId::new(0, 1));
    assert_eq!(node.property("age"), Some(&Value::Int64(30)));
    let Value::Rel(rel) = row.get("r")? else {
        panic!("expected a relationship");
    };
    assert_eq!((rel.src, rel.dst), (InternalId::new(0, 1), InternalId::new(0, 2)));
    assert_eq!(rel.property("since"), Some(&Value::Int32(2019)));
    let props = row.value("a")?;
    assert_eq!(props.field("name")?.map(|v| v.get_as::<String>()).transpose()?, Some("Alice".to_string()));
    Ok(())
}
