//! Host-side representation of every value the engine can produce or accept.
//!
//! [`Value`] is a closed tagged union. Nullness is carried by
//! [`Value::Null`], which keeps the logical type it was declared with, so a
//! value can be turned into a null of the same type without losing its tag.
//! Tags the crate does not know decode to [`Value::Unsupported`] instead of
//! failing.

pub mod codec;
pub mod convert;

use std::borrow::Cow;
use std::fmt;

use serde_json::{json, Map as JsonMap, Value as JsonValue};
use time::{Date, OffsetDateTime};

use crate::error::{Error, Result};
use crate::sys::type_id;

pub use codec::{NativeValue, ValueRef};
pub use convert::FromValue;

/// Engine data type ids.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum LogicalTypeId {
    Any = type_id::ANY,
    Node = type_id::NODE,
    Rel = type_id::REL,
    RecursiveRel = type_id::RECURSIVE_REL,
    Serial = type_id::SERIAL,
    Bool = type_id::BOOL,
    Int64 = type_id::INT64,
    Int32 = type_id::INT32,
    Int16 = type_id::INT16,
    Int8 = type_id::INT8,
    UInt64 = type_id::UINT64,
    UInt32 = type_id::UINT32,
    UInt16 = type_id::UINT16,
    UInt8 = type_id::UINT8,
    Int128 = type_id::INT128,
    Double = type_id::DOUBLE,
    Float = type_id::FLOAT,
    Date = type_id::DATE,
    Timestamp = type_id::TIMESTAMP,
    TimestampSec = type_id::TIMESTAMP_SEC,
    TimestampMs = type_id::TIMESTAMP_MS,
    TimestampNs = type_id::TIMESTAMP_NS,
    TimestampTz = type_id::TIMESTAMP_TZ,
    Interval = type_id::INTERVAL,
    Decimal = type_id::DECIMAL,
    InternalId = type_id::INTERNAL_ID,
    String = type_id::STRING,
    Blob = type_id::BLOB,
    List = type_id::LIST,
    Array = type_id::ARRAY,
    Struct = type_id::STRUCT,
    Map = type_id::MAP,
    Union = type_id::UNION,
    Pointer = type_id::POINTER,
    Uuid = type_id::UUID,
}

impl LogicalTypeId {
    /// Maps a raw tag to a known type id; `None` for tags this crate does not know.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            type_id::ANY => LogicalTypeId::Any,
            type_id::NODE => LogicalTypeId::Node,
            type_id::REL => LogicalTypeId::Rel,
            type_id::RECURSIVE_REL => LogicalTypeId::RecursiveRel,
            type_id::SERIAL => LogicalTypeId::Serial,
            type_id::BOOL => LogicalTypeId::Bool,
            type_id::INT64 => LogicalTypeId::Int64,
            type_id::INT32 => LogicalTypeId::Int32,
            type_id::INT16 => LogicalTypeId::Int16,
            type_id::INT8 => LogicalTypeId::Int8,
            type_id::UINT64 => LogicalTypeId::UInt64,
            type_id::UINT32 => LogicalTypeId::UInt32,
            type_id::UINT16 => LogicalTypeId::UInt16,
            type_id::UINT8 => LogicalTypeId::UInt8,
            type_id::INT128 => LogicalTypeId::Int128,
            type_id::DOUBLE => LogicalTypeId::Double,
            type_id::FLOAT => LogicalTypeId::Float,
            type_id::DATE => LogicalTypeId::Date,
            type_id::TIMESTAMP => LogicalTypeId::Timestamp,
            type_id::TIMESTAMP_SEC => LogicalTypeId::TimestampSec,
            type_id::TIMESTAMP_MS => LogicalTypeId::TimestampMs,
            type_id::TIMESTAMP_NS => LogicalTypeId::TimestampNs,
            type_id::TIMESTAMP_TZ => LogicalTypeId::TimestampTz,
            type_id::INTERVAL => LogicalTypeId::Interval,
            type_id::DECIMAL => LogicalTypeId::Decimal,
            type_id::INTERNAL_ID => LogicalTypeId::InternalId,
            type_id::STRING => LogicalTypeId::String,
            type_id::BLOB => LogicalTypeId::Blob,
            type_id::LIST => LogicalTypeId::List,
            type_id::ARRAY => LogicalTypeId::Array,
            type_id::STRUCT => LogicalTypeId::Struct,
            type_id::MAP => LogicalTypeId::Map,
            type_id::UNION => LogicalTypeId::Union,
            type_id::POINTER => LogicalTypeId::Pointer,
            type_id::UUID => LogicalTypeId::Uuid,
            _ => return None,
        })
    }

    /// Raw tag as used on the native ABI.
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Engine spelling of the type name.
    pub const fn name(self) -> &'static str {
        match self {
            LogicalTypeId::Any => "ANY",
            LogicalTypeId::Node => "NODE",
            LogicalTypeId::Rel => "REL",
            LogicalTypeId::RecursiveRel => "RECURSIVE_REL",
            LogicalTypeId::Serial => "SERIAL",
            LogicalTypeId::Bool => "BOOL",
            LogicalTypeId::Int64 => "INT64",
            LogicalTypeId::Int32 => "INT32",
            LogicalTypeId::Int16 => "INT16",
            LogicalTypeId::Int8 => "INT8",
            LogicalTypeId::UInt64 => "UINT64",
            LogicalTypeId::UInt32 => "UINT32",
            LogicalTypeId::UInt16 => "UINT16",
            LogicalTypeId::UInt8 => "UINT8",
            LogicalTypeId::Int128 => "INT128",
            LogicalTypeId::Double => "DOUBLE",
            LogicalTypeId::Float => "FLOAT",
            LogicalTypeId::Date => "DATE",
            LogicalTypeId::Timestamp => "TIMESTAMP",
            LogicalTypeId::TimestampSec => "TIMESTAMP_SEC",
            LogicalTypeId::TimestampMs => "TIMESTAMP_MS",
            LogicalTypeId::TimestampNs => "TIMESTAMP_NS",
            LogicalTypeId::TimestampTz => "TIMESTAMP_TZ",
            LogicalTypeId::Interval => "INTERVAL",
            LogicalTypeId::Decimal => "DECIMAL",
            LogicalTypeId::InternalId => "INTERNAL_ID",
            LogicalTypeId::String => "STRING",
            LogicalTypeId::Blob => "BLOB",
            LogicalTypeId::List => "LIST",
            LogicalTypeId::Array => "ARRAY",
            LogicalTypeId::Struct => "STRUCT",
            LogicalTypeId::Map => "MAP",
            LogicalTypeId::Union => "UNION",
            LogicalTypeId::Pointer => "POINTER",
            LogicalTypeId::Uuid => "UUID",
        }
    }

    /// Whether the type is one of the fixed-width integer types.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            LogicalTypeId::Int8
                | LogicalTypeId::Int16
                | LogicalTypeId::Int32
                | LogicalTypeId::Int64
                | LogicalTypeId::Serial
                | LogicalTypeId::UInt8
                | LogicalTypeId::UInt16
                | LogicalTypeId::UInt32
                | LogicalTypeId::UInt64
                | LogicalTypeId::Int128
        )
    }

    /// Whether the type is one of the timestamp variants.
    pub const fn is_timestamp(self) -> bool {
        matches!(
            self,
            LogicalTypeId::Timestamp
                | LogicalTypeId::TimestampSec
                | LogicalTypeId::TimestampMs
                | LogicalTypeId::TimestampNs
                | LogicalTypeId::TimestampTz
        )
    }
}

impl fmt::Display for LogicalTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine string payload.
///
/// Holds raw bytes so values with embedded NUL or invalid UTF-8 round-trip
/// exactly. Use [`Text::as_str`] for checked access.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Text(Vec<u8>);

impl Text {
    /// Wraps arbitrary bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Text(bytes.into())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the text, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The text as `&str`, or `None` if it is not valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Lossy rendering for diagnostics.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the text has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => fmt::Debug::fmt(s, f),
            None => write!(f, "Text({:?})", self.0),
        }
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Text(value.as_bytes().to_vec())
    }
}

impl From<String> for Text {
    fn from(value: String) -> Self {
        Text(value.into_bytes())
    }
}

impl PartialEq<str> for Text {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Text {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

/// Fixed-point decimal: `unscaled * 10^-scale`, at most `precision` digits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    unscaled: i128,
    precision: u8,
    scale: u8,
}

/// Largest precision the engine supports.
pub const MAX_DECIMAL_PRECISION: u8 = 38;

impl Decimal {
    /// Builds a decimal, checking that `unscaled` fits in `precision` digits.
    pub fn new(unscaled: i128, precision: u8, scale: u8) -> Result<Self> {
        if precision == 0 || precision > MAX_DECIMAL_PRECISION || scale > precision {
            return Err(Error::invalid_argument(
                "Decimal::new",
                format!("invalid precision/scale ({precision}, {scale})"),
            ));
        }
        let limit = 10i128.pow(u32::from(precision));
        if unscaled.unsigned_abs() >= limit.unsigned_abs() {
            return Err(Error::Overflow {
                context: "decimal".into(),
                target: "DECIMAL",
                value: format!("{unscaled} (precision {precision})"),
            });
        }
        Ok(Self {
            unscaled,
            precision,
            scale,
        })
    }

    /// Unscaled integer value.
    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    /// Total number of digits.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Digits after the decimal point.
    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Nearest `f64`.
    pub fn to_f64(&self) -> f64 {
        self.unscaled as f64 / 10f64.powi(i32::from(self.scale))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.unsigned_abs().to_string();
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let scale = usize::from(self.scale);
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

/// Calendar interval with independent month, day and sub-day parts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Interval {
    /// Whole months.
    pub months: i32,
    /// Whole days.
    pub days: i32,
    /// Remaining microseconds.
    pub micros: i64,
}

impl Interval {
    /// Interval of exactly `micros` microseconds.
    pub const fn from_micros(micros: i64) -> Self {
        Self {
            months: 0,
            days: 0,
            micros,
        }
    }
}

impl TryFrom<time::Duration> for Interval {
    type Error = Error;

    fn try_from(value: time::Duration) -> Result<Self> {
        let nanos = value.whole_nanoseconds();
        if nanos % 1_000 != 0 {
            return Err(Error::TypeMismatch {
                context: "duration".into(),
                expected: "microsecond precision".into(),
                found: format!("{nanos}ns"),
            });
        }
        let micros = i64::try_from(nanos / 1_000).map_err(|_| Error::Overflow {
            context: "duration".into(),
            target: "INTERVAL",
            value: format!("{nanos}ns"),
        })?;
        Ok(Interval::from_micros(micros))
    }
}

/// Physical address of a node or relationship: table id plus offset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId {
    /// Table the record lives in.
    pub table_id: u64,
    /// Offset inside the table.
    pub offset: u64,
}

impl InternalId {
    /// Builds an identifier.
    pub const fn new(table_id: u64, offset: u64) -> Self {
        Self { table_id, offset }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.offset)
    }
}

/// Node record.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Internal identifier.
    pub id: InternalId,
    /// Table label.
    pub label: String,
    /// Properties in engine order.
    pub properties: Vec<(String, Value)>,
}

/// Relationship record.
#[derive(Clone, Debug, PartialEq)]
pub struct Rel {
    /// Internal identifier.
    pub id: InternalId,
    /// Source node.
    pub src: InternalId,
    /// Destination node.
    pub dst: InternalId,
    /// Table label.
    pub label: String,
    /// Properties in engine order.
    pub properties: Vec<(String, Value)>,
}

fn find_property<'a>(properties: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    properties
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

impl Node {
    /// Property by exact name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        find_property(&self.properties, name)
    }
}

impl Rel {
    /// Property by exact name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        find_property(&self.properties, name)
    }
}

/// A dynamically typed engine value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Null of the given logical type.
    Null(LogicalTypeId),
    /// BOOL.
    Bool(bool),
    /// INT8.
    Int8(i8),
    /// INT16.
    Int16(i16),
    /// INT32.
    Int32(i32),
    /// INT64 (also SERIAL).
    Int64(i64),
    /// UINT8.
    UInt8(u8),
    /// UINT16.
    UInt16(u16),
    /// UINT32.
    UInt32(u32),
    /// UINT64.
    UInt64(u64),
    /// INT128.
    Int128(i128),
    /// FLOAT.
    Float(f32),
    /// DOUBLE.
    Double(f64),
    /// DECIMAL.
    Decimal(Decimal),
    /// STRING, byte-exact.
    String(Text),
    /// BLOB.
    Blob(Vec<u8>),
    /// UUID as a 128-bit integer.
    Uuid(u128),
    /// DATE.
    Date(Date),
    /// TIMESTAMP (microsecond precision, UTC).
    Timestamp(OffsetDateTime),
    /// TIMESTAMP_SEC.
    TimestampSec(OffsetDateTime),
    /// TIMESTAMP_MS.
    TimestampMs(OffsetDateTime),
    /// TIMESTAMP_NS.
    TimestampNs(OffsetDateTime),
    /// TIMESTAMP_TZ (microsecond precision).
    TimestampTz(OffsetDateTime),
    /// INTERVAL.
    Interval(Interval),
    /// INTERNAL_ID.
    InternalId(InternalId),
    /// LIST (or fixed-size ARRAY) with homogeneous elements.
    List(Vec<Value>),
    /// STRUCT with ordered, named fields.
    Struct(Vec<(String, Value)>),
    /// MAP with unique keys.
    Map(Vec<(Value, Value)>),
    /// NODE.
    Node(Box<Node>),
    /// REL.
    Rel(Box<Rel>),
    /// A type this crate cannot decode; carries the raw tag.
    Unsupported {
        /// Raw engine type tag.
        type_id: u32,
    },
}

impl Value {
    /// Logical type of the value; `None` only for [`Value::Unsupported`].
    pub fn logical_type(&self) -> Option<LogicalTypeId> {
        Some(match self {
            Value::Null(ty) => *ty,
            Value::Bool(_) => LogicalTypeId::Bool,
            Value::Int8(_) => LogicalTypeId::Int8,
            Value::Int16(_) => LogicalTypeId::Int16,
            Value::Int32(_) => LogicalTypeId::Int32,
            Value::Int64(_) => LogicalTypeId::Int64,
            Value::UInt8(_) => LogicalTypeId::UInt8,
            Value::UInt16(_) => LogicalTypeId::UInt16,
            Value::UInt32(_) => LogicalTypeId::UInt32,
            Value::UInt64(_) => LogicalTypeId::UInt64,
            Value::Int128(_) => LogicalTypeId::Int128,
            Value::Float(_) => LogicalTypeId::Float,
            Value::Double(_) => LogicalTypeId::Double,
            Value::Decimal(_) => LogicalTypeId::Decimal,
            Value::String(_) => LogicalTypeId::String,
            Value::Blob(_) => LogicalTypeId::Blob,
            Value::Uuid(_) => LogicalTypeId::Uuid,
            Value::Date(_) => LogicalTypeId::Date,
            Value::Timestamp(_) => LogicalTypeId::Timestamp,
            Value::TimestampSec(_) => LogicalTypeId::TimestampSec,
            Value::TimestampMs(_) => LogicalTypeId::TimestampMs,
            Value::TimestampNs(_) => LogicalTypeId::TimestampNs,
            Value::TimestampTz(_) => LogicalTypeId::TimestampTz,
            Value::Interval(_) => LogicalTypeId::Interval,
            Value::InternalId(_) => LogicalTypeId::InternalId,
            Value::List(_) => LogicalTypeId::List,
            Value::Struct(_) => LogicalTypeId::Struct,
            Value::Map(_) => LogicalTypeId::Map,
            Value::Node(_) => LogicalTypeId::Node,
            Value::Rel(_) => LogicalTypeId::Rel,
            Value::Unsupported { .. } => return None,
        })
    }

    /// Raw type tag, including unknown tags.
    pub fn type_tag(&self) -> u32 {
        match self {
            Value::Unsupported { type_id } => *type_id,
            other => other
                .logical_type()
                .map_or(type_id::ANY, LogicalTypeId::as_raw),
        }
    }

    /// Type name for diagnostics.
    pub fn type_name(&self) -> Cow<'static, str> {
        match self.logical_type() {
            Some(ty) => Cow::Borrowed(ty.name()),
            None => Cow::Owned(format!("UNSUPPORTED({})", self.type_tag())),
        }
    }

    /// Whether this is a null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// A null of the same logical type.
    pub fn as_null(&self) -> Value {
        Value::Null(self.logical_type().unwrap_or(LogicalTypeId::Any))
    }

    /// INT128 from an unsigned magnitude, failing with [`Error::Overflow`]
    /// above `i128::MAX`.
    pub fn int128_from_u128(value: u128) -> Result<Value> {
        convert::int128_from_u128(value)
            .map(Value::Int128)
            .map_err(|err| err.into_error("INT128 literal"))
    }

    /// INT128 from decimal text, failing with [`Error::Overflow`] outside
    /// `[-2^127, 2^127 - 1]`.
    pub fn parse_int128(text: &str) -> Result<Value> {
        convert::parse_int128(text)
            .map(Value::Int128)
            .map_err(|err| err.into_error("INT128 literal"))
    }

    /// JSON rendering for diagnostics. Lossy for binary and non-UTF-8 payloads.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(self)
    }
}

fn properties_to_json(properties: &[(String, Value)]) -> JsonValue {
    let map: JsonMap<String, JsonValue> = properties
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();
    JsonValue::Object(map)
}

impl From<&Value> for JsonValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null(_) => JsonValue::Null,
            Value::Bool(b) => json!(*b),
            Value::Int8(v) => json!(*v),
            Value::Int16(v) => json!(*v),
            Value::Int32(v) => json!(*v),
            Value::Int64(v) => json!(*v),
            Value::UInt8(v) => json!(*v),
            Value::UInt16(v) => json!(*v),
            Value::UInt32(v) => json!(*v),
            Value::UInt64(v) => json!(*v),
            Value::Int128(v) => json!(v.to_string()),
            Value::Float(v) => json!(*v),
            Value::Double(v) => json!(*v),
            Value::Decimal(d) => json!(d.to_string()),
            Value::String(t) => json!(t.to_string_lossy()),
            Value::Blob(bytes) => JsonValue::Array(bytes.iter().map(|b| json!(*b)).collect()),
            Value::Uuid(u) => json!(format!("{u:032x}")),
            Value::Date(d) => json!(d.to_string()),
            Value::Timestamp(ts)
            | Value::TimestampSec(ts)
            | Value::TimestampMs(ts)
            | Value::TimestampNs(ts)
            | Value::TimestampTz(ts) => json!({ "$timestamp_ns": ts.unix_timestamp_nanos().to_string() }),
            Value::Interval(i) => {
                json!({ "months": i.months, "days": i.days, "micros": i.micros })
            }
            Value::InternalId(id) => json!({ "table": id.table_id, "offset": id.offset }),
            Value::List(items) => JsonValue::Array(items.iter().map(JsonValue::from).collect()),
            Value::Struct(fields) => properties_to_json(fields),
            Value::Map(entries) => JsonValue::Array(
                entries
                    .iter()
                    .map(|(k, v)| json!({ "key": k.to_json(), "value": v.to_json() }))
                    .collect(),
            ),
            Value::Node(node) => json!({
                "_id": Value::InternalId(node.id).to_json(),
                "_label": node.label,
                "properties": properties_to_json(&node.properties),
            }),
            Value::Rel(rel) => json!({
                "_id": Value::InternalId(rel.id).to_json(),
                "_src": Value::InternalId(rel.src).to_json(),
                "_dst": Value::InternalId(rel.dst).to_json(),
                "_label": rel.label,
                "properties": properties_to_json(&rel.properties),
            }),
            Value::Unsupported { type_id } => json!({ "$unsupported": type_id }),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i128 => Int128,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    Text => String,
    String => String,
    &str => String,
    Date => Date,
    OffsetDateTime => Timestamp,
    Interval => Interval,
    InternalId => InternalId,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Null(LogicalTypeId::Any),
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}
