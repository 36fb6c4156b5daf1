//! Conversions between [`Value`] and host types.
//!
//! [`FromValue`] reads a typed host value out of a decoded [`Value`];
//! [`IntoParam`] turns host values into statement parameters. Both are
//! implemented per concrete type, so a missing conversion is a compile error
//! rather than a runtime surprise.

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::num::IntErrorKind;

use thiserror::Error as ThisError;
use time::{Date, OffsetDateTime};

use super::{Decimal, InternalId, Interval, LogicalTypeId, Node, Rel, Text, Value};
use crate::error::Error;

/// Why a value could not be converted. Lifted into [`Error`] together with the
/// column, parameter or field name by [`ConversionError::into_error`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConversionError {
    /// No lossless conversion exists.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Target type.
        expected: String,
        /// What was stored.
        found: String,
    },
    /// Outside the target's range.
    #[error("{value} does not fit in {target}")]
    Overflow {
        /// Target type.
        target: &'static str,
        /// Offending value.
        value: String,
    },
}

impl ConversionError {
    /// Attaches a context and converts into the crate error.
    pub fn into_error(self, context: impl Into<String>) -> Error {
        match self {
            ConversionError::TypeMismatch { expected, found } => Error::TypeMismatch {
                context: context.into(),
                expected,
                found,
            },
            ConversionError::Overflow { target, value } => Error::Overflow {
                context: context.into(),
                target,
                value,
            },
        }
    }
}

fn mismatch(expected: &str, found: &Value) -> ConversionError {
    let found = match found {
        Value::Null(_) => "NULL".to_string(),
        other => other.type_name().into_owned(),
    };
    ConversionError::TypeMismatch {
        expected: expected.to_string(),
        found,
    }
}

/// A host type that can be read out of a [`Value`].
pub trait FromValue: Sized {
    /// Converts without loss or fails.
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

impl Value {
    /// Converts into a host type; see [`FromValue`].
    pub fn into_typed<T: FromValue>(self) -> Result<T, ConversionError> {
        T::from_value(self)
    }
}

fn integer_of(value: &Value) -> Option<i128> {
    Some(match *value {
        Value::Int8(v) => v.into(),
        Value::Int16(v) => v.into(),
        Value::Int32(v) => v.into(),
        Value::Int64(v) => v.into(),
        Value::UInt8(v) => v.into(),
        Value::UInt16(v) => v.into(),
        Value::UInt32(v) => v.into(),
        Value::UInt64(v) => v.into(),
        Value::Int128(v) => v,
        _ => return None,
    })
}

fn out_of_range(expected: &str, value: &Value, wide: i128) -> ConversionError {
    ConversionError::TypeMismatch {
        expected: expected.to_string(),
        found: format!("{} {wide}", value.type_name()),
    }
}

macro_rules! integer_from_value {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ConversionError> {
                    match integer_of(&value) {
                        Some(wide) => <$ty>::try_from(wide)
                            .map_err(|_| out_of_range($name, &value, wide)),
                        None => Err(mismatch($name, &value)),
                    }
                }
            }
        )*
    };
}

integer_from_value! {
    i8 => "INT8",
    i16 => "INT16",
    i32 => "INT32",
    i64 => "INT64",
    u8 => "UINT8",
    u16 => "UINT16",
    u32 => "UINT32",
    u64 => "UINT64",
    i128 => "INT128",
}

impl FromValue for u128 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        if let Value::Uuid(u) = value {
            return Ok(u);
        }
        match integer_of(&value) {
            Some(wide) => u128::try_from(wide).map_err(|_| out_of_range("UINT128", &value, wide)),
            None => Err(mismatch("UINT128", &value)),
        }
    }
}

const F64_EXACT: i128 = 1 << 53;
const F32_EXACT: i128 = 1 << 24;

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Double(v) => Ok(v),
            Value::Float(v) => Ok(f64::from(v)),
            ref other => match integer_of(other) {
                Some(wide) if wide.abs() <= F64_EXACT => Ok(wide as f64),
                Some(wide) => Err(out_of_range("DOUBLE", other, wide)),
                None => Err(mismatch("DOUBLE", other)),
            },
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Double(v) if v.is_nan() || f64::from(v as f32) == v => Ok(v as f32),
            ref other => match integer_of(other) {
                Some(wide) if wide.abs() <= F32_EXACT => Ok(wide as f32),
                Some(wide) => Err(out_of_range("FLOAT", other, wide)),
                None => Err(mismatch("FLOAT", other)),
            },
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("BOOL", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::String(text) => {
                String::from_utf8(text.into_bytes()).map_err(|_| ConversionError::TypeMismatch {
                    expected: "UTF-8 STRING".into(),
                    found: "STRING with invalid UTF-8".into(),
                })
            }
            other => Err(mismatch("STRING", &other)),
        }
    }
}

impl FromValue for Text {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::String(text) => Ok(text),
            other => Err(mismatch("STRING", &other)),
        }
    }
}

/// Owned BLOB payload.
///
/// `Vec<u8>` already converts as a list of `UINT8`, so blobs go through this
/// wrapper instead.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Blob(bytes) => Ok(Bytes(bytes)),
            other => Err(mismatch("BLOB", &other)),
        }
    }
}

impl FromValue for Date {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Date(d) => Ok(d),
            other => Err(mismatch("DATE", &other)),
        }
    }
}

impl FromValue for OffsetDateTime {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Timestamp(ts)
            | Value::TimestampSec(ts)
            | Value::TimestampMs(ts)
            | Value::TimestampNs(ts)
            | Value::TimestampTz(ts) => Ok(ts),
            other => Err(mismatch("TIMESTAMP", &other)),
        }
    }
}

macro_rules! unwrap_from_value {
    ($($ty:ty => $variant:ident, $name:literal);* $(;)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ConversionError> {
                    match value {
                        Value::$variant(inner) => Ok(inner),
                        other => Err(mismatch($name, &other)),
                    }
                }
            }
        )*
    };
}

unwrap_from_value! {
    Interval => Interval, "INTERVAL";
    InternalId => InternalId, "INTERNAL_ID";
    Decimal => Decimal, "DECIMAL";
}

impl FromValue for Node {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Node(node) => Ok(*node),
            other => Err(mismatch("NODE", &other)),
        }
    }
}

impl FromValue for Rel {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Rel(rel) => Ok(*rel),
            other => Err(mismatch("REL", &other)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null(_) => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("LIST", &other)),
        }
    }
}

impl<T: FromValue, S: BuildHasher + Default> FromValue for HashMap<String, T, S> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Struct(fields) => fields
                .into_iter()
                .map(|(name, v)| Ok((name, T::from_value(v)?)))
                .collect(),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((String::from_value(k)?, T::from_value(v)?)))
                .collect(),
            other => Err(mismatch("STRUCT or MAP", &other)),
        }
    }
}

/// A statement parameter produced by [`IntoParam`].
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    /// A plain value.
    Value(Value),
    /// A record rendered as a STRUCT. Bindable by name, but rejected by
    /// record auto-binding.
    Nested {
        /// Rust type name of the record.
        type_name: &'static str,
        /// The record as a STRUCT value.
        value: Value,
    },
}

impl Param {
    /// The value to bind, regardless of origin.
    pub fn into_value(self) -> Value {
        match self {
            Param::Value(value) | Param::Nested { value, .. } => value,
        }
    }
}

/// A host type that can be bound as a statement parameter.
pub trait IntoParam {
    /// Converts into a parameter, failing before any native call when the value
    /// cannot be represented.
    fn into_param(self) -> Result<Param, ConversionError>;
}

macro_rules! into_param_via_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoParam for $ty {
                fn into_param(self) -> Result<Param, ConversionError> {
                    Ok(Param::Value(Value::from(self)))
                }
            }
        )*
    };
}

into_param_via_value!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    i128,
    f32,
    f64,
    String,
    &str,
    Text,
    Date,
    OffsetDateTime,
    Interval,
    InternalId,
    Decimal,
);

impl IntoParam for Value {
    fn into_param(self) -> Result<Param, ConversionError> {
        Ok(Param::Value(self))
    }
}

impl IntoParam for &Value {
    fn into_param(self) -> Result<Param, ConversionError> {
        Ok(Param::Value(self.clone()))
    }
}

impl IntoParam for &String {
    fn into_param(self) -> Result<Param, ConversionError> {
        Ok(Param::Value(Value::from(self.as_str())))
    }
}

impl IntoParam for u128 {
    fn into_param(self) -> Result<Param, ConversionError> {
        int128_from_u128(self).map(|v| Param::Value(Value::Int128(v)))
    }
}

impl IntoParam for Bytes {
    fn into_param(self) -> Result<Param, ConversionError> {
        Ok(Param::Value(Value::Blob(self.0)))
    }
}

impl IntoParam for &[u8] {
    fn into_param(self) -> Result<Param, ConversionError> {
        Ok(Param::Value(Value::Blob(self.to_vec())))
    }
}

impl IntoParam for time::Duration {
    fn into_param(self) -> Result<Param, ConversionError> {
        let nanos = self.whole_nanoseconds();
        if nanos % 1_000 != 0 {
            return Err(ConversionError::TypeMismatch {
                expected: "INTERVAL".into(),
                found: format!("duration with sub-microsecond part ({nanos}ns)"),
            });
        }
        let micros = i64::try_from(nanos / 1_000).map_err(|_| ConversionError::Overflow {
            target: "INTERVAL",
            value: format!("{nanos}ns"),
        })?;
        Ok(Param::Value(Value::Interval(Interval::from_micros(micros))))
    }
}

impl<T: IntoParam> IntoParam for Option<T> {
    fn into_param(self) -> Result<Param, ConversionError> {
        match self {
            Some(inner) => inner.into_param(),
            None => Ok(Param::Value(Value::Null(LogicalTypeId::Any))),
        }
    }
}

impl<T: IntoParam> IntoParam for Vec<T> {
    fn into_param(self) -> Result<Param, ConversionError> {
        let items = self
            .into_iter()
            .map(|item| item.into_param().map(Param::into_value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Param::Value(Value::List(items)))
    }
}

pub(crate) fn int128_from_u128(value: u128) -> Result<i128, ConversionError> {
    i128::try_from(value).map_err(|_| ConversionError::Overflow {
        target: "INT128",
        value: value.to_string(),
    })
}

pub(crate) fn parse_int128(text: &str) -> Result<i128, ConversionError> {
    let trimmed = text.trim();
    trimmed.parse::<i128>().map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ConversionError::Overflow {
            target: "INT128",
            value: trimmed.to_string(),
        },
        _ => ConversionError::TypeMismatch {
            expected: "INT128 literal".into(),
            found: format!("{trimmed:?}"),
        },
    })
}

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

pub(crate) fn date_to_days(date: Date) -> i32 {
    date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY
}

pub(crate) fn days_to_date(days: i32) -> Result<Date, ConversionError> {
    days.checked_add(UNIX_EPOCH_JULIAN_DAY)
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .ok_or_else(|| ConversionError::Overflow {
            target: "DATE",
            value: format!("{days} days since epoch"),
        })
}

/// Storage unit of a timestamp tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl TimeUnit {
    pub(crate) fn of(ty: LogicalTypeId) -> Option<TimeUnit> {
        match ty {
            LogicalTypeId::TimestampSec => Some(TimeUnit::Seconds),
            LogicalTypeId::TimestampMs => Some(TimeUnit::Millis),
            LogicalTypeId::Timestamp | LogicalTypeId::TimestampTz => Some(TimeUnit::Micros),
            LogicalTypeId::TimestampNs => Some(TimeUnit::Nanos),
            _ => None,
        }
    }

    const fn nanos(self) -> i128 {
        match self {
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Millis => 1_000_000,
            TimeUnit::Micros => 1_000,
            TimeUnit::Nanos => 1,
        }
    }

    /// Whole units since the epoch; fails when precision would be lost.
    pub(crate) fn to_units(
        self,
        ts: OffsetDateTime,
        target: &'static str,
    ) -> Result<i64, ConversionError> {
        let nanos = ts.unix_timestamp_nanos();
        if nanos % self.nanos() != 0 {
            return Err(ConversionError::TypeMismatch {
                expected: target.into(),
                found: format!("timestamp with finer precision ({nanos}ns since epoch)"),
            });
        }
        i64::try_from(nanos / self.nanos()).map_err(|_| ConversionError::Overflow {
            target,
            value: format!("{nanos}ns since epoch"),
        })
    }

    pub(crate) fn from_units(
        self,
        raw: i64,
        target: &'static str,
    ) -> Result<OffsetDateTime, ConversionError> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(raw) * self.nanos()).map_err(|_| {
            ConversionError::Overflow {
                target,
                value: raw.to_string(),
            }
        })
    }
}

fn timestamp_variant(ty: LogicalTypeId, ts: OffsetDateTime) -> Option<Value> {
    Some(match ty {
        LogicalTypeId::Timestamp => Value::Timestamp(ts),
        LogicalTypeId::TimestampSec => Value::TimestampSec(ts),
        LogicalTypeId::TimestampMs => Value::TimestampMs(ts),
        LogicalTypeId::TimestampNs => Value::TimestampNs(ts),
        LogicalTypeId::TimestampTz => Value::TimestampTz(ts),
        _ => return None,
    })
}

fn integer_to(wide: i128, target: LogicalTypeId, found: &Value) -> Result<Value, ConversionError> {
    let converted = match target {
        LogicalTypeId::Int8 => i8::try_from(wide).ok().map(Value::Int8),
        LogicalTypeId::Int16 => i16::try_from(wide).ok().map(Value::Int16),
        LogicalTypeId::Int32 => i32::try_from(wide).ok().map(Value::Int32),
        LogicalTypeId::Int64 | LogicalTypeId::Serial => i64::try_from(wide).ok().map(Value::Int64),
        LogicalTypeId::UInt8 => u8::try_from(wide).ok().map(Value::UInt8),
        LogicalTypeId::UInt16 => u16::try_from(wide).ok().map(Value::UInt16),
        LogicalTypeId::UInt32 => u32::try_from(wide).ok().map(Value::UInt32),
        LogicalTypeId::UInt64 => u64::try_from(wide).ok().map(Value::UInt64),
        LogicalTypeId::Int128 => Some(Value::Int128(wide)),
        LogicalTypeId::Double if wide.abs() <= F64_EXACT => Some(Value::Double(wide as f64)),
        LogicalTypeId::Float if wide.abs() <= F32_EXACT => Some(Value::Float(wide as f32)),
        _ => None,
    };
    converted.ok_or_else(|| out_of_range(target.name(), found, wide))
}

/// Converts a bound value to the parameter's declared type without loss.
///
/// Nulls take the declared type. Integers narrow or widen when the value fits,
/// floats widen (or narrow when exact), timestamps move between units when no
/// precision is dropped. Anything else is a mismatch.
pub(crate) fn coerce(value: Value, declared: LogicalTypeId) -> Result<Value, ConversionError> {
    if declared == LogicalTypeId::Any {
        return Ok(value);
    }
    let Some(actual) = value.logical_type() else {
        return Err(mismatch(declared.name(), &value));
    };
    if actual == declared {
        return Ok(value);
    }
    if value.is_null() {
        return Ok(Value::Null(declared));
    }
    if let Some(wide) = integer_of(&value) {
        return integer_to(wide, declared, &value);
    }
    match (declared, value) {
        (LogicalTypeId::Double, Value::Float(v)) => Ok(Value::Double(f64::from(v))),
        (LogicalTypeId::Float, Value::Double(v)) if v.is_nan() || f64::from(v as f32) == v => {
            Ok(Value::Float(v as f32))
        }
        (LogicalTypeId::Array, Value::List(items)) | (LogicalTypeId::List, Value::List(items)) => {
            Ok(Value::List(items))
        }
        (
            target,
            Value::Timestamp(ts)
            | Value::TimestampSec(ts)
            | Value::TimestampMs(ts)
            | Value::TimestampNs(ts)
            | Value::TimestampTz(ts),
        ) if target.is_timestamp() => {
            if let Some(unit) = TimeUnit::of(target) {
                unit.to_units(ts, target.name())?;
            }
            timestamp_variant(target, ts).ok_or_else(|| mismatch(target.name(), &Value::Null(actual)))
        }
        (target, other) => Err(mismatch(target.name(), &other)),
    }
}
