#![allow(unsafe_code)]

//! Value objects of the loopback engine and their entry points.

use std::ffi::c_void;

use crate::sys::{
    type_id, ByteBuf, ByteView, NativeState, RawHandle, RawInt128, RawInterval, RawInternalId,
};
use crate::value::convert::{date_to_days, days_to_date, TimeUnit};
use crate::value::{Decimal, InternalId, Interval, LogicalTypeId, Node, Rel, Text, Value};

use super::{alloc_bytes, fail, ok};

/// Engine-side storage of one value. Composites own their children; accessors
/// hand out views into them.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct LbValue {
    pub(super) tag: u32,
    pub(super) null: bool,
    pub(super) payload: Payload,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Payload {
    Empty,
    Bool(bool),
    /// Every integer tag, SERIAL, INT128 and UUID.
    Int(i128),
    Float(f32),
    Double(f64),
    Decimal {
        unscaled: i128,
        precision: u8,
        scale: u8,
    },
    /// STRING and BLOB.
    Bytes(Vec<u8>),
    Date(i32),
    /// Units follow the tag.
    Timestamp(i64),
    Interval(RawInterval),
    InternalId(RawInternalId),
    List(Vec<LbValue>),
    Fields(Vec<(Vec<u8>, LbValue)>),
    Entries(Vec<(LbValue, LbValue)>),
    Node {
        id: RawInternalId,
        label: Vec<u8>,
        properties: Vec<(Vec<u8>, LbValue)>,
    },
    Rel {
        id: RawInternalId,
        src: RawInternalId,
        dst: RawInternalId,
        label: Vec<u8>,
        properties: Vec<(Vec<u8>, LbValue)>,
    },
}

fn raw_id(id: InternalId) -> RawInternalId {
    RawInternalId {
        table_id: id.table_id,
        offset: id.offset,
    }
}

fn host_id(id: RawInternalId) -> InternalId {
    InternalId::new(id.table_id, id.offset)
}

fn host_fields(fields: &[(Vec<u8>, LbValue)]) -> Result<Vec<(String, Value)>, String> {
    fields
        .iter()
        .map(|(name, value)| Ok((String::from_utf8_lossy(name).into_owned(), value.to_host()?)))
        .collect()
}

fn engine_fields(fields: &[(String, Value)]) -> Result<Vec<(Vec<u8>, LbValue)>, String> {
    fields
        .iter()
        .map(|(name, value)| Ok((name.as_bytes().to_vec(), LbValue::from_host(value)?)))
        .collect()
}

impl LbValue {
    pub(super) fn new(tag: u32, payload: Payload) -> Self {
        Self {
            tag,
            null: false,
            payload,
        }
    }

    pub(super) fn null(tag: u32) -> Self {
        Self {
            tag,
            null: true,
            payload: Payload::Empty,
        }
    }

    /// Stores a host value the way the engine would produce it.
    pub(super) fn from_host(value: &Value) -> Result<LbValue, String> {
        let tag = value.type_tag();
        let payload = match value {
            Value::Null(_) => return Ok(LbValue::null(tag)),
            Value::Bool(v) => Payload::Bool(*v),
            Value::Int8(v) => Payload::Int(i128::from(*v)),
            Value::Int16(v) => Payload::Int(i128::from(*v)),
            Value::Int32(v) => Payload::Int(i128::from(*v)),
            Value::Int64(v) => Payload::Int(i128::from(*v)),
            Value::UInt8(v) => Payload::Int(i128::from(*v)),
            Value::UInt16(v) => Payload::Int(i128::from(*v)),
            Value::UInt32(v) => Payload::Int(i128::from(*v)),
            Value::UInt64(v) => Payload::Int(i128::from(*v)),
            Value::Int128(v) => Payload::Int(*v),
            Value::Uuid(v) => Payload::Int(*v as i128),
            Value::Float(v) => Payload::Float(*v),
            Value::Double(v) => Payload::Double(*v),
            Value::Decimal(d) => Payload::Decimal {
                unscaled: d.unscaled(),
                precision: d.precision(),
                scale: d.scale(),
            },
            Value::String(text) => Payload::Bytes(text.as_bytes().to_vec()),
            Value::Blob(bytes) => Payload::Bytes(bytes.clone()),
            Value::Date(date) => Payload::Date(date_to_days(*date)),
            Value::Timestamp(ts)
            | Value::TimestampSec(ts)
            | Value::TimestampMs(ts)
            | Value::TimestampNs(ts)
            | Value::TimestampTz(ts) => {
                let ty = value.logical_type().unwrap_or(LogicalTypeId::Timestamp);
                let unit = TimeUnit::of(ty).unwrap_or(TimeUnit::Micros);
                Payload::Timestamp(unit.to_units(*ts, ty.name()).map_err(|err| err.to_string())?)
            }
            Value::Interval(i) => Payload::Interval(RawInterval {
                months: i.months,
                days: i.days,
                micros: i.micros,
            }),
            Value::InternalId(id) => Payload::InternalId(raw_id(*id)),
            Value::List(items) => Payload::List(
                items
                    .iter()
                    .map(LbValue::from_host)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Struct(fields) => Payload::Fields(engine_fields(fields)?),
            Value::Map(entries) => Payload::Entries(
                entries
                    .iter()
                    .map(|(k, v)| Ok((LbValue::from_host(k)?, LbValue::from_host(v)?)))
                    .collect::<Result<_, String>>()?,
            ),
            Value::Node(node) => Payload::Node {
                id: raw_id(node.id),
                label: node.label.as_bytes().to_vec(),
                properties: engine_fields(&node.properties)?,
            },
            Value::Rel(rel) => Payload::Rel {
                id: raw_id(rel.id),
                src: raw_id(rel.src),
                dst: raw_id(rel.dst),
                label: rel.label.as_bytes().to_vec(),
                properties: engine_fields(&rel.properties)?,
            },
            Value::Unsupported { .. } => Payload::Empty,
        };
        Ok(LbValue::new(tag, payload))
    }

    /// Reads the value back as a host value (used for bound parameters).
    pub(super) fn to_host(&self) -> Result<Value, String> {
        let Some(ty) = LogicalTypeId::from_raw(self.tag) else {
            return Ok(Value::Unsupported { type_id: self.tag });
        };
        if self.null {
            return Ok(Value::Null(ty));
        }
        let narrow = |wide: i128| -> Result<Value, String> {
            let out = match ty {
                LogicalTypeId::Int8 => i8::try_from(wide).ok().map(Value::Int8),
                LogicalTypeId::Int16 => i16::try_from(wide).ok().map(Value::Int16),
                LogicalTypeId::Int32 => i32::try_from(wide).ok().map(Value::Int32),
                LogicalTypeId::Int64 | LogicalTypeId::Serial => i64::try_from(wide).ok().map(Value::Int64),
                LogicalTypeId::UInt8 => u8::try_from(wide).ok().map(Value::UInt8),
                LogicalTypeId::UInt16 => u16::try_from(wide).ok().map(Value::UInt16),
                LogicalTypeId::UInt32 => u32::try_from(wide).ok().map(Value::UInt32),
                LogicalTypeId::UInt64 => u64::try_from(wide).ok().map(Value::UInt64),
                LogicalTypeId::Int128 => Some(Value::Int128(wide)),
                LogicalTypeId::Uuid => Some(Value::Uuid(wide as u128)),
                _ => None,
            };
            out.ok_or_else(|| format!("corrupt {} payload", ty.name()))
        };
        Ok(match (&self.payload, ty) {
            (Payload::Bool(v), _) => Value::Bool(*v),
            (Payload::Int(v), _) => narrow(*v)?,
            (Payload::Float(v), _) => Value::Float(*v),
            (Payload::Double(v), _) => Value::Double(*v),
            (
                Payload::Decimal {
                    unscaled,
                    precision,
                    scale,
                },
                _,
            ) => Value::Decimal(Decimal::new(*unscaled, *precision, *scale).map_err(|err| err.to_string())?),
            (Payload::Bytes(bytes), LogicalTypeId::Blob) => Value::Blob(bytes.clone()),
            (Payload::Bytes(bytes), _) => Value::String(Text::from_bytes(bytes.clone())),
            (Payload::Date(days), _) => Value::Date(days_to_date(*days).map_err(|err| err.to_string())?),
            (Payload::Timestamp(raw), ty) => {
                let unit = TimeUnit::of(ty).unwrap_or(TimeUnit::Micros);
                let ts = unit.from_units(*raw, ty.name()).map_err(|err| err.to_string())?;
                match ty {
                    LogicalTypeId::TimestampSec => Value::TimestampSec(ts),
                    LogicalTypeId::TimestampMs => Value::TimestampMs(ts),
                    LogicalTypeId::TimestampNs => Value::TimestampNs(ts),
                    LogicalTypeId::TimestampTz => Value::TimestampTz(ts),
                    _ => Value::Timestamp(ts),
                }
            }
            (Payload::Interval(i), _) => Value::Interval(Interval {
                months: i.months,
                days: i.days,
                micros: i.micros,
            }),
            (Payload::InternalId(id), _) => Value::InternalId(host_id(*id)),
            (Payload::List(items), _) => Value::List(
                items
                    .iter()
                    .map(LbValue::to_host)
                    .collect::<Result<_, _>>()?,
            ),
            (Payload::Fields(fields), _) => Value::Struct(host_fields(fields)?),
            (Payload::Entries(entries), _) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.to_host()?, v.to_host()?)))
                    .collect::<Result<_, String>>()?,
            ),
            (
                Payload::Node {
                    id,
                    label,
                    properties,
                },
                _,
            ) => Value::Node(Box::new(Node {
                id: host_id(*id),
                label: String::from_utf8_lossy(label).into_owned(),
                properties: host_fields(properties)?,
            })),
            (
                Payload::Rel {
                    id,
                    src,
                    dst,
                    label,
                    properties,
                },
                _,
            ) => Value::Rel(Box::new(Rel {
                id: host_id(*id),
                src: host_id(*src),
                dst: host_id(*dst),
                label: String::from_utf8_lossy(label).into_owned(),
                properties: host_fields(properties)?,
            })),
            (Payload::Empty, _) => Value::Unsupported { type_id: self.tag },
        })
    }

    fn children(&self) -> Option<usize> {
        match &self.payload {
            Payload::List(items) => Some(items.len()),
            Payload::Fields(fields) => Some(fields.len()),
            Payload::Entries(entries) => Some(entries.len()),
            Payload::Node { properties, .. } | Payload::Rel { properties, .. } => {
                Some(properties.len())
            }
            _ => None,
        }
    }

    fn named(&self) -> Option<&[(Vec<u8>, LbValue)]> {
        match &self.payload {
            Payload::Fields(fields) => Some(fields),
            Payload::Node { properties, .. } | Payload::Rel { properties, .. } => Some(properties),
            _ => None,
        }
    }
}

pub(super) fn into_raw(value: LbValue) -> RawHandle {
    Box::into_raw(Box::new(value)).cast::<c_void>()
}

pub(super) fn view(value: &LbValue) -> RawHandle {
    (value as *const LbValue).cast_mut().cast::<c_void>()
}

/// # Safety
///
/// `raw` must be a live value created or viewed through this engine.
pub(super) unsafe fn value<'a>(raw: RawHandle) -> &'a LbValue {
    &*(raw as *const LbValue)
}

/// Borrowed children of a composite constructor call.
///
/// # Safety
///
/// `items` must point at `count` live values.
unsafe fn gather(count: u64, items: *const RawHandle) -> Vec<LbValue> {
    if count == 0 || items.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(items, count as usize)
        .iter()
        .map(|raw| value(*raw).clone())
        .collect()
}

pub(super) unsafe extern "C" fn value_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbValue));
}

pub(super) unsafe extern "C" fn value_clone(raw: RawHandle) -> RawHandle {
    into_raw(value(raw).clone())
}

pub(super) unsafe extern "C" fn value_create_null(tag: u32) -> RawHandle {
    into_raw(LbValue::null(tag))
}

pub(super) unsafe extern "C" fn value_create_bool(v: bool) -> RawHandle {
    into_raw(LbValue::new(type_id::BOOL, Payload::Bool(v)))
}

macro_rules! int_constructors {
    ($($name:ident($ty:ty) => $tag:expr;)*) => {
        $(
            pub(super) unsafe extern "C" fn $name(v: $ty) -> RawHandle {
                into_raw(LbValue::new($tag, Payload::Int(i128::from(v))))
            }
        )*
    };
}

int_constructors! {
    value_create_int8(i8) => type_id::INT8;
    value_create_int16(i16) => type_id::INT16;
    value_create_int32(i32) => type_id::INT32;
    value_create_int64(i64) => type_id::INT64;
    value_create_uint8(u8) => type_id::UINT8;
    value_create_uint16(u16) => type_id::UINT16;
    value_create_uint32(u32) => type_id::UINT32;
    value_create_uint64(u64) => type_id::UINT64;
}

pub(super) unsafe extern "C" fn value_create_int128(v: RawInt128) -> RawHandle {
    into_raw(LbValue::new(type_id::INT128, Payload::Int(i128::from(v))))
}

pub(super) unsafe extern "C" fn value_create_uuid(v: RawInt128) -> RawHandle {
    into_raw(LbValue::new(type_id::UUID, Payload::Int(i128::from(v))))
}

pub(super) unsafe extern "C" fn value_create_float(v: f32) -> RawHandle {
    into_raw(LbValue::new(type_id::FLOAT, Payload::Float(v)))
}

pub(super) unsafe extern "C" fn value_create_double(v: f64) -> RawHandle {
    into_raw(LbValue::new(type_id::DOUBLE, Payload::Double(v)))
}

pub(super) unsafe extern "C" fn value_create_decimal(
    unscaled: RawInt128,
    precision: u8,
    scale: u8,
) -> RawHandle {
    let unscaled = i128::from(unscaled);
    if Decimal::new(unscaled, precision, scale).is_err() {
        fail(format!(
            "Conversion exception: invalid DECIMAL({precision}, {scale}) value {unscaled}"
        ));
        return std::ptr::null_mut();
    }
    into_raw(LbValue::new(
        type_id::DECIMAL,
        Payload::Decimal {
            unscaled,
            precision,
            scale,
        },
    ))
}

pub(super) unsafe extern "C" fn value_create_string(bytes: ByteView) -> RawHandle {
    into_raw(LbValue::new(type_id::STRING, Payload::Bytes(bytes.as_slice().to_vec())))
}

pub(super) unsafe extern "C" fn value_create_blob(bytes: ByteView) -> RawHandle {
    into_raw(LbValue::new(type_id::BLOB, Payload::Bytes(bytes.as_slice().to_vec())))
}

pub(super) unsafe extern "C" fn value_create_date(days: i32) -> RawHandle {
    into_raw(LbValue::new(type_id::DATE, Payload::Date(days)))
}

pub(super) unsafe extern "C" fn value_create_timestamp(tag: u32, units: i64) -> RawHandle {
    let timestamp = LogicalTypeId::from_raw(tag).and_then(TimeUnit::of).is_some();
    if !timestamp {
        fail(format!("Conversion exception: type tag {tag} is not a timestamp"));
        return std::ptr::null_mut();
    }
    into_raw(LbValue::new(tag, Payload::Timestamp(units)))
}

pub(super) unsafe extern "C" fn value_create_interval(v: RawInterval) -> RawHandle {
    into_raw(LbValue::new(type_id::INTERVAL, Payload::Interval(v)))
}

pub(super) unsafe extern "C" fn value_create_internal_id(v: RawInternalId) -> RawHandle {
    into_raw(LbValue::new(type_id::INTERNAL_ID, Payload::InternalId(v)))
}

pub(super) unsafe extern "C" fn value_create_list(
    count: u64,
    items: *const RawHandle,
    out: *mut RawHandle,
) -> NativeState {
    let items = gather(count, items);
    let mut element = None;
    for item in items.iter().filter(|item| !item.null) {
        match element {
            None => element = Some(item.tag),
            Some(tag) if tag != item.tag => {
                return fail(format!(
                    "Binder exception: LIST elements must share one type, found tags {tag} and {}",
                    item.tag
                ))
            }
            Some(_) => {}
        }
    }
    *out = into_raw(LbValue::new(type_id::LIST, Payload::List(items)));
    ok()
}

pub(super) unsafe extern "C" fn value_create_struct(
    count: u64,
    names: *const ByteView,
    values: *const RawHandle,
    out: *mut RawHandle,
) -> NativeState {
    let values = gather(count, values);
    let names: Vec<Vec<u8>> = if count == 0 || names.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(names, count as usize)
            .iter()
            .map(|name| name.as_slice().to_vec())
            .collect()
    };
    if names.len() != values.len() {
        return fail("Binder exception: STRUCT field names and values differ in length");
    }
    *out = into_raw(LbValue::new(
        type_id::STRUCT,
        Payload::Fields(names.into_iter().zip(values).collect()),
    ));
    ok()
}

pub(super) unsafe extern "C" fn value_create_map(
    count: u64,
    keys: *const RawHandle,
    values: *const RawHandle,
    out: *mut RawHandle,
) -> NativeState {
    let keys = gather(count, keys);
    let values = gather(count, values);
    for (index, key) in keys.iter().enumerate() {
        if keys[..index].contains(key) {
            return fail("Runtime exception: Found duplicate key in map.");
        }
    }
    *out = into_raw(LbValue::new(
        type_id::MAP,
        Payload::Entries(keys.into_iter().zip(values).collect()),
    ));
    ok()
}

pub(super) unsafe extern "C" fn value_is_null(raw: RawHandle) -> bool {
    value(raw).null
}

pub(super) unsafe extern "C" fn value_set_null(raw: RawHandle, null: bool) {
    (*(raw as *mut LbValue)).null = null;
}

pub(super) unsafe extern "C" fn value_get_type(raw: RawHandle) -> u32 {
    value(raw).tag
}

pub(super) unsafe extern "C" fn value_get_bool(raw: RawHandle, out: *mut bool) -> NativeState {
    match value(raw).payload {
        Payload::Bool(v) => {
            *out = v;
            ok()
        }
        _ => fail("Runtime exception: value is not a BOOL"),
    }
}

macro_rules! int_getters {
    ($($name:ident($ty:ty) => $($tag:path)|+;)*) => {
        $(
            pub(super) unsafe extern "C" fn $name(raw: RawHandle, out: *mut $ty) -> NativeState {
                let v = value(raw);
                match (v.tag, &v.payload) {
                    ($($tag)|+, Payload::Int(wide)) => match <$ty>::try_from(*wide) {
                        Ok(narrow) => {
                            *out = narrow;
                            ok()
                        }
                        Err(_) => fail("Runtime exception: integer payload out of range"),
                    },
                    _ => fail(concat!("Runtime exception: value is not ", stringify!($ty))),
                }
            }
        )*
    };
}

int_getters! {
    value_get_int8(i8) => type_id::INT8;
    value_get_int16(i16) => type_id::INT16;
    value_get_int32(i32) => type_id::INT32;
    value_get_int64(i64) => type_id::INT64 | type_id::SERIAL;
    value_get_uint8(u8) => type_id::UINT8;
    value_get_uint16(u16) => type_id::UINT16;
    value_get_uint32(u32) => type_id::UINT32;
    value_get_uint64(u64) => type_id::UINT64;
}

unsafe fn wide_getter(raw: RawHandle, tag: u32, out: *mut RawInt128) -> NativeState {
    let v = value(raw);
    match (&v.payload, v.tag == tag) {
        (Payload::Int(wide), true) => {
            *out = RawInt128::from(*wide);
            ok()
        }
        _ => fail("Runtime exception: value is not a 128-bit integer"),
    }
}

pub(super) unsafe extern "C" fn value_get_int128(raw: RawHandle, out: *mut RawInt128) -> NativeState {
    wide_getter(raw, type_id::INT128, out)
}

pub(super) unsafe extern "C" fn value_get_uuid(raw: RawHandle, out: *mut RawInt128) -> NativeState {
    wide_getter(raw, type_id::UUID, out)
}

pub(super) unsafe extern "C" fn value_get_float(raw: RawHandle, out: *mut f32) -> NativeState {
    match value(raw).payload {
        Payload::Float(v) => {
            *out = v;
            ok()
        }
        _ => fail("Runtime exception: value is not a FLOAT"),
    }
}

pub(super) unsafe extern "C" fn value_get_double(raw: RawHandle, out: *mut f64) -> NativeState {
    match value(raw).payload {
        Payload::Double(v) => {
            *out = v;
            ok()
        }
        _ => fail("Runtime exception: value is not a DOUBLE"),
    }
}

pub(super) unsafe extern "C" fn value_get_decimal(
    raw: RawHandle,
    unscaled: *mut RawInt128,
    precision: *mut u8,
    scale: *mut u8,
) -> NativeState {
    match value(raw).payload {
        Payload::Decimal {
            unscaled: v,
            precision: p,
            scale: s,
        } => {
            *unscaled = RawInt128::from(v);
            *precision = p;
            *scale = s;
            ok()
        }
        _ => fail("Runtime exception: value is not a DECIMAL"),
    }
}

unsafe fn bytes_getter(raw: RawHandle, tag: u32, out: *mut ByteBuf) -> NativeState {
    let v = value(raw);
    match &v.payload {
        Payload::Bytes(bytes) if v.tag == tag => {
            *out = alloc_bytes(bytes);
            ok()
        }
        _ => fail("Runtime exception: value has no byte payload of the requested type"),
    }
}

pub(super) unsafe extern "C" fn value_get_string(raw: RawHandle, out: *mut ByteBuf) -> NativeState {
    bytes_getter(raw, type_id::STRING, out)
}

pub(super) unsafe extern "C" fn value_get_blob(raw: RawHandle, out: *mut ByteBuf) -> NativeState {
    bytes_getter(raw, type_id::BLOB, out)
}

pub(super) unsafe extern "C" fn value_get_date(raw: RawHandle, out: *mut i32) -> NativeState {
    match value(raw).payload {
        Payload::Date(days) => {
            *out = days;
            ok()
        }
        _ => fail("Runtime exception: value is not a DATE"),
    }
}

pub(super) unsafe extern "C" fn value_get_timestamp(raw: RawHandle, out: *mut i64) -> NativeState {
    match value(raw).payload {
        Payload::Timestamp(units) => {
            *out = units;
            ok()
        }
        _ => fail("Runtime exception: value is not a timestamp"),
    }
}

pub(super) unsafe extern "C" fn value_get_interval(raw: RawHandle, out: *mut RawInterval) -> NativeState {
    match value(raw).payload {
        Payload::Interval(v) => {
            *out = v;
            ok()
        }
        _ => fail("Runtime exception: value is not an INTERVAL"),
    }
}

pub(super) unsafe extern "C" fn value_get_internal_id(
    raw: RawHandle,
    out: *mut RawInternalId,
) -> NativeState {
    match value(raw).payload {
        Payload::InternalId(v) => {
            *out = v;
            ok()
        }
        _ => fail("Runtime exception: value is not an INTERNAL_ID"),
    }
}

pub(super) unsafe extern "C" fn value_get_child_count(raw: RawHandle, out: *mut u64) -> NativeState {
    match value(raw).children() {
        Some(count) => {
            *out = count as u64;
            ok()
        }
        None => fail("Runtime exception: value has no children"),
    }
}

pub(super) unsafe extern "C" fn value_get_child(
    raw: RawHandle,
    index: u64,
    out: *mut RawHandle,
) -> NativeState {
    let v = value(raw);
    let index = index as usize;
    let child = match &v.payload {
        Payload::List(items) => items.get(index),
        _ => v.named().and_then(|fields| fields.get(index)).map(|(_, child)| child),
    };
    match child {
        Some(child) => {
            *out = view(child);
            ok()
        }
        None => fail(format!("Runtime exception: no child at index {index}")),
    }
}

pub(super) unsafe extern "C" fn value_get_child_name(
    raw: RawHandle,
    index: u64,
    out: *mut ByteBuf,
) -> NativeState {
    match value(raw)
        .named()
        .and_then(|fields| fields.get(index as usize))
    {
        Some((name, _)) => {
            *out = alloc_bytes(name);
            ok()
        }
        None => fail(format!("Runtime exception: no named child at index {index}")),
    }
}

unsafe fn map_part(raw: RawHandle, index: u64, out: *mut RawHandle, key: bool) -> NativeState {
    match &value(raw).payload {
        Payload::Entries(entries) => match entries.get(index as usize) {
            Some((k, v)) => {
                *out = view(if key { k } else { v });
                ok()
            }
            None => fail(format!("Runtime exception: no map entry at index {index}")),
        },
        _ => fail("Runtime exception: value is not a MAP"),
    }
}

pub(super) unsafe extern "C" fn value_get_map_key(
    raw: RawHandle,
    index: u64,
    out: *mut RawHandle,
) -> NativeState {
    map_part(raw, index, out, true)
}

pub(super) unsafe extern "C" fn value_get_map_value(
    raw: RawHandle,
    index: u64,
    out: *mut RawHandle,
) -> NativeState {
    map_part(raw, index, out, false)
}

pub(super) unsafe extern "C" fn value_get_label(raw: RawHandle, out: *mut ByteBuf) -> NativeState {
    match &value(raw).payload {
        Payload::Node { label, .. } | Payload::Rel { label, .. } => {
            *out = alloc_bytes(label);
            ok()
        }
        _ => fail("Runtime exception: value is not a NODE or REL"),
    }
}

pub(super) unsafe extern "C" fn value_get_id(raw: RawHandle, out: *mut RawInternalId) -> NativeState {
    match &value(raw).payload {
        Payload::Node { id, .. } | Payload::Rel { id, .. } => {
            *out = *id;
            ok()
        }
        _ => fail("Runtime exception: value is not a NODE or REL"),
    }
}

pub(super) unsafe extern "C" fn value_get_rel_src(raw: RawHandle, out: *mut RawInternalId) -> NativeState {
    match &value(raw).payload {
        Payload::Rel { src, .. } => {
            *out = *src;
            ok()
        }
        _ => fail("Runtime exception: value is not a REL"),
    }
}

pub(super) unsafe extern "C" fn value_get_rel_dst(raw: RawHandle, out: *mut RawInternalId) -> NativeState {
    match &value(raw).payload {
        Payload::Rel { dst, .. } => {
            *out = *dst;
            ok()
        }
        _ => fail("Runtime exception: value is not a REL"),
    }
}
