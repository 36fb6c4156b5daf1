#![allow(unsafe_code)]

//! Translation between [`Value`] and native value handles.
//!
//! Encoding produces an owned [`NativeValue`]. Decoding goes through a
//! [`ValueRef`], a borrowed view whose validity is tied to the handle that
//! owns the underlying memory (a row tuple or an owned value); every read pins
//! that owner first, so a view outliving its row fails instead of reading
//! freed memory.

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, Pin};
use crate::sys::{ByteBuf, ByteView, NativeApi, NativeState, RawHandle, RawInt128};

use super::convert::{date_to_days, days_to_date, ConversionError, TimeUnit};
use super::{Decimal, FromValue, InternalId, Interval, LogicalTypeId, Node, Rel, Text, Value};

/// An owned native value.
pub struct NativeValue {
    api: &'static NativeApi,
    handle: Handle,
}

impl NativeValue {
    /// Encodes a host value into a fresh native value.
    ///
    /// Lists must be homogeneous and map keys unique. Nodes, relationships and
    /// unsupported values cannot be created from the host side.
    pub fn encode(api: &'static NativeApi, value: &Value) -> Result<NativeValue> {
        encode_value(api, value, "value")
    }

    /// Borrowed view for reading.
    pub fn view(&self) -> Result<ValueRef<'_>> {
        let pin = self.handle.pin()?;
        let ptr = non_null(pin.as_ptr())?;
        Ok(ValueRef {
            api: self.api,
            owner: &self.handle,
            ptr,
        })
    }

    /// Decodes back into a host value.
    pub fn decode(&self) -> Result<Value> {
        self.view()?.decode()
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> Result<bool> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned owned value.
        Ok(unsafe { (self.api.value_is_null)(pin.as_ptr()) })
    }

    /// Sets or clears the null flag without changing the type tag.
    pub fn set_null(&mut self, null: bool) -> Result<()> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned owned value; `&mut self` rules out concurrent readers.
        unsafe { (self.api.value_set_null)(pin.as_ptr(), null) };
        Ok(())
    }

    /// Raw type tag.
    pub fn type_tag(&self) -> Result<u32> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned owned value.
        Ok(unsafe { (self.api.value_get_type)(pin.as_ptr()) })
    }

    /// Deep copy owned independently of `self`.
    pub fn duplicate(&self) -> Result<NativeValue> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned owned value; the clone is handed to us.
        let raw = unsafe { (self.api.value_clone)(pin.as_ptr()) };
        drop(pin);
        adopt_value(self.api, raw, "Clone value")
    }

    /// Releases the native value. Returns false if already released.
    pub fn release(&self) -> bool {
        self.handle.release()
    }

    pub(crate) fn pin(&self) -> Result<Pin> {
        self.handle.pin()
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeValue")
            .field("handle", &self.handle)
            .finish()
    }
}

fn non_null(raw: RawHandle) -> Result<NonNull<c_void>> {
    NonNull::new(raw).ok_or_else(|| Error::native("Read value", "engine returned a null value"))
}

fn adopt_value(api: &'static NativeApi, raw: RawHandle, stage: &'static str) -> Result<NativeValue> {
    if raw.is_null() {
        return Err(Error::native(stage, api.last_error()));
    }
    let handle = Handle::adopt(HandleKind::Value, None, api.value_destroy, raw, stage)?;
    Ok(NativeValue { api, handle })
}

fn encode_value(api: &'static NativeApi, value: &Value, context: &str) -> Result<NativeValue> {
    let lift = |err: ConversionError| err.into_error(context);
    // SAFETY (all arms): scalar constructors take plain data or a view that
    // outlives the call and copy what they need.
    let raw = match value {
        Value::Null(ty) => unsafe { (api.value_create_null)(ty.as_raw()) },
        Value::Bool(v) => unsafe { (api.value_create_bool)(*v) },
        Value::Int8(v) => unsafe { (api.value_create_int8)(*v) },
        Value::Int16(v) => unsafe { (api.value_create_int16)(*v) },
        Value::Int32(v) => unsafe { (api.value_create_int32)(*v) },
        Value::Int64(v) => unsafe { (api.value_create_int64)(*v) },
        Value::UInt8(v) => unsafe { (api.value_create_uint8)(*v) },
        Value::UInt16(v) => unsafe { (api.value_create_uint16)(*v) },
        Value::UInt32(v) => unsafe { (api.value_create_uint32)(*v) },
        Value::UInt64(v) => unsafe { (api.value_create_uint64)(*v) },
        Value::Int128(v) => unsafe { (api.value_create_int128)(RawInt128::from(*v)) },
        Value::Uuid(v) => unsafe { (api.value_create_uuid)(RawInt128::from(*v as i128)) },
        Value::Float(v) => unsafe { (api.value_create_float)(*v) },
        Value::Double(v) => unsafe { (api.value_create_double)(*v) },
        Value::Decimal(d) => unsafe {
            (api.value_create_decimal)(RawInt128::from(d.unscaled()), d.precision(), d.scale())
        },
        Value::String(text) => unsafe { (api.value_create_string)(ByteView::new(text.as_bytes())) },
        Value::Blob(bytes) => unsafe { (api.value_create_blob)(ByteView::new(bytes)) },
        Value::Date(d) => unsafe { (api.value_create_date)(date_to_days(*d)) },
        Value::Timestamp(ts)
        | Value::TimestampSec(ts)
        | Value::TimestampMs(ts)
        | Value::TimestampNs(ts)
        | Value::TimestampTz(ts) => {
            let ty = value
                .logical_type()
                .unwrap_or(LogicalTypeId::Timestamp);
            let unit = TimeUnit::of(ty).unwrap_or(TimeUnit::Micros);
            let units = unit.to_units(*ts, ty.name()).map_err(lift)?;
            unsafe { (api.value_create_timestamp)(ty.as_raw(), units) }
        }
        Value::Interval(i) => unsafe {
            (api.value_create_interval)(crate::sys::RawInterval {
                months: i.months,
                days: i.days,
                micros: i.micros,
            })
        },
        Value::InternalId(id) => unsafe {
            (api.value_create_internal_id)(crate::sys::RawInternalId {
                table_id: id.table_id,
                offset: id.offset,
            })
        },
        Value::List(items) => return encode_list(api, items, context),
        Value::Struct(fields) => return encode_struct(api, fields, context),
        Value::Map(entries) => return encode_map(api, entries, context),
        Value::Node(_) | Value::Rel(_) | Value::Unsupported { .. } => {
            return Err(Error::TypeMismatch {
                context: context.to_string(),
                expected: "a bindable value".into(),
                found: value.type_name().into_owned(),
            })
        }
    };
    adopt_value(api, raw, "Create value")
}

/// Encodes children and pins them for the duration of a composite constructor.
struct Children {
    values: Vec<NativeValue>,
}

impl Children {
    fn pins(&self) -> Result<Vec<Pin>> {
        self.values.iter().map(NativeValue::pin).collect()
    }
}

fn raw_ptrs(pins: &[Pin]) -> Vec<RawHandle> {
    pins.iter().map(Pin::as_ptr).collect()
}

fn composite(
    api: &'static NativeApi,
    stage: &'static str,
    create: impl FnOnce(*mut RawHandle) -> NativeState,
) -> Result<NativeValue> {
    let handle = Handle::acquire(api, HandleKind::Value, None, api.value_destroy, stage, create)?;
    Ok(NativeValue { api, handle })
}

fn encode_list(api: &'static NativeApi, items: &[Value], context: &str) -> Result<NativeValue> {
    let mut element_type: Option<LogicalTypeId> = None;
    for (index, item) in items.iter().enumerate() {
        if item.is_null() {
            continue;
        }
        let ty = item.logical_type();
        match element_type {
            None => element_type = ty,
            Some(expected) if Some(expected) != ty => {
                return Err(Error::TypeMismatch {
                    context: format!("{context}[{index}]"),
                    expected: expected.name().to_string(),
                    found: item.type_name().into_owned(),
                })
            }
            Some(_) => {}
        }
    }
    let children = Children {
        values: items
            .iter()
            .enumerate()
            .map(|(index, item)| encode_value(api, item, &format!("{context}[{index}]")))
            .collect::<Result<_>>()?,
    };
    let pins = children.pins()?;
    let ptrs = raw_ptrs(&pins);
    composite(api, "Create list", |out| {
        // SAFETY: every element is pinned; the engine copies them.
        unsafe { (api.value_create_list)(ptrs.len() as u64, ptrs.as_ptr(), out) }
    })
}

fn encode_struct(
    api: &'static NativeApi,
    fields: &[(String, Value)],
    context: &str,
) -> Result<NativeValue> {
    let children = Children {
        values: fields
            .iter()
            .map(|(name, v)| encode_value(api, v, &format!("{context}.{name}")))
            .collect::<Result<_>>()?,
    };
    let names: Vec<ByteView> = fields
        .iter()
        .map(|(name, _)| ByteView::new(name.as_bytes()))
        .collect();
    let pins = children.pins()?;
    let ptrs = raw_ptrs(&pins);
    composite(api, "Create struct", |out| {
        // SAFETY: names borrow `fields`, values are pinned; both outlive the call.
        unsafe { (api.value_create_struct)(ptrs.len() as u64, names.as_ptr(), ptrs.as_ptr(), out) }
    })
}

/// Map key identity: floats compare by bit pattern, so NaN keys collide.
struct MapKey<'a>(&'a Value);

impl PartialEq for MapKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        same_key(self.0, other.0)
    }
}

impl Eq for MapKey<'_> {}

impl Hash for MapKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_key(self.0, state);
    }
}

fn same_key(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_key(a, b))
        }
        (Value::Struct(x), Value::Struct(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((na, a), (nb, b))| na == nb && same_key(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((ka, a), (kb, b))| same_key(ka, kb) && same_key(a, b))
        }
        _ => a == b,
    }
}

// Must agree with `same_key`: variants hashed by discriminant only fall back
// to `==` there.
fn hash_key<H: Hasher>(value: &Value, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Bool(v) => v.hash(state),
        Value::Int8(v) => v.hash(state),
        Value::Int16(v) => v.hash(state),
        Value::Int32(v) => v.hash(state),
        Value::Int64(v) => v.hash(state),
        Value::UInt8(v) => v.hash(state),
        Value::UInt16(v) => v.hash(state),
        Value::UInt32(v) => v.hash(state),
        Value::UInt64(v) => v.hash(state),
        Value::Int128(v) => v.hash(state),
        Value::Uuid(v) => v.hash(state),
        Value::Float(v) => v.to_bits().hash(state),
        Value::Double(v) => v.to_bits().hash(state),
        Value::String(v) => v.hash(state),
        Value::Blob(v) => v.hash(state),
        Value::InternalId(v) => v.hash(state),
        Value::List(items) => {
            items.len().hash(state);
            items.iter().for_each(|item| hash_key(item, state));
        }
        Value::Struct(fields) => {
            fields.len().hash(state);
            for (name, field) in fields {
                name.hash(state);
                hash_key(field, state);
            }
        }
        Value::Map(entries) => {
            entries.len().hash(state);
            for (key, value) in entries {
                hash_key(key, state);
                hash_key(value, state);
            }
        }
        _ => {}
    }
}

fn encode_map(
    api: &'static NativeApi,
    entries: &[(Value, Value)],
    context: &str,
) -> Result<NativeValue> {
    let mut seen = FxHashSet::with_capacity_and_hasher(entries.len(), Default::default());
    for (index, (key, _)) in entries.iter().enumerate() {
        if key.is_null() {
            return Err(Error::invalid_argument(
                "encode map",
                format!("{context}: map key at index {index} is null"),
            ));
        }
        if !seen.insert(MapKey(key)) {
            return Err(Error::invalid_argument(
                "encode map",
                format!("{context}: duplicate map key at index {index}"),
            ));
        }
    }
    let keys = Children {
        values: entries
            .iter()
            .map(|(k, _)| encode_value(api, k, context))
            .collect::<Result<_>>()?,
    };
    let values = Children {
        values: entries
            .iter()
            .map(|(_, v)| encode_value(api, v, context))
            .collect::<Result<_>>()?,
    };
    let key_pins = keys.pins()?;
    let value_pins = values.pins()?;
    let key_ptrs = raw_ptrs(&key_pins);
    let value_ptrs = raw_ptrs(&value_pins);
    composite(api, "Create map", |out| {
        // SAFETY: keys and values are pinned and outlive the call.
        unsafe {
            (api.value_create_map)(
                key_ptrs.len() as u64,
                key_ptrs.as_ptr(),
                value_ptrs.as_ptr(),
                out,
            )
        }
    })
}

/// Borrowed native value, valid while its owning handle is.
///
/// Obtained from a row ([`crate::FlatTuple::value`]) or an owned
/// [`NativeValue`]. Nested views share the owner of the view they came from.
#[derive(Clone, Copy)]
pub struct ValueRef<'a> {
    api: &'static NativeApi,
    owner: &'a Handle,
    ptr: NonNull<c_void>,
}

impl fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef")
            .field("owner", &self.owner.kind())
            .finish()
    }
}

impl<'a> ValueRef<'a> {
    pub(crate) fn new(api: &'static NativeApi, owner: &'a Handle, raw: RawHandle) -> Result<Self> {
        Ok(ValueRef {
            api,
            owner,
            ptr: non_null(raw)?,
        })
    }

    fn guard(&self) -> Result<Pin> {
        self.owner.pin()
    }

    /// Raw type tag.
    pub fn type_tag(&self) -> Result<u32> {
        let _pin = self.guard()?;
        // SAFETY: owner is pinned, so the view is live.
        Ok(unsafe { (self.api.value_get_type)(self.ptr.as_ptr()) })
    }

    /// Known logical type, or `None` for tags this crate does not know.
    pub fn logical_type(&self) -> Result<Option<LogicalTypeId>> {
        Ok(LogicalTypeId::from_raw(self.type_tag()?))
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> Result<bool> {
        let _pin = self.guard()?;
        // SAFETY: owner is pinned.
        Ok(unsafe { (self.api.value_is_null)(self.ptr.as_ptr()) })
    }

    /// Copies the view into an owned native value.
    pub fn to_owned_native(&self) -> Result<NativeValue> {
        let pin = self.guard()?;
        // SAFETY: owner is pinned; the clone is handed to us.
        let raw = unsafe { (self.api.value_clone)(self.ptr.as_ptr()) };
        drop(pin);
        adopt_value(self.api, raw, "Clone value")
    }

    /// Decodes into a typed host value.
    pub fn get_as<T: FromValue>(&self) -> Result<T> {
        let ty = self.type_tag()?;
        self.decode()?
            .into_typed()
            .map_err(|err| err.into_error(format!("value of type tag {ty}")))
    }

    fn read<T: Default>(
        &self,
        getter: unsafe extern "C" fn(RawHandle, *mut T) -> NativeState,
        what: &'static str,
    ) -> Result<T> {
        let _pin = self.guard()?;
        let mut out = T::default();
        // SAFETY: owner is pinned and `out` is a valid destination.
        let state = unsafe { getter(self.ptr.as_ptr(), &mut out) };
        if state.is_success() {
            Ok(out)
        } else {
            Err(Error::native("Read value", format!("engine could not read {what}")))
        }
    }

    fn read_bytes(
        &self,
        getter: unsafe extern "C" fn(RawHandle, *mut ByteBuf) -> NativeState,
        what: &'static str,
    ) -> Result<Vec<u8>> {
        let _pin = self.guard()?;
        let mut buf = ByteBuf::empty();
        // SAFETY: owner is pinned; on success the buffer is ours.
        let state = unsafe { getter(self.ptr.as_ptr(), &mut buf) };
        if state.is_success() {
            Ok(self.api.take_bytes(buf))
        } else {
            Err(Error::native("Read value", format!("engine could not read {what}")))
        }
    }

    fn read_name(
        &self,
        getter: unsafe extern "C" fn(RawHandle, u64, *mut ByteBuf) -> NativeState,
        index: u64,
    ) -> Result<String> {
        let bytes = {
            let _pin = self.guard()?;
            let mut buf = ByteBuf::empty();
            // SAFETY: owner is pinned.
            let state = unsafe { getter(self.ptr.as_ptr(), index, &mut buf) };
            if !state.is_success() {
                return Err(Error::native(
                    "Read value",
                    format!("engine could not read field name {index}"),
                ));
            }
            self.api.take_bytes(buf)
        };
        String::from_utf8(bytes).map_err(|_| Error::TypeMismatch {
            context: format!("field name {index}"),
            expected: "UTF-8 STRING".into(),
            found: "invalid UTF-8".into(),
        })
    }

    fn child_with(
        &self,
        getter: unsafe extern "C" fn(RawHandle, u64, *mut RawHandle) -> NativeState,
        index: u64,
    ) -> Result<ValueRef<'a>> {
        let _pin = self.guard()?;
        let mut out: RawHandle = ptr::null_mut();
        // SAFETY: owner is pinned; the child view borrows from the same owner.
        let state = unsafe { getter(self.ptr.as_ptr(), index, &mut out) };
        if !state.is_success() {
            return Err(Error::native(
                "Read value",
                format!("engine could not read child {index}"),
            ));
        }
        ValueRef::new(self.api, self.owner, out)
    }

    /// Number of list elements, struct fields, map entries or properties.
    pub fn len(&self) -> Result<usize> {
        let count = self.read(self.api.value_get_child_count, "child count")?;
        usize::try_from(count).map_err(|_| Error::native("Read value", "child count overflow"))
    }

    /// Whether [`ValueRef::len`] is zero.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn checked_index(&self, index: usize) -> Result<u64> {
        let len = self.len()?;
        if index >= len {
            return Err(Error::invalid_argument(
                "child access",
                format!("index {index} out of range ({len} children)"),
            ));
        }
        Ok(index as u64)
    }

    /// List element or struct field at `index`.
    pub fn element(&self, index: usize) -> Result<ValueRef<'a>> {
        let index = self.checked_index(index)?;
        self.child_with(self.api.value_get_child, index)
    }

    /// Struct field (or node/relationship property) name and value at `index`.
    pub fn field_at(&self, index: usize) -> Result<(String, ValueRef<'a>)> {
        let index = self.checked_index(index)?;
        let name = self.read_name(self.api.value_get_child_name, index)?;
        Ok((name, self.child_with(self.api.value_get_child, index)?))
    }

    /// Struct field by exact name.
    pub fn field(&self, name: &str) -> Result<Option<ValueRef<'a>>> {
        for index in 0..self.len()? {
            let (field, value) = self.field_at(index)?;
            if field == name {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Map key and value at `index`.
    pub fn map_entry(&self, index: usize) -> Result<(ValueRef<'a>, ValueRef<'a>)> {
        let index = self.checked_index(index)?;
        Ok((
            self.child_with(self.api.value_get_map_key, index)?,
            self.child_with(self.api.value_get_map_value, index)?,
        ))
    }

    fn properties(&self) -> Result<Vec<(String, Value)>> {
        (0..self.len()?)
            .map(|index| {
                let (name, value) = self.field_at(index)?;
                Ok((name, value.decode()?))
            })
            .collect()
    }

    fn internal_id(
        &self,
        getter: unsafe extern "C" fn(RawHandle, *mut crate::sys::RawInternalId) -> NativeState,
        what: &'static str,
    ) -> Result<InternalId> {
        let raw = self.read(getter, what)?;
        Ok(InternalId::new(raw.table_id, raw.offset))
    }

    fn label(&self) -> Result<String> {
        let bytes = self.read_bytes(self.api.value_get_label, "label")?;
        String::from_utf8(bytes).map_err(|_| Error::TypeMismatch {
            context: "label".into(),
            expected: "UTF-8 STRING".into(),
            found: "invalid UTF-8".into(),
        })
    }

    fn timestamp(&self, ty: LogicalTypeId) -> Result<time::OffsetDateTime> {
        let raw = self.read(self.api.value_get_timestamp, ty.name())?;
        let unit = TimeUnit::of(ty).unwrap_or(TimeUnit::Micros);
        unit.from_units(raw, ty.name())
            .map_err(|err| err.into_error(ty.name()))
    }

    /// Decodes the view, recursively, into an owned [`Value`].
    pub fn decode(&self) -> Result<Value> {
        let tag = self.type_tag()?;
        let Some(ty) = LogicalTypeId::from_raw(tag) else {
            return Ok(Value::Unsupported { type_id: tag });
        };
        if self.is_null()? {
            return Ok(Value::Null(ty));
        }
        let api = self.api;
        Ok(match ty {
            LogicalTypeId::Bool => Value::Bool(self.read(api.value_get_bool, "BOOL")?),
            LogicalTypeId::Int8 => Value::Int8(self.read(api.value_get_int8, "INT8")?),
            LogicalTypeId::Int16 => Value::Int16(self.read(api.value_get_int16, "INT16")?),
            LogicalTypeId::Int32 => Value::Int32(self.read(api.value_get_int32, "INT32")?),
            LogicalTypeId::Int64 | LogicalTypeId::Serial => {
                Value::Int64(self.read(api.value_get_int64, "INT64")?)
            }
            LogicalTypeId::UInt8 => Value::UInt8(self.read(api.value_get_uint8, "UINT8")?),
            LogicalTypeId::UInt16 => Value::UInt16(self.read(api.value_get_uint16, "UINT16")?),
            LogicalTypeId::UInt32 => Value::UInt32(self.read(api.value_get_uint32, "UINT32")?),
            LogicalTypeId::UInt64 => Value::UInt64(self.read(api.value_get_uint64, "UINT64")?),
            LogicalTypeId::Int128 => {
                Value::Int128(self.read(api.value_get_int128, "INT128")?.into())
            }
            LogicalTypeId::Uuid => {
                Value::Uuid(i128::from(self.read(api.value_get_uuid, "UUID")?) as u128)
            }
            LogicalTypeId::Float => Value::Float(self.read(api.value_get_float, "FLOAT")?),
            LogicalTypeId::Double => Value::Double(self.read(api.value_get_double, "DOUBLE")?),
            LogicalTypeId::Decimal => {
                let _pin = self.guard()?;
                let mut unscaled = RawInt128::default();
                let (mut precision, mut scale) = (0u8, 0u8);
                // SAFETY: owner is pinned and the destinations are valid.
                let state = unsafe {
                    (api.value_get_decimal)(self.ptr.as_ptr(), &mut unscaled, &mut precision, &mut scale)
                };
                if !state.is_success() {
                    return Err(Error::native("Read value", "engine could not read DECIMAL"));
                }
                Value::Decimal(Decimal::new(unscaled.into(), precision, scale)?)
            }
            LogicalTypeId::String => {
                Value::String(Text::from_bytes(self.read_bytes(api.value_get_string, "STRING")?))
            }
            LogicalTypeId::Blob => Value::Blob(self.read_bytes(api.value_get_blob, "BLOB")?),
            LogicalTypeId::Date => {
                let days = self.read(api.value_get_date, "DATE")?;
                Value::Date(days_to_date(days).map_err(|err| err.into_error("DATE"))?)
            }
            LogicalTypeId::Timestamp => Value::Timestamp(self.timestamp(ty)?),
            LogicalTypeId::TimestampSec => Value::TimestampSec(self.timestamp(ty)?),
            LogicalTypeId::TimestampMs => Value::TimestampMs(self.timestamp(ty)?),
            LogicalTypeId::TimestampNs => Value::TimestampNs(self.timestamp(ty)?),
            LogicalTypeId::TimestampTz => Value::TimestampTz(self.timestamp(ty)?),
            LogicalTypeId::Interval => {
                let raw = self.read(api.value_get_interval, "INTERVAL")?;
                Value::Interval(Interval {
                    months: raw.months,
                    days: raw.days,
                    micros: raw.micros,
                })
            }
            LogicalTypeId::InternalId => {
                Value::InternalId(self.internal_id(api.value_get_internal_id, "INTERNAL_ID")?)
            }
            LogicalTypeId::List | LogicalTypeId::Array => Value::List(
                (0..self.len()?)
                    .map(|index| self.element(index)?.decode())
                    .collect::<Result<_>>()?,
            ),
            LogicalTypeId::Struct => Value::Struct(self.properties()?),
            LogicalTypeId::Map => Value::Map(
                (0..self.len()?)
                    .map(|index| {
                        let (key, value) = self.map_entry(index)?;
                        Ok((key.decode()?, value.decode()?))
                    })
                    .collect::<Result<_>>()?,
            ),
            LogicalTypeId::Node => Value::Node(Box::new(Node {
                id: self.internal_id(api.value_get_id, "node id")?,
                label: self.label()?,
                properties: self.properties()?,
            })),
            LogicalTypeId::Rel => Value::Rel(Box::new(Rel {
                id: self.internal_id(api.value_get_id, "rel id")?,
                src: self.internal_id(api.value_get_rel_src, "rel source")?,
                dst: self.internal_id(api.value_get_rel_dst, "rel destination")?,
                label: self.label()?,
                properties: self.properties()?,
            })),
            LogicalTypeId::Any
            | LogicalTypeId::RecursiveRel
            | LogicalTypeId::Union
            | LogicalTypeId::Pointer => Value::Unsupported { type_id: tag },
        })
    }
}

/// Encodes with `context` (a parameter or field name) in error messages.
pub(crate) fn encode_with_context(
    api: &'static NativeApi,
    value: &Value,
    context: &str,
) -> Result<NativeValue> {
    encode_value(api, value, context)
}
