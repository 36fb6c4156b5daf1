#![allow(unsafe_code)]

//! Columnar export of loopback results through the C Data Interface.
//!
//! Buffers are carved out of `Vec<u64>` so every one of them is 8-byte
//! aligned; the validity bitmap is omitted for columns without nulls.

use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::atomic::Ordering;

use crate::sys::arrow::{ArrowArray, ArrowSchema, ARROW_FLAG_NULLABLE};
use crate::sys::{type_id, NativeState, RawHandle};

use super::values::{LbValue, Payload};
use super::{fail, object, ok, LbResult};

fn format_of(tag: u32) -> Option<&'static str> {
    Some(match tag {
        type_id::BOOL => "b",
        type_id::INT8 => "c",
        type_id::INT16 => "s",
        type_id::INT32 => "i",
        type_id::INT64 | type_id::SERIAL => "l",
        type_id::UINT8 => "C",
        type_id::UINT16 => "S",
        type_id::UINT32 => "I",
        type_id::UINT64 => "L",
        type_id::FLOAT => "f",
        type_id::DOUBLE => "g",
        type_id::STRING => "u",
        type_id::BLOB => "z",
        type_id::DATE => "tdD",
        type_id::TIMESTAMP => "tsu:",
        type_id::TIMESTAMP_SEC => "tss:",
        type_id::TIMESTAMP_MS => "tsm:",
        type_id::TIMESTAMP_NS => "tsn:",
        type_id::TIMESTAMP_TZ => "tsu:UTC",
        _ => return None,
    })
}

fn unsupported(result: &LbResult) -> Option<&str> {
    result
        .columns
        .iter()
        .find(|(_, tag)| format_of(*tag).is_none())
        .map(|(name, _)| name.as_str())
}

struct SchemaOwner {
    _format: CString,
    _name: CString,
    children: Box<[*mut ArrowSchema]>,
}

fn cstring(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

fn schema_node(format: &str, name: &str, flags: i64, children: Vec<*mut ArrowSchema>) -> ArrowSchema {
    let format = cstring(format);
    let name = cstring(name);
    let mut children = children.into_boxed_slice();
    let n_children = children.len() as i64;
    let children_ptr = if children.is_empty() {
        ptr::null_mut()
    } else {
        children.as_mut_ptr()
    };
    let mut schema = ArrowSchema::empty();
    schema.format = format.as_ptr();
    schema.name = name.as_ptr();
    schema.flags = flags;
    schema.n_children = n_children;
    schema.children = children_ptr;
    schema.release = Some(release_schema);
    schema.private_data = Box::into_raw(Box::new(SchemaOwner {
        _format: format,
        _name: name,
        children,
    }))
    .cast::<c_void>();
    schema
}

unsafe extern "C" fn release_schema(schema: *mut ArrowSchema) {
    let Some(schema) = schema.as_mut() else {
        return;
    };
    if schema.release.is_none() {
        return;
    }
    let owner = Box::from_raw(schema.private_data.cast::<SchemaOwner>());
    for &child in owner.children.iter() {
        if let Some(release) = (*child).release {
            release(child);
        }
        drop(Box::from_raw(child));
    }
    drop(owner);
    schema.release = None;
    schema.private_data = ptr::null_mut();
}

pub(super) unsafe extern "C" fn result_get_arrow_schema(
    raw: RawHandle,
    out: *mut ArrowSchema,
) -> NativeState {
    let result = object::<LbResult>(raw);
    if let Some(message) = &result.error {
        return fail(message.clone());
    }
    if let Some(column) = unsupported(result) {
        return fail(format!(
            "Not implemented: column '{column}' has no columnar representation"
        ));
    }
    let children = result
        .columns
        .iter()
        .filter_map(|(name, tag)| {
            let format = format_of(*tag)?;
            Some(Box::into_raw(Box::new(schema_node(
                format,
                name,
                ARROW_FLAG_NULLABLE,
                Vec::new(),
            ))))
        })
        .collect();
    *out = schema_node("+s", "", 0, children);
    ok()
}

struct ArrayOwner {
    _buffers: Vec<Vec<u64>>,
    buffer_ptrs: Box<[*const c_void]>,
    children: Box<[*mut ArrowArray]>,
}

fn words(bytes: usize) -> usize {
    bytes.div_ceil(8).max(1)
}

fn aligned(bytes: &[u8]) -> Vec<u64> {
    let mut buffer = vec![0u64; words(bytes.len())];
    // SAFETY: the destination spans at least `bytes.len()` bytes.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_mut_ptr().cast::<u8>(), bytes.len());
    }
    buffer
}

fn bitmap(bits: impl Iterator<Item = bool>, len: usize) -> Vec<u64> {
    let mut buffer = vec![0u64; words(len.div_ceil(8))];
    for (index, bit) in bits.enumerate() {
        if bit {
            buffer[index / 64] |= 1 << (index % 64);
        }
    }
    buffer
}

fn fixed_bytes(tag: u32, value: &LbValue, out: &mut Vec<u8>) {
    let int = match value.payload {
        Payload::Int(wide) if !value.null => wide,
        _ => 0,
    };
    match (tag, &value.payload) {
        (_, _) if value.null => {}
        (type_id::FLOAT, Payload::Float(v)) => return out.extend_from_slice(&v.to_ne_bytes()),
        (type_id::DOUBLE, Payload::Double(v)) => return out.extend_from_slice(&v.to_ne_bytes()),
        (type_id::DATE, Payload::Date(days)) => return out.extend_from_slice(&days.to_ne_bytes()),
        (_, Payload::Timestamp(units)) => return out.extend_from_slice(&units.to_ne_bytes()),
        _ => {}
    }
    match tag {
        type_id::INT8 => out.extend_from_slice(&(int as i8).to_ne_bytes()),
        type_id::INT16 => out.extend_from_slice(&(int as i16).to_ne_bytes()),
        type_id::INT32 | type_id::DATE => out.extend_from_slice(&(int as i32).to_ne_bytes()),
        type_id::UINT8 => out.extend_from_slice(&(int as u8).to_ne_bytes()),
        type_id::UINT16 => out.extend_from_slice(&(int as u16).to_ne_bytes()),
        type_id::UINT32 => out.extend_from_slice(&(int as u32).to_ne_bytes()),
        type_id::UINT64 => out.extend_from_slice(&(int as u64).to_ne_bytes()),
        type_id::FLOAT => out.extend_from_slice(&0f32.to_ne_bytes()),
        type_id::DOUBLE => out.extend_from_slice(&0f64.to_ne_bytes()),
        _ => out.extend_from_slice(&(int as i64).to_ne_bytes()),
    }
}

fn array_node(length: usize, null_count: usize, buffers: Vec<Option<Vec<u64>>>, children: Vec<*mut ArrowArray>) -> ArrowArray {
    let buffer_ptrs: Box<[*const c_void]> = buffers
        .iter()
        .map(|buffer| {
            buffer
                .as_ref()
                .map_or(ptr::null(), |words| words.as_ptr().cast::<c_void>())
        })
        .collect();
    let mut children = children.into_boxed_slice();
    let mut array = ArrowArray::empty();
    array.length = length as i64;
    array.null_count = null_count as i64;
    array.n_buffers = buffer_ptrs.len() as i64;
    array.n_children = children.len() as i64;
    array.children = if children.is_empty() {
        ptr::null_mut()
    } else {
        children.as_mut_ptr()
    };
    let mut owner = Box::new(ArrayOwner {
        _buffers: buffers.into_iter().flatten().collect(),
        buffer_ptrs,
        children,
    });
    array.buffers = owner.buffer_ptrs.as_mut_ptr();
    array.release = Some(release_array);
    array.private_data = Box::into_raw(owner).cast::<c_void>();
    array
}

fn column_array(tag: u32, cells: &[&LbValue]) -> ArrowArray {
    let len = cells.len();
    let null_count = cells.iter().filter(|cell| cell.null).count();
    let validity = (null_count > 0).then(|| bitmap(cells.iter().map(|cell| !cell.null), len));
    let buffers = match tag {
        type_id::BOOL => {
            let bits = cells
                .iter()
                .map(|cell| matches!(cell.payload, Payload::Bool(true)) && !cell.null);
            vec![validity, Some(bitmap(bits, len))]
        }
        type_id::STRING | type_id::BLOB => {
            let mut offsets = Vec::with_capacity((len + 1) * 4);
            let mut data = Vec::new();
            offsets.extend_from_slice(&0i32.to_ne_bytes());
            for cell in cells {
                if let (false, Payload::Bytes(bytes)) = (cell.null, &cell.payload) {
                    data.extend_from_slice(bytes);
                }
                offsets.extend_from_slice(&(data.len() as i32).to_ne_bytes());
            }
            vec![validity, Some(aligned(&offsets)), Some(aligned(&data))]
        }
        _ => {
            let mut values = Vec::new();
            for cell in cells {
                fixed_bytes(tag, cell, &mut values);
            }
            vec![validity, Some(aligned(&values))]
        }
    };
    array_node(len, null_count, buffers, Vec::new())
}

unsafe extern "C" fn release_array(array: *mut ArrowArray) {
    let Some(array) = array.as_mut() else {
        return;
    };
    if array.release.is_none() {
        return;
    }
    let owner = Box::from_raw(array.private_data.cast::<ArrayOwner>());
    for &child in owner.children.iter() {
        if let Some(release) = (*child).release {
            release(child);
        }
        drop(Box::from_raw(child));
    }
    drop(owner);
    array.release = None;
    array.private_data = ptr::null_mut();
}

pub(super) unsafe extern "C" fn result_get_next_arrow_chunk(
    raw: RawHandle,
    max_rows: i64,
    out: *mut ArrowArray,
) -> NativeState {
    let result = object::<LbResult>(raw);
    if let Some(message) = &result.error {
        return fail(message.clone());
    }
    if max_rows <= 0 {
        return fail(format!("Runtime exception: chunk size must be positive, got {max_rows}"));
    }
    if let Some(column) = unsupported(result) {
        return fail(format!(
            "Not implemented: column '{column}' has no columnar representation"
        ));
    }
    let start = result.cursor.load(Ordering::Acquire).min(result.rows.len());
    let end = start
        .saturating_add(usize::try_from(max_rows).unwrap_or(usize::MAX))
        .min(result.rows.len());
    let rows = &result.rows[start..end];
    let children = result
        .columns
        .iter()
        .enumerate()
        .map(|(index, (_, tag))| {
            let cells: Vec<&LbValue> = rows.iter().map(|row| &row[index]).collect();
            Box::into_raw(Box::new(column_array(*tag, &cells)))
        })
        .collect();
    result.cursor.store(end, Ordering::Release);
    *out = array_node(rows.len(), 0, vec![None], children);
    ok()
}
