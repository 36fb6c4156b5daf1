#![allow(unsafe_code)]

//! Columnar export of query results through the Arrow C Data Interface.
//!
//! The engine writes a schema descriptor once and array descriptors per chunk.
//! Descriptors are owned by handles of their own: dropping one calls the
//! producer's `release` callback, and [`ExportedSchema::export`] /
//! [`ExportedArray::export`] move the raw descriptor out to a consumer, who then
//! owns the release.
//!
//! Reads never copy unless asked to ([`ColumnView::values`] and friends);
//! [`ColumnView::with_values`] lends the engine's value buffer directly. All
//! reads check that the originating result is still open, but exporting does
//! not keep it open.

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::mem;
use std::ptr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, Lineage, Pin};
use crate::result::QueryResult;
use crate::sys::arrow::{ArrowArray, ArrowSchema, ARROW_FLAG_NULLABLE};
use crate::sys::RawHandle;
use crate::value::Text;

const STAGE: &str = "Arrow export";

unsafe extern "C" fn destroy_schema(raw: RawHandle) {
    let mut schema = Box::from_raw(raw as *mut ArrowSchema);
    if let Some(release) = schema.release {
        release(&mut *schema);
    }
}

unsafe extern "C" fn destroy_array(raw: RawHandle) {
    let mut array = Box::from_raw(raw as *mut ArrowArray);
    if let Some(release) = array.release {
        release(&mut *array);
    }
}

fn export_failed(message: impl Into<String>) -> Error {
    Error::native(STAGE, message)
}

/// Reads a NUL-terminated string owned by a descriptor.
///
/// # Safety
///
/// `raw` must be null or point at a NUL-terminated string alive for `'a`.
unsafe fn c_str<'a>(raw: *const c_char) -> Option<&'a str> {
    if raw.is_null() {
        return None;
    }
    CStr::from_ptr(raw).to_str().ok()
}

impl QueryResult {
    /// Exports the result schema.
    ///
    /// Returns `Ok(None)` when the engine was built without columnar export.
    pub fn try_get_schema(&self) -> Result<Option<ExportedSchema>> {
        let api = self.api();
        let Some(get_schema) = api.result_get_arrow_schema else {
            return Ok(None);
        };
        let pin = self.pin()?;
        let raw = Box::into_raw(Box::new(ArrowSchema::empty()));
        // SAFETY: pinned result; `raw` is a writable, released descriptor.
        let state = unsafe { get_schema(pin.as_ptr(), raw) };
        drop(pin);
        let handle = Handle::adopt(
            HandleKind::ArrowSchema,
            None,
            destroy_schema,
            raw.cast::<c_void>(),
            STAGE,
        )?;
        if !state.is_success() {
            return Err(export_failed(api.last_error()));
        }
        let schema = ExportedSchema {
            handle,
            result: self.lineage(),
        };
        if schema.with_descriptor(|s| s.is_released() || s.format.is_null())? {
            return Err(export_failed("engine produced an empty schema descriptor"));
        }
        debug!(columns = self.num_columns(), "arrow.schema");
        Ok(Some(schema))
    }

    /// Exports up to `max_rows` further rows as one array chunk.
    ///
    /// Consumes rows from the same cursor as [`QueryResult::next`]. Once the
    /// cursor is exhausted, chunks come back empty. Returns `Ok(None)` when the
    /// engine was built without columnar export.
    pub fn try_get_next_chunk(&mut self, max_rows: i64) -> Result<Option<ExportedArray>> {
        if max_rows <= 0 {
            return Err(Error::invalid_argument(
                "QueryResult::try_get_next_chunk",
                format!("chunk size must be positive, got {max_rows}"),
            ));
        }
        let api = self.api();
        let Some(next_chunk) = api.result_get_next_arrow_chunk else {
            return Ok(None);
        };
        let pin = self.pin()?;
        let raw = Box::into_raw(Box::new(ArrowArray::empty()));
        // SAFETY: pinned result; `raw` is a writable, released descriptor.
        let state = unsafe { next_chunk(pin.as_ptr(), max_rows, raw) };
        drop(pin);
        let handle = Handle::adopt(
            HandleKind::ArrowArray,
            None,
            destroy_array,
            raw.cast::<c_void>(),
            STAGE,
        )?;
        if !state.is_success() {
            return Err(export_failed(api.last_error()));
        }
        let array = ExportedArray {
            handle,
            result: self.lineage(),
        };
        let (released, length) = array.with_descriptor(|a| (a.is_released(), a.length))?;
        if released || length < 0 {
            return Err(export_failed("engine produced an invalid array descriptor"));
        }
        self.skip_rows(length as u64);
        debug!(rows = length, "arrow.chunk");
        Ok(Some(array))
    }
}

/// One field of an exported schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// Arrow format string.
    pub format: String,
    /// Whether the field is flagged nullable.
    pub nullable: bool,
}

/// Exported schema descriptor.
pub struct ExportedSchema {
    handle: Handle,
    result: Lineage,
}

impl ExportedSchema {
    fn with_descriptor<T>(&self, read: impl FnOnce(&ArrowSchema) -> T) -> Result<T> {
        let result = self.result.pin()?;
        let pin = self.handle.pin()?;
        // SAFETY: pinned; the box stays allocated until the handle releases.
        let out = read(unsafe { &*(pin.as_ptr() as *const ArrowSchema) });
        drop(pin);
        drop(result);
        Ok(out)
    }

    /// Format string of the top-level descriptor (`"+s"` for a struct of columns).
    pub fn format(&self) -> Result<String> {
        self.with_descriptor(|schema| {
            // SAFETY: format strings live as long as the descriptor.
            unsafe { c_str(schema.format) }.map(str::to_string)
        })?
        .ok_or_else(|| export_failed("schema format is missing or not UTF-8"))
    }

    /// Name of the top-level descriptor, if any.
    pub fn name(&self) -> Result<Option<String>> {
        self.with_descriptor(|schema| {
            // SAFETY: as above.
            unsafe { c_str(schema.name) }.map(str::to_string)
        })
    }

    /// Column fields. A struct-of-columns wrapper is unwrapped one level;
    /// any other top-level descriptor is reported as a single field.
    pub fn fields(&self) -> Result<Vec<SchemaField>> {
        self.with_descriptor(|schema| {
            // SAFETY: the descriptor and its children are pinned by the handle.
            unsafe {
                if c_str(schema.format) == Some("+s") {
                    (0..schema.n_children.max(0) as usize)
                        .map(|index| child_schema(schema, index).and_then(|child| schema_field(child)))
                        .collect()
                } else {
                    schema_field(schema).map(|field| vec![field])
                }
            }
        })?
    }

    /// Hands the raw descriptor to a consumer, which becomes responsible for
    /// calling its `release` callback.
    pub fn export(self) -> Result<ArrowSchema> {
        let result = self.result.pin()?;
        let pin = self.handle.pin()?;
        // SAFETY: pinned and exclusively owned (`self` is consumed); the box is
        // left holding a released descriptor, so the handle only frees memory.
        let schema = unsafe { ptr::replace(pin.as_ptr() as *mut ArrowSchema, ArrowSchema::empty()) };
        drop(pin);
        drop(result);
        Ok(schema)
    }

    fn pin(&self) -> Result<Pin> {
        self.handle.pin()
    }
}

impl fmt::Debug for ExportedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedSchema")
            .field("handle", &self.handle)
            .finish()
    }
}

/// # Safety
///
/// `schema` must be a live descriptor with `n_children` valid child pointers.
unsafe fn child_schema(schema: &ArrowSchema, index: usize) -> Result<&ArrowSchema> {
    if index >= schema.n_children.max(0) as usize || schema.children.is_null() {
        return Err(export_failed(format!("schema has no child {index}")));
    }
    (*schema.children.add(index))
        .as_ref()
        .ok_or_else(|| export_failed(format!("schema child {index} is null")))
}

/// # Safety
///
/// `schema` must be a live descriptor.
unsafe fn schema_field(schema: &ArrowSchema) -> Result<SchemaField> {
    let format = c_str(schema.format).ok_or_else(|| export_failed("field format is missing"))?;
    Ok(SchemaField {
        name: c_str(schema.name).unwrap_or_default().to_string(),
        format: format.to_string(),
        nullable: schema.flags & ARROW_FLAG_NULLABLE != 0,
    })
}

/// Exported array descriptor for one chunk of rows.
pub struct ExportedArray {
    handle: Handle,
    result: Lineage,
}

impl ExportedArray {
    fn with_descriptor<T>(&self, read: impl FnOnce(&ArrowArray) -> T) -> Result<T> {
        let result = self.result.pin()?;
        let pin = self.handle.pin()?;
        // SAFETY: pinned; the box stays allocated until the handle releases.
        let out = read(unsafe { &*(pin.as_ptr() as *const ArrowArray) });
        drop(pin);
        drop(result);
        Ok(out)
    }

    /// Number of rows in the chunk.
    pub fn len(&self) -> Result<usize> {
        self.with_descriptor(|array| array.length.max(0) as usize)
    }

    /// Whether the chunk holds no rows.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of child arrays (columns, for a struct-of-columns chunk).
    pub fn n_children(&self) -> Result<usize> {
        self.with_descriptor(|array| array.n_children.max(0) as usize)
    }

    /// View of column `index`, described by the matching `schema`.
    pub fn column<'a>(&'a self, index: usize, schema: &'a ExportedSchema) -> Result<ColumnView<'a>> {
        let format = schema.format()?;
        let (array_ptr, schema_ptr) = {
            let result = self.result.pin()?;
            let array_pin = self.handle.pin()?;
            let schema_pin = schema.pin()?;
            let array = array_pin.as_ptr() as *const ArrowArray;
            let top = schema_pin.as_ptr() as *const ArrowSchema;
            // SAFETY: both descriptors are pinned.
            let located = unsafe {
                if format == "+s" {
                    let array = &*array;
                    if index >= array.n_children.max(0) as usize || array.children.is_null() {
                        return Err(Error::invalid_argument(
                            "ExportedArray::column",
                            format!("column {index} out of range ({} columns)", array.n_children),
                        ));
                    }
                    let child = *array.children.add(index) as *const ArrowArray;
                    if child.is_null() {
                        return Err(export_failed(format!("array child {index} is null")));
                    }
                    (child, child_schema(&*top, index)? as *const ArrowSchema)
                } else if index == 0 {
                    (array, top)
                } else {
                    return Err(Error::invalid_argument(
                        "ExportedArray::column",
                        format!("column {index} out of range (1 column)"),
                    ));
                }
            };
            drop(schema_pin);
            drop(array_pin);
            drop(result);
            located
        };
        let view = ColumnView {
            array: self,
            schema,
            array_ptr,
            schema_ptr,
        };
        view.check_layout()?;
        Ok(view)
    }

    /// Hands the raw descriptor to a consumer, which becomes responsible for
    /// calling its `release` callback.
    pub fn export(self) -> Result<ArrowArray> {
        let result = self.result.pin()?;
        let pin = self.handle.pin()?;
        // SAFETY: pinned and exclusively owned; see `ExportedSchema::export`.
        let array = unsafe { ptr::replace(pin.as_ptr() as *mut ArrowArray, ArrowArray::empty()) };
        drop(pin);
        drop(result);
        Ok(array)
    }
}

impl fmt::Debug for ExportedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedArray")
            .field("handle", &self.handle)
            .finish()
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width element type readable straight out of an Arrow value buffer.
pub trait ArrowPrimitive: Copy + sealed::Sealed + 'static {
    /// Whether a column with Arrow format `format` stores elements of this type.
    fn accepts(format: &str) -> bool;
}

macro_rules! arrow_primitive {
    ($($ty:ty => |$f:ident| $accepts:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl ArrowPrimitive for $ty {
                fn accepts($f: &str) -> bool {
                    $accepts
                }
            }
        )*
    };
}

arrow_primitive! {
    i8 => |f| f == "c",
    u8 => |f| f == "C",
    i16 => |f| f == "s",
    u16 => |f| f == "S",
    i32 => |f| f == "i" || f == "tdD",
    u32 => |f| f == "I",
    i64 => |f| f == "l" || f.starts_with("ts"),
    u64 => |f| f == "L",
    f32 => |f| f == "f",
    f64 => |f| f == "g",
}

/// Buffer count the columnar format mandates for a format string.
fn expected_buffers(format: &str) -> Option<i64> {
    match format {
        "b" | "c" | "C" | "s" | "S" | "i" | "I" | "l" | "L" | "e" | "f" | "g" | "tdD" | "tdm" => {
            Some(2)
        }
        f if f.starts_with("ts") || f.starts_with("tt") || f.starts_with("w:") => Some(2),
        "u" | "z" | "U" | "Z" => Some(3),
        "+s" => Some(1),
        "+l" | "+L" => Some(2),
        _ => None,
    }
}

/// One column of an exported chunk.
///
/// Every read checks that the array, its schema and the originating result
/// are all still alive.
pub struct ColumnView<'a> {
    array: &'a ExportedArray,
    schema: &'a ExportedSchema,
    array_ptr: *const ArrowArray,
    schema_ptr: *const ArrowSchema,
}

struct ViewPins {
    _result: Pin,
    _array: Pin,
    _schema: Pin,
}

impl<'a> ColumnView<'a> {
    fn read<T>(&self, read: impl FnOnce(&ArrowArray, &ArrowSchema) -> Result<T>) -> Result<T> {
        let pins = ViewPins {
            _result: self.array.result.pin()?,
            _array: self.array.handle.pin()?,
            _schema: self.schema.pin()?,
        };
        // SAFETY: both descriptor trees are pinned for the duration of `read`.
        let out = read(unsafe { &*self.array_ptr }, unsafe { &*self.schema_ptr });
        drop(pins);
        out
    }

    fn check_layout(&self) -> Result<()> {
        self.read(|array, schema| {
            // SAFETY: pinned descriptor.
            let format = unsafe { c_str(schema.format) }.unwrap_or_default();
            let expected = expected_buffers(format);
            if let Some(expected) = expected {
                if array.n_buffers != expected {
                    return Err(export_failed(format!(
                        "column with format '{format}' has {} buffers, expected {expected}",
                        array.n_buffers
                    )));
                }
            }
            if array.n_buffers > 0 && array.buffers.is_null() {
                return Err(export_failed("array buffers pointer is null"));
            }
            Ok(())
        })
    }

    /// Arrow format string of the column.
    pub fn format(&self) -> Result<String> {
        self.read(|_, schema| {
            // SAFETY: pinned descriptor.
            unsafe { c_str(schema.format) }
                .map(str::to_string)
                .ok_or_else(|| export_failed("column format is missing"))
        })
    }

    /// Column name.
    pub fn name(&self) -> Result<String> {
        self.read(|_, schema| {
            // SAFETY: pinned descriptor.
            Ok(unsafe { c_str(schema.name) }.unwrap_or_default().to_string())
        })
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        self.read(|array, _| Ok(array.length.max(0) as usize))
    }

    /// Whether the column holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of nulls, computed from the validity bitmap when the producer
    /// left it unknown (`-1`).
    pub fn null_count(&self) -> Result<usize> {
        let reported = self.read(|array, _| Ok(array.null_count))?;
        if reported >= 0 {
            return Ok(reported as usize);
        }
        Ok(self.validity()?.iter().filter(|valid| !**valid).count())
    }

    /// Whether a validity bitmap is present. Without one, no entry is null.
    pub fn has_validity(&self) -> Result<bool> {
        self.read(|array, _| {
            // SAFETY: pinned descriptor with `n_buffers` entries.
            Ok(array.n_buffers > 0 && unsafe { !(*array.buffers).is_null() })
        })
    }

    /// Whether entry `index` is non-null.
    pub fn is_valid(&self, index: usize) -> Result<bool> {
        self.read(|array, _| {
            let len = array.length.max(0) as usize;
            if index >= len {
                return Err(Error::invalid_argument(
                    "ColumnView::is_valid",
                    format!("index {index} out of range ({len} entries)"),
                ));
            }
            // SAFETY: pinned descriptor.
            Ok(unsafe { validity_bit(array, index) })
        })
    }

    fn validity(&self) -> Result<Vec<bool>> {
        self.read(|array, _| {
            let len = array.length.max(0) as usize;
            // SAFETY: pinned descriptor.
            Ok((0..len).map(|index| unsafe { validity_bit(array, index) }).collect())
        })
    }

    /// Lends the value buffer to `f` without copying.
    ///
    /// Null entries hold unspecified values; consult [`ColumnView::is_valid`].
    pub fn with_values<T: ArrowPrimitive, R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R> {
        self.read(|array, schema| {
            // SAFETY: pinned descriptor.
            let format = unsafe { c_str(schema.format) }.unwrap_or_default();
            if !T::accepts(format) {
                return Err(Error::TypeMismatch {
                    context: "arrow column".into(),
                    expected: std::any::type_name::<T>().into(),
                    found: format!("format '{format}'"),
                });
            }
            let len = array.length.max(0) as usize;
            let offset = array.offset.max(0) as usize;
            if len == 0 {
                return Ok(f(&[]));
            }
            // SAFETY: the layout check guaranteed two buffers.
            let values = unsafe { *array.buffers.add(1) } as *const T;
            if values.is_null() {
                return Err(export_failed("value buffer is null"));
            }
            if values as usize % mem::align_of::<T>() != 0 {
                return Err(export_failed("value buffer is misaligned"));
            }
            // SAFETY: a fixed-width buffer holds `offset + length` elements.
            let slice = unsafe { std::slice::from_raw_parts(values.add(offset), len) };
            Ok(f(slice))
        })
    }

    /// Copies the column, mapping nulls to `None`.
    pub fn values<T: ArrowPrimitive>(&self) -> Result<Vec<Option<T>>> {
        let validity = self.validity()?;
        self.with_values(|values: &[T]| {
            values
                .iter()
                .zip(validity)
                .map(|(value, valid)| valid.then_some(*value))
                .collect()
        })
    }

    /// Copies a boolean (bit-packed) column.
    pub fn bools(&self) -> Result<Vec<Option<bool>>> {
        self.read(|array, schema| {
            // SAFETY: pinned descriptor.
            let format = unsafe { c_str(schema.format) }.unwrap_or_default();
            if format != "b" {
                return Err(Error::TypeMismatch {
                    context: "arrow column".into(),
                    expected: "bool".into(),
                    found: format!("format '{format}'"),
                });
            }
            let len = array.length.max(0) as usize;
            let offset = array.offset.max(0) as usize;
            if len == 0 {
                return Ok(Vec::new());
            }
            // SAFETY: two buffers per the layout check.
            let bits = unsafe { *array.buffers.add(1) } as *const u8;
            if bits.is_null() {
                return Err(export_failed("value buffer is null"));
            }
            Ok((0..len)
                .map(|index| {
                    // SAFETY: pinned descriptor; bit `offset + index` is in bounds.
                    unsafe { validity_bit(array, index).then(|| bit(bits, offset + index)) }
                })
                .collect())
        })
    }

    /// Copies a UTF-8 (`"u"`) or binary (`"z"`) column byte-for-byte.
    pub fn strings(&self) -> Result<Vec<Option<Text>>> {
        self.read(|array, schema| {
            // SAFETY: pinned descriptor.
            let format = unsafe { c_str(schema.format) }.unwrap_or_default();
            if format != "u" && format != "z" {
                return Err(Error::TypeMismatch {
                    context: "arrow column".into(),
                    expected: "utf8 or binary".into(),
                    found: format!("format '{format}'"),
                });
            }
            let len = array.length.max(0) as usize;
            let offset = array.offset.max(0) as usize;
            if len == 0 {
                return Ok(Vec::new());
            }
            // SAFETY: three buffers per the layout check.
            let (offsets, data) = unsafe {
                (
                    *array.buffers.add(1) as *const i32,
                    *array.buffers.add(2) as *const u8,
                )
            };
            if offsets.is_null() {
                return Err(export_failed("offset buffer is null"));
            }
            let mut out = Vec::with_capacity(len);
            for index in 0..len {
                // SAFETY: pinned descriptor.
                if !unsafe { validity_bit(array, index) } {
                    out.push(None);
                    continue;
                }
                // SAFETY: the offset buffer holds `offset + length + 1` entries.
                let (start, end) = unsafe {
                    (
                        *offsets.add(offset + index),
                        *offsets.add(offset + index + 1),
                    )
                };
                if start < 0 || end < start {
                    return Err(export_failed(format!("invalid offsets at entry {index}")));
                }
                let bytes = if end == start {
                    Vec::new()
                } else if data.is_null() {
                    return Err(export_failed("data buffer is null"));
                } else {
                    // SAFETY: offsets index into the data buffer.
                    unsafe {
                        std::slice::from_raw_parts(data.add(start as usize), (end - start) as usize)
                    }
                    .to_vec()
                };
                out.push(Some(Text::from_bytes(bytes)));
            }
            Ok(out)
        })
    }
}

impl fmt::Debug for ColumnView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnView")
            .field("format", &self.format().ok())
            .finish()
    }
}

/// # Safety
///
/// `bits` must cover bit `index`.
unsafe fn bit(bits: *const u8, index: usize) -> bool {
    (*bits.add(index / 8) >> (index % 8)) & 1 == 1
}

/// # Safety
///
/// `array` must be live, with a validity bitmap (if any) covering
/// `offset + length` bits.
unsafe fn validity_bit(array: &ArrowArray, index: usize) -> bool {
    if array.n_buffers == 0 || array.buffers.is_null() {
        return true;
    }
    let validity = *array.buffers as *const u8;
    validity.is_null() || bit(validity, array.offset.max(0) as usize + index)
}
