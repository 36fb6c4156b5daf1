#![allow(unsafe_code)]

//! Raw native ABI.
//!
//! The engine is reached exclusively through a [`NativeApi`] table of
//! `extern "C"` entry points. Nothing here is safe to call directly; the
//! [`crate::handle`] layer owns every pointer that crosses this boundary.
//!
//! Strings travel as `(ptr, len)` pairs in both directions so arbitrary byte
//! sequences (embedded NUL, invalid UTF-8) survive unchanged. Buffers handed out
//! by the engine are [`ByteBuf`]s and must be returned through
//! [`NativeApi::bytes_free`].

pub mod arrow;

use std::ffi::c_void;
use std::ptr;

use self::arrow::{ArrowArray, ArrowSchema};

/// Opaque engine object.
pub type RawHandle = *mut c_void;

/// Destructor entry point shared by every releasable handle kind.
pub type Destroy = unsafe extern "C" fn(RawHandle);

/// ABI revision this crate was written against.
pub const ABI_VERSION: u32 = 1;

/// Status code returned by fallible entry points.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NativeState(pub u32);

impl NativeState {
    /// The call succeeded.
    pub const SUCCESS: NativeState = NativeState(0);
    /// The call failed; details (if any) are available from the object or
    /// [`NativeApi::last_error_message`].
    pub const ERROR: NativeState = NativeState(1);

    /// Returns true for [`NativeState::SUCCESS`].
    pub fn is_success(self) -> bool {
        self == NativeState::SUCCESS
    }
}

/// Borrowed byte range passed into the engine.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct ByteView {
    /// First byte; may be null when `len` is zero.
    pub data: *const u8,
    /// Number of bytes.
    pub len: usize,
}

impl ByteView {
    /// Borrows `bytes` for the duration of one call.
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            data: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// Reinterprets the view as a slice.
    ///
    /// # Safety
    ///
    /// `data` must point at `len` readable bytes that outlive `'a`.
    pub unsafe fn as_slice<'a>(self) -> &'a [u8] {
        if self.data.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.data, self.len)
        }
    }
}

/// Engine-allocated byte buffer. Ownership passes to the caller, who must hand
/// it back through [`NativeApi::bytes_free`].
#[repr(C)]
#[derive(Debug)]
pub struct ByteBuf {
    /// First byte; null for an empty buffer.
    pub data: *mut u8,
    /// Number of bytes.
    pub len: usize,
}

impl ByteBuf {
    /// A buffer that owns nothing.
    pub const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
        }
    }
}

/// Two's-complement 128-bit integer split into halves.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawInt128 {
    /// Low 64 bits.
    pub low: u64,
    /// High 64 bits, sign-carrying.
    pub high: i64,
}

impl From<i128> for RawInt128 {
    fn from(value: i128) -> Self {
        Self {
            low: value as u64,
            high: (value >> 64) as i64,
        }
    }
}

impl From<RawInt128> for i128 {
    fn from(value: RawInt128) -> Self {
        ((value.high as i128) << 64) | value.low as i128
    }
}

/// Calendar interval.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawInterval {
    /// Whole months.
    pub months: i32,
    /// Whole days.
    pub days: i32,
    /// Remaining microseconds.
    pub micros: i64,
}

/// Internal node/relationship identifier.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawInternalId {
    /// Table the record lives in.
    pub table_id: u64,
    /// Offset inside the table.
    pub offset: u64,
}

/// Engine-level settings applied when a database is opened.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSystemConfig {
    /// Buffer pool size in bytes; `0` selects the engine default.
    pub buffer_pool_size: u64,
    /// Worker threads per query; `0` selects the engine default.
    pub max_num_threads: u64,
    /// Enable on-disk compression.
    pub enable_compression: bool,
    /// Open without write access.
    pub read_only: bool,
    /// Maximum database size in bytes; `0` selects the engine default.
    pub max_db_size: u64,
    /// Checkpoint automatically once the WAL crosses `checkpoint_threshold`.
    pub auto_checkpoint: bool,
    /// WAL size in bytes that triggers an automatic checkpoint.
    pub checkpoint_threshold: u64,
}

/// Numeric data type ids used by the engine.
pub mod type_id {
    #![allow(missing_docs)]

    pub const ANY: u32 = 0;
    pub const NODE: u32 = 10;
    pub const REL: u32 = 11;
    pub const RECURSIVE_REL: u32 = 12;
    pub const SERIAL: u32 = 13;
    pub const BOOL: u32 = 22;
    pub const INT64: u32 = 23;
    pub const INT32: u32 = 24;
    pub const INT16: u32 = 25;
    pub const INT8: u32 = 26;
    pub const UINT64: u32 = 27;
    pub const UINT32: u32 = 28;
    pub const UINT16: u32 = 29;
    pub const UINT8: u32 = 30;
    pub const INT128: u32 = 31;
    pub const DOUBLE: u32 = 32;
    pub const FLOAT: u32 = 33;
    pub const DATE: u32 = 34;
    pub const TIMESTAMP: u32 = 35;
    pub const TIMESTAMP_SEC: u32 = 36;
    pub const TIMESTAMP_MS: u32 = 37;
    pub const TIMESTAMP_NS: u32 = 38;
    pub const TIMESTAMP_TZ: u32 = 39;
    pub const INTERVAL: u32 = 40;
    pub const DECIMAL: u32 = 41;
    pub const INTERNAL_ID: u32 = 42;
    pub const STRING: u32 = 50;
    pub const BLOB: u32 = 51;
    pub const LIST: u32 = 52;
    pub const ARRAY: u32 = 53;
    pub const STRUCT: u32 = 54;
    pub const MAP: u32 = 55;
    pub const UNION: u32 = 56;
    pub const POINTER: u32 = 58;
    pub const UUID: u32 = 59;
}

/// Function table exported by a native engine.
///
/// Creation calls write the new object through an out-pointer and return a
/// [`NativeState`]. Query results and prepared statements are handed out even
/// when they failed; their own success flag and message describe the failure.
/// Values written by `tuple_get_value` and `value_get_child`-style accessors are
/// views owned by their parent and must never be passed to `value_destroy`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct NativeApi {
    /// Must equal [`ABI_VERSION`].
    pub abi_version: u32,
    /// Releases a buffer previously handed out by the engine.
    pub bytes_free: unsafe extern "C" fn(ByteBuf),
    /// Diagnostic of the last failed creation call on the calling thread.
    pub last_error_message: unsafe extern "C" fn() -> ByteBuf,
    /// Engine version string.
    pub engine_version: unsafe extern "C" fn() -> ByteBuf,

    /// Opens a database at `path`.
    pub database_init:
        unsafe extern "C" fn(ByteView, *const RawSystemConfig, *mut RawHandle) -> NativeState,
    /// Closes a database.
    pub database_destroy: Destroy,

    /// Opens a connection on a database.
    pub connection_init: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> NativeState,
    /// Closes a connection.
    pub connection_destroy: Destroy,
    /// Sets the worker thread budget for subsequent queries.
    pub connection_set_max_threads: unsafe extern "C" fn(RawHandle, u64) -> NativeState,
    /// Reads the worker thread budget.
    pub connection_get_max_threads: unsafe extern "C" fn(RawHandle, *mut u64) -> NativeState,
    /// Sets the per-query timeout in milliseconds; `0` disables it.
    pub connection_set_query_timeout: unsafe extern "C" fn(RawHandle, u64) -> NativeState,
    /// Requests that the in-flight query (if any) abort. Callable from any thread.
    pub connection_interrupt: unsafe extern "C" fn(RawHandle),
    /// Runs an ad hoc query.
    pub connection_query: unsafe extern "C" fn(RawHandle, ByteView, *mut RawHandle) -> NativeState,
    /// Compiles a parameterized query.
    pub connection_prepare:
        unsafe extern "C" fn(RawHandle, ByteView, *mut RawHandle) -> NativeState,
    /// Executes a prepared statement with its current bindings.
    pub connection_execute:
        unsafe extern "C" fn(RawHandle, RawHandle, *mut RawHandle) -> NativeState,

    /// Destroys a prepared statement.
    pub statement_destroy: Destroy,
    /// Whether compilation succeeded.
    pub statement_is_success: unsafe extern "C" fn(RawHandle) -> bool,
    /// Compilation diagnostic.
    pub statement_error_message: unsafe extern "C" fn(RawHandle) -> ByteBuf,
    /// Number of declared parameters.
    pub statement_param_count: unsafe extern "C" fn(RawHandle) -> u64,
    /// Name of the declared parameter at an index.
    pub statement_param_name: unsafe extern "C" fn(RawHandle, u64, *mut ByteBuf) -> NativeState,
    /// Declared type tag of a named parameter; fails for unknown names.
    pub statement_param_type: unsafe extern "C" fn(RawHandle, ByteView, *mut u32) -> NativeState,
    /// Binds a value (copied by the engine) to a named parameter.
    pub statement_bind_value:
        unsafe extern "C" fn(RawHandle, ByteView, RawHandle) -> NativeState,

    /// Destroys a query result.
    pub result_destroy: Destroy,
    /// Whether execution succeeded.
    pub result_is_success: unsafe extern "C" fn(RawHandle) -> bool,
    /// Execution diagnostic.
    pub result_error_message: unsafe extern "C" fn(RawHandle) -> ByteBuf,
    /// Number of result columns.
    pub result_num_columns: unsafe extern "C" fn(RawHandle) -> u64,
    /// Column name at an index.
    pub result_column_name: unsafe extern "C" fn(RawHandle, u64, *mut ByteBuf) -> NativeState,
    /// Column type tag at an index.
    pub result_column_type: unsafe extern "C" fn(RawHandle, u64, *mut u32) -> NativeState,
    /// Total number of rows.
    pub result_num_tuples: unsafe extern "C" fn(RawHandle) -> u64,
    /// Whether the cursor has another row. Must not advance.
    pub result_has_next: unsafe extern "C" fn(RawHandle) -> bool,
    /// Advances the cursor and hands out the new row.
    pub result_get_next: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> NativeState,
    /// Hands out the compile/execute timing summary.
    pub result_get_summary: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> NativeState,
    /// Exports the result schema as a C Data Interface schema. Optional.
    pub result_get_arrow_schema:
        Option<unsafe extern "C" fn(RawHandle, *mut ArrowSchema) -> NativeState>,
    /// Exports up to `chunk_size` rows as a C Data Interface array. Optional.
    pub result_get_next_arrow_chunk:
        Option<unsafe extern "C" fn(RawHandle, i64, *mut ArrowArray) -> NativeState>,

    /// Destroys a query summary.
    pub summary_destroy: Destroy,
    /// Compilation time in milliseconds.
    pub summary_compiling_time: unsafe extern "C" fn(RawHandle) -> f64,
    /// Execution time in milliseconds.
    pub summary_execution_time: unsafe extern "C" fn(RawHandle) -> f64,

    /// Destroys a row tuple.
    pub tuple_destroy: Destroy,
    /// Borrowed view of the value in a column.
    pub tuple_get_value: unsafe extern "C" fn(RawHandle, u64, *mut RawHandle) -> NativeState,

    /// Destroys an owned value.
    pub value_destroy: Destroy,
    /// Deep copy of a value; the copy is owned by the caller.
    pub value_clone: unsafe extern "C" fn(RawHandle) -> RawHandle,
    /// Typed null.
    pub value_create_null: unsafe extern "C" fn(u32) -> RawHandle,
    /// BOOL value.
    pub value_create_bool: unsafe extern "C" fn(bool) -> RawHandle,
    /// INT8 value.
    pub value_create_int8: unsafe extern "C" fn(i8) -> RawHandle,
    /// INT16 value.
    pub value_create_int16: unsafe extern "C" fn(i16) -> RawHandle,
    /// INT32 value.
    pub value_create_int32: unsafe extern "C" fn(i32) -> RawHandle,
    /// INT64 value.
    pub value_create_int64: unsafe extern "C" fn(i64) -> RawHandle,
    /// UINT8 value.
    pub value_create_uint8: unsafe extern "C" fn(u8) -> RawHandle,
    /// UINT16 value.
    pub value_create_uint16: unsafe extern "C" fn(u16) -> RawHandle,
    /// UINT32 value.
    pub value_create_uint32: unsafe extern "C" fn(u32) -> RawHandle,
    /// UINT64 value.
    pub value_create_uint64: unsafe extern "C" fn(u64) -> RawHandle,
    /// INT128 value.
    pub value_create_int128: unsafe extern "C" fn(RawInt128) -> RawHandle,
    /// UUID value (128 bits, big-endian order in `high:low`).
    pub value_create_uuid: unsafe extern "C" fn(RawInt128) -> RawHandle,
    /// FLOAT value.
    pub value_create_float: unsafe extern "C" fn(f32) -> RawHandle,
    /// DOUBLE value.
    pub value_create_double: unsafe extern "C" fn(f64) -> RawHandle,
    /// DECIMAL value from an unscaled integer, precision and scale.
    pub value_create_decimal: unsafe extern "C" fn(RawInt128, u8, u8) -> RawHandle,
    /// STRING value; bytes are copied verbatim.
    pub value_create_string: unsafe extern "C" fn(ByteView) -> RawHandle,
    /// BLOB value.
    pub value_create_blob: unsafe extern "C" fn(ByteView) -> RawHandle,
    /// DATE value from days since the Unix epoch.
    pub value_create_date: unsafe extern "C" fn(i32) -> RawHandle,
    /// Timestamp of the given tag; the unit follows the tag.
    pub value_create_timestamp: unsafe extern "C" fn(u32, i64) -> RawHandle,
    /// INTERVAL value.
    pub value_create_interval: unsafe extern "C" fn(RawInterval) -> RawHandle,
    /// INTERNAL_ID value.
    pub value_create_internal_id: unsafe extern "C" fn(RawInternalId) -> RawHandle,
    /// LIST value copied from `count` element values. Fails on mixed element types.
    pub value_create_list: unsafe extern "C" fn(u64, *const RawHandle, *mut RawHandle) -> NativeState,
    /// STRUCT value copied from `count` named field values.
    pub value_create_struct:
        unsafe extern "C" fn(u64, *const ByteView, *const RawHandle, *mut RawHandle) -> NativeState,
    /// MAP value copied from `count` key/value pairs.
    pub value_create_map:
        unsafe extern "C" fn(u64, *const RawHandle, *const RawHandle, *mut RawHandle) -> NativeState,

    /// Null flag, independent of the type tag.
    pub value_is_null: unsafe extern "C" fn(RawHandle) -> bool,
    /// Sets the null flag without changing the type tag.
    pub value_set_null: unsafe extern "C" fn(RawHandle, bool),
    /// Type tag of a value.
    pub value_get_type: unsafe extern "C" fn(RawHandle) -> u32,
    /// Reads a BOOL.
    pub value_get_bool: unsafe extern "C" fn(RawHandle, *mut bool) -> NativeState,
    /// Reads an INT8.
    pub value_get_int8: unsafe extern "C" fn(RawHandle, *mut i8) -> NativeState,
    /// Reads an INT16.
    pub value_get_int16: unsafe extern "C" fn(RawHandle, *mut i16) -> NativeState,
    /// Reads an INT32.
    pub value_get_int32: unsafe extern "C" fn(RawHandle, *mut i32) -> NativeState,
    /// Reads an INT64 (or SERIAL).
    pub value_get_int64: unsafe extern "C" fn(RawHandle, *mut i64) -> NativeState,
    /// Reads a UINT8.
    pub value_get_uint8: unsafe extern "C" fn(RawHandle, *mut u8) -> NativeState,
    /// Reads a UINT16.
    pub value_get_uint16: unsafe extern "C" fn(RawHandle, *mut u16) -> NativeState,
    /// Reads a UINT32.
    pub value_get_uint32: unsafe extern "C" fn(RawHandle, *mut u32) -> NativeState,
    /// Reads a UINT64.
    pub value_get_uint64: unsafe extern "C" fn(RawHandle, *mut u64) -> NativeState,
    /// Reads an INT128.
    pub value_get_int128: unsafe extern "C" fn(RawHandle, *mut RawInt128) -> NativeState,
    /// Reads a UUID.
    pub value_get_uuid: unsafe extern "C" fn(RawHandle, *mut RawInt128) -> NativeState,
    /// Reads a FLOAT.
    pub value_get_float: unsafe extern "C" fn(RawHandle, *mut f32) -> NativeState,
    /// Reads a DOUBLE.
    pub value_get_double: unsafe extern "C" fn(RawHandle, *mut f64) -> NativeState,
    /// Reads a DECIMAL as unscaled value, precision and scale.
    pub value_get_decimal:
        unsafe extern "C" fn(RawHandle, *mut RawInt128, *mut u8, *mut u8) -> NativeState,
    /// Reads STRING bytes.
    pub value_get_string: unsafe extern "C" fn(RawHandle, *mut ByteBuf) -> NativeState,
    /// Reads BLOB bytes.
    pub value_get_blob: unsafe extern "C" fn(RawHandle, *mut ByteBuf) -> NativeState,
    /// Reads a DATE as days since the Unix epoch.
    pub value_get_date: unsafe extern "C" fn(RawHandle, *mut i32) -> NativeState,
    /// Reads any timestamp tag in its native unit.
    pub value_get_timestamp: unsafe extern "C" fn(RawHandle, *mut i64) -> NativeState,
    /// Reads an INTERVAL.
    pub value_get_interval: unsafe extern "C" fn(RawHandle, *mut RawInterval) -> NativeState,
    /// Reads an INTERNAL_ID.
    pub value_get_internal_id: unsafe extern "C" fn(RawHandle, *mut RawInternalId) -> NativeState,
    /// Element count of a list, field count of a struct, entry count of a map,
    /// property count of a node or relationship.
    pub value_get_child_count: unsafe extern "C" fn(RawHandle, *mut u64) -> NativeState,
    /// Borrowed view of a list element, struct field or node/relationship property.
    pub value_get_child: unsafe extern "C" fn(RawHandle, u64, *mut RawHandle) -> NativeState,
    /// Name of a struct field or node/relationship property.
    pub value_get_child_name: unsafe extern "C" fn(RawHandle, u64, *mut ByteBuf) -> NativeState,
    /// Borrowed view of a map key.
    pub value_get_map_key: unsafe extern "C" fn(RawHandle, u64, *mut RawHandle) -> NativeState,
    /// Borrowed view of a map value.
    pub value_get_map_value: unsafe extern "C" fn(RawHandle, u64, *mut RawHandle) -> NativeState,
    /// Label of a node or relationship.
    pub value_get_label: unsafe extern "C" fn(RawHandle, *mut ByteBuf) -> NativeState,
    /// Identifier of a node or relationship.
    pub value_get_id: unsafe extern "C" fn(RawHandle, *mut RawInternalId) -> NativeState,
    /// Source node of a relationship.
    pub value_get_rel_src: unsafe extern "C" fn(RawHandle, *mut RawInternalId) -> NativeState,
    /// Destination node of a relationship.
    pub value_get_rel_dst: unsafe extern "C" fn(RawHandle, *mut RawInternalId) -> NativeState,
}

impl NativeApi {
    /// Adopts a function table exported by an engine library.
    ///
    /// Returns `None` for a null pointer or a table built for another ABI revision.
    ///
    /// # Safety
    ///
    /// `table` must point at a fully initialized `NativeApi` that stays valid,
    /// together with every function it references, for the rest of the process.
    pub unsafe fn from_raw(table: *const NativeApi) -> Option<&'static NativeApi> {
        let api = table.as_ref()?;
        (api.abi_version == ABI_VERSION).then_some(api)
    }

    /// Copies an engine buffer into an owned `Vec` and frees it.
    pub(crate) fn take_bytes(&self, buf: ByteBuf) -> Vec<u8> {
        if buf.data.is_null() {
            return Vec::new();
        }
        // SAFETY: the engine guarantees `data` points at `len` bytes until freed.
        let bytes = unsafe { std::slice::from_raw_parts(buf.data, buf.len) }.to_vec();
        // SAFETY: the buffer came from this engine and is freed exactly once.
        unsafe { (self.bytes_free)(buf) };
        bytes
    }

    /// Same as [`NativeApi::take_bytes`], rendered lossily for diagnostics.
    pub(crate) fn take_message(&self, buf: ByteBuf) -> String {
        String::from_utf8_lossy(&self.take_bytes(buf)).into_owned()
    }

    /// Diagnostic left behind by the last failed creation call on this thread.
    pub(crate) fn last_error(&self) -> String {
        // SAFETY: no preconditions.
        let buf = unsafe { (self.last_error_message)() };
        let message = self.take_message(buf);
        if message.is_empty() {
            "engine reported failure without a diagnostic".to_string()
        } else {
            message
        }
    }
}
