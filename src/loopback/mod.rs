#![allow(unsafe_code)]

//! In-process reference engine implementing the native ABI.
//!
//! The loopback engine backs every entry of [`NativeApi`] with real heap
//! objects, so the whole binding (handle lifetimes, value marshaling, cursors,
//! columnar export, interrupts) can be exercised without the graph engine.
//! Query semantics are scripted: each accepted query text is registered with
//! its parameter types, result columns and a handler that produces rows.
//! Built only with the `loopback` feature.
//!
//! ```ignore
//! use kuzu_bridge::loopback::LoopbackEngine;
//! use kuzu_bridge::{LogicalTypeId, Value};
//!
//! let db = LoopbackEngine::new()
//!     .statement(
//!         "RETURN $x + 1 AS y",
//!         &[("x", LogicalTypeId::Int64)],
//!         &[("y", LogicalTypeId::Int64)],
//!         |call| {
//!             let x: i64 = call.param_as("x")?;
//!             Ok(vec![vec![Value::Int64(x + 1)]])
//!         },
//!     )
//!     .open()?;
//! ```

mod arrow;
mod values;

use std::cell::RefCell;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::SystemConfig;
use crate::database::Database;
use crate::error::Result;
use crate::sys::{
    ByteBuf, ByteView, NativeApi, NativeState, RawHandle, RawSystemConfig, ABI_VERSION,
};
use crate::value::{FromValue, LogicalTypeId, Value};

use self::values::LbValue;

/// Rows produced by a handler, or the engine error message to report.
pub type HandlerResult = std::result::Result<Vec<Vec<Value>>, String>;

type Handler = dyn Fn(&Invocation<'_>) -> HandlerResult + Send + Sync;

struct Script {
    params: Vec<(String, u32)>,
    columns: Vec<(String, u32)>,
    handler: Box<Handler>,
}

type Scripts = FxHashMap<String, Arc<Script>>;

fn registry() -> &'static Mutex<FxHashMap<String, Arc<Scripts>>> {
    static ENGINES: OnceLock<Mutex<FxHashMap<String, Arc<Scripts>>>> = OnceLock::new();
    ENGINES.get_or_init(Default::default)
}

static NEXT_ENGINE: AtomicU64 = AtomicU64::new(1);

/// Builder for a scripted engine instance.
#[derive(Default)]
pub struct LoopbackEngine {
    scripts: Scripts,
}

impl LoopbackEngine {
    /// An engine that accepts no queries yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `text`, declaring its parameters and result columns.
    ///
    /// The handler runs on every execution with the bound parameters and must
    /// return rows matching `columns`, or an engine error message.
    pub fn statement<F>(
        mut self,
        text: &str,
        params: &[(&str, LogicalTypeId)],
        columns: &[(&str, LogicalTypeId)],
        handler: F,
    ) -> Self
    where
        F: Fn(&Invocation<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let script = Script {
            params: params
                .iter()
                .map(|(name, ty)| (name.to_string(), ty.as_raw()))
                .collect(),
            columns: columns
                .iter()
                .map(|(name, ty)| (name.to_string(), ty.as_raw()))
                .collect(),
            handler: Box::new(handler),
        };
        self.scripts.insert(text.to_string(), Arc::new(script));
        self
    }

    /// Makes the engine reachable under a fresh `loopback:N` database path.
    pub fn register(self) -> String {
        let path = format!("loopback:{}", NEXT_ENGINE.fetch_add(1, Ordering::Relaxed));
        registry().lock().insert(path.clone(), Arc::new(self.scripts));
        debug!(path = path.as_str(), "loopback.register");
        path
    }

    /// Registers the engine and opens it with default settings.
    pub fn open(self) -> Result<Database> {
        let path = self.register();
        Database::open(api(), &path, &SystemConfig::default())
    }
}

/// Function table of the loopback engine.
pub fn api() -> &'static NativeApi {
    &API
}

/// Same engine, built without columnar export.
pub fn api_without_arrow() -> &'static NativeApi {
    &API_WITHOUT_ARROW
}

/// Context handed to a statement handler.
pub struct Invocation<'a> {
    params: &'a FxHashMap<String, Value>,
    connection: &'a LbConnection,
    started: Instant,
}

impl Invocation<'_> {
    /// Bound parameter, if any.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Bound parameter converted to `T`, or an engine-style error message.
    pub fn param_as<T: FromValue>(&self, name: &str) -> std::result::Result<T, String> {
        let value = self
            .param(name)
            .cloned()
            .ok_or_else(|| format!("Runtime exception: Parameter {name} not found."))?;
        value
            .into_typed()
            .map_err(|err| format!("Runtime exception: parameter {name}: {err}"))
    }

    /// Whether the query was interrupted or ran past the connection timeout.
    pub fn is_interrupted(&self) -> bool {
        if self.connection.interrupted.load(Ordering::Acquire) {
            return true;
        }
        let timeout = self.connection.timeout_ms.load(Ordering::Acquire);
        timeout != 0 && self.started.elapsed() >= Duration::from_millis(timeout)
    }

    /// `Err("Interrupted.")` once [`Invocation::is_interrupted`] holds.
    pub fn check_interrupt(&self) -> std::result::Result<(), String> {
        if self.is_interrupted() {
            Err("Interrupted.".to_string())
        } else {
            Ok(())
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

fn fail(message: impl Into<String>) -> NativeState {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message.into_bytes());
    NativeState::ERROR
}

fn ok() -> NativeState {
    NativeState::SUCCESS
}

fn alloc_bytes(bytes: &[u8]) -> ByteBuf {
    if bytes.is_empty() {
        return ByteBuf::empty();
    }
    let boxed: Box<[u8]> = bytes.into();
    let len = boxed.len();
    ByteBuf {
        data: Box::into_raw(boxed).cast::<u8>(),
        len,
    }
}

fn boxed<T>(value: T) -> RawHandle {
    Box::into_raw(Box::new(value)).cast::<c_void>()
}

/// # Safety
///
/// `raw` must be a live object of type `T` created by this engine.
unsafe fn object<'a, T>(raw: RawHandle) -> &'a T {
    &*(raw as *const T)
}

unsafe extern "C" fn bytes_free(buf: ByteBuf) {
    if !buf.data.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buf.data, buf.len)));
    }
}

unsafe extern "C" fn last_error_message() -> ByteBuf {
    LAST_ERROR.with(|slot| alloc_bytes(&slot.borrow()))
}

unsafe extern "C" fn engine_version() -> ByteBuf {
    alloc_bytes(concat!("loopback-", env!("CARGO_PKG_VERSION")).as_bytes())
}

struct LbDatabase {
    scripts: Arc<Scripts>,
    config: RawSystemConfig,
}

unsafe extern "C" fn database_init(
    path: ByteView,
    config: *const RawSystemConfig,
    out: *mut RawHandle,
) -> NativeState {
    let path = String::from_utf8_lossy(path.as_slice()).into_owned();
    let Some(config) = config.as_ref() else {
        return fail("Runtime exception: missing system configuration");
    };
    let Some(scripts) = registry().lock().get(&path).cloned() else {
        return fail(format!(
            "IO exception: Cannot open database at '{path}': no loopback engine is registered there"
        ));
    };
    *out = boxed(LbDatabase {
        scripts,
        config: *config,
    });
    ok()
}

unsafe extern "C" fn database_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbDatabase));
}

struct LbConnection {
    scripts: Arc<Scripts>,
    max_threads: AtomicU64,
    timeout_ms: AtomicU64,
    interrupted: AtomicBool,
}

unsafe extern "C" fn connection_init(db: RawHandle, out: *mut RawHandle) -> NativeState {
    let db = object::<LbDatabase>(db);
    let threads = match db.config.max_num_threads {
        0 => std::thread::available_parallelism().map_or(1, |n| n.get() as u64),
        n => n,
    };
    *out = boxed(LbConnection {
        scripts: Arc::clone(&db.scripts),
        max_threads: AtomicU64::new(threads),
        timeout_ms: AtomicU64::new(0),
        interrupted: AtomicBool::new(false),
    });
    ok()
}

unsafe extern "C" fn connection_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbConnection));
}

unsafe extern "C" fn connection_set_max_threads(raw: RawHandle, threads: u64) -> NativeState {
    if threads == 0 {
        return fail("Runtime exception: number of threads must be positive");
    }
    object::<LbConnection>(raw)
        .max_threads
        .store(threads, Ordering::Release);
    ok()
}

unsafe extern "C" fn connection_get_max_threads(raw: RawHandle, out: *mut u64) -> NativeState {
    *out = object::<LbConnection>(raw).max_threads.load(Ordering::Acquire);
    ok()
}

unsafe extern "C" fn connection_set_query_timeout(raw: RawHandle, millis: u64) -> NativeState {
    object::<LbConnection>(raw)
        .timeout_ms
        .store(millis, Ordering::Release);
    ok()
}

unsafe extern "C" fn connection_interrupt(raw: RawHandle) {
    object::<LbConnection>(raw)
        .interrupted
        .store(true, Ordering::Release);
}

fn unknown_query(text: &str) -> String {
    format!("Parser exception: loopback engine does not recognize query \"{text}\"")
}

unsafe extern "C" fn connection_query(
    raw: RawHandle,
    text: ByteView,
    out: *mut RawHandle,
) -> NativeState {
    let conn = object::<LbConnection>(raw);
    let text = String::from_utf8_lossy(text.as_slice()).into_owned();
    let result = match conn.scripts.get(&text) {
        None => LbResult::failed(unknown_query(&text)),
        Some(script) => match script.params.first() {
            Some((name, _)) => LbResult::failed(format!(
                "Binder exception: Parameter {name} not found. Use prepare to bind parameters."
            )),
            None => run(conn, script, &FxHashMap::default(), 0.0),
        },
    };
    let state = result.state();
    *out = boxed(result);
    state
}

struct LbStatement {
    script: Option<Arc<Script>>,
    error: String,
    compiling_time_ms: f64,
    bindings: Mutex<FxHashMap<String, Value>>,
}

unsafe extern "C" fn connection_prepare(
    raw: RawHandle,
    text: ByteView,
    out: *mut RawHandle,
) -> NativeState {
    let started = Instant::now();
    let conn = object::<LbConnection>(raw);
    let text = String::from_utf8_lossy(text.as_slice()).into_owned();
    let script = conn.scripts.get(&text).cloned();
    let error = if script.is_none() {
        unknown_query(&text)
    } else {
        String::new()
    };
    *out = boxed(LbStatement {
        script,
        error,
        compiling_time_ms: started.elapsed().as_secs_f64() * 1e3,
        bindings: Mutex::new(FxHashMap::default()),
    });
    ok()
}

unsafe extern "C" fn connection_execute(
    conn: RawHandle,
    stmt: RawHandle,
    out: *mut RawHandle,
) -> NativeState {
    let conn = object::<LbConnection>(conn);
    let stmt = object::<LbStatement>(stmt);
    let result = match &stmt.script {
        None => LbResult::failed(stmt.error.clone()),
        Some(script) => {
            let bindings = stmt.bindings.lock().clone();
            match script
                .params
                .iter()
                .find(|(name, _)| !bindings.contains_key(name))
            {
                Some((name, _)) => {
                    LbResult::failed(format!("Runtime exception: Parameter {name} not found."))
                }
                None => run(conn, script, &bindings, stmt.compiling_time_ms),
            }
        }
    };
    let state = result.state();
    *out = boxed(result);
    state
}

unsafe extern "C" fn statement_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbStatement));
}

unsafe extern "C" fn statement_is_success(raw: RawHandle) -> bool {
    object::<LbStatement>(raw).script.is_some()
}

unsafe extern "C" fn statement_error_message(raw: RawHandle) -> ByteBuf {
    alloc_bytes(object::<LbStatement>(raw).error.as_bytes())
}

fn declared(stmt: &LbStatement) -> &[(String, u32)] {
    stmt.script.as_deref().map_or(&[], |script| &script.params)
}

unsafe extern "C" fn statement_param_count(raw: RawHandle) -> u64 {
    declared(object::<LbStatement>(raw)).len() as u64
}

unsafe extern "C" fn statement_param_name(raw: RawHandle, index: u64, out: *mut ByteBuf) -> NativeState {
    match declared(object::<LbStatement>(raw)).get(index as usize) {
        Some((name, _)) => {
            *out = alloc_bytes(name.as_bytes());
            ok()
        }
        None => fail(format!("Runtime exception: no parameter at index {index}")),
    }
}

unsafe extern "C" fn statement_param_type(raw: RawHandle, name: ByteView, out: *mut u32) -> NativeState {
    let name = name.as_slice();
    match declared(object::<LbStatement>(raw))
        .iter()
        .find(|(declared, _)| declared.as_bytes() == name)
    {
        Some((_, tag)) => {
            *out = *tag;
            ok()
        }
        None => fail(format!(
            "Binder exception: Parameter {} not found.",
            String::from_utf8_lossy(name)
        )),
    }
}

unsafe extern "C" fn statement_bind_value(
    raw: RawHandle,
    name: ByteView,
    value: RawHandle,
) -> NativeState {
    let stmt = object::<LbStatement>(raw);
    let name = String::from_utf8_lossy(name.as_slice()).into_owned();
    let Some(&(_, tag)) = declared(stmt).iter().find(|(declared, _)| *declared == name) else {
        return fail(format!("Binder exception: Parameter {name} not found."));
    };
    let value = values::value(value);
    if !accepts(tag, value.tag) {
        return fail(format!(
            "Binder exception: Parameter {name} has data type {} but expects {tag}.",
            value.tag
        ));
    }
    match value.to_host() {
        Ok(host) => {
            stmt.bindings.lock().insert(name, host);
            ok()
        }
        Err(message) => fail(format!("Binder exception: {message}")),
    }
}

fn accepts(declared: u32, actual: u32) -> bool {
    use crate::sys::type_id::{ANY, ARRAY, INT64, LIST, SERIAL};
    declared == actual
        || declared == ANY
        || (declared, actual) == (ARRAY, LIST)
        || (declared, actual) == (SERIAL, INT64)
}

struct LbResult {
    error: Option<String>,
    columns: Vec<(String, u32)>,
    rows: Vec<Vec<LbValue>>,
    cursor: AtomicUsize,
    compiling_time_ms: f64,
    execution_time_ms: f64,
}

impl LbResult {
    fn failed(message: String) -> Self {
        Self {
            error: Some(message),
            columns: Vec::new(),
            rows: Vec::new(),
            cursor: AtomicUsize::new(0),
            compiling_time_ms: 0.0,
            execution_time_ms: 0.0,
        }
    }

    fn state(&self) -> NativeState {
        match &self.error {
            Some(message) => fail(message.clone()),
            None => ok(),
        }
    }
}

fn run(
    conn: &LbConnection,
    script: &Script,
    params: &FxHashMap<String, Value>,
    compiling_time_ms: f64,
) -> LbResult {
    conn.interrupted.store(false, Ordering::Release);
    let invocation = Invocation {
        params,
        connection: conn,
        started: Instant::now(),
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| (script.handler)(&invocation)))
        .unwrap_or_else(|_| Err("Runtime exception: query handler panicked".to_string()));
    let execution_time_ms = invocation.started.elapsed().as_secs_f64() * 1e3;
    let rows = match outcome {
        Ok(rows) => rows,
        Err(message) => return LbResult::failed(message),
    };
    let mut stored = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        if row.len() != script.columns.len() {
            return LbResult::failed(format!(
                "Runtime exception: row {index} has {} values for {} columns",
                row.len(),
                script.columns.len()
            ));
        }
        match row.iter().map(LbValue::from_host).collect() {
            Ok(values) => stored.push(values),
            Err(message) => return LbResult::failed(format!("Runtime exception: {message}")),
        }
    }
    LbResult {
        error: None,
        columns: script.columns.clone(),
        rows: stored,
        cursor: AtomicUsize::new(0),
        compiling_time_ms,
        execution_time_ms,
    }
}

unsafe extern "C" fn result_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbResult));
}

unsafe extern "C" fn result_is_success(raw: RawHandle) -> bool {
    object::<LbResult>(raw).error.is_none()
}

unsafe extern "C" fn result_error_message(raw: RawHandle) -> ByteBuf {
    alloc_bytes(object::<LbResult>(raw).error.as_deref().unwrap_or("").as_bytes())
}

unsafe extern "C" fn result_num_columns(raw: RawHandle) -> u64 {
    object::<LbResult>(raw).columns.len() as u64
}

unsafe extern "C" fn result_column_name(raw: RawHandle, index: u64, out: *mut ByteBuf) -> NativeState {
    match object::<LbResult>(raw).columns.get(index as usize) {
        Some((name, _)) => {
            *out = alloc_bytes(name.as_bytes());
            ok()
        }
        None => fail(format!("Runtime exception: no column at index {index}")),
    }
}

unsafe extern "C" fn result_column_type(raw: RawHandle, index: u64, out: *mut u32) -> NativeState {
    match object::<LbResult>(raw).columns.get(index as usize) {
        Some((_, tag)) => {
            *out = *tag;
            ok()
        }
        None => fail(format!("Runtime exception: no column at index {index}")),
    }
}

unsafe extern "C" fn result_num_tuples(raw: RawHandle) -> u64 {
    object::<LbResult>(raw).rows.len() as u64
}

unsafe extern "C" fn result_has_next(raw: RawHandle) -> bool {
    let result = object::<LbResult>(raw);
    result.cursor.load(Ordering::Acquire) < result.rows.len()
}

struct LbTuple {
    values: Vec<LbValue>,
}

unsafe extern "C" fn result_get_next(raw: RawHandle, out: *mut RawHandle) -> NativeState {
    let result = object::<LbResult>(raw);
    let index = result.cursor.load(Ordering::Acquire);
    let Some(row) = result.rows.get(index) else {
        return fail("Runtime exception: no more tuples");
    };
    result.cursor.store(index + 1, Ordering::Release);
    *out = boxed(LbTuple {
        values: row.clone(),
    });
    ok()
}

struct LbSummary {
    compiling_time_ms: f64,
    execution_time_ms: f64,
}

unsafe extern "C" fn result_get_summary(raw: RawHandle, out: *mut RawHandle) -> NativeState {
    let result = object::<LbResult>(raw);
    *out = boxed(LbSummary {
        compiling_time_ms: result.compiling_time_ms,
        execution_time_ms: result.execution_time_ms,
    });
    ok()
}

unsafe extern "C" fn summary_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbSummary));
}

unsafe extern "C" fn summary_compiling_time(raw: RawHandle) -> f64 {
    object::<LbSummary>(raw).compiling_time_ms
}

unsafe extern "C" fn summary_execution_time(raw: RawHandle) -> f64 {
    object::<LbSummary>(raw).execution_time_ms
}

unsafe extern "C" fn tuple_destroy(raw: RawHandle) {
    drop(Box::from_raw(raw as *mut LbTuple));
}

unsafe extern "C" fn tuple_get_value(raw: RawHandle, index: u64, out: *mut RawHandle) -> NativeState {
    match object::<LbTuple>(raw).values.get(index as usize) {
        Some(value) => {
            *out = values::view(value);
            ok()
        }
        None => fail(format!("Runtime exception: no value at index {index}")),
    }
}

const API_TABLE: NativeApi = NativeApi {
    abi_version: ABI_VERSION,
    bytes_free,
    last_error_message,
    engine_version,
    database_init,
    database_destroy,
    connection_init,
    connection_destroy,
    connection_set_max_threads,
    connection_get_max_threads,
    connection_set_query_timeout,
    connection_interrupt,
    connection_query,
    connection_prepare,
    connection_execute,
    statement_destroy,
    statement_is_success,
    statement_error_message,
    statement_param_count,
    statement_param_name,
    statement_param_type,
    statement_bind_value,
    result_destroy,
    result_is_success,
    result_error_message,
    result_num_columns,
    result_column_name,
    result_column_type,
    result_num_tuples,
    result_has_next,
    result_get_next,
    result_get_summary,
    result_get_arrow_schema: Some(arrow::result_get_arrow_schema),
    result_get_next_arrow_chunk: Some(arrow::result_get_next_arrow_chunk),
    summary_destroy,
    summary_compiling_time,
    summary_execution_time,
    tuple_destroy,
    tuple_get_value,
    value_destroy: values::value_destroy,
    value_clone: values::value_clone,
    value_create_null: values::value_create_null,
    value_create_bool: values::value_create_bool,
    value_create_int8: values::value_create_int8,
    value_create_int16: values::value_create_int16,
    value_create_int32: values::value_create_int32,
    value_create_int64: values::value_create_int64,
    value_create_uint8: values::value_create_uint8,
    value_create_uint16: values::value_create_uint16,
    value_create_uint32: values::value_create_uint32,
    value_create_uint64: values::value_create_uint64,
    value_create_int128: values::value_create_int128,
    value_create_uuid: values::value_create_uuid,
    value_create_float: values::value_create_float,
    value_create_double: values::value_create_double,
    value_create_decimal: values::value_create_decimal,
    value_create_string: values::value_create_string,
    value_create_blob: values::value_create_blob,
    value_create_date: values::value_create_date,
    value_create_timestamp: values::value_create_timestamp,
    value_create_interval: values::value_create_interval,
    value_create_internal_id: values::value_create_internal_id,
    value_create_list: values::value_create_list,
    value_create_struct: values::value_create_struct,
    value_create_map: values::value_create_map,
    value_is_null: values::value_is_null,
    value_set_null: values::value_set_null,
    value_get_type: values::value_get_type,
    value_get_bool: values::value_get_bool,
    value_get_int8: values::value_get_int8,
    value_get_int16: values::value_get_int16,
    value_get_int32: values::value_get_int32,
    value_get_int64: values::value_get_int64,
    value_get_uint8: values::value_get_uint8,
    value_get_uint16: values::value_get_uint16,
    value_get_uint32: values::value_get_uint32,
    value_get_uint64: values::value_get_uint64,
    value_get_int128: values::value_get_int128,
    value_get_uuid: values::value_get_uuid,
    value_get_float: values::value_get_float,
    value_get_double: values::value_get_double,
    value_get_decimal: values::value_get_decimal,
    value_get_string: values::value_get_string,
    value_get_blob: values::value_get_blob,
    value_get_date: values::value_get_date,
    value_get_timestamp: values::value_get_timestamp,
    value_get_interval: values::value_get_interval,
    value_get_internal_id: values::value_get_internal_id,
    value_get_child_count: values::value_get_child_count,
    value_get_child: values::value_get_child,
    value_get_child_name: values::value_get_child_name,
    value_get_map_key: values::value_get_map_key,
    value_get_map_value: values::value_get_map_value,
    value_get_label: values::value_get_label,
    value_get_id: values::value_get_id,
    value_get_rel_src: values::value_get_rel_src,
    value_get_rel_dst: values::value_get_rel_dst,
};

static API: NativeApi = API_TABLE;

static API_WITHOUT_ARROW: NativeApi = NativeApi {
    result_get_arrow_schema: None,
    result_get_next_arrow_chunk: None,
    ..API_TABLE
};
