#![allow(unsafe_code)]

//! Forward-only cursors over query results.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, Lineage, Pin};
use crate::record::{self, MappingPlan, Record};
use crate::sys::{ByteBuf, NativeApi, RawHandle};
use crate::value::{FromValue, LogicalTypeId, Value, ValueRef};

/// Name and type of a result column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// Column name as produced by the query (`RETURN p.name AS Name` gives `Name`).
    pub name: String,
    /// Raw type tag.
    pub type_tag: u32,
}

impl Column {
    /// Column type, if known to this crate.
    pub fn logical_type(&self) -> Option<LogicalTypeId> {
        LogicalTypeId::from_raw(self.type_tag)
    }
}

/// Selects a column by position or by name.
pub trait ColumnIndex {
    /// Resolves to a 0-based position. Names resolve to their first match.
    fn resolve(&self, columns: &[Column]) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, columns: &[Column]) -> Result<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(Error::invalid_argument(
                "column access",
                format!("column index {self} out of range ({} columns)", columns.len()),
            ))
        }
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, columns: &[Column]) -> Result<usize> {
        columns
            .iter()
            .position(|column| column.name == *self)
            .ok_or_else(|| Error::invalid_argument("column access", format!("no column named '{self}'")))
    }
}

impl ColumnIndex for String {
    fn resolve(&self, columns: &[Column]) -> Result<usize> {
        self.as_str().resolve(columns)
    }
}

impl ColumnIndex for &String {
    fn resolve(&self, columns: &[Column]) -> Result<usize> {
        self.as_str().resolve(columns)
    }
}

fn column_context(columns: &[Column], index: usize) -> String {
    format!("column '{}'", columns[index].name)
}

/// Compile and execution timings of a query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuerySummary {
    /// Compilation time in milliseconds.
    pub compiling_time_ms: f64,
    /// Execution time in milliseconds.
    pub execution_time_ms: f64,
}

/// Result of a query.
///
/// Rows are read with [`has_next`]/[`next`]. Each row borrows the result
/// mutably, so it cannot outlive the next advance; [`rows`] and [`records`]
/// materialize rows instead. Releasing the result (explicitly or on drop)
/// makes every later call fail with [`Error::InvalidHandleState`].
///
/// [`has_next`]: QueryResult::has_next
/// [`next`]: QueryResult::next
/// [`rows`]: QueryResult::rows
/// [`records`]: QueryResult::records
pub struct QueryResult {
    api: &'static NativeApi,
    handle: Handle,
    columns: Arc<[Column]>,
    rows_read: u64,
    _not_sync: PhantomData<Cell<()>>,
}

impl QueryResult {
    pub(crate) fn adopt(
        api: &'static NativeApi,
        connection: &Lineage,
        raw: RawHandle,
        stage: &'static str,
    ) -> Result<QueryResult> {
        let handle = Handle::adopt(
            HandleKind::QueryResult,
            Some(connection),
            api.result_destroy,
            raw,
            stage,
        )?;
        let pin = handle.pin()?;
        // SAFETY: pinned result.
        if !unsafe { (api.result_is_success)(pin.as_ptr()) } {
            // SAFETY: pinned result; the buffer is ours.
            let message = api.take_message(unsafe { (api.result_error_message)(pin.as_ptr()) });
            return Err(Error::native(stage, message));
        }
        let columns = read_columns(api, &pin)?;
        drop(pin);
        Ok(QueryResult {
            api,
            handle,
            columns: columns.into(),
            rows_read: 0,
            _not_sync: PhantomData,
        })
    }

    /// Result columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Total number of rows in the result.
    pub fn num_tuples(&self) -> Result<u64> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned result.
        Ok(unsafe { (self.api.result_num_tuples)(pin.as_ptr()) })
    }

    /// Rows consumed through this cursor so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Whether another row is available. Does not advance.
    pub fn has_next(&self) -> Result<bool> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned result.
        Ok(unsafe { (self.api.result_has_next)(pin.as_ptr()) })
    }

    /// Advances one row.
    ///
    /// Fails with [`Error::CursorExhausted`] once every row has been read.
    pub fn next(&mut self) -> Result<FlatTuple<'_>> {
        let pin = self.handle.pin()?;
        // SAFETY: pinned result.
        if !unsafe { (self.api.result_has_next)(pin.as_ptr()) } {
            return Err(Error::CursorExhausted {
                rows_read: self.rows_read,
            });
        }
        self.handle.advance_epoch();
        let mut raw: RawHandle = ptr::null_mut();
        // SAFETY: pinned result; the tuple is handed to us.
        let state = unsafe { (self.api.result_get_next)(pin.as_ptr(), &mut raw) };
        drop(pin);
        if !state.is_success() {
            if !raw.is_null() {
                // SAFETY: ownership of a failed output still passes to us.
                unsafe { (self.api.tuple_destroy)(raw) };
            }
            return Err(Error::native("Advance cursor", self.api.last_error()));
        }
        let handle = Handle::adopt_row(
            HandleKind::Tuple,
            &self.handle.lineage(),
            self.api.tuple_destroy,
            raw,
            "Advance cursor",
        )?;
        self.rows_read += 1;
        trace!(row = self.rows_read, "result.next");
        Ok(FlatTuple {
            api: self.api,
            handle,
            columns: &self.columns,
        })
    }

    /// Reads the next row into an owned [`Row`], or `None` when exhausted.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.has_next()? {
            return Ok(None);
        }
        let row = self.next()?.to_row()?;
        Ok(Some(row))
    }

    /// Compile and execution timings.
    pub fn summary(&self) -> Result<QuerySummary> {
        let pin = self.handle.pin()?;
        let api = self.api;
        let summary = Handle::acquire(
            api,
            HandleKind::Summary,
            Some(&self.handle.lineage()),
            api.summary_destroy,
            "Query summary",
            |out| {
                // SAFETY: pinned result; the summary is handed to us.
                unsafe { (api.result_get_summary)(pin.as_ptr(), out) }
            },
        )?;
        drop(pin);
        let summary_pin = summary.pin()?;
        // SAFETY: pinned summary.
        let timings = unsafe {
            QuerySummary {
                compiling_time_ms: (api.summary_compiling_time)(summary_pin.as_ptr()),
                execution_time_ms: (api.summary_execution_time)(summary_pin.as_ptr()),
            }
        };
        Ok(timings)
    }

    /// Consumes the result as a lazy, non-restartable sequence of owned rows.
    /// The result is released as soon as the sequence ends or is dropped.
    pub fn rows(self) -> Rows {
        Rows {
            result: self,
            done: false,
        }
    }

    /// Consumes the result as a lazy sequence of records.
    pub fn records<R: Record>(self) -> Records<R> {
        let columns: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        let plan = record::plan_for::<R>(&columns);
        Records {
            rows: self.rows(),
            plan,
            columns,
            _record: PhantomData,
        }
    }

    /// Reads the only value of a 1x1 result.
    pub fn single_value<T: FromValue>(mut self) -> Result<T> {
        let columns = self.columns.len();
        if columns != 1 {
            let rows = self.num_tuples()?.min(2);
            return Err(Error::UnexpectedShape { rows, columns });
        }
        if !self.has_next()? {
            return Err(Error::UnexpectedShape { rows: 0, columns });
        }
        let value = self.next()?.get(0)?;
        if self.has_next()? {
            return Err(Error::UnexpectedShape { rows: 2, columns });
        }
        value
            .into_typed()
            .map_err(|err| err.into_error(column_context(&self.columns, 0)))
    }

    /// Releases the result. Returns false when already released.
    pub fn close(&self) -> bool {
        self.handle.release()
    }

    /// Whether the result has been released.
    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    pub(crate) fn api(&self) -> &'static NativeApi {
        self.api
    }

    pub(crate) fn pin(&self) -> Result<Pin> {
        self.handle.pin()
    }

    pub(crate) fn lineage(&self) -> Lineage {
        self.handle.lineage()
    }

    /// Moves the cursor past `rows` rows consumed outside [`QueryResult::next`].
    pub(crate) fn skip_rows(&mut self, rows: u64) {
        self.handle.advance_epoch();
        self.rows_read += rows;
    }
}

fn read_columns(api: &'static NativeApi, pin: &Pin) -> Result<Vec<Column>> {
    // SAFETY: pinned result.
    let count = unsafe { (api.result_num_columns)(pin.as_ptr()) };
    let mut columns = Vec::with_capacity(count as usize);
    for index in 0..count {
        let mut buf = ByteBuf::empty();
        // SAFETY: pinned result; the buffer is ours on success.
        if !unsafe { (api.result_column_name)(pin.as_ptr(), index, &mut buf) }.is_success() {
            return Err(Error::native("Read columns", api.last_error()));
        }
        let name = String::from_utf8_lossy(&api.take_bytes(buf)).into_owned();
        let mut type_tag = 0u32;
        // SAFETY: pinned result.
        if !unsafe { (api.result_column_type)(pin.as_ptr(), index, &mut type_tag) }.is_success() {
            return Err(Error::native("Read columns", api.last_error()));
        }
        columns.push(Column { name, type_tag });
    }
    Ok(columns)
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .field("rows_read", &self.rows_read)
            .field("handle", &self.handle)
            .finish()
    }
}

/// The row at the cursor. Valid until the cursor advances or the result is
/// released.
pub struct FlatTuple<'r> {
    api: &'static NativeApi,
    handle: Handle,
    columns: &'r Arc<[Column]>,
}

impl FlatTuple<'_> {
    /// Number of values.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Borrowed view of one value; composites are decoded lazily through it.
    pub fn value<C: ColumnIndex>(&self, column: C) -> Result<ValueRef<'_>> {
        let index = column.resolve(self.columns)?;
        let pin = self.handle.pin()?;
        let mut raw: RawHandle = ptr::null_mut();
        // SAFETY: pinned tuple; the value is a view owned by the tuple.
        let state = unsafe { (self.api.tuple_get_value)(pin.as_ptr(), index as u64, &mut raw) };
        drop(pin);
        if !state.is_success() {
            return Err(Error::native(
                "Read value",
                format!("{}: {}", column_context(self.columns, index), self.api.last_error()),
            ));
        }
        ValueRef::new(self.api, &self.handle, raw)
    }

    /// Decoded value of one column.
    pub fn get<C: ColumnIndex>(&self, column: C) -> Result<Value> {
        self.value(column)?.decode()
    }

    /// Typed value of one column.
    pub fn get_as<T: FromValue, C: ColumnIndex>(&self, column: C) -> Result<T> {
        let index = column.resolve(self.columns)?;
        self.get(index)?
            .into_typed()
            .map_err(|err| err.into_error(column_context(self.columns, index)))
    }

    /// Decodes every column.
    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.columns.len()).map(|index| self.get(index)).collect()
    }

    /// Materializes the row.
    pub fn to_row(&self) -> Result<Row> {
        Ok(Row {
            columns: Arc::clone(self.columns),
            values: self.values()?,
        })
    }
}

impl fmt::Debug for FlatTuple<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatTuple")
            .field("columns", &self.columns.len())
            .field("handle", &self.handle)
            .finish()
    }
}

/// An owned, fully decoded row.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Column metadata.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Value of one column.
    pub fn get<C: ColumnIndex>(&self, column: C) -> Result<&Value> {
        let index = column.resolve(&self.columns)?;
        Ok(&self.values[index])
    }

    /// Typed value of one column.
    pub fn get_as<T: FromValue, C: ColumnIndex>(&self, column: C) -> Result<T> {
        let index = column.resolve(&self.columns)?;
        self.values[index]
            .clone()
            .into_typed()
            .map_err(|err| err.into_error(column_context(&self.columns, index)))
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Lazy sequence of rows from [`QueryResult::rows`].
pub struct Rows {
    result: QueryResult,
    done: bool,
}

impl Rows {
    /// Column metadata.
    pub fn columns(&self) -> &[Column] {
        self.result.columns()
    }

    fn finish(&mut self) {
        self.done = true;
        self.result.close();
    }
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.result.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(err) => {
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("result", &self.result)
            .field("done", &self.done)
            .finish()
    }
}

/// Lazy sequence of records from [`QueryResult::records`].
pub struct Records<R> {
    rows: Rows,
    plan: MappingPlan,
    columns: Vec<String>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Iterator for Records<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.and_then(|row| record::project(&self.plan, &self.columns, row.into_values())))
    }
}
