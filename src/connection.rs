#![allow(unsafe_code)]

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, Lineage, Pin};
use crate::record::Record;
use crate::result::QueryResult;
use crate::statement::PreparedStatement;
use crate::sys::{ByteView, NativeApi, NativeState, RawHandle};
use crate::value::FromValue;

/// A connection to a [`Database`].
///
/// Connections are `Send` but not `Sync`: one connection runs one call at a
/// time. Use several connections for concurrent queries, and
/// [`Connection::interrupt_handle`] to abort a running query from another
/// thread.
pub struct Connection {
    api: &'static NativeApi,
    // Dropped before `db` so the connection is destroyed while its database is open.
    handle: Handle,
    db: Database,
    _not_sync: PhantomData<Cell<()>>,
}

impl Connection {
    pub(crate) fn open(db: Database) -> Result<Connection> {
        let api = db.api();
        let parent = db.lineage();
        let db_pin = db.pin()?;
        let handle = Handle::acquire(
            api,
            HandleKind::Connection,
            Some(&parent),
            api.connection_destroy,
            "Open connection",
            |out| {
                // SAFETY: the database is pinned for the duration of the call.
                unsafe { (api.connection_init)(db_pin.as_ptr(), out) }
            },
        )?;
        drop(db_pin);
        debug!(path = db.path(), "connection.open");
        Ok(Connection {
            api,
            handle,
            db,
            _not_sync: PhantomData,
        })
    }

    /// Database this connection was opened on.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn query_result(
        &self,
        stage: &'static str,
        pin: Pin,
        call: impl FnOnce(&Pin, *mut RawHandle) -> NativeState,
    ) -> Result<QueryResult> {
        let mut raw: RawHandle = ptr::null_mut();
        let state = call(&pin, &mut raw);
        // The result pins its ancestors again on adoption.
        drop(pin);
        if raw.is_null() {
            let message = if state.is_success() {
                "engine returned no result".to_string()
            } else {
                self.api.last_error()
            };
            return Err(Error::native(stage, message));
        }
        QueryResult::adopt(self.api, &self.handle.lineage(), raw, stage)
    }

    /// Runs an ad hoc query.
    pub fn query(&self, text: &str) -> Result<QueryResult> {
        if text.trim().is_empty() {
            return Err(Error::invalid_argument("Connection::query", "query text is empty"));
        }
        let pin = self.handle.pin()?;
        debug!(query = text, "connection.query");
        let api = self.api;
        self.query_result("Query", pin, |pin, out| {
            // SAFETY: the connection is pinned and the text view outlives the call.
            unsafe { (api.connection_query)(pin.as_ptr(), ByteView::new(text.as_bytes()), out) }
        })
    }

    /// Compiles a parameterized query.
    pub fn prepare(&self, text: &str) -> Result<PreparedStatement> {
        if text.trim().is_empty() {
            return Err(Error::invalid_argument("Connection::prepare", "query text is empty"));
        }
        let pin = self.handle.pin()?;
        debug!(query = text, "connection.prepare");
        let mut raw: RawHandle = ptr::null_mut();
        // SAFETY: the connection is pinned and the text view outlives the call.
        let state = unsafe {
            (self.api.connection_prepare)(pin.as_ptr(), ByteView::new(text.as_bytes()), &mut raw)
        };
        drop(pin);
        if raw.is_null() {
            return Err(Error::PrepareFailed {
                message: if state.is_success() {
                    "engine returned no statement".to_string()
                } else {
                    self.api.last_error()
                },
            });
        }
        PreparedStatement::adopt(self.api, &self.handle.lineage(), raw, text)
    }

    /// Executes a prepared statement with its current bindings.
    ///
    /// Bindings are kept, so executing again reuses them.
    pub fn execute(&self, statement: &PreparedStatement) -> Result<QueryResult> {
        if !statement.belongs_to(&self.handle.lineage()) {
            return Err(Error::invalid_argument(
                "Connection::execute",
                "statement was prepared on another connection",
            ));
        }
        // Pinning the statement pins this connection as its parent.
        let pin = statement.pin()?;
        let conn_ptr = pin
            .parent_ptr()
            .ok_or_else(|| Error::invalid_handle(HandleKind::Statement, "statement has no connection"))?;
        debug!(query = statement.text(), "connection.execute");
        let api = self.api;
        self.query_result("Execute", pin, |pin, out| {
            // SAFETY: statement and connection are pinned.
            unsafe { (api.connection_execute)(conn_ptr, pin.as_ptr(), out) }
        })
    }

    /// Runs `text` and projects every row into `R`.
    pub fn query_as<R: Record>(&self, text: &str) -> Result<Vec<R>> {
        self.query(text)?.records::<R>().collect()
    }

    /// Executes `statement` and projects every row into `R`.
    pub fn execute_as<R: Record>(&self, statement: &PreparedStatement) -> Result<Vec<R>> {
        self.execute(statement)?.records::<R>().collect()
    }

    /// Runs `text` and reads its single value.
    ///
    /// Fails with [`Error::UnexpectedShape`] unless the result is exactly one
    /// row by one column.
    pub fn query_scalar<T: FromValue>(&self, text: &str) -> Result<T> {
        self.query(text)?.single_value()
    }

    /// Executes `statement` and reads its single value.
    pub fn execute_scalar<T: FromValue>(&self, statement: &PreparedStatement) -> Result<T> {
        self.execute(statement)?.single_value()
    }

    /// Binds each record in turn and executes, stopping at the first failure.
    ///
    /// Returns the number of executions.
    pub fn execute_batch<'r, R, I>(&self, statement: &mut PreparedStatement, items: I) -> Result<usize>
    where
        R: Record + 'r,
        I: IntoIterator<Item = &'r R>,
    {
        let mut executed = 0;
        for item in items {
            statement.bind_record(item)?;
            self.execute(statement)?;
            executed += 1;
        }
        debug!(executed, "connection.batch");
        Ok(executed)
    }

    /// Like [`Connection::execute_batch`], but hands each failure to `on_error`
    /// together with the item and its index, then continues.
    ///
    /// Returns the number of successful executions.
    pub fn execute_batch_tolerant<'r, R, I, F>(
        &self,
        statement: &mut PreparedStatement,
        items: I,
        mut on_error: F,
    ) -> usize
    where
        R: Record + 'r,
        I: IntoIterator<Item = &'r R>,
        F: FnMut(&R, usize, &Error),
    {
        let mut succeeded = 0;
        for (index, item) in items.into_iter().enumerate() {
            let outcome = statement
                .bind_record(item)
                .and_then(|_| self.execute(statement));
            match outcome {
                Ok(_) => succeeded += 1,
                Err(err) => {
                    warn!(index, error = %err, "connection.batch.item_failed");
                    on_error(item, index, &err);
                }
            }
        }
        debug!(succeeded, "connection.batch");
        succeeded
    }

    /// Sets the worker thread budget for later queries. Must be positive.
    pub fn set_max_threads(&self, threads: u64) -> Result<()> {
        if threads == 0 {
            return Err(Error::invalid_argument(
                "Connection::set_max_threads",
                "thread count must be positive",
            ));
        }
        let pin = self.handle.pin()?;
        // SAFETY: pinned connection.
        let state = unsafe { (self.api.connection_set_max_threads)(pin.as_ptr(), threads) };
        if !state.is_success() {
            return Err(Error::native("Set max threads", self.api.last_error()));
        }
        Ok(())
    }

    /// Current worker thread budget.
    pub fn max_threads(&self) -> Result<u64> {
        let pin = self.handle.pin()?;
        let mut threads = 0u64;
        // SAFETY: pinned connection, valid out pointer.
        let state = unsafe { (self.api.connection_get_max_threads)(pin.as_ptr(), &mut threads) };
        if !state.is_success() {
            return Err(Error::native("Get max threads", self.api.last_error()));
        }
        Ok(threads)
    }

    /// Aborts later queries that run longer than `timeout`. Zero disables the limit.
    pub fn set_query_timeout(&self, timeout: Duration) -> Result<()> {
        let millis = u64::try_from(timeout.as_millis()).map_err(|_| Error::Overflow {
            context: "query timeout".into(),
            target: "UINT64",
            value: format!("{}ms", timeout.as_millis()),
        })?;
        let pin = self.handle.pin()?;
        // SAFETY: pinned connection.
        let state = unsafe { (self.api.connection_set_query_timeout)(pin.as_ptr(), millis) };
        if !state.is_success() {
            return Err(Error::native("Set query timeout", self.api.last_error()));
        }
        debug!(timeout_ms = millis, "connection.timeout");
        Ok(())
    }

    /// Requests that the in-flight query, if any, abort.
    pub fn interrupt(&self) -> Result<()> {
        self.interrupt_handle().interrupt()
    }

    /// Token that can interrupt this connection from any thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            api: self.api,
            connection: self.handle.lineage(),
        }
    }

    /// Closes the connection. Returns false when already closed.
    pub fn close(&self) -> bool {
        self.handle.release()
    }

    /// Whether [`Connection::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.db.path())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Interrupts a connection from any thread.
///
/// Holding the token does not keep the connection open; once the connection
/// is closed, [`InterruptHandle::interrupt`] fails with
/// [`Error::InvalidHandleState`].
#[derive(Clone)]
pub struct InterruptHandle {
    api: &'static NativeApi,
    connection: Lineage,
}

impl InterruptHandle {
    /// Requests that the in-flight query, if any, abort. A no-op when idle.
    ///
    /// Does not wait behind a pending [`Database::close`] or
    /// [`Connection::close`]: those are themselves waiting for the running
    /// query, which only this call can end early.
    pub fn interrupt(&self) -> Result<()> {
        let pin = self.connection.pin_recursive()?;
        // SAFETY: pinned connection; the engine allows interrupt from any thread.
        unsafe { (self.api.connection_interrupt)(pin.as_ptr()) };
        info!("connection.interrupt");
        Ok(())
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("kind", &self.connection.kind())
            .finish()
    }
}
