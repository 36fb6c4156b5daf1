//! Cancellable, non-blocking execution for async callers.
//!
//! Native calls block, so [`AsyncConnection`] runs them on tokio's blocking
//! pool and waits for either the call or a [`CancelToken`]. Cancelling never
//! abandons the worker: the engine is asked to interrupt (repeatedly, until
//! the call returns) and the call's own return is awaited before the future
//! completes with [`Error::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::connection::{Connection, InterruptHandle};
use crate::error::{Error, Result};
use crate::record::Record;
use crate::result::Row;
use crate::value::FromValue;

/// Interrupts issued before the engine picks up a query are lost, so they are
/// re-issued at this period until the worker returns.
const INTERRUPT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel) {
            self.state.notify.notify_waiters();
        }
    }

    /// Whether [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A [`Connection`] driven from async code.
///
/// Calls are serialized on the connection; use one `AsyncConnection` per
/// concurrent query.
#[derive(Clone)]
pub struct AsyncConnection {
    inner: Arc<Mutex<Connection>>,
    interrupt: InterruptHandle,
}

impl AsyncConnection {
    /// Moves `connection` behind an async facade.
    pub fn new(connection: Connection) -> Self {
        let interrupt = connection.interrupt_handle();
        Self {
            inner: Arc::new(Mutex::new(connection)),
            interrupt,
        }
    }

    /// Interrupt token for the underlying connection.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Runs `work` against the connection on a blocking worker.
    ///
    /// If `token` fires first, the engine is interrupted and the result is
    /// [`Error::Cancelled`] (carrying the engine's message, if it produced
    /// one), even when the call managed to finish anyway.
    pub async fn run<T, F>(&self, token: &CancelToken, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        if token.is_cancelled() {
            return Err(Error::Cancelled {
                operation,
                detail: None,
            });
        }
        let inner = Arc::clone(&self.inner);
        let started = Arc::new(AtomicBool::new(false));
        let worker_started = Arc::clone(&started);
        let worker_token = token.clone();
        let mut task: JoinHandle<Result<T>> = tokio::task::spawn_blocking(move || {
            let connection = inner.lock();
            worker_started.store(true, Ordering::Release);
            if worker_token.is_cancelled() {
                return Err(Error::Cancelled {
                    operation,
                    detail: None,
                });
            }
            work(&connection)
        });

        tokio::select! {
            joined = &mut task => return flatten(operation, joined),
            _ = token.cancelled() => {}
        }

        info!(operation, "connection.cancel");
        let mut ticker = tokio::time::interval(INTERRUPT_INTERVAL);
        // at most one interrupt in flight; it runs off the async worker
        let mut pending: Option<JoinHandle<Result<()>>> = None;
        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = ticker.tick() => {
                    if !started.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Some(previous) = pending.take() {
                        if !previous.is_finished() {
                            pending = Some(previous);
                            continue;
                        }
                        report_interrupt(previous.await);
                    }
                    let interrupt = self.interrupt.clone();
                    pending = Some(tokio::task::spawn_blocking(move || interrupt.interrupt()));
                }
            }
        };
        let detail = match joined {
            Ok(Ok(_)) => None,
            Ok(Err(Error::Cancelled { detail, .. })) => detail,
            Ok(Err(Error::NativeCallFailed { message, .. })) => Some(message),
            Ok(Err(err)) => Some(err.to_string()),
            Err(err) => Some(err.to_string()),
        };
        Err(Error::Cancelled { operation, detail })
    }

    /// Runs `text` and materializes every row.
    pub async fn query(&self, text: &str, token: &CancelToken) -> Result<Vec<Row>> {
        let text = text.to_string();
        self.run(token, "query", move |conn| conn.query(&text)?.rows().collect())
            .await
    }

    /// Runs `text` and projects every row into `R`.
    pub async fn query_as<R>(&self, text: &str, token: &CancelToken) -> Result<Vec<R>>
    where
        R: Record + Send,
    {
        let text = text.to_string();
        self.run(token, "query", move |conn| conn.query_as::<R>(&text))
            .await
    }

    /// Runs `text` and reads its single value.
    pub async fn query_scalar<T>(&self, text: &str, token: &CancelToken) -> Result<T>
    where
        T: FromValue + Send + 'static,
    {
        let text = text.to_string();
        self.run(token, "query", move |conn| conn.query_scalar::<T>(&text))
            .await
    }

    /// Like [`AsyncConnection::query`], but cancels once `timeout` elapses.
    pub async fn query_with_timeout(&self, text: &str, timeout: Duration) -> Result<Vec<Row>> {
        let token = CancelToken::new();
        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_token.cancel();
        });
        let text = text.to_string();
        let outcome = self
            .run(&token, "timed query", move |conn| conn.query(&text)?.rows().collect())
            .await;
        timer.abort();
        outcome
    }
}

impl std::fmt::Debug for AsyncConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

fn report_interrupt(outcome: std::result::Result<Result<()>, JoinError>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "connection.cancel.interrupt_failed"),
        Err(err) => debug!(error = %err, "connection.cancel.interrupt_failed"),
    }
}

fn flatten<T>(operation: &'static str, joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.map_err(|err| {
        Error::native(
            "Background query",
            format!("{operation} worker did not complete: {err}"),
        )
    })?
}
