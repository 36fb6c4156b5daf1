use thiserror::Error;

use crate::config::ConfigError;
use crate::handle::HandleKind;

/// Result type used throughout the bridge.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the bridge.
///
/// Every variant that originates from an engine diagnostic keeps the engine's
/// text verbatim in its `message` field; `Display` only adds a stage prefix.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input was null, empty or otherwise unusable. Raised before any
    /// native call is made.
    #[error("invalid argument for {operation}: {message}")]
    InvalidArgument {
        /// Operation that rejected the input.
        operation: &'static str,
        /// What was wrong with it.
        message: String,
    },
    /// The handle (or one of its ancestors) was released, or the row it points
    /// at was invalidated by a cursor advance.
    #[error("{kind} handle is not usable: {reason}")]
    InvalidHandleState {
        /// Kind of the handle that was accessed.
        kind: HandleKind,
        /// Why it is unusable.
        reason: String,
    },
    /// A native creation or execution call reported failure.
    #[error("{stage} failed: {message}")]
    NativeCallFailed {
        /// Stage marker, e.g. `Query` or `Open database`.
        stage: &'static str,
        /// Engine diagnostic, verbatim.
        message: String,
    },
    /// Query compilation failed.
    #[error("Prepare failed: {message}")]
    PrepareFailed {
        /// Engine diagnostic, verbatim.
        message: String,
    },
    /// `bind` named a parameter the compiled statement does not declare.
    #[error("unknown parameter '{name}'")]
    UnknownParameter {
        /// The name that was looked up (case-sensitive).
        name: String,
    },
    /// A value could not be converted without loss.
    #[error("type mismatch for {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Column, parameter or field being converted.
        context: String,
        /// Requested target type.
        expected: String,
        /// What was actually stored.
        found: String,
    },
    /// A numeric value lies outside the target's representable range.
    #[error("overflow for {context}: {value} does not fit in {target}")]
    Overflow {
        /// Column, parameter or field being converted.
        context: String,
        /// Target type.
        target: &'static str,
        /// Offending value rendered as text.
        value: String,
    },
    /// Record auto-binding met a member that is itself a record.
    #[error("cannot bind parameter '{name}': {type_name} is a nested record")]
    UnsupportedBindType {
        /// Parameter the member would have been bound to.
        name: String,
        /// Rust type name of the nested record.
        type_name: &'static str,
    },
    /// `next` was called on a cursor with no remaining rows.
    #[error("cursor exhausted after {rows_read} rows")]
    CursorExhausted {
        /// Rows produced before exhaustion.
        rows_read: u64,
    },
    /// A scalar accessor ran on a result that is not exactly one row by one column.
    #[error("expected a 1x1 result, found {rows} row(s) and {columns} column(s)")]
    UnexpectedShape {
        /// Rows observed (counting stops at 2).
        rows: u64,
        /// Columns in the result.
        columns: usize,
    },
    /// A cooperative interrupt completed the operation.
    #[error("{operation} cancelled{}", detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Cancelled {
        /// Operation that was cancelled.
        operation: &'static str,
        /// Engine message observed after the interrupt, if any.
        detail: Option<String>,
    },
    /// Client configuration could not be loaded or stored.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn invalid_argument(operation: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn native(stage: &'static str, message: impl Into<String>) -> Self {
        Error::NativeCallFailed {
            stage,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_handle(kind: HandleKind, reason: impl Into<String>) -> Self {
        Error::InvalidHandleState {
            kind,
            reason: reason.into(),
        }
    }
}
