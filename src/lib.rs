//! Safe client binding for an embedded graph database engine.
//!
//! The engine is reached through a table of C entry points ([`sys::NativeApi`]).
//! On top of it this crate provides:
//!
//! - deterministic, idempotent release of every engine object, with children
//!   never outliving their parents ([`handle`]);
//! - a typed value model that round-trips every engine type losslessly
//!   ([`value`]);
//! - prepared statements with declared-type checked binding ([`statement`]);
//! - forward-only cursors, typed rows and record projection ([`result`],
//!   [`record`]);
//! - zero-copy columnar export through the Arrow C Data Interface ([`arrow`]);
//! - cancellable async execution ([`cancel`]).
//!
//! The `loopback` feature adds `kuzu_bridge::loopback`, which implements the
//! same function table in process and backs the test suite.

#![warn(missing_docs)]

pub mod arrow;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod handle;
pub mod logging;
#[cfg(any(test, feature = "loopback"))]
pub mod loopback;
pub mod record;
pub mod result;
pub mod statement;
pub mod sys;
pub mod value;

pub use arrow::{ArrowPrimitive, ColumnView, ExportedArray, ExportedSchema, SchemaField};
pub use cancel::{AsyncConnection, CancelToken};
pub use config::{ClientConfig, ConfigError, ConnectionConfig, LoggingConfig, SystemConfig};
pub use connection::{Connection, InterruptHandle};
pub use database::Database;
pub use error::{Error, Result};
pub use handle::{live_handles, live_snapshot, orphaned_handles, HandleKind, LiveHandles};
pub use record::{Field, Record};
pub use result::{Column, ColumnIndex, FlatTuple, QueryResult, QuerySummary, Records, Row, Rows};
pub use statement::{ParamInfo, PreparedStatement};
pub use value::convert::{Bytes, ConversionError, IntoParam, Param};
pub use value::{
    Decimal, FromValue, InternalId, Interval, LogicalTypeId, NativeValue, Node, Rel, Text, Value,
    ValueRef,
};
