#![allow(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ClientConfig, ConnectionConfig, SystemConfig};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, Lineage, Pin};
use crate::sys::{ByteView, NativeApi, ABI_VERSION};

struct Shared {
    api: &'static NativeApi,
    handle: Handle,
    path: String,
}

/// An open database.
///
/// Cloning shares the same native database; it stays open until [`close`] is
/// called or the last clone (including the ones held by connections) is
/// dropped. Closing while connections are still alive makes every later call
/// on them fail with [`Error::InvalidHandleState`].
///
/// [`close`]: Database::close
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Opens the database at `path`.
    pub fn open(api: &'static NativeApi, path: &str, config: &SystemConfig) -> Result<Database> {
        if path.is_empty() {
            return Err(Error::invalid_argument("Database::open", "path is empty"));
        }
        if api.abi_version != ABI_VERSION {
            return Err(Error::invalid_argument(
                "Database::open",
                format!(
                    "engine ABI version {} does not match expected {ABI_VERSION}",
                    api.abi_version
                ),
            ));
        }
        let raw_config = config.to_raw();
        let handle = Handle::acquire(
            api,
            HandleKind::Database,
            None,
            api.database_destroy,
            "Open database",
            |out| {
                // SAFETY: the path view and config outlive the call.
                unsafe { (api.database_init)(ByteView::new(path.as_bytes()), &raw_config, out) }
            },
        )?;
        info!(path, read_only = config.read_only, "database.open");
        Ok(Database {
            shared: Arc::new(Shared {
                api,
                handle,
                path: path.to_string(),
            }),
        })
    }

    /// Opens the config's default database with its `[system]` settings.
    pub fn open_with_config(api: &'static NativeApi, config: &ClientConfig) -> Result<Database> {
        let path = config.default_db_path().ok_or_else(|| {
            Error::invalid_argument("Database::open_with_config", "no default database path configured")
        })?;
        let path = path.to_str().ok_or_else(|| {
            Error::invalid_argument("Database::open_with_config", "database path is not valid UTF-8")
        })?;
        Database::open(api, path, config.system())
    }

    /// Opens a connection with engine defaults.
    pub fn connect(&self) -> Result<Connection> {
        self.connect_with(&ConnectionConfig::default())
    }

    /// Opens a connection and applies `config`.
    pub fn connect_with(&self, config: &ConnectionConfig) -> Result<Connection> {
        let conn = Connection::open(self.clone())?;
        if let Some(threads) = config.max_threads {
            conn.set_max_threads(threads)?;
        }
        if let Some(timeout_ms) = config.query_timeout_ms {
            conn.set_query_timeout(std::time::Duration::from_millis(timeout_ms))?;
        }
        Ok(conn)
    }

    /// Engine version string.
    pub fn version(&self) -> String {
        let api = self.shared.api;
        // SAFETY: no preconditions.
        api.take_message(unsafe { (api.engine_version)() })
    }

    /// Path the database was opened with.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Native function table this database runs on.
    pub fn api(&self) -> &'static NativeApi {
        self.shared.api
    }

    /// Closes the native database now, regardless of other clones.
    ///
    /// Returns false when it was already closed.
    pub fn close(&self) -> bool {
        let released = self.shared.handle.release();
        if released {
            debug!(path = self.shared.path.as_str(), "database.close");
        }
        released
    }

    /// Whether [`Database::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.shared.handle.is_released()
    }

    pub(crate) fn lineage(&self) -> Lineage {
        self.shared.handle.lineage()
    }

    pub(crate) fn pin(&self) -> Result<Pin> {
        self.shared.handle.pin()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
