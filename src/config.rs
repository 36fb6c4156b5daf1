//! Client configuration.
//!
//! [`SystemConfig`] is applied when a database is opened and
//! [`ConnectionConfig`] when a connection is derived from it. Both can be
//! built in code or loaded from a TOML file through [`ClientConfig`]:
//!
//! ```toml
//! [database]
//! default = "/var/lib/graph/main"
//!
//! [system]
//! buffer_pool_size = 268435456
//! max_num_threads = 4
//! read_only = true
//!
//! [connection]
//! max_threads = 2
//! query_timeout_ms = 30000
//!
//! [logging]
//! filter = "kuzu_bridge=debug"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sys::RawSystemConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "KUZU_BRIDGE_CONFIG";

/// Engine-level settings applied on database open. Zero sizes and thread
/// counts select the engine default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Buffer pool size in bytes.
    pub buffer_pool_size: u64,
    /// Worker threads per query.
    pub max_num_threads: u64,
    /// Enable on-disk compression.
    pub enable_compression: bool,
    /// Open without write access.
    pub read_only: bool,
    /// Maximum database size in bytes.
    pub max_db_size: u64,
    /// Checkpoint automatically once the WAL crosses `checkpoint_threshold`.
    pub auto_checkpoint: bool,
    /// WAL size in bytes that triggers an automatic checkpoint.
    pub checkpoint_threshold: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 0,
            max_num_threads: 0,
            enable_compression: true,
            read_only: false,
            max_db_size: 0,
            auto_checkpoint: true,
            checkpoint_threshold: 16 * 1024 * 1024,
        }
    }
}

impl SystemConfig {
    pub(crate) fn to_raw(&self) -> RawSystemConfig {
        RawSystemConfig {
            buffer_pool_size: self.buffer_pool_size,
            max_num_threads: self.max_num_threads,
            enable_compression: self.enable_compression,
            read_only: self.read_only,
            max_db_size: self.max_db_size,
            auto_checkpoint: self.auto_checkpoint,
            checkpoint_threshold: self.checkpoint_threshold,
        }
    }
}

/// Per-connection settings. `None` leaves the engine default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Worker threads per query.
    pub max_threads: Option<u64>,
    /// Query timeout in milliseconds.
    pub query_timeout_ms: Option<u64>,
}

/// Logging section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when the environment does not set one.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
struct DatabaseSection {
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    default_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    system: SystemConfig,
    #[serde(default)]
    connection: ConnectionConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Configuration loaded from (and persisted to) a TOML file.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl ClientConfig {
    /// Loads from `explicit`, else `$KUZU_BRIDGE_CONFIG`, else the per-user
    /// default location. A missing file yields defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        Ok(Self { path, data })
    }

    /// Parses a config from TOML text without touching the filesystem.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let data = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Ok(Self { path: None, data })
    }

    /// File the config was loaded from or will be persisted to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Database path from `[database] default`.
    pub fn default_db_path(&self) -> Option<&Path> {
        self.data.database.default_path.as_deref()
    }

    /// Sets or clears the default database path.
    pub fn set_default_db_path(&mut self, path: Option<PathBuf>) {
        self.data.database.default_path = path;
    }

    /// `[system]` section.
    pub fn system(&self) -> &SystemConfig {
        &self.data.system
    }

    /// Mutable `[system]` section.
    pub fn system_mut(&mut self) -> &mut SystemConfig {
        &mut self.data.system
    }

    /// `[connection]` section.
    pub fn connection(&self) -> &ConnectionConfig {
        &self.data.connection
    }

    /// Mutable `[connection]` section.
    pub fn connection_mut(&mut self) -> &mut ConnectionConfig {
        &mut self.data.connection
    }

    /// `[logging]` section.
    pub fn logging(&self) -> &LoggingConfig {
        &self.data.logging
    }

    /// Writes the config back, creating parent directories as needed.
    pub fn persist(&self) -> Result<PathBuf, ConfigError> {
        let target = match &self.path {
            Some(path) => path.clone(),
            None => default_config_path().ok_or(ConfigError::NoConfigPath)?,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&self.data)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors raised while loading or storing a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read client config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse client config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// The config could not be rendered as TOML.
    #[error("failed to serialize client config: {source}")]
    Serialize {
        /// Underlying serialization error.
        source: toml::ser::Error,
    },
    /// The file could not be written.
    #[error("failed to write client config {path}: {source}")]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The parent directory could not be created.
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// No explicit path was given and no per-user config directory exists.
    #[error("no config directory found; pass a path or set KUZU_BRIDGE_CONFIG")]
    NoConfigPath,
}

/// Per-user default location, `<config dir>/kuzu-bridge/client.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("kuzu-bridge").join("client.toml"))
}
