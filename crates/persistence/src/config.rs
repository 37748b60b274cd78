//! Storage configuration.
//!
//! [`StorageConfig`] selects the backend and carries its connection
//! settings. It deserializes with serde (every field has a default) and can
//! be overlaid from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `NEUTRINO_STORAGE_BACKEND` | memory | `memory`, `mongodb` or `rethinkdb` |
//! | `NEUTRINO_STORAGE_URL` | memory://default | Connection string |
//! | `NEUTRINO_DATABASE` | neutrino | Database name |
//! | `NEUTRINO_CONNECT_TIMEOUT_MS` | 5000 | Bound on the initial connect |
//! | `NEUTRINO_OPERATION_TIMEOUT_MS` | (none) | Default per-operation deadline |
//! | `NEUTRINO_RETHINKDB_USER` | admin | RethinkDB account |
//! | `NEUTRINO_RETHINKDB_PASSWORD` | (empty) | RethinkDB password |
//!
//! # Example
//!
//! ```
//! use neutrino_persistence::config::{BackendSelection, StorageConfig};
//!
//! let config = StorageConfig {
//!     backend: BackendSelection::Memory,
//!     database: "test".to_string(),
//!     ..Default::default()
//! };
//! assert_eq!(config.connection_string, "memory://default");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::OperationContext;

/// Errors raised while reading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The backend name is not one of the supported backends.
    #[error("unknown storage backend '{0}', expected memory, mongodb or rethinkdb")]
    UnknownBackend(String),

    /// An environment variable holds a value of the wrong type.
    #[error("invalid value '{value}' for {variable}: {message}")]
    InvalidValue {
        /// Variable name.
        variable: String,
        /// Offending value.
        value: String,
        /// What was expected.
        message: String,
    },
}

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// In-process store.
    #[default]
    Memory,
    /// MongoDB (requires the `mongodb` feature).
    MongoDB,
    /// RethinkDB (requires the `rethinkdb` feature).
    RethinkDB,
}

impl fmt::Display for BackendSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSelection::Memory => write!(f, "memory"),
            BackendSelection::MongoDB => write!(f, "mongodb"),
            BackendSelection::RethinkDB => write!(f, "rethinkdb"),
        }
    }
}

impl FromStr for BackendSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendSelection::Memory),
            "mongodb" | "mongo" => Ok(BackendSelection::MongoDB),
            "rethinkdb" | "rethink" => Ok(BackendSelection::RethinkDB),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

/// Configuration of the storage layer.
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use (default: `memory`).
    #[serde(default)]
    pub backend: BackendSelection,

    /// Connection string passed to the backend (default: `memory://default`).
    #[serde(default = "default_connection_string")]
    pub connection_string: String,

    /// Database holding every collection (default: `neutrino`).
    #[serde(default = "default_database")]
    pub database: String,

    /// Bound on the initial connect in milliseconds (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline applied by [`OperationContext::from_config`] (default: none).
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,

    /// Suggested capacity of change feed channels (default: 256).
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,

    /// MongoDB driver pool size (default: 10).
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// RethinkDB account when the connection string has none (default: `admin`).
    #[serde(default = "default_rethinkdb_user")]
    pub rethinkdb_user: String,

    /// RethinkDB password (default: empty).
    #[serde(default)]
    pub rethinkdb_password: String,
}

fn default_connection_string() -> String {
    "memory://default".to_string()
}

fn default_database() -> String {
    "neutrino".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_change_buffer() -> usize {
    256
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_rethinkdb_user() -> String {
    "admin".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendSelection::default(),
            connection_string: default_connection_string(),
            database: default_database(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: None,
            change_buffer: default_change_buffer(),
            max_pool_size: default_max_pool_size(),
            rethinkdb_user: default_rethinkdb_user(),
            rethinkdb_password: String::new(),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field(
                "connection_string",
                &crate::core::redact_connection_string(&self.connection_string),
            )
            .field("database", &self.database)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("change_buffer", &self.change_buffer)
            .field("max_pool_size", &self.max_pool_size)
            .field("rethinkdb_user", &self.rethinkdb_user)
            .finish_non_exhaustive()
    }
}

impl StorageConfig {
    /// Builds a configuration from defaults overlaid with environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays values found through `lookup` onto this configuration.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NEUTRINO_STORAGE_BACKEND") {
            self.backend = value.parse()?;
        }
        if let Some(value) = lookup("NEUTRINO_STORAGE_URL") {
            self.connection_string = value;
        }
        if let Some(value) = lookup("NEUTRINO_DATABASE") {
            self.database = value;
        }
        if let Some(value) = lookup("NEUTRINO_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_millis("NEUTRINO_CONNECT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("NEUTRINO_OPERATION_TIMEOUT_MS") {
            self.operation_timeout_ms =
                Some(parse_millis("NEUTRINO_OPERATION_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("NEUTRINO_RETHINKDB_USER") {
            self.rethinkdb_user = value;
        }
        if let Some(value) = lookup("NEUTRINO_RETHINKDB_PASSWORD") {
            self.rethinkdb_password = value;
        }
        Ok(self)
    }

    /// Bound on the initial connect.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default per-operation deadline, if any.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_millis(variable: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            variable: variable.to_string(),
            value: value.to_string(),
            message: err.to_string(),
        })
}

impl OperationContext {
    /// A background context carrying the configured operation deadline.
    pub fn from_config(config: &StorageConfig) -> Self {
        match config.operation_timeout() {
            Some(timeout) => Self::background().with_timeout(timeout),
            None => Self::background(),
        }
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence; otherwise this crate logs at `level`
/// (error, warn, info, debug, trace). Returns `false` if a global subscriber
/// was already installed.
pub fn init_logging(level: &str) -> bool {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("neutrino_persistence={level}")));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
}
