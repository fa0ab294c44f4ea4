//! Configuration for opening a [`Client`](crate::Client) over the bundled
//! SQLite driver.
//!
//! Configuration is plain data built in code. The two convenience
//! constructors cover the common cases and the `with_*` setters adjust the
//! rest.

use std::path::{Path, PathBuf};

/// Where the SQLite database lives.
///
/// # Examples
///
/// ```rust
/// use graphsql::config::{ClientConfig, StorageKind};
///
/// let cfg = ClientConfig::in_memory();
/// assert_eq!(cfg.storage, StorageKind::InMemory);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StorageKind {
    /// A private in-memory database, dropped with the client.
    #[default]
    InMemory,

    /// A database file, created if missing.
    File(PathBuf),
}

/// SQLite connection options.
///
/// # Default Configuration
///
/// ```rust
/// use graphsql::config::SqliteConfig;
///
/// let config = SqliteConfig::default();
/// assert!(config.foreign_keys);
/// assert_eq!(config.busy_timeout_ms, 5_000);
/// assert_eq!(config.statement_cache_capacity, 128);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Enforce foreign-key constraints (`PRAGMA foreign_keys`).
    ///
    /// **Default:** `true`
    ///
    /// Edge writes rely on the store to reject links to missing nodes; with
    /// this off such links are stored silently.
    pub foreign_keys: bool,

    /// How long a statement waits on a locked database before failing.
    ///
    /// **Default:** `5000`
    ///
    /// A timeout surfaces as a [`QueryError`](crate::GraphSqlError::QueryError)
    /// and is never retried by the library.
    pub busy_timeout_ms: u64,

    /// Capacity of the prepared statement cache.
    ///
    /// **Default:** `128`
    ///
    /// Compiled statements are byte-identical for identical specs, so the
    /// cache hits for every repeated operation shape.
    pub statement_cache_capacity: usize,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            busy_timeout_ms: 5_000,
            statement_cache_capacity: 128,
        }
    }
}

/// Client configuration.
///
/// # Examples
///
/// ```rust
/// use graphsql::config::ClientConfig;
///
/// let cfg = ClientConfig::in_memory()
///     .with_debug(true)
///     .with_statement_log_capacity(16);
/// assert!(cfg.debug);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub storage: StorageKind,

    pub sqlite: SqliteConfig,

    /// Wrap the driver in an [`InstrumentedDriver`](crate::instrument::InstrumentedDriver)
    /// that counts and logs every statement.
    ///
    /// **Default:** `false`
    pub debug: bool,

    /// Number of recent statements the instrumented driver keeps.
    ///
    /// **Default:** `0` (no log). Only used when `debug` is set.
    pub statement_log_capacity: usize,
}

impl ClientConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            storage: StorageKind::File(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.sqlite.foreign_keys = enabled;
        self
    }

    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.sqlite.busy_timeout_ms = ms;
        self
    }

    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.sqlite.statement_cache_capacity = capacity;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_statement_log_capacity(mut self, capacity: usize) -> Self {
        self.statement_log_capacity = capacity;
        self
    }
}
