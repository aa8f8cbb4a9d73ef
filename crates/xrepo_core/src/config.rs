//! Store and logging configuration.
//!
//! # Responsibility
//! - Hold the tunables for connection bootstrap, paging and bulk deletes.
//! - Load them from JSON with every field optional.
//!
//! # Invariants
//! - Missing fields fall back to `Default` values.
//! - Values are validated where they are used, not at load time.

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_DELETE_BATCH_SIZE: usize = 1_000;
const DEFAULT_LOG_BASENAME: &str = "xrepo";
const DEFAULT_MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_LOG_FILES: usize = 5;

/// Options applied when a session opens its store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// SQLite busy timeout.
    pub busy_timeout_ms: u64,
    /// Enables `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
    /// Page size used by `PageRequest::default`-style callers.
    pub default_page_size: usize,
    /// Rows removed per statement by `delete_where` when callers pass the default.
    pub delete_batch_size: usize,
    pub logging: LoggingOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            default_page_size: DEFAULT_PAGE_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            logging: LoggingOptions::default(),
        }
    }
}

impl StoreOptions {
    /// Parses options from a JSON document. Absent keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// File logging options consumed by `logging::init_logging`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// One of trace|debug|info|warn|error.
    pub level: String,
    /// Absolute directory. `None` means file logging is not configured.
    pub log_dir: Option<PathBuf>,
    pub file_basename: String,
    pub max_file_size_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            file_basename: DEFAULT_LOG_BASENAME.to_string(),
            max_file_size_bytes: DEFAULT_MAX_LOG_FILE_SIZE_BYTES,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}
