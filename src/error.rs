//! Error types shared by the plugins and the differencing engine.

use std::path::PathBuf;
use std::time::Duration;

/// Errors a plugin can raise while being configured or while fetching.
///
/// Every variant is fatal for the current invocation: the driver prints
/// nothing on stdout and the process exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Missing or invalid option (credential, target, type).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend answered, but not with something we can report.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The fetch did not complete within the configured timeout.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field in backend output could not be parsed.
    #[error("Failed to parse {field}: {value:?}")]
    Parse { field: String, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised when committing a cache file.
///
/// Loading never produces one of these: an unreadable cache degrades to
/// "no history" instead.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode cache file: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to commit cache file {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PluginError>;
