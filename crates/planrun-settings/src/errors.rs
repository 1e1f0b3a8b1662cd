//! Settings loading errors.

use std::path::PathBuf;

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON or has the wrong shape.
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// No home directory to resolve the default path against.
    #[error("HOME is not set; cannot resolve settings path")]
    NoHome,
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
