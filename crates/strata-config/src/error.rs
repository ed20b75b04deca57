//! Error types for configuration parsing and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: String,
        /// Field that failed validation.
        field: String,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Two path mappings share the same name.
    #[error("duplicate path mapping name")]
    DuplicateMapping {
        /// Name declared more than once.
        name: String,
    },
    /// Reading the settings snapshot failed.
    #[error("failed to read settings snapshot")]
    Io {
        /// Path of the snapshot file.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Parsing the settings snapshot failed.
    #[error("failed to parse settings snapshot")]
    Parse {
        /// Path of the snapshot file.
        path: PathBuf,
        /// Source JSON error.
        source: serde_json::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
