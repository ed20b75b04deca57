//! # Design
//!
//! - Provide structured, constant-message errors for the synchronization
//!   engine.
//! - Capture operation context (paths, sizes, inputs) to make failures
//!   reproducible in tests.
//! - Preserve source errors without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the cache synchronization engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No enabled path mapping resolves the given path.
    #[error("no path mapping matches")]
    UnmappedPath {
        /// Path that could not be resolved.
        path: PathBuf,
    },
    /// A promotion would exceed the physically available cache-tier space.
    #[error("insufficient free space on cache tier")]
    InsufficientSpace {
        /// Target path of the rejected promotion.
        path: PathBuf,
        /// Bytes required including the configured safety margin.
        required_bytes: u64,
        /// Bytes actually available on the target filesystem.
        available_bytes: u64,
    },
    /// IO failure while relocating a file.
    #[error("file relocation failed")]
    MoveIo {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A cross-volume copy did not verify against its source.
    #[error("copy verification failed")]
    CopyVerifyFailed {
        /// Destination path of the failed copy.
        path: PathBuf,
        /// Static reason for the mismatch.
        reason: &'static str,
    },
    /// The exclusion manifest could not be durably written.
    #[error("exclusion manifest persistence failed")]
    ManifestPersist {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Manifest file path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The cache-entry table could not be read.
    #[error("cache state unreadable")]
    StateLoad {
        /// State file path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The cache-entry table file exists but does not parse.
    #[error("cache state corrupt")]
    StateCorrupt {
        /// State file path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The cache-entry table could not be durably written.
    #[error("cache state persistence failed")]
    StatePersist {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// State file path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A synchronization run was requested while another is in progress.
    #[error("synchronization run already in progress")]
    ConcurrentRun {
        /// Phase the active run was in when the request arrived.
        phase: &'static str,
    },
}

impl EngineError {
    pub(crate) fn move_io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::MoveIo {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn manifest(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::ManifestPersist {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn state(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::StatePersist {
            operation,
            path: path.into(),
            source,
        }
    }
}
