//! Typed configuration models consumed by the synchronization engine.
//!
//! # Design
//! - Pure data carriers; no filesystem side effects beyond snapshot loading.
//! - Mappings are ordered: declaration order decides which mapping claims a
//!   logical path, letting operators override broad prefixes with narrower
//!   ones placed earlier.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::validate::validate_settings;

/// One declared correspondence between a logical library root and its
/// physical locations across the three path namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMapping {
    /// Human label, unique within a configuration.
    pub name: String,
    /// Path prefix as reported by the media index.
    pub logical_root: String,
    /// Archive-tier prefix as seen by the engine's own filesystem view.
    pub engine_root: String,
    /// Cache-tier prefix as seen by the engine's own filesystem view.
    pub cache_root: String,
    /// Cache-tier prefix as seen by the external mover. Defaults to
    /// `cache_root` when the engine and the mover share a filesystem view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_cache_root: Option<String>,
    /// Whether files under this mapping are eligible for promotion at all.
    #[serde(default = "default_true")]
    pub cacheable: bool,
    /// Whether the mapping is currently active.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PathMapping {
    /// The cache-tier prefix in the external mover's namespace, falling back
    /// to the engine's own `cache_root` when no remap is configured.
    #[must_use]
    pub fn external_cache_root(&self) -> &str {
        self.external_cache_root
            .as_deref()
            .unwrap_or(&self.cache_root)
    }
}

/// Verification policy applied when a relocation falls back to
/// copy-then-delete across volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Compare byte lengths of source and destination.
    #[default]
    Size,
    /// Compare byte lengths and SHA-256 digests.
    SizeAndChecksum,
}

impl VerifyMode {
    /// Render the mode as its `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::SizeAndChecksum => "size_and_checksum",
        }
    }
}

/// Engine settings snapshot, read once per synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Ordered path mappings; the first enabled match wins.
    pub mappings: Vec<PathMapping>,
    /// Upper bound on cache-tier bytes the engine may occupy.
    pub cache_budget_bytes: u64,
    /// Hours a no-longer-relevant file stays cached before eviction.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    /// Number of parallel move workers per run.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Physical free space that must remain on the cache tier after a
    /// promotion, on top of the file's own size.
    #[serde(default = "default_free_space_margin")]
    pub free_space_margin_bytes: u64,
    /// Verification policy for cross-volume copy fallbacks.
    #[serde(default)]
    pub verify: VerifyMode,
}

impl EngineSettings {
    /// Load and validate a settings snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, fails to parse, or
    /// fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        validate_settings(&settings)?;
        debug!(
            mappings = settings.mappings.len(),
            budget_bytes = settings.cache_budget_bytes,
            "loaded engine settings snapshot"
        );
        Ok(settings)
    }

    /// The retention window as a duration.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.retention_hours))
    }
}

const fn default_true() -> bool {
    true
}

const fn default_retention_hours() -> u32 {
    12
}

const fn default_worker_count() -> usize {
    4
}

const fn default_free_space_margin() -> u64 {
    1024 * 1024 * 1024
}
