//! Durable exclusion manifest honoured by the external archival mover.
//!
//! The manifest is a public contract: one absolute path per line, UTF-8,
//! in the external mover's namespace, with no other syntax. The mover may
//! read the file at any moment, so every flushed mutation rewrites it
//! atomically (write a temp sibling, then rename) and a partial write is
//! never visible. A missing or corrupt manifest loads as empty: an absent
//! manifest protects nothing, so the engine rebuilds it from cache-entry
//! state at the next reconciliation instead of refusing to start.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Delta applied by a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Paths newly protected.
    pub added: usize,
    /// Paths released back to the mover.
    pub removed: usize,
}

/// In-memory view of the exclusion manifest, flushed atomically on change.
#[derive(Debug)]
pub struct ExclusionManifest {
    path: PathBuf,
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl ExclusionManifest {
    /// Load the manifest from disk. A missing or unreadable file yields an
    /// empty set.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => {
                let loaded_at = Utc::now();
                raw.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| (line.to_string(), loaded_at))
                    .collect()
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "exclusion manifest unreadable; treating as empty"
                );
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// Number of protected paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest protects no paths.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the given external path is currently protected.
    #[must_use]
    pub fn contains(&self, external_path: &str) -> bool {
        self.entries.contains_key(external_path)
    }

    /// When the given external path was first protected, if it is.
    #[must_use]
    pub fn added_at(&self, external_path: &str) -> Option<DateTime<Utc>> {
        self.entries.get(external_path).copied()
    }

    /// Iterate the protected paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Protect a path, flushing the manifest when it was not yet present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ManifestPersist`] when the flush fails.
    pub fn add(&mut self, external_path: &str) -> EngineResult<bool> {
        if self.entries.contains_key(external_path) {
            return Ok(false);
        }
        self.entries.insert(external_path.to_string(), Utc::now());
        self.flush()?;
        Ok(true)
    }

    /// Release a path, flushing the manifest when it was present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ManifestPersist`] when the flush fails.
    pub fn remove(&mut self, external_path: &str) -> EngineResult<bool> {
        if self.entries.remove(external_path).is_none() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Converge the manifest onto the supplied authoritative set, applying
    /// only the symmetric difference so unchanged entries keep their
    /// `added_at` timestamps. The file is rewritten once, and only when the
    /// delta is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ManifestPersist`] when the flush fails.
    pub fn reconcile(&mut self, authoritative: &BTreeSet<String>) -> EngineResult<ReconcileOutcome> {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|path| !authoritative.contains(*path))
            .cloned()
            .collect();
        let missing: Vec<&String> = authoritative
            .iter()
            .filter(|path| !self.entries.contains_key(*path))
            .collect();

        let outcome = ReconcileOutcome {
            added: missing.len(),
            removed: stale.len(),
        };
        if outcome == ReconcileOutcome::default() {
            return Ok(outcome);
        }

        let now = Utc::now();
        for path in stale {
            self.entries.remove(&path);
        }
        for path in missing {
            self.entries.insert(path.clone(), now);
        }
        self.flush()?;
        debug!(
            added = outcome.added,
            removed = outcome.removed,
            total = self.entries.len(),
            "reconciled exclusion manifest"
        );
        Ok(outcome)
    }

    fn flush(&self) -> EngineResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|source| EngineError::manifest("create_parent", parent, source))?;
        }

        let mut contents = String::new();
        for path in self.entries.keys() {
            contents.push_str(path);
            contents.push('\n');
        }

        let temp_path = temp_sibling(&self.path);
        fs::write(&temp_path, contents)
            .map_err(|source| EngineError::manifest("write_temp", &temp_path, source))?;
        fs::rename(&temp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            EngineError::manifest("rename", &self.path, source)
        })?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| "manifest".into(), std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest_path(temp: &TempDir) -> PathBuf {
        temp.path().join("mover_exclusions.txt")
    }

    #[test]
    fn missing_manifest_loads_empty() {
        let temp = TempDir::new().expect("tempdir");
        let manifest = ExclusionManifest::load(manifest_path(&temp));
        assert!(manifest.is_empty());
    }

    #[test]
    fn add_and_remove_flush_plain_line_format() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let path = manifest_path(&temp);
        let mut manifest = ExclusionManifest::load(&path);

        assert!(manifest.add("/mnt/cache2/Movies/A.mkv")?);
        assert!(manifest.add("/mnt/cache2/Movies/B.mkv")?);
        assert!(!manifest.add("/mnt/cache2/Movies/A.mkv")?);

        let raw = fs::read_to_string(&path).expect("manifest readable");
        assert_eq!(raw, "/mnt/cache2/Movies/A.mkv\n/mnt/cache2/Movies/B.mkv\n");
        assert_eq!(
            manifest.paths().collect::<Vec<_>>(),
            vec!["/mnt/cache2/Movies/A.mkv", "/mnt/cache2/Movies/B.mkv"]
        );

        assert!(manifest.remove("/mnt/cache2/Movies/A.mkv")?);
        assert!(!manifest.remove("/mnt/cache2/Movies/A.mkv")?);
        let raw = fs::read_to_string(&path).expect("manifest readable");
        assert_eq!(raw, "/mnt/cache2/Movies/B.mkv\n");
        Ok(())
    }

    #[test]
    fn reload_round_trips_entries() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let path = manifest_path(&temp);
        let mut manifest = ExclusionManifest::load(&path);
        manifest.add("/mnt/cache2/Movies/A.mkv")?;

        let reloaded = ExclusionManifest::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("/mnt/cache2/Movies/A.mkv"));
        Ok(())
    }

    #[test]
    fn reconcile_applies_only_the_delta() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let path = manifest_path(&temp);
        let mut manifest = ExclusionManifest::load(&path);
        manifest.add("/mnt/cache2/Movies/A.mkv")?;
        manifest.add("/mnt/cache2/Movies/Stale.mkv")?;
        let kept_added_at = manifest
            .added_at("/mnt/cache2/Movies/A.mkv")
            .expect("entry present");

        let authoritative: BTreeSet<String> = [
            "/mnt/cache2/Movies/A.mkv".to_string(),
            "/mnt/cache2/Movies/New.mkv".to_string(),
        ]
        .into_iter()
        .collect();

        let outcome = manifest.reconcile(&authoritative)?;
        assert_eq!(outcome, ReconcileOutcome { added: 1, removed: 1 });
        assert_eq!(
            manifest.added_at("/mnt/cache2/Movies/A.mkv"),
            Some(kept_added_at),
            "unchanged entries keep their added_at"
        );
        assert!(!manifest.contains("/mnt/cache2/Movies/Stale.mkv"));
        assert!(manifest.contains("/mnt/cache2/Movies/New.mkv"));

        let unchanged = manifest.reconcile(&authoritative)?;
        assert_eq!(unchanged, ReconcileOutcome::default());
        Ok(())
    }

    #[test]
    fn unreadable_manifest_loads_empty() {
        let temp = TempDir::new().expect("tempdir");
        let path = manifest_path(&temp);
        fs::create_dir(&path).expect("directory at manifest path");
        let manifest = ExclusionManifest::load(&path);
        assert!(manifest.is_empty());
    }

    #[test]
    fn flush_failure_surfaces_manifest_persist() {
        let temp = TempDir::new().expect("tempdir");
        let dir_path = temp.path().join("taken");
        fs::create_dir(&dir_path).expect("blocking directory");
        let mut manifest = ExclusionManifest::load(&dir_path);
        let err = manifest
            .add("/mnt/cache2/Movies/A.mkv")
            .expect_err("rename onto a directory should fail");
        assert!(matches!(err, EngineError::ManifestPersist { .. }));
    }
}
