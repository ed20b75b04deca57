//! Durable table of files currently resident on the cache tier.
//!
//! The table is the authoritative source for eviction decisions and for
//! rebuilding the exclusion manifest, so it survives process restarts as a
//! JSON file replaced atomically on every flush. Mutations take a short
//! exclusive lock; file writes happen outside it behind a separate flush
//! lock so concurrent workers cannot interleave snapshots out of order.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// One file currently believed to reside on the cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache-tier location in the engine namespace.
    pub engine_path: PathBuf,
    /// Timestamp of the most recent run in which the file was a valid
    /// candidate.
    pub last_seen_eligible_at: DateTime<Utc>,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// Durable cache-entry table with an explicit lock boundary.
#[derive(Debug)]
pub struct CacheEntryStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<PathBuf, CacheEntry>>,
    flush: Mutex<()>,
}

impl CacheEntryStore {
    /// Load the table from disk. A missing file yields an empty table; an
    /// unreadable or unparsable file is an error, because silently dropping
    /// the table would strip manifest protection from files still resident
    /// on the cache tier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StateLoad`] when the file exists but cannot
    /// be read, or [`EngineError::StateCorrupt`] when it does not parse.
    pub fn load(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => {
                let loaded: Vec<CacheEntry> =
                    serde_json::from_str(&raw).map_err(|source| EngineError::StateCorrupt {
                        path: path.clone(),
                        source,
                    })?;
                loaded
                    .into_iter()
                    .map(|entry| (entry.engine_path.clone(), entry))
                    .collect()
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(EngineError::StateLoad { path, source });
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            flush: Mutex::new(()),
        })
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    /// Whether the table tracks no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    /// Whether the given cache-tier path is tracked.
    #[must_use]
    pub fn contains(&self, engine_path: &Path) -> bool {
        self.locked().contains_key(engine_path)
    }

    /// Point-in-time copy of all tracked entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.locked().values().cloned().collect()
    }

    /// Total tracked bytes on the cache tier.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.locked().values().map(|entry| entry.size_bytes).sum()
    }

    /// Record a successful promotion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StatePersist`] when the flush fails; the
    /// in-memory table is updated regardless.
    pub fn record_promotion(
        &self,
        engine_path: &Path,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.locked().insert(
            engine_path.to_path_buf(),
            CacheEntry {
                engine_path: engine_path.to_path_buf(),
                last_seen_eligible_at: now,
                size_bytes,
            },
        );
        self.persist()
    }

    /// Refresh eligibility timestamps for entries that remain candidates.
    /// Returns the number of entries touched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StatePersist`] when the flush fails.
    pub fn refresh(&self, engine_paths: &[PathBuf], now: DateTime<Utc>) -> EngineResult<usize> {
        let refreshed = {
            let mut entries = self.locked();
            let mut refreshed = 0;
            for path in engine_paths {
                if let Some(entry) = entries.get_mut(path) {
                    entry.last_seen_eligible_at = now;
                    refreshed += 1;
                }
            }
            refreshed
        };
        if refreshed > 0 {
            self.persist()?;
        }
        Ok(refreshed)
    }

    /// Remove an entry after a successful eviction. Returns whether the
    /// entry was present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StatePersist`] when the flush fails.
    pub fn remove(&self, engine_path: &Path) -> EngineResult<bool> {
        let removed = self.locked().remove(engine_path).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Drop entries whose files are confirmed absent from the cache tier.
    /// Returns the pruned paths.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StatePersist`] when the flush fails.
    pub fn prune_missing(&self) -> EngineResult<Vec<PathBuf>> {
        let pruned = {
            let mut entries = self.locked();
            let missing: Vec<PathBuf> = entries
                .keys()
                .filter(|path| !path.exists())
                .cloned()
                .collect();
            for path in &missing {
                entries.remove(path);
            }
            missing
        };
        if !pruned.is_empty() {
            for path in &pruned {
                warn!(path = %path.display(), "cache entry vanished from cache tier; dropping");
            }
            self.persist()?;
        }
        Ok(pruned)
    }

    /// Serialize the current table and replace the backing file atomically.
    fn persist(&self) -> EngineResult<()> {
        let _guard = self.flush.lock().expect("state flush mutex poisoned");
        let serialised = {
            let entries = self.locked();
            let snapshot: Vec<&CacheEntry> = entries.values().collect();
            serde_json::to_string_pretty(&snapshot).map_err(|source| EngineError::state(
                "serialise",
                &self.path,
                io::Error::other(source),
            ))?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|source| EngineError::state("create_parent", parent, source))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serialised)
            .map_err(|source| EngineError::state("write_temp", &temp_path, source))?;
        fs::rename(&temp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            EngineError::state("rename", &self.path, source)
        })?;
        debug!(path = %self.path.display(), "persisted cache entry table");
        Ok(())
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, CacheEntry>> {
        self.entries.lock().expect("cache entry mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_path(temp: &TempDir) -> PathBuf {
        temp.path().join("cache_entries.json")
    }

    #[test]
    fn missing_state_loads_empty() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = CacheEntryStore::load(store_path(&temp))?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn promotion_round_trips_through_disk() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let path = store_path(&temp);
        let now = Utc::now();

        let store = CacheEntryStore::load(&path)?;
        store.record_promotion(Path::new("/mnt/cache/Movies/A.mkv"), 2_048, now)?;
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 2_048);

        let reloaded = CacheEntryStore::load(&path)?;
        assert!(reloaded.contains(Path::new("/mnt/cache/Movies/A.mkv")));
        let entry = &reloaded.snapshot()[0];
        assert_eq!(entry.size_bytes, 2_048);
        assert_eq!(entry.last_seen_eligible_at, now);
        Ok(())
    }

    #[test]
    fn refresh_touches_only_known_entries() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = CacheEntryStore::load(store_path(&temp))?;
        let then = Utc::now() - chrono::Duration::hours(6);
        store.record_promotion(Path::new("/mnt/cache/Movies/A.mkv"), 1, then)?;

        let now = Utc::now();
        let refreshed = store.refresh(
            &[
                PathBuf::from("/mnt/cache/Movies/A.mkv"),
                PathBuf::from("/mnt/cache/Movies/Unknown.mkv"),
            ],
            now,
        )?;
        assert_eq!(refreshed, 1);
        assert_eq!(store.snapshot()[0].last_seen_eligible_at, now);
        Ok(())
    }

    #[test]
    fn remove_deletes_entry() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = CacheEntryStore::load(store_path(&temp))?;
        store.record_promotion(Path::new("/mnt/cache/Movies/A.mkv"), 1, Utc::now())?;
        assert!(store.remove(Path::new("/mnt/cache/Movies/A.mkv"))?);
        assert!(!store.remove(Path::new("/mnt/cache/Movies/A.mkv"))?);
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn prune_missing_drops_vanished_files() -> EngineResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = CacheEntryStore::load(store_path(&temp))?;

        let present = temp.path().join("present.mkv");
        fs::write(&present, b"bytes").expect("write file");
        store.record_promotion(&present, 5, Utc::now())?;
        store.record_promotion(Path::new("/mnt/cache/Movies/Vanished.mkv"), 1, Utc::now())?;

        let pruned = store.prune_missing()?;
        assert_eq!(pruned, vec![PathBuf::from("/mnt/cache/Movies/Vanished.mkv")]);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn corrupt_state_is_a_hard_error() {
        let temp = TempDir::new().expect("tempdir");
        let path = store_path(&temp);
        fs::write(&path, "not json").expect("write garbage");
        let err = CacheEntryStore::load(&path).expect_err("corrupt state should fail");
        assert!(matches!(err, EngineError::StateCorrupt { .. }));
    }
}
