//! Path translation between the three namespaces the engine reconciles:
//! the media index's logical paths, the engine's own filesystem view, and
//! the external mover's filesystem view.
//!
//! Mappings are tried in declaration order and the first enabled mapping
//! whose root prefixes the input wins; ordering, not longest-match, lets
//! operators override broad prefixes with narrower ones placed earlier.
//! Translation into the external namespace never fails: it degrades to
//! identity so unmapped or single-view deployments behave as if this
//! component were absent.

use std::path::{Path, PathBuf};

use strata_config::PathMapping;

use crate::error::{EngineError, EngineResult};
use crate::model::{CacheCandidate, CandidateRecord};

/// Paths resolved for one logical candidate.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    /// Name of the mapping that claimed the logical path.
    pub mapping: String,
    /// Archive-tier location in the engine namespace.
    pub engine_source: PathBuf,
    /// Cache-tier location in the engine namespace.
    pub engine_target: PathBuf,
    /// Whether the claiming mapping allows promotion.
    pub cacheable: bool,
}

/// Translator over an ordered set of enabled path mappings.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    mappings: Vec<PathMapping>,
}

impl PathTranslator {
    /// Build a translator from declared mappings, keeping only enabled ones
    /// and preserving declaration order.
    #[must_use]
    pub fn new(mappings: &[PathMapping]) -> Self {
        Self {
            mappings: mappings
                .iter()
                .filter(|mapping| mapping.enabled)
                .cloned()
                .collect(),
        }
    }

    /// Resolve a logical media-index path into its archive and cache
    /// locations in the engine namespace.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnmappedPath`] when no enabled mapping's
    /// `logical_root` prefixes the path.
    pub fn resolve(&self, logical_path: &str) -> EngineResult<ResolvedPaths> {
        for mapping in &self.mappings {
            if let Some(rest) = strip_mapped_prefix(logical_path, &mapping.logical_root) {
                return Ok(ResolvedPaths {
                    mapping: mapping.name.clone(),
                    engine_source: join_root(&mapping.engine_root, rest),
                    engine_target: join_root(&mapping.cache_root, rest),
                    cacheable: mapping.cacheable,
                });
            }
        }
        Err(EngineError::UnmappedPath {
            path: PathBuf::from(logical_path),
        })
    }

    /// Resolve a candidate record into a full [`CacheCandidate`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnmappedPath`] when no enabled mapping claims
    /// the record's logical path.
    pub fn resolve_candidate(&self, record: &CandidateRecord) -> EngineResult<CacheCandidate> {
        let resolved = self.resolve(&record.logical_path)?;
        Ok(CacheCandidate {
            logical_path: record.logical_path.clone(),
            reason: record.reason,
            size_bytes: record.size_bytes,
            mapping: resolved.mapping,
            engine_source_path: resolved.engine_source,
            engine_target_path: resolved.engine_target,
            cacheable: resolved.cacheable,
        })
    }

    /// Map an engine cache-tier path back to its archive-tier location,
    /// used to compute eviction targets.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnmappedPath`] when no enabled mapping's
    /// `cache_root` prefixes the path.
    pub fn to_archive_path(&self, engine_cache_path: &Path) -> EngineResult<PathBuf> {
        let path = engine_cache_path.to_string_lossy();
        for mapping in &self.mappings {
            if let Some(rest) = strip_mapped_prefix(&path, &mapping.cache_root) {
                return Ok(join_root(&mapping.engine_root, rest));
            }
        }
        Err(EngineError::UnmappedPath {
            path: engine_cache_path.to_path_buf(),
        })
    }

    /// Translate an engine cache-tier path into the external mover's
    /// namespace for exclusion bookkeeping.
    ///
    /// Returns the input unchanged when no mapping's `cache_root` prefixes
    /// it, or when the mapping declares no remap; this translation never
    /// fails.
    #[must_use]
    pub fn to_external_path(&self, engine_cache_path: &Path) -> PathBuf {
        let path = engine_cache_path.to_string_lossy();
        for mapping in &self.mappings {
            if let Some(rest) = strip_mapped_prefix(&path, &mapping.cache_root) {
                let external_root = mapping.external_cache_root();
                if external_root == mapping.cache_root {
                    return engine_cache_path.to_path_buf();
                }
                return join_root(external_root, rest);
            }
        }
        engine_cache_path.to_path_buf()
    }
}

/// Strip `root` from the front of `path`, honouring path component
/// boundaries so `/mnt/cache/Movies` does not claim `/mnt/cache/MoviesHD`.
fn strip_mapped_prefix<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn join_root(root: &str, rest: &str) -> PathBuf {
    let mut joined = root.trim_end_matches('/').to_string();
    joined.push_str(rest);
    PathBuf::from(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CacheReason;

    fn mapping(
        name: &str,
        logical_root: &str,
        engine_root: &str,
        cache_root: &str,
        external_cache_root: Option<&str>,
    ) -> PathMapping {
        PathMapping {
            name: name.to_string(),
            logical_root: logical_root.to_string(),
            engine_root: engine_root.to_string(),
            cache_root: cache_root.to_string(),
            external_cache_root: external_cache_root.map(str::to_string),
            cacheable: true,
            enabled: true,
        }
    }

    #[test]
    fn resolves_logical_paths_through_matching_mapping() {
        let translator = PathTranslator::new(&[mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            Some("/mnt/cache2/Movies"),
        )]);

        let resolved = translator
            .resolve("/lib/Movies/A.mkv")
            .expect("path should resolve");
        assert_eq!(resolved.engine_source, PathBuf::from("/mnt/user/Movies/A.mkv"));
        assert_eq!(resolved.engine_target, PathBuf::from("/mnt/cache/Movies/A.mkv"));
        assert!(resolved.cacheable);
        assert_eq!(resolved.mapping, "movies");
    }

    #[test]
    fn first_declared_mapping_wins() {
        let translator = PathTranslator::new(&[
            mapping(
                "movies-4k",
                "/lib/Movies/4K",
                "/mnt/user/Movies4K",
                "/mnt/cache/Movies4K",
                None,
            ),
            mapping(
                "movies",
                "/lib/Movies",
                "/mnt/user/Movies",
                "/mnt/cache/Movies",
                None,
            ),
        ]);

        let resolved = translator
            .resolve("/lib/Movies/4K/B.mkv")
            .expect("path should resolve");
        assert_eq!(resolved.mapping, "movies-4k");
        assert_eq!(
            resolved.engine_source,
            PathBuf::from("/mnt/user/Movies4K/B.mkv")
        );
    }

    #[test]
    fn disabled_mappings_are_skipped() {
        let mut disabled = mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            None,
        );
        disabled.enabled = false;
        let translator = PathTranslator::new(&[disabled]);
        assert!(matches!(
            translator.resolve("/lib/Movies/A.mkv"),
            Err(EngineError::UnmappedPath { .. })
        ));
    }

    #[test]
    fn prefix_matching_respects_component_boundaries() {
        let translator = PathTranslator::new(&[mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            None,
        )]);
        assert!(translator.resolve("/lib/MoviesHD/A.mkv").is_err());
    }

    #[test]
    fn external_translation_defaults_to_identity() {
        let translator = PathTranslator::new(&[mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            None,
        )]);

        let cache_path = Path::new("/mnt/cache/Movies/A.mkv");
        assert_eq!(translator.to_external_path(cache_path), cache_path);

        let unmapped = Path::new("/mnt/elsewhere/A.mkv");
        assert_eq!(translator.to_external_path(unmapped), unmapped);
    }

    #[test]
    fn external_translation_rewrites_remapped_roots() {
        let translator = PathTranslator::new(&[mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            Some("/mnt/cache2/Movies"),
        )]);

        assert_eq!(
            translator.to_external_path(Path::new("/mnt/cache/Movies/A.mkv")),
            PathBuf::from("/mnt/cache2/Movies/A.mkv")
        );
    }

    #[test]
    fn archive_translation_reverses_cache_target() {
        let translator = PathTranslator::new(&[mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            None,
        )]);

        let archive = translator
            .to_archive_path(Path::new("/mnt/cache/Movies/Sub/A.mkv"))
            .expect("cache path should map back");
        assert_eq!(archive, PathBuf::from("/mnt/user/Movies/Sub/A.mkv"));

        assert!(translator.to_archive_path(Path::new("/elsewhere/A.mkv")).is_err());
    }

    #[test]
    fn resolve_candidate_carries_record_fields() {
        let translator = PathTranslator::new(&[mapping(
            "movies",
            "/lib/Movies",
            "/mnt/user/Movies",
            "/mnt/cache/Movies",
            None,
        )]);
        let record = CandidateRecord {
            logical_path: "/lib/Movies/A.mkv".to_string(),
            reason: CacheReason::OnDeck,
            size_bytes: 42,
        };
        let candidate = translator
            .resolve_candidate(&record)
            .expect("record should resolve");
        assert_eq!(candidate.reason, CacheReason::OnDeck);
        assert_eq!(candidate.size_bytes, 42);
        assert_eq!(candidate.logical_path, "/lib/Movies/A.mkv");
    }
}
