//! Pure synchronization planning: which files move, which stay.
//!
//! The planner has no filesystem side effects. Candidates arrive already
//! ordered by the external collaborator (their ranking encodes priority);
//! when the cache budget would be exceeded, the prefix of the order that
//! fits is admitted and the rest are skipped for this run, not queued.
//! A path present both as a candidate and as a cache entry is neither
//! promoted nor evicted; it only has its eligibility refreshed, which
//! together with the retention window prevents thrashing a file in and
//! out of the cache across closely-spaced runs.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::model::CacheCandidate;
use crate::state::CacheEntry;

/// The promote, evict, and refresh sets computed for one run.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Candidates admitted for promotion, in supplied order.
    pub promote: Vec<CacheCandidate>,
    /// Entries selected for eviction back to the archive tier.
    pub evict: Vec<CacheEntry>,
    /// Cache-tier paths whose eligibility should be refreshed.
    pub refresh: Vec<PathBuf>,
    /// Candidates skipped because the cache budget was exhausted.
    pub skipped_for_budget: Vec<CacheCandidate>,
}

/// Compute the promote and evict sets for one synchronization pass.
///
/// Promotion and eviction sets are disjoint by construction: eviction only
/// considers entries absent from the candidate target set, and promotion
/// only considers candidates not already tracked as entries.
#[must_use]
pub fn plan(
    candidates: &[CacheCandidate],
    entries: &[CacheEntry],
    cache_budget_bytes: u64,
    retention: Duration,
    now: DateTime<Utc>,
) -> SyncPlan {
    let entry_paths: BTreeSet<&PathBuf> = entries.iter().map(|entry| &entry.engine_path).collect();
    let existing_usage: u64 = entries.iter().map(|entry| entry.size_bytes).sum();

    let mut planned = SyncPlan::default();
    let mut candidate_targets = BTreeSet::new();
    let mut pending_bytes: u64 = 0;

    for candidate in candidates {
        if !candidate.cacheable {
            debug!(
                path = %candidate.logical_path,
                mapping = %candidate.mapping,
                "candidate under non-cacheable mapping; ignoring"
            );
            continue;
        }
        if !candidate_targets.insert(candidate.engine_target_path.clone()) {
            continue;
        }
        if entry_paths.contains(&candidate.engine_target_path) {
            planned.refresh.push(candidate.engine_target_path.clone());
            continue;
        }

        let projected = existing_usage
            .saturating_add(pending_bytes)
            .saturating_add(candidate.size_bytes);
        if projected > cache_budget_bytes {
            planned.skipped_for_budget.push(candidate.clone());
            continue;
        }
        pending_bytes = pending_bytes.saturating_add(candidate.size_bytes);
        planned.promote.push(candidate.clone());
    }

    for entry in entries {
        if candidate_targets.contains(&entry.engine_path) {
            continue;
        }
        if now.signed_duration_since(entry.last_seen_eligible_at) >= retention {
            planned.evict.push(entry.clone());
        }
    }

    planned
}
