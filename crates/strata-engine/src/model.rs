//! Domain types shared across the synchronization engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why the external collaborator nominated a file for caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheReason {
    /// The file is currently playing or next up for an active session.
    OnDeck,
    /// The file is on a user's watchlist.
    Watchlist,
    /// The file was pinned explicitly by the user.
    Pinned,
}

impl CacheReason {
    /// Render the reason as its `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnDeck => "on_deck",
            Self::Watchlist => "watchlist",
            Self::Pinned => "pinned",
        }
    }
}

/// One candidate record as supplied by the external media-index
/// collaborator, before path resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Path as reported by the media index.
    pub logical_path: String,
    /// Why the file was nominated.
    pub reason: CacheReason,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// One file nominated for promotion, with both tier paths resolved.
///
/// Constructed per run and discarded with it; never persisted.
#[derive(Debug, Clone)]
pub struct CacheCandidate {
    /// Path as reported by the media index.
    pub logical_path: String,
    /// Why the file was nominated.
    pub reason: CacheReason,
    /// Size of the file in bytes.
    pub size_bytes: u64,
    /// Name of the mapping that claimed the logical path.
    pub mapping: String,
    /// Archive-tier location in the engine namespace.
    pub engine_source_path: PathBuf,
    /// Cache-tier location in the engine namespace.
    pub engine_target_path: PathBuf,
    /// Whether the claiming mapping allows promotion at all.
    pub cacheable: bool,
}

/// Direction of a file relocation between tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    /// Archive tier to cache tier.
    Promote,
    /// Cache tier back to archive tier.
    Evict,
}

impl MoveKind {
    /// Render the kind as its `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::Evict => "evict",
        }
    }
}

/// Terminal status of a synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned move succeeded.
    Completed,
    /// The run finished but some moves failed.
    CompletedWithErrors,
    /// A stop request prevented part of the plan from executing.
    Stopped,
    /// The exclusion manifest could not be persisted; protection may lag.
    Failed,
}

impl RunStatus {
    /// Render the status as its `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

/// One failed move recorded in a run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveFailure {
    /// Direction of the failed move.
    pub kind: MoveKind,
    /// Source path of the failed move.
    pub path: PathBuf,
    /// Failure detail.
    pub message: String,
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Terminal status.
    pub status: RunStatus,
    /// Whether the run simulated moves without touching the filesystem.
    pub dry_run: bool,
    /// Files promoted onto the cache tier (planned count for dry runs).
    pub promoted: u64,
    /// Files evicted back to the archive tier (planned count for dry runs).
    pub evicted: u64,
    /// Cache entries refreshed without a move.
    pub refreshed: u64,
    /// Candidates skipped because the cache budget was exhausted.
    pub skipped_budget: u64,
    /// Candidates skipped because no mapping resolved them.
    pub skipped_unmapped: u64,
    /// Sidecar files that failed to accompany an otherwise successful move.
    pub sidecar_failures: u64,
    /// Per-file failures recorded during the run.
    pub failures: Vec<MoveFailure>,
    /// Detail of the fatal manifest failure when `status` is `Failed`.
    pub fatal_error: Option<String>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Format a byte count for log lines, scaling to the largest binary unit.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1 << 40, "TiB"),
        (1 << 30, "GiB"),
        (1 << 20, "MiB"),
        (1 << 10, "KiB"),
    ];
    for (scale, unit) in UNITS {
        if bytes >= scale {
            #[allow(clippy::cast_precision_loss)]
            let value = bytes as f64 / scale as f64;
            return format!("{value:.2} {unit}");
        }
    }
    format!("{bytes} B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2 * 1024), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
        assert_eq!(format_bytes(2 * (1 << 40)), "2.00 TiB");
    }

    #[test]
    fn enums_render_snake_case() {
        assert_eq!(CacheReason::OnDeck.as_str(), "on_deck");
        assert_eq!(MoveKind::Promote.as_str(), "promote");
        assert_eq!(RunStatus::CompletedWithErrors.as_str(), "completed_with_errors");
    }
}
