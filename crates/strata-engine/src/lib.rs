#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

//! Cache synchronization engine for two-tier media storage.
//!
//! The engine keeps a working subset of a slow archive mirrored on a fast
//! cache tier: it resolves candidate files through declared path mappings,
//! plans promotions and evictions against a durable cache-entry table,
//! executes the moves on a bounded worker pool, and reconciles the
//! exclusion manifest that an external archival mover must honour.
//!
//! Layout: `translate` (path namespace rewriting), `manifest` (durable
//! exclusion set), `state` (durable cache-entry table), `mover` (single
//! relocation with verification), `planner` (pure promote/evict
//! computation), `coordinator` (one synchronization pass).

pub mod coordinator;
pub mod error;
pub mod manifest;
pub mod model;
pub mod mover;
pub mod planner;
pub mod state;
pub mod translate;

pub use coordinator::{EngineStatus, RunCoordinator, RunPhase, RunRequest};
pub use error::{EngineError, EngineResult};
pub use manifest::{ExclusionManifest, ReconcileOutcome};
pub use model::{
    CacheCandidate, CacheReason, CandidateRecord, MoveFailure, MoveKind, RunResult, RunStatus,
    format_bytes,
};
pub use mover::{MoveExecutor, MoveJob, MoveOutcome, SidecarFailure, TransferMethod};
pub use planner::{SyncPlan, plan};
pub use state::{CacheEntry, CacheEntryStore};
pub use translate::{PathTranslator, ResolvedPaths};
