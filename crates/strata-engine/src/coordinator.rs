//! Orchestration of one synchronization pass.
//!
//! The coordinator owns the run state machine
//! (`Idle -> Planning -> Executing -> Reconciling -> Idle`), fans the
//! planned moves out over a bounded worker pool, honours cooperative
//! cancellation, and reconciles the exclusion manifest unconditionally at
//! the end of every executed run. Only one run may be active at a time; a
//! start request while another run is in flight is rejected, not queued.
//!
//! Cancellation never pre-empts a move already in flight: the token is
//! checked once before each move starts, and all in-flight moves are
//! awaited before reconciliation, so the manifest always converges against
//! a filesystem state that reflects exactly the moves that did complete.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use strata_config::EngineSettings;
use strata_events::{Event, EventBus};
use strata_telemetry::Metrics;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::manifest::ExclusionManifest;
use crate::model::{CandidateRecord, MoveFailure, MoveKind, RunResult, RunStatus, format_bytes};
use crate::mover::{MoveExecutor, MoveJob};
use crate::planner;
use crate::state::CacheEntryStore;
use crate::translate::PathTranslator;

const HEALTH_COMPONENT: &str = "manifest";

/// Phase of the coordinator's run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No run is active.
    Idle,
    /// Candidates are being resolved and the plan computed.
    Planning,
    /// Moves are executing on the worker pool.
    Executing,
    /// The exclusion manifest is converging onto the entry table.
    Reconciling,
}

impl RunPhase {
    /// Render the phase as its lowercase string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Reconciling => "reconciling",
        }
    }
}

/// Inputs for one synchronization pass, read once at the start of the run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Settings snapshot for this run.
    pub settings: EngineSettings,
    /// Ordered candidate records from the external collaborator. A supply
    /// failure upstream is represented by an empty list, in which case the
    /// run evaluates only evictions.
    pub candidates: Vec<CandidateRecord>,
    /// Simulate the run without touching the filesystem or durable state.
    pub dry_run: bool,
}

/// Snapshot of coordinator state for diagnostics readers.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Current phase of the state machine.
    pub phase: RunPhase,
    /// Result of the most recent run, if any completed in this process.
    pub last_result: Option<RunResult>,
}

/// Coordinates synchronization runs over injected stores.
pub struct RunCoordinator {
    events: EventBus,
    metrics: Metrics,
    state: Arc<CacheEntryStore>,
    manifest: Arc<Mutex<ExclusionManifest>>,
    phase: Arc<Mutex<RunPhase>>,
    last_result: Mutex<Option<RunResult>>,
    health_degraded: Mutex<bool>,
}

impl RunCoordinator {
    /// Construct a coordinator over the shared stores.
    #[must_use]
    pub fn new(
        events: EventBus,
        metrics: Metrics,
        state: Arc<CacheEntryStore>,
        manifest: Arc<Mutex<ExclusionManifest>>,
    ) -> Self {
        Self {
            events,
            metrics,
            state,
            manifest,
            phase: Arc::new(Mutex::new(RunPhase::Idle)),
            last_result: Mutex::new(None),
            health_degraded: Mutex::new(false),
        }
    }

    /// Snapshot the coordinator's phase and last result.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex has been poisoned.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: *self.phase.lock().expect("phase mutex poisoned"),
            last_result: self
                .last_result
                .lock()
                .expect("last result mutex poisoned")
                .clone(),
        }
    }

    /// Execute one synchronization pass.
    ///
    /// The returned result always reports what happened, including for
    /// stopped and partially-failed runs; a manifest persistence failure is
    /// reported through [`RunStatus::Failed`] rather than an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConcurrentRun`] when another run is already
    /// past `Idle`; no state is changed in that case.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex has been poisoned.
    #[allow(clippy::too_many_lines)]
    pub async fn run(
        &self,
        request: RunRequest,
        stop: CancellationToken,
    ) -> EngineResult<RunResult> {
        let _phase_guard = self.begin()?;
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let now = Utc::now();

        let RunRequest {
            settings,
            candidates: records,
            dry_run,
        } = request;
        let translator = PathTranslator::new(&settings.mappings);

        self.events.publish(Event::RunStarted { run_id, dry_run });
        info!(
            run_id = %run_id,
            candidates = records.len(),
            dry_run,
            "synchronization run started"
        );

        if !dry_run
            && let Err(err) = self.state.prune_missing()
        {
            error!(error = %err, "could not persist pruned cache entries");
        }

        let mut skipped_unmapped: u64 = 0;
        let mut candidates = Vec::with_capacity(records.len());
        for record in &records {
            match translator.resolve_candidate(record) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => {
                    warn!(
                        path = %record.logical_path,
                        error = %err,
                        "candidate has no mapping; skipping"
                    );
                    skipped_unmapped += 1;
                }
            }
        }

        let entries = self.state.snapshot();
        let planned = planner::plan(
            &candidates,
            &entries,
            settings.cache_budget_bytes,
            settings.retention(),
            now,
        );
        let pending_bytes: u64 = planned.promote.iter().map(|c| c.size_bytes).sum();
        self.events.publish(Event::RunPlanned {
            run_id,
            promote: count(planned.promote.len()),
            evict: count(planned.evict.len()),
            refresh: count(planned.refresh.len()),
            skipped_budget: count(planned.skipped_for_budget.len()),
        });
        info!(
            run_id = %run_id,
            promote = planned.promote.len(),
            evict = planned.evict.len(),
            refresh = planned.refresh.len(),
            skipped_budget = planned.skipped_for_budget.len(),
            pending = %format_bytes(pending_bytes),
            "synchronization plan computed"
        );

        if dry_run {
            let result = RunResult {
                run_id,
                status: RunStatus::Completed,
                dry_run: true,
                promoted: count(planned.promote.len()),
                evicted: count(planned.evict.len()),
                refreshed: count(planned.refresh.len()),
                skipped_budget: count(planned.skipped_for_budget.len()),
                skipped_unmapped,
                sidecar_failures: 0,
                failures: Vec::new(),
                fatal_error: None,
                duration_ms: elapsed_ms(started),
            };
            return Ok(self.finish(result));
        }

        if !planned.refresh.is_empty()
            && let Err(err) = self.state.refresh(&planned.refresh, now)
        {
            error!(error = %err, "could not persist refreshed cache entries");
        }

        self.set_phase(RunPhase::Executing);
        let mut failures: Vec<MoveFailure> = Vec::new();
        let mut jobs = Vec::new();
        for candidate in &planned.promote {
            jobs.push(MoveJob {
                kind: MoveKind::Promote,
                source: candidate.engine_source_path.clone(),
                target: candidate.engine_target_path.clone(),
                size_bytes: candidate.size_bytes,
            });
        }
        for entry in &planned.evict {
            match translator.to_archive_path(&entry.engine_path) {
                Ok(target) => jobs.push(MoveJob {
                    kind: MoveKind::Evict,
                    source: entry.engine_path.clone(),
                    target,
                    size_bytes: entry.size_bytes,
                }),
                Err(err) => {
                    warn!(
                        path = %entry.engine_path.display(),
                        error = %err,
                        "cache entry has no archive mapping; cannot evict"
                    );
                    failures.push(MoveFailure {
                        kind: MoveKind::Evict,
                        path: entry.engine_path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let context = MoveContext {
            executor: MoveExecutor::new(settings.verify, settings.free_space_margin_bytes),
            semaphore: Arc::new(Semaphore::new(settings.worker_count)),
            stop: stop.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            run_id,
            now,
        };
        let mut workers = JoinSet::new();
        for job in jobs {
            let context = context.clone();
            workers.spawn(execute_move(context, job));
        }

        let mut promoted: u64 = 0;
        let mut evicted: u64 = 0;
        let mut sidecar_failures: u64 = 0;
        let mut any_skipped = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => match report.status {
                    MoveReportStatus::Completed {
                        sidecar_failures: failed_sidecars,
                    } => {
                        sidecar_failures += failed_sidecars;
                        match report.job.kind {
                            MoveKind::Promote => promoted += 1,
                            MoveKind::Evict => evicted += 1,
                        }
                    }
                    MoveReportStatus::Skipped => any_skipped = true,
                    MoveReportStatus::Failed { message } => failures.push(MoveFailure {
                        kind: report.job.kind,
                        path: report.job.source,
                        message,
                    }),
                },
                Err(join_err) => {
                    error!(error = %join_err, "move worker task aborted");
                }
            }
        }

        self.set_phase(RunPhase::Reconciling);
        let authoritative: BTreeSet<String> = self
            .state
            .snapshot()
            .iter()
            .map(|entry| {
                translator
                    .to_external_path(&entry.engine_path)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        let mut fatal_error = None;
        {
            let mut manifest = self.manifest.lock().expect("manifest mutex poisoned");
            match manifest.reconcile(&authoritative) {
                Ok(outcome) => {
                    info!(
                        run_id = %run_id,
                        added = outcome.added,
                        removed = outcome.removed,
                        protected = manifest.len(),
                        "exclusion manifest reconciled"
                    );
                    self.metrics.set_manifest_entries(gauge(manifest.len()));
                    self.mark_recovered();
                }
                Err(err) => {
                    let detail = error_chain(&err);
                    error!(run_id = %run_id, error = %detail, "exclusion manifest reconciliation failed");
                    self.mark_degraded(&detail);
                    fatal_error = Some(detail);
                }
            }
        }
        self.metrics.set_cache_occupancy(
            gauge(self.state.len()),
            i64::try_from(self.state.total_bytes()).unwrap_or(i64::MAX),
        );

        let stopped = any_skipped || stop.is_cancelled();
        let status = if fatal_error.is_some() {
            RunStatus::Failed
        } else if stopped {
            RunStatus::Stopped
        } else if failures.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        };

        let result = RunResult {
            run_id,
            status,
            dry_run: false,
            promoted,
            evicted,
            refreshed: count(planned.refresh.len()),
            skipped_budget: count(planned.skipped_for_budget.len()),
            skipped_unmapped,
            sidecar_failures,
            failures,
            fatal_error,
            duration_ms: elapsed_ms(started),
        };
        Ok(self.finish(result))
    }

    fn begin(&self) -> EngineResult<PhaseGuard> {
        let mut phase = self.phase.lock().expect("phase mutex poisoned");
        if *phase != RunPhase::Idle {
            return Err(EngineError::ConcurrentRun {
                phase: phase.as_str(),
            });
        }
        *phase = RunPhase::Planning;
        Ok(PhaseGuard {
            phase: Arc::clone(&self.phase),
        })
    }

    fn set_phase(&self, next: RunPhase) {
        *self.phase.lock().expect("phase mutex poisoned") = next;
    }

    fn finish(&self, result: RunResult) -> RunResult {
        self.metrics.inc_run(result.status.as_str());
        self.metrics
            .observe_run_duration(Duration::from_millis(result.duration_ms));
        self.events.publish(Event::RunCompleted {
            run_id: result.run_id,
            status: result.status.as_str().to_string(),
            promoted: result.promoted,
            evicted: result.evicted,
            failed: count(result.failures.len()),
        });
        info!(
            run_id = %result.run_id,
            status = result.status.as_str(),
            promoted = result.promoted,
            evicted = result.evicted,
            failed = result.failures.len(),
            duration_ms = result.duration_ms,
            "synchronization run finished"
        );
        *self
            .last_result
            .lock()
            .expect("last result mutex poisoned") = Some(result.clone());
        result
    }

    fn mark_degraded(&self, detail: &str) {
        let mut guard = self
            .health_degraded
            .lock()
            .expect("health mutex poisoned");
        if *guard {
            drop(guard);
            warn!(component = HEALTH_COMPONENT, "manifest still degraded: {detail}");
        } else {
            *guard = true;
            drop(guard);
            warn!(component = HEALTH_COMPONENT, "manifest degraded: {detail}");
            self.events.publish(Event::HealthChanged {
                degraded: vec![HEALTH_COMPONENT.to_string()],
            });
        }
    }

    fn mark_recovered(&self) {
        let mut guard = self
            .health_degraded
            .lock()
            .expect("health mutex poisoned");
        if std::mem::take(&mut *guard) {
            drop(guard);
            self.events
                .publish(Event::HealthChanged { degraded: vec![] });
            info!(component = HEALTH_COMPONENT, "manifest recovered");
        }
    }
}

/// Resets the state machine to `Idle` however the run exits.
#[derive(Debug)]
struct PhaseGuard {
    phase: Arc<Mutex<RunPhase>>,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        *self.phase.lock().expect("phase mutex poisoned") = RunPhase::Idle;
    }
}

/// Everything a move worker needs, cloned per job.
#[derive(Clone)]
struct MoveContext {
    executor: MoveExecutor,
    semaphore: Arc<Semaphore>,
    stop: CancellationToken,
    state: Arc<CacheEntryStore>,
    events: EventBus,
    metrics: Metrics,
    run_id: Uuid,
    now: DateTime<Utc>,
}

struct MoveReport {
    job: MoveJob,
    status: MoveReportStatus,
}

enum MoveReportStatus {
    Completed { sidecar_failures: u64 },
    Skipped,
    Failed { message: String },
}

async fn execute_move(context: MoveContext, job: MoveJob) -> MoveReport {
    let MoveContext {
        executor,
        semaphore,
        stop,
        state,
        events,
        metrics,
        run_id,
        now,
    } = context;

    let Ok(_permit) = semaphore.acquire_owned().await else {
        return MoveReport {
            job,
            status: MoveReportStatus::Skipped,
        };
    };
    if stop.is_cancelled() {
        metrics.inc_move(job.kind.as_str(), "skipped");
        return MoveReport {
            job,
            status: MoveReportStatus::Skipped,
        };
    }

    let blocking_job = job.clone();
    let executed =
        tokio::task::spawn_blocking(move || executor.execute(&blocking_job)).await;

    let status = match executed {
        Ok(Ok(outcome)) => {
            record_outcome(state.as_ref(), &events, run_id, now, &job);
            metrics.inc_move(job.kind.as_str(), "completed");
            metrics.add_bytes_moved(job.kind.as_str(), job.size_bytes);
            MoveReportStatus::Completed {
                sidecar_failures: count(outcome.sidecar_failures.len()),
            }
        }
        Ok(Err(err)) => {
            let message = error_chain(&err);
            events.publish(Event::MoveFailed {
                run_id,
                kind: job.kind.as_str().to_string(),
                path: job.source.to_string_lossy().into_owned(),
                message: message.clone(),
            });
            metrics.inc_move(job.kind.as_str(), "failed");
            MoveReportStatus::Failed { message }
        }
        Err(join_err) => {
            metrics.inc_move(job.kind.as_str(), "failed");
            MoveReportStatus::Failed {
                message: format!("move worker panicked: {join_err}"),
            }
        }
    };
    MoveReport { job, status }
}

/// Record a completed move in the entry table and publish its event. Entry
/// persistence failures are logged but do not fail the move: the in-memory
/// table stays correct for this run's reconciliation and the next run's
/// flush retries the write.
fn record_outcome(
    state: &CacheEntryStore,
    events: &EventBus,
    run_id: Uuid,
    now: DateTime<Utc>,
    job: &MoveJob,
) {
    match job.kind {
        MoveKind::Promote => {
            if let Err(err) = state.record_promotion(&job.target, job.size_bytes, now) {
                error!(
                    path = %job.target.display(),
                    error = %err,
                    "promotion executed but cache entry not persisted"
                );
            }
            events.publish(Event::FilePromoted {
                run_id,
                cache_path: job.target.to_string_lossy().into_owned(),
                size_bytes: job.size_bytes,
            });
        }
        MoveKind::Evict => {
            if let Err(err) = state.remove(&job.source) {
                error!(
                    path = %job.source.display(),
                    error = %err,
                    "eviction executed but cache entry not removed durably"
                );
            }
            events.publish(Event::FileEvicted {
                run_id,
                archive_path: job.target.to_string_lossy().into_owned(),
                size_bytes: job.size_bytes,
            });
        }
    }
}

fn error_chain(err: &EngineError) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

fn count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

fn gauge(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn coordinator(temp: &TempDir) -> RunCoordinator {
        let state = Arc::new(
            CacheEntryStore::load(temp.path().join("cache_entries.json"))
                .expect("state loads"),
        );
        let manifest = Arc::new(Mutex::new(ExclusionManifest::load(
            temp.path().join("mover_exclusions.txt"),
        )));
        RunCoordinator::new(
            EventBus::new(),
            Metrics::new().expect("metrics"),
            state,
            manifest,
        )
    }

    #[test]
    fn begin_rejects_concurrent_runs() {
        let temp = TempDir::new().expect("tempdir");
        let coordinator = coordinator(&temp);

        let guard = coordinator.begin().expect("first begin succeeds");
        let err = coordinator.begin().expect_err("second begin is rejected");
        assert!(matches!(err, EngineError::ConcurrentRun { phase: "planning" }));

        drop(guard);
        coordinator
            .begin()
            .expect("coordinator returns to idle after the guard drops");
    }

    #[test]
    fn phase_guard_restores_idle_through_all_phases() {
        let temp = TempDir::new().expect("tempdir");
        let coordinator = coordinator(&temp);

        let guard = coordinator.begin().expect("begin succeeds");
        coordinator.set_phase(RunPhase::Executing);
        assert_eq!(coordinator.status().phase, RunPhase::Executing);
        coordinator.set_phase(RunPhase::Reconciling);
        drop(guard);
        assert_eq!(coordinator.status().phase, RunPhase::Idle);
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = EngineError::manifest(
            "flush",
            "/state/manifest.txt",
            std::io::Error::other("disk detached"),
        );
        let rendered = error_chain(&err);
        assert!(rendered.starts_with("exclusion manifest persistence failed"));
        assert!(rendered.contains("disk detached"));
    }
}
