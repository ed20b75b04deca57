//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges relevant to cache synchronization runs.

use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across the engine.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    runs_total: IntCounterVec,
    moves_total: IntCounterVec,
    bytes_moved_total: IntCounterVec,
    cache_entries: IntGauge,
    cache_bytes: IntGauge,
    manifest_entries: IntGauge,
    last_run_duration_ms: IntGauge,
}

/// Snapshot of selected gauges for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Number of files currently tracked on the cache tier.
    pub cache_entries: i64,
    /// Total bytes currently tracked on the cache tier.
    pub cache_bytes: i64,
    /// Number of paths currently protected by the exclusion manifest.
    pub manifest_entries: i64,
    /// Wall-clock duration of the most recent run in milliseconds.
    pub last_run_duration_ms: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("sync_runs_total", "Synchronization runs by terminal status"),
            &["status"],
        )?;
        let moves_total = IntCounterVec::new(
            Opts::new("file_moves_total", "File moves executed by kind and status"),
            &["kind", "status"],
        )?;
        let bytes_moved_total = IntCounterVec::new(
            Opts::new("bytes_moved_total", "Bytes relocated between tiers by kind"),
            &["kind"],
        )?;
        let cache_entries = IntGauge::with_opts(Opts::new(
            "cache_entries",
            "Files currently tracked on the cache tier",
        ))?;
        let cache_bytes = IntGauge::with_opts(Opts::new(
            "cache_bytes",
            "Bytes currently tracked on the cache tier",
        ))?;
        let manifest_entries = IntGauge::with_opts(Opts::new(
            "manifest_entries",
            "Paths currently protected by the exclusion manifest",
        ))?;
        let last_run_duration_ms = IntGauge::with_opts(Opts::new(
            "last_run_duration_ms",
            "Wall-clock duration of the most recent run (ms)",
        ))?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(moves_total.clone()))?;
        registry.register(Box::new(bytes_moved_total.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(cache_bytes.clone()))?;
        registry.register(Box::new(manifest_entries.clone()))?;
        registry.register(Box::new(last_run_duration_ms.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                runs_total,
                moves_total,
                bytes_moved_total,
                cache_entries,
                cache_bytes,
                manifest_entries,
                last_run_duration_ms,
            }),
        })
    }

    /// Increment the run counter for the given terminal status.
    pub fn inc_run(&self, status: &str) {
        self.inner.runs_total.with_label_values(&[status]).inc();
    }

    /// Increment the move counter for the given kind and status.
    pub fn inc_move(&self, kind: &str, status: &str) {
        self.inner
            .moves_total
            .with_label_values(&[kind, status])
            .inc();
    }

    /// Add relocated bytes for the given move kind.
    pub fn add_bytes_moved(&self, kind: &str, bytes: u64) {
        self.inner
            .bytes_moved_total
            .with_label_values(&[kind])
            .inc_by(bytes);
    }

    /// Set the cache occupancy gauges.
    pub fn set_cache_occupancy(&self, entries: i64, bytes: i64) {
        self.inner.cache_entries.set(entries);
        self.inner.cache_bytes.set(bytes);
    }

    /// Set the manifest size gauge.
    pub fn set_manifest_entries(&self, entries: i64) {
        self.inner.manifest_entries.set(entries);
    }

    /// Record the wall-clock duration of the most recent run.
    pub fn observe_run_duration(&self, duration: Duration) {
        self.inner
            .last_run_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_entries: self.inner.cache_entries.get(),
            cache_bytes: self.inner.cache_bytes.get(),
            manifest_entries: self.inner.manifest_entries.get(),
            last_run_duration_ms: self.inner.last_run_duration_ms.get(),
        }
    }

    fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}
