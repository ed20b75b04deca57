//! Telemetry primitives shared across the Strata workspace.
//!
//! This crate centralises logging initialisation and the Prometheus metrics
//! registry so the engine and any embedding host adopt a consistent
//! observability story.

pub mod init;
pub mod metrics;

pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
