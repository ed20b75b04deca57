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

//! Typed configuration models for the Strata cache synchronization engine.
//!
//! Layout: `model.rs` (path mappings and engine settings), `validate.rs`
//! (validation helpers applied before a settings snapshot is accepted).
//! Persistence and editing of configuration belong to the host application;
//! this crate only parses and validates the snapshot handed to the engine
//! at the start of each run.

pub mod error;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{EngineSettings, PathMapping, VerifyMode};
pub use validate::validate_settings;
