//! Core types for the Recall memory engine.
//!
//! This crate holds what every Recall component shares: the permalink
//! format that joins the metadata store to the vector index, the error
//! taxonomy, configuration loading and logging bootstrap.
//!
//! # Main types
//!
//! - [`Permalink`]: Canonical `memory://<folder>/<doc_id>` identifier.
//! - [`MemoryError`]: Unified error enum for all Recall components.
//! - [`MemoryResult`]: Convenience alias for `Result<T, MemoryError>`.
//! - [`PartialFailure`]: Warning carried by half-applied composite writes.
//! - [`RecallConfig`]: TOML-backed configuration.

/// Configuration loading and validation.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Permalink generation, parsing and folder normalization.
pub mod identifier;
/// `tracing` subscriber bootstrap.
pub mod logging;

pub use config::{
    IndexConfig, LoggingConfig, MetadataBackendKind, MetadataConfig, RecallConfig, SearchConfig,
    VectorBackendKind,
};
pub use error::{BoxError, ErrorKind, FailureStage, MemoryError, MemoryResult, PartialFailure};
pub use identifier::{
    generate_identifier, normalize_folder, parse_identifier, resolve_folder, Permalink,
    DEFAULT_FOLDER, SCHEME,
};
pub use logging::init_tracing;
