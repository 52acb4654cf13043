use std::fmt;

use serde::{Deserialize, Serialize};

/// Boxed error used as the preserved cause of a [`MemoryError::Store`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A convenience `Result` alias using [`MemoryError`].
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Top-level error type for the memory engine.
///
/// Each variant maps to one kind of the failure taxonomy: malformed
/// identifiers, missing records, rejected caller input, backend failures and
/// configuration problems. Composite cross-store operations that only half
/// succeed do not produce an error at all; they return a successful outcome
/// carrying a [`PartialFailure`].
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A permalink could not be parsed or generated.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The permalink or id is absent from the store being queried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller input violates a precondition. Raised before any store I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A backend I/O error, wrapped with the operation that triggered it.
    #[error("Store failure during {operation}: {source}")]
    Store {
        /// The store operation that failed (e.g. `metadata.create`).
        operation: String,
        /// The original backend error.
        #[source]
        source: BoxError,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("Config error: {0}")]
    Config(String),
}

impl MemoryError {
    /// Wrap a backend error as a store failure for `operation`.
    pub fn store<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Store {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// The taxonomy discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store { .. } => ErrorKind::StoreFailure,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// `true` if this is a [`MemoryError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Payload-free discriminant of [`MemoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`MemoryError::InvalidIdentifier`].
    InvalidIdentifier,
    /// See [`MemoryError::NotFound`].
    NotFound,
    /// See [`MemoryError::Validation`].
    Validation,
    /// See [`MemoryError::Store`].
    StoreFailure,
    /// See [`MemoryError::Config`].
    Config,
}

/// Which half of a composite operation failed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The metadata store write did not complete.
    Metadata,
    /// The vector index write did not complete.
    Vector,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => f.write_str("metadata"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// Warning attached to a successful composite operation whose second half
/// did not apply. The user-visible effect was achieved; the stores have
/// drifted and reconciliation is expected to repair them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    /// The store that was left behind.
    pub stage: FailureStage,
    /// Rendered cause of the failed write.
    pub message: String,
}

impl PartialFailure {
    /// Build a warning from the error that interrupted `stage`.
    pub fn new(stage: FailureStage, error: &MemoryError) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partial failure at {} stage: {}", self.stage, self.message)
    }
}
