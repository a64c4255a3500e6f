use std::fmt;

use aiep_core::{AiepError, EnrollmentStatus};
use aiep_vector::{VectorError, EMBEDDING_DIM};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by the embedding stores.
///
/// Every validation failure is reported before the database is touched.
/// Use [`StoreError::kind`] to branch on the category without matching
/// on variant payloads.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("{parent} {id} not found")]
    ParentNotFound { parent: &'static str, id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Limit must be greater than zero, got {0}")]
    InvalidLimit(usize),

    #[error("Minimum similarity must be within [0, 1], got {0}")]
    InvalidSimilarity(f32),

    #[error("{kind} {id} has no embedding")]
    EmbeddingRequired { kind: &'static str, id: i64 },

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Batch of {size} entries exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("No results found")]
    NoResults,

    #[error("Enrollment is already {0}")]
    AlreadyInStatus(EnrollmentStatus),

    #[error("Cannot move enrollment from {from} to {to}")]
    InvalidTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Backend(#[source] rusqlite::Error),

    /// Lock poisoning, a panicked worker, or unreadable stored data.
    #[error("Storage internal error: {0}")]
    Internal(String),
}

/// Flat classification of [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ParentNotFound,
    Validation,
    Dimension,
    InvalidLimit,
    InvalidSimilarity,
    EmbeddingRequired,
    EmptyBatch,
    BatchTooLarge,
    NoResults,
    AlreadyInStatus,
    InvalidTransition,
    Cancelled,
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::ParentNotFound { .. } => ErrorKind::ParentNotFound,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Dimension { .. } => ErrorKind::Dimension,
            StoreError::InvalidLimit(_) => ErrorKind::InvalidLimit,
            StoreError::InvalidSimilarity(_) => ErrorKind::InvalidSimilarity,
            StoreError::EmbeddingRequired { .. } => ErrorKind::EmbeddingRequired,
            StoreError::EmptyBatch => ErrorKind::EmptyBatch,
            StoreError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            StoreError::NoResults => ErrorKind::NoResults,
            StoreError::AlreadyInStatus(_) => ErrorKind::AlreadyInStatus,
            StoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Backend(_) | StoreError::Internal(_) => ErrorKind::Backend,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::OperationInterrupted => {
                StoreError::Cancelled
            }
            other => StoreError::Backend(other),
        }
    }
}

impl From<VectorError> for StoreError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::Dimension { expected, actual } => StoreError::Dimension { expected, actual },
            VectorError::InvalidSimilarity(value) => StoreError::InvalidSimilarity(value),
            VectorError::CorruptBlob { bytes } => StoreError::Dimension {
                expected: EMBEDDING_DIM,
                actual: bytes / std::mem::size_of::<f32>(),
            },
        }
    }
}

impl From<StoreError> for AiepError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => AiepError::Cancelled,
            other => AiepError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
