use aiep_core::AiepError;
use thiserror::Error;

/// Errors raised while validating or decoding embedding vectors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VectorError {
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Minimum similarity must be within [0, 1], got {0}")]
    InvalidSimilarity(f32),

    /// A stored blob whose byte length is not a whole number of `f32`s.
    #[error("Corrupt embedding blob of {bytes} bytes")]
    CorruptBlob { bytes: usize },
}

pub type Result<T> = std::result::Result<T, VectorError>;

impl From<VectorError> for AiepError {
    fn from(err: VectorError) -> Self {
        AiepError::Vector(err.to_string())
    }
}
