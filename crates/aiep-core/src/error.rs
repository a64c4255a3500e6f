use thiserror::Error;

/// Top-level error type for the academic assistant backend.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for AiepError` so that the `?` operator works
/// across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AiepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vector error: {0}")]
    Vector(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<toml::de::Error> for AiepError {
    fn from(err: toml::de::Error) -> Self {
        AiepError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AiepError {
    fn from(err: toml::ser::Error) -> Self {
        AiepError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AiepError {
    fn from(err: serde_json::Error) -> Self {
        AiepError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for application-level operations.
pub type Result<T> = std::result::Result<T, AiepError>;
