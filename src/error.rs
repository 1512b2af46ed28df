//! Error types for the translation store, merge, sync and dispatch layers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslateError {
    /// Filesystem error while reading or writing a store file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Atomic rename of a freshly written store file failed
    #[error("Persist error: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// Invalid or missing configuration (API key, settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to the provider
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered, but not with a usable translation
    #[error("Provider error: {0}")]
    Provider(String),

    /// Text rejected locally before it reaches the provider
    #[error("Text of {len} characters exceeds the maximum of {max}")]
    InputTooLong { len: usize, max: usize },

    /// Remote copy could not be fetched or published
    #[error("Sync error: {0}")]
    Sync(String),

    /// A numeric pattern could not be compiled
    #[error("Pattern error: {0}")]
    Pattern(String),
}

impl From<reqwest::Error> for TranslateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TranslateError::Network(format!("request timed out: {}", err))
        } else {
            TranslateError::Network(err.to_string())
        }
    }
}

/// Result type for translation operations
pub type TranslateResult<T> = Result<T, TranslateError>;
