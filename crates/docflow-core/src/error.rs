//! Error types for Docflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unknown job payload. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Recognition timed out after {0}ms")]
    RecognitionTimeout(u64),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Memory pressure: {0}")]
    MemoryPressure(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Image error: {0}")]
    Image(String),

    /// Another attempt currently owns the source.
    #[error("Source {0} is leased by another attempt")]
    LeaseHeld(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the job queue should schedule another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_) | Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(!Error::Validation("bad tag".into()).is_retryable());
        assert!(!Error::Config("missing".into()).is_retryable());
        assert!(Error::MemoryPressure("rss".into()).is_retryable());
        assert!(Error::Storage("insert".into()).is_retryable());
        assert!(Error::LeaseHeld("src-1".into()).is_retryable());
    }
}
