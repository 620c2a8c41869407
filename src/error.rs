//! Error taxonomy for the answering pipeline.
//!
//! Every fallible library operation returns [`Result<T>`]. The variants
//! map one-to-one onto the failure categories a caller has to tell apart:
//! bad configuration, unreadable documents, capability (embedding or
//! language model) failures, persisted-index problems, and timeouts.
//!
//! "The model said the answer is not in the context" is **not** an error;
//! it is a successful [`Answer`](crate::answer::Answer) whose text is the
//! sentinel phrase. Only transport/capability failures surface as
//! [`Error::LanguageService`].

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid chunking parameters, unknown provider, missing credentials.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single document could not be read or its text extracted.
    #[error("failed to ingest '{document}': {message}")]
    Ingestion { document: String, message: String },

    /// A question was asked before any document was uploaded.
    #[error("no documents uploaded; upload at least one document before asking")]
    NoDocuments,

    /// The embedding capability failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The language capability failed (transport, HTTP status, bad payload).
    #[error("answer generation failed: {0}")]
    LanguageService(String),

    /// No persisted index exists at the location.
    #[error("no index found at {0}")]
    IndexNotFound(String),

    /// The persisted index exists but is malformed.
    #[error("index at {location} is corrupt: {reason}")]
    IndexCorrupt { location: String, reason: String },

    /// A vector's dimension disagrees with the index's dimension.
    #[error("dimension mismatch: index has {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A build or completion exceeded its deadline.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying SQLite failure while reading or writing an index.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn ingestion(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ingestion {
            document: document.into(),
            message: message.into(),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn language(message: impl Into<String>) -> Self {
        Self::LanguageService(message.into())
    }

    pub fn corrupt(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// The library never retries on its own; capability failures and
    /// timeouts are surfaced so the caller can decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Embedding(_) | Error::LanguageService(_) | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_failures_are_retryable() {
        assert!(Error::embedding("503").is_retryable());
        assert!(Error::language("connection reset").is_retryable());
        assert!(Error::Timeout {
            operation: "index build",
            after: Duration::from_secs(5)
        }
        .is_retryable());
    }

    #[test]
    fn configuration_and_index_errors_are_not_retryable() {
        assert!(!Error::config("overlap too large").is_retryable());
        assert!(!Error::IndexNotFound("x".into()).is_retryable());
        assert!(!Error::DimensionMismatch {
            expected: 3,
            actual: 4
        }
        .is_retryable());
    }

    #[test]
    fn messages_keep_failure_kinds_distinct() {
        let failed = Error::language("HTTP 500").to_string();
        assert!(failed.starts_with("answer generation failed"));
        let timeout = Error::Timeout {
            operation: "completion",
            after: Duration::from_secs(30),
        }
        .to_string();
        assert_eq!(timeout, "completion timed out after 30s");
    }
}
