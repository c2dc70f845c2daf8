//! Error taxonomy for the ingestion and query pipelines.
//!
//! "No evidence" and "ambiguous question" are deliberately absent: they are
//! valid outcomes ([`ResponseStatus::NoEvidence`](crate::models::ResponseStatus)
//! and a low `confidence_score`), not failures.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Unreadable or corrupt file.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("entity recognition failed: {0}")]
    EntityRecognition(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// A collaborator refused the request (bad input, auth, contract
    /// violation). Retrying will not help.
    #[error("{service} rejected request: {message}")]
    Rejected { service: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingService(_)
                | Error::StoreUnavailable(_)
                | Error::Generation(_)
                | Error::EntityRecognition(_)
                | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::EmbeddingService("503".into()).is_retryable());
        assert!(Error::StoreUnavailable("down".into()).is_retryable());
        assert!(Error::Timeout {
            operation: "embed".into(),
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!Error::Extraction("corrupt".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Rejected {
            service: "openai".into(),
            message: "401".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let e = Error::Timeout {
            operation: "generate".into(),
            after: Duration::from_millis(1500),
        };
        assert_eq!(e.to_string(), "generate timed out after 1500ms");
    }
}
