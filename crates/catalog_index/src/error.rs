//! Error types for search index operations.

use thiserror::Error;

/// Result type for search index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur while talking to the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index server could not be reached.
    #[error("search index unreachable: {0}")]
    Unreachable(String),

    /// The named index does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// A bulk request failed as a whole.
    #[error("bulk request failed with status {status}: {message}")]
    Bulk {
        /// HTTP-like status code of the bulk request.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The server rejected a request.
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// A document or mapping body was not what was expected.
    #[error("invalid body: {0}")]
    InvalidBody(String),
}

impl IndexError {
    /// Returns true if the error means the index could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, IndexError::Unreachable(_))
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::InvalidBody(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_classification() {
        assert!(IndexError::Unreachable("refused".into()).is_connectivity());
        assert!(!IndexError::IndexNotFound("products".into()).is_connectivity());
    }

    #[test]
    fn bulk_display_includes_status() {
        let err = IndexError::Bulk {
            status: 500,
            message: "shard failure".into(),
        };
        assert!(err.to_string().contains("500"));
    }
}
