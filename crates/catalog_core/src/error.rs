//! Error types for the catalog core.

use catalog_fabric::FabricError;
use catalog_index::IndexError;
use catalog_protocol::{ErrorKind, ProtocolError};
use catalog_snapshot::SnapshotError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a node could not become ready.
///
/// Every waiter of the readiness gate receives a clone of the same value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadinessError {
    /// The configuration or the set of collaborators is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The search index did not answer the health probe.
    #[error("search index unreachable: {0}")]
    Connectivity(String),

    /// The configured index name is an alias.
    #[error("index name {name} is an alias for {targets:?}")]
    AliasResolution {
        /// Configured name.
        name: String,
        /// Indexes the alias points at.
        targets: Vec<String>,
    },

    /// A schema migration failed.
    #[error("migration {version} ({name}) failed: {message}")]
    Migration {
        /// Version of the failed migration.
        version: u64,
        /// Name of the failed migration.
        name: String,
        /// Failure message.
        message: String,
    },

    /// The replica could not pull its snapshot.
    #[error("replication failed: {0}")]
    Replication(String),

    /// The index rejected a setup step.
    #[error("index setup failed: {0}")]
    Index(String),

    /// The initialization task stopped without an outcome.
    #[error("initialization interrupted: {0}")]
    Interrupted(String),
}

/// Errors that can occur in catalog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The node is not ready and never will be.
    #[error("not ready: {0}")]
    NotReady(#[from] ReadinessError),

    /// A request was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The writer reported a failure on the reply.
    #[error("{kind:?} error from writer: {message}")]
    Remote {
        /// Failure classification from the reply.
        kind: ErrorKind,
        /// Failure message from the reply.
        message: String,
    },

    /// Wire encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Search index error.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Messaging fabric error.
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),

    /// Snapshot replication error.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config(message.into())
    }

    /// Classification used on mutation replies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotReady(_) => ErrorKind::NotReady,
            CoreError::Validation(_) | CoreError::Protocol(_) => ErrorKind::Validation,
            CoreError::Index(IndexError::Bulk { .. }) => ErrorKind::Bulk,
            CoreError::Index(_) => ErrorKind::Index,
            CoreError::Remote { kind, .. } => *kind,
            CoreError::Config(_)
            | CoreError::Fabric(_)
            | CoreError::Snapshot(_)
            | CoreError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the request timed out waiting for the writer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Fabric(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_kinds() {
        let unknown: CoreError = ProtocolError::UnknownAction("upsert".into()).into();
        assert_eq!(unknown.kind(), ErrorKind::Validation);

        let bulk: CoreError = IndexError::Bulk {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(bulk.kind(), ErrorKind::Bulk);

        let missing: CoreError = IndexError::IndexNotFound("products".into()).into();
        assert_eq!(missing.kind(), ErrorKind::Index);

        let not_ready: CoreError = ReadinessError::Connectivity("refused".into()).into();
        assert_eq!(not_ready.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn alias_error_names_targets() {
        let err = ReadinessError::AliasResolution {
            name: "products".into(),
            targets: vec!["products_v2".into()],
        };
        assert!(err.to_string().contains("products_v2"));
    }

    #[test]
    fn timeout_detection() {
        let err: CoreError = FabricError::Timeout {
            exchange: "catalog.mutations".into(),
            timeout: std::time::Duration::from_secs(1),
        }
        .into();
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
