//! Error types for snapshot replication.

use catalog_fabric::FabricError;
use catalog_index::IndexError;
use catalog_protocol::{Artifact, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur while serving or pulling a snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The replication configuration is unusable.
    #[error("invalid replication config: {0}")]
    Config(String),

    /// No port in the configured range could be bound.
    #[error("no free port in {min}..={max}")]
    NoFreePort {
        /// Lower bound of the range.
        min: u16,
        /// Upper bound of the range.
        max: u16,
    },

    /// The master refused to open a session.
    #[error("snapshot refused: {0}")]
    Refused(String),

    /// The offer did not list an endpoint for an artifact.
    #[error("offer has no endpoint for {0}")]
    MissingEndpoint(Artifact),

    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch {
        /// Our version.
        local: u16,
        /// Their version.
        remote: u16,
    },

    /// A stream token was rejected.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// An artifact stream was malformed or truncated.
    #[error("corrupt {artifact} stream: {message}")]
    Corrupt {
        /// Artifact being transferred.
        artifact: Artifact,
        /// What was wrong.
        message: String,
    },

    /// The session did not finish in time.
    #[error("snapshot session timed out after {0:?}")]
    Timeout(Duration),

    /// Control message encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Messaging fabric error.
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),

    /// Search index error.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// I/O error on a stream or the temporary file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SnapshotError {
    pub(crate) fn corrupt(artifact: Artifact, message: impl Into<String>) -> Self {
        SnapshotError::Corrupt {
            artifact,
            message: message.into(),
        }
    }

    /// Returns true if the failure happened on the data plane.
    pub fn is_transfer_error(&self) -> bool {
        matches!(
            self,
            SnapshotError::Io(_) | SnapshotError::Corrupt { .. } | SnapshotError::NotAuthorized(_)
        )
    }
}
