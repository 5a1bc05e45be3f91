//! Replies sent by the writer to the originating caller.

use crate::codec::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};

/// Classification of a failed mutation, carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed message, entity id or unknown action.
    Validation,
    /// Aggregate failure of a bulk request.
    Bulk,
    /// The writer never became ready.
    NotReady,
    /// The search index rejected the operation.
    Index,
    /// Anything else.
    Internal,
}

/// Error payload of a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

/// Reply to one mutation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReply {
    /// Whether the mutation was applied.
    pub success: bool,
    /// Error details if not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl MutationReply {
    /// Creates a successful reply.
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Creates a failed reply.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(ReplyError {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}
