//! Mutation requests handled by the single writer.
//!
//! On the wire a mutation is a map `{action, params}`. Decoding happens in
//! two steps so that an unknown action name can be told apart from a known
//! action with malformed params.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Full-document overwrite of one product.
    Write,
    /// Bulk removal of products by id.
    Delete,
}

impl Action {
    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Write => "write",
            Action::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Params of a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteParams {
    /// Product id.
    pub id: Uuid,
    /// Creation time; when absent the writer keeps the stored one, or stamps
    /// the current time for a new product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Raw, not yet normalized attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
}

impl WriteParams {
    /// Creates write params for the given product.
    pub fn new(id: Uuid, attributes: Map<String, Value>) -> Self {
        Self {
            id,
            created: None,
            attributes: Some(attributes),
        }
    }

    /// Sets the creation time.
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }
}

/// Params of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParams {
    /// Ids to remove in one bulk request.
    pub ids: Vec<Uuid>,
}

/// A decoded mutation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Overwrite one product.
    Write(WriteParams),
    /// Remove products.
    Delete(DeleteParams),
}

#[derive(Serialize)]
struct Tagged<'a, P> {
    action: &'a str,
    params: &'a P,
}

#[derive(Deserialize)]
struct ActionOnly {
    action: String,
}

#[derive(Deserialize)]
struct ParamsOnly<P> {
    params: P,
}

fn params<P>(bytes: &[u8], action: &'static str) -> ProtocolResult<P>
where
    P: serde::de::DeserializeOwned,
{
    from_cbor::<ParamsOnly<P>>(bytes)
        .map(|raw| raw.params)
        .map_err(|e| ProtocolError::InvalidParams {
            action,
            message: e.to_string(),
        })
}

impl Mutation {
    /// Returns the action of this mutation.
    pub fn action(&self) -> Action {
        match self {
            Mutation::Write(_) => Action::Write,
            Mutation::Delete(_) => Action::Delete,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let action = self.action().as_str();
        match self {
            Mutation::Write(params) => to_cbor(&Tagged { action, params }),
            Mutation::Delete(params) => to_cbor(&Tagged { action, params }),
        }
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let header: ActionOnly = from_cbor(bytes)?;

        match header.action.as_str() {
            "write" => params(bytes, "write").map(Mutation::Write),
            "delete" => params(bytes, "delete").map(Mutation::Delete),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}
