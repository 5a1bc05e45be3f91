//! Control messages of the snapshot protocol.
//!
//! The messaging fabric only carries these small messages. The bulk data
//! travels over the direct streams advertised in a [`DumpOffer`].

use crate::codec::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Snapshot protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// One exported artifact of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    /// The index mapping (schema), including `_meta`.
    Mapping,
    /// Every document of the index.
    Data,
}

impl Artifact {
    /// Stable one-byte code, used inside session tokens.
    pub fn code(&self) -> u8 {
        match self {
            Artifact::Mapping => 1,
            Artifact::Data => 2,
        }
    }

    /// Returns the artifact name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Artifact::Mapping => "mapping",
            Artifact::Data => "data",
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family of an advertised endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    /// IPv4.
    Ipv4,
    /// IPv6.
    Ipv6,
}

/// A listener the client should connect to for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Artifact served by this listener.
    pub artifact: Artifact,
    /// Host to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Address family of the bound socket.
    pub family: AddressFamily,
}

impl Endpoint {
    /// Creates an endpoint advertising `host` for a listener bound at `bound`.
    pub fn new(artifact: Artifact, host: impl Into<String>, bound: SocketAddr) -> Self {
        let family = if bound.is_ipv4() {
            AddressFamily::Ipv4
        } else {
            AddressFamily::Ipv6
        };
        Self {
            artifact,
            host: host.into(),
            port: bound.port(),
            family,
        }
    }
}

/// Request broadcast by a joining node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRequest {
    /// Id of the requesting node, for logs.
    pub node_id: Uuid,
    /// Protocol version of the requester.
    pub protocol_version: u16,
}

impl DumpRequest {
    /// Creates a dump request.
    pub fn new(node_id: Uuid) -> Self {
        Self {
            node_id,
            protocol_version: PROTOCOL_VERSION,
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

/// Server answer to a [`DumpRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpOffer {
    /// Session created for this request.
    pub session_id: Uuid,
    /// Freshness token the client presents on every stream.
    pub token: Vec<u8>,
    /// One endpoint per artifact.
    pub endpoints: Vec<Endpoint>,
    /// Error message if the server could not open a session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Protocol version of the server.
    pub protocol_version: u16,
}

impl DumpOffer {
    /// Creates a successful offer.
    pub fn new(session_id: Uuid, token: Vec<u8>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            session_id,
            token,
            endpoints,
            error: None,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Creates a refusal.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::nil(),
            token: Vec::new(),
            endpoints: Vec::new(),
            error: Some(message.into()),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Returns the endpoint serving `artifact`, if advertised.
    pub fn endpoint(&self, artifact: Artifact) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.artifact == artifact)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_family_follows_bound_address() {
        let v4 = Endpoint::new(Artifact::Data, "10.0.0.5", "0.0.0.0:7001".parse().unwrap());
        assert_eq!(v4.family, AddressFamily::Ipv4);
        assert_eq!(v4.port, 7001);

        let v6 = Endpoint::new(Artifact::Mapping, "::1", "[::1]:7002".parse().unwrap());
        assert_eq!(v6.family, AddressFamily::Ipv6);
    }

    #[test]
    fn offer_lookup_by_artifact() {
        let offer = DumpOffer::new(
            Uuid::new_v4(),
            vec![1, 2, 3],
            vec![
                Endpoint::new(Artifact::Data, "127.0.0.1", "127.0.0.1:7001".parse().unwrap()),
                Endpoint::new(Artifact::Mapping, "127.0.0.1", "127.0.0.1:7002".parse().unwrap()),
            ],
        );

        let decoded = DumpOffer::decode(&offer.encode().unwrap()).unwrap();
        assert_eq!(decoded, offer);
        assert_eq!(decoded.endpoint(Artifact::Mapping).unwrap().port, 7002);
        assert!(decoded.error.is_none());
    }

    #[test]
    fn refusal_has_no_endpoints() {
        let offer = DumpOffer::error("no free port");
        assert!(offer.endpoint(Artifact::Data).is_none());
        assert_eq!(offer.error.as_deref(), Some("no free port"));
    }

    #[test]
    fn artifact_codes_are_distinct() {
        assert_ne!(Artifact::Mapping.code(), Artifact::Data.code());
        assert_eq!(Artifact::Data.to_string(), "data");
    }
}
