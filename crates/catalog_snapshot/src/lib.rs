//! # Catalog Snapshot
//!
//! Full-state replication from a master node to a joining replica.
//!
//! The exchange has two planes:
//! - a control plane on the messaging fabric: the client broadcasts a
//!   [`catalog_protocol::DumpRequest`], the master answers with a
//!   [`catalog_protocol::DumpOffer`] listing one TCP endpoint per artifact
//!   and a session token
//! - a data plane of single-use TCP streams, one per artifact, each opened
//!   with a token handshake
//!
//! ## Stream handshake
//!
//! ```text
//! client -> server: artifact code (u8) | token length (u16 BE) | token
//! server -> client: status (u8, 0 = accepted, 1 = rejected)
//! server -> client: artifact body, then EOF
//! ```
//!
//! ## Artifacts
//!
//! - mapping: one JSON document
//! - data: NDJSON `{"_id": .., "_source": ..}` lines and a `{"_count": N}`
//!   trailer

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod dump;
mod error;
mod handshake;
mod server;
mod session;
mod token;

pub use client::{SnapshotClient, SyncReport};
pub use config::{duration_secs, ReplicationConfig};
pub use dump::{DumpTool, IndexDumpTool};
pub use error::{SnapshotError, SnapshotResult};
pub use server::{ServerStats, SnapshotServer};
pub use session::{SessionInfo, SessionState};
pub use token::SessionTokens;
