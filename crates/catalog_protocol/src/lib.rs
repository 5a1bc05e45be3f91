//! # Catalog Protocol
//!
//! Wire messages exchanged over the messaging fabric.
//!
//! This crate provides:
//! - [`Mutation`] requests consumed by the single writer (write, delete)
//! - [`MutationReply`] sent back to the originating caller
//! - [`DumpRequest`] / [`DumpOffer`] control messages of the snapshot protocol
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod dump;
mod error;
mod mutation;
mod reply;

pub use codec::{from_cbor, to_cbor};
pub use dump::{AddressFamily, Artifact, DumpOffer, DumpRequest, Endpoint, PROTOCOL_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use mutation::{Action, DeleteParams, Mutation, WriteParams};
pub use reply::{ErrorKind, MutationReply, ReplyError};
