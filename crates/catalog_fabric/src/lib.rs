//! # Catalog Fabric
//!
//! Messaging fabric abstraction for the catalog writer.
//!
//! This crate provides:
//! - [`MessagingFabric`], the capability contract (publish, exclusive
//!   consume, broadcast subscribe)
//! - [`MemoryFabric`], an in-process implementation with at-least-once
//!   delivery on exclusive queues
//! - [`RequestClient`], typed request/reply on top of any fabric, with a
//!   pending map keyed by correlation id and an explicit timeout
//!
//! ## Delivery model
//!
//! An exchange has one exclusive queue and any number of broadcast
//! subscribers. A publish goes to both. Messages on the exclusive queue
//! are buffered until a consumer attaches, and a delivery dropped without
//! [`Delivery::ack`] is requeued.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod fabric;
mod memory;
mod rpc;

pub use error::{FabricError, FabricResult};
pub use fabric::{Acker, Delivery, Envelope, MessagingFabric, Subscription};
pub use memory::MemoryFabric;
pub use rpc::{reply, RequestClient};
