//! # Catalog Index
//!
//! Search index capability trait and implementations.
//!
//! The catalog treats the search index as an external collaborator and only
//! relies on the small contract of [`SearchIndex`]: health probe, name
//! resolution, idempotent create, get/index/bulk-delete of JSON documents,
//! mapping introspection and refresh.
//!
//! ## Available Backends
//!
//! - [`MemoryIndex`] - For testing and single-process clusters
//! - [`ElasticsearchIndex`] - HTTP client for an Elasticsearch-compatible server

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod error;
mod http;
mod memory;

pub use backend::{BulkOutcome, CreateOutcome, Document, Resolution, SearchIndex};
pub use error::{IndexError, IndexResult};
pub use http::ElasticsearchIndex;
pub use memory::MemoryIndex;
