//! # Catalog Core
//!
//! Single-writer product catalog on top of a search index.
//!
//! All writes are funneled through one consumer of the mutation exchange
//! so that concurrent producers never race on the index, and new replicas
//! bootstrap from a consistent snapshot of a running master.
//!
//! This crate provides:
//! - [`ReadinessGate`], the single-flight initialization every component awaits
//! - [`Dispatcher`], the consumer that applies mutations and replies
//! - [`normalize`], the attribute rules applied to every write
//! - [`MigrationManager`], ordered index migrations recorded in the mapping
//! - [`Catalog`], the facade sending mutations and reading products
//! - [`NodeBuilder`] / [`Node`], which wire the above for one node mode
//!
//! ## Node modes
//!
//! | mode | mutation exchange | replies | snapshot role |
//! |------|-------------------|---------|---------------|
//! | standalone | exclusive | yes | none |
//! | master | exclusive | yes | server |
//! | replica | broadcast | no | client, at startup |

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod catalog;
mod config;
mod dispatcher;
mod error;
mod migration;
mod migrations;
mod node;
mod normalize;
mod product;
mod readiness;

pub use catalog::Catalog;
pub use config::{CatalogConfig, NodeMode, DEFAULT_MUTATION_EXCHANGE};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use error::{CoreError, CoreResult, ReadinessError};
pub use migration::{
    AppliedMigration, Migration, MigrationContext, MigrationInfo, MigrationManager,
    MigrationResult, MigrationRunResult, MigrationState, MigrationVersion, META_KEY,
};
pub use migrations::{builtin_migrations, CreatedDateMapping, KeywordAttributes};
pub use node::{Node, NodeBuilder};
pub use normalize::normalize;
pub use product::{Attributes, Product, CREATED};
pub use readiness::{ReadinessGate, ReadinessState};
