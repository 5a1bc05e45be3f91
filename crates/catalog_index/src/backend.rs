//! Search index capability trait definition.

use crate::error::IndexResult;
use async_trait::async_trait;
use serde_json::Value;

/// What a configured index name points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The name is a concrete index.
    Index(String),
    /// The name is an alias for the listed indexes.
    Alias(Vec<String>),
    /// Nothing exists under that name yet.
    Missing,
}

/// Outcome of an idempotent index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The index was created by this call.
    Created,
    /// The index existed before the call.
    AlreadyExists,
}

/// Per-request summary of a successful bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Documents that existed and were removed.
    pub deleted: usize,
    /// Ids that did not exist.
    pub not_found: usize,
}

/// A stored document as returned by [`SearchIndex::scan`].
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id.
    pub id: String,
    /// Document body.
    pub source: Value,
}

/// The minimal capability contract the catalog needs from a search index.
///
/// Documents are JSON objects addressed by string id. Writes are full
/// replacements; there is no partial update and no optimistic concurrency.
///
/// # Invariants
///
/// - `create_index` is idempotent: an existing index is [`CreateOutcome::AlreadyExists`]
/// - `get_document` is realtime: it observes every acknowledged write
/// - `count` and `scan` observe the index as of the last `refresh`
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryIndex`] - For testing
/// - [`super::ElasticsearchIndex`] - Over HTTP
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Returns a printable location of the index server (URL or `memory://`).
    fn endpoint(&self) -> String;

    /// Health probe.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::Unreachable`] if the server does not answer.
    async fn ping(&self) -> IndexResult<()>;

    /// Resolves a name to a concrete index, an alias, or nothing.
    async fn resolve(&self, name: &str) -> IndexResult<Resolution>;

    /// Creates an index; an existing index is not an error.
    async fn create_index(&self, name: &str) -> IndexResult<CreateOutcome>;

    /// Reads one document; `None` if it does not exist.
    async fn get_document(&self, index: &str, id: &str) -> IndexResult<Option<Value>>;

    /// Stores `body` at `id`, replacing any previous document.
    async fn index_document(&self, index: &str, id: &str, body: Value) -> IndexResult<()>;

    /// Deletes many documents in one request.
    ///
    /// # Errors
    ///
    /// A failed request is reported as one [`crate::IndexError::Bulk`] for the
    /// whole batch; callers cannot tell which ids failed.
    async fn bulk_delete(&self, index: &str, ids: &[String]) -> IndexResult<BulkOutcome>;

    /// Returns the index mapping.
    async fn get_mapping(&self, index: &str) -> IndexResult<Value>;

    /// Merges `mapping` into the index mapping.
    async fn put_mapping(&self, index: &str, mapping: Value) -> IndexResult<()>;

    /// Makes all prior writes visible to `count` and `scan`.
    async fn refresh(&self, index: &str) -> IndexResult<()>;

    /// Number of searchable documents.
    async fn count(&self, index: &str) -> IndexResult<u64>;

    /// All searchable documents, ordered by id.
    async fn scan(&self, index: &str) -> IndexResult<Vec<Document>>;
}
