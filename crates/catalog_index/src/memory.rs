//! In-memory search index for testing.

use crate::backend::{BulkOutcome, CreateOutcome, Document, Resolution, SearchIndex};
use crate::error::{IndexError, IndexResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory search index.
///
/// Mirrors the visibility rules of a near-real-time index: reads by id see
/// every write immediately, while `count` and `scan` only see what the last
/// `refresh` published.
///
/// This backend is suitable for:
/// - Unit and integration tests
/// - Single-process clusters (see the `catalog cluster` command)
///
/// A few hooks (`set_available`, `fail_next_bulk`, `add_alias`) let tests
/// drive the failure paths of callers.
#[derive(Debug)]
pub struct MemoryIndex {
    state: RwLock<State>,
    available: AtomicBool,
    fail_next_bulk: RwLock<Option<u16>>,
    pings: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    indexes: BTreeMap<String, IndexData>,
    aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug)]
struct IndexData {
    live: BTreeMap<String, Value>,
    searchable: BTreeMap<String, Value>,
    mapping: Value,
}

impl IndexData {
    fn new() -> Self {
        Self {
            live: BTreeMap::new(),
            searchable: BTreeMap::new(),
            mapping: Value::Object(Map::new()),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    /// Creates an empty, reachable index server.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
            fail_next_bulk: RwLock::new(None),
            pings: AtomicU64::new(0),
        }
    }

    /// Makes every call fail with [`IndexError::Unreachable`] while `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next bulk request fail with the given status.
    pub fn fail_next_bulk(&self, status: u16) {
        *self.fail_next_bulk.write() = Some(status);
    }

    /// Points `alias` at `index`.
    pub fn add_alias(&self, alias: &str, index: &str) {
        self.state
            .write()
            .aliases
            .entry(alias.to_string())
            .or_default()
            .push(index.to_string());
    }

    /// Number of health probes received so far.
    pub fn ping_count(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> IndexResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unreachable("memory index is offline".into()))
        }
    }

    fn with_index<T>(&self, index: &str, f: impl FnOnce(&IndexData) -> T) -> IndexResult<T> {
        self.check_available()?;
        let state = self.state.read();
        state
            .indexes
            .get(index)
            .map(f)
            .ok_or_else(|| IndexError::IndexNotFound(index.to_string()))
    }

    fn with_index_mut<T>(
        &self,
        index: &str,
        f: impl FnOnce(&mut IndexData) -> IndexResult<T>,
    ) -> IndexResult<T> {
        self.check_available()?;
        let mut state = self.state.write();
        let data = state
            .indexes
            .get_mut(index)
            .ok_or_else(|| IndexError::IndexNotFound(index.to_string()))?;
        f(data)
    }
}

/// Merges a mapping update: `properties` are merged field by field, every
/// other top-level key is replaced.
fn merge_mapping(current: &mut Value, update: Value) -> IndexResult<()> {
    let Value::Object(update) = update else {
        return Err(IndexError::InvalidBody("mapping must be an object".into()));
    };
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    let Some(current) = current.as_object_mut() else {
        return Ok(());
    };

    for (key, value) in update {
        match (key.as_str(), value) {
            ("properties", Value::Object(fields)) => {
                let properties = current
                    .entry("properties")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(existing) = properties.as_object_mut() {
                    existing.extend(fields);
                }
            }
            (_, value) => {
                current.insert(key, value);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn ping(&self) -> IndexResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check_available()
    }

    async fn resolve(&self, name: &str) -> IndexResult<Resolution> {
        self.check_available()?;
        let state = self.state.read();
        if let Some(targets) = state.aliases.get(name) {
            return Ok(Resolution::Alias(targets.clone()));
        }
        if state.indexes.contains_key(name) {
            Ok(Resolution::Index(name.to_string()))
        } else {
            Ok(Resolution::Missing)
        }
    }

    async fn create_index(&self, name: &str) -> IndexResult<CreateOutcome> {
        self.check_available()?;
        let mut state = self.state.write();
        if state.aliases.contains_key(name) {
            return Err(IndexError::Rejected {
                status: 400,
                message: format!("{name} is already an alias"),
            });
        }
        if state.indexes.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.indexes.insert(name.to_string(), IndexData::new());
        Ok(CreateOutcome::Created)
    }

    async fn get_document(&self, index: &str, id: &str) -> IndexResult<Option<Value>> {
        self.with_index(index, |data| data.live.get(id).cloned())
    }

    async fn index_document(&self, index: &str, id: &str, body: Value) -> IndexResult<()> {
        if !body.is_object() {
            return Err(IndexError::InvalidBody("document must be an object".into()));
        }
        self.with_index_mut(index, |data| {
            data.live.insert(id.to_string(), body);
            Ok(())
        })
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> IndexResult<BulkOutcome> {
        if let Some(status) = self.fail_next_bulk.write().take() {
            return Err(IndexError::Bulk {
                status,
                message: "injected bulk failure".into(),
            });
        }
        self.with_index_mut(index, |data| {
            let mut outcome = BulkOutcome::default();
            for id in ids {
                if data.live.remove(id).is_some() {
                    outcome.deleted += 1;
                } else {
                    outcome.not_found += 1;
                }
            }
            Ok(outcome)
        })
    }

    async fn get_mapping(&self, index: &str) -> IndexResult<Value> {
        self.with_index(index, |data| data.mapping.clone())
    }

    async fn put_mapping(&self, index: &str, mapping: Value) -> IndexResult<()> {
        self.with_index_mut(index, |data| merge_mapping(&mut data.mapping, mapping))
    }

    async fn refresh(&self, index: &str) -> IndexResult<()> {
        self.with_index_mut(index, |data| {
            data.searchable = data.live.clone();
            Ok(())
        })
    }

    async fn count(&self, index: &str) -> IndexResult<u64> {
        self.with_index(index, |data| data.searchable.len() as u64)
    }

    async fn scan(&self, index: &str) -> IndexResult<Vec<Document>> {
        self.with_index(index, |data| {
            data.searchable
                .iter()
                .map(|(id, source)| Document {
                    id: id.clone(),
                    source: source.clone(),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn index_with(name: &str) -> MemoryIndex {
        let index = MemoryIndex::new();
        index.create_index(name).await.unwrap();
        index
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let index = MemoryIndex::new();
        assert_eq!(
            index.create_index("products").await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            index.create_index("products").await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn resolve_distinguishes_alias() {
        let index = index_with("products_v1").await;
        index.add_alias("products", "products_v1");

        assert_eq!(
            index.resolve("products_v1").await.unwrap(),
            Resolution::Index("products_v1".into())
        );
        assert_eq!(
            index.resolve("products").await.unwrap(),
            Resolution::Alias(vec!["products_v1".into()])
        );
        assert_eq!(index.resolve("other").await.unwrap(), Resolution::Missing);
        assert!(index.create_index("products").await.is_err());
    }

    #[tokio::test]
    async fn count_waits_for_refresh() {
        let index = index_with("products").await;
        index
            .index_document("products", "a", json!({"name": ["ball"]}))
            .await
            .unwrap();

        assert!(index.get_document("products", "a").await.unwrap().is_some());
        assert_eq!(index.count("products").await.unwrap(), 0);

        index.refresh("products").await.unwrap();
        assert_eq!(index.count("products").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn index_document_replaces_whole_body() {
        let index = index_with("products").await;
        index
            .index_document("products", "a", json!({"name": ["ball"], "price": [100]}))
            .await
            .unwrap();
        index
            .index_document("products", "a", json!({"name": ["bat"]}))
            .await
            .unwrap();

        let doc = index.get_document("products", "a").await.unwrap().unwrap();
        assert_eq!(doc, json!({"name": ["bat"]}));
    }

    #[tokio::test]
    async fn bulk_delete_counts_missing_ids() {
        let index = index_with("products").await;
        for id in ["a", "b", "c"] {
            index
                .index_document("products", id, json!({}))
                .await
                .unwrap();
        }

        let outcome = index
            .bulk_delete("products", &["a".into(), "b".into(), "zz".into()])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BulkOutcome {
                deleted: 2,
                not_found: 1
            }
        );

        index.refresh("products").await.unwrap();
        assert_eq!(index.count("products").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_bulk_failure_is_one_error() {
        let index = index_with("products").await;
        index.fail_next_bulk(500);

        let err = index
            .bulk_delete("products", &["a".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Bulk { status: 500, .. }));

        // Only the next request fails.
        assert!(index.bulk_delete("products", &["a".into()]).await.is_ok());
    }

    #[tokio::test]
    async fn mapping_properties_merge() {
        let index = index_with("products").await;
        index
            .put_mapping("products", json!({"properties": {"created": {"type": "date"}}}))
            .await
            .unwrap();
        index
            .put_mapping(
                "products",
                json!({"properties": {"name": {"type": "keyword"}}, "_meta": {"v": 1}}),
            )
            .await
            .unwrap();

        let mapping = index.get_mapping("products").await.unwrap();
        assert_eq!(mapping["properties"]["created"]["type"], "date");
        assert_eq!(mapping["properties"]["name"]["type"], "keyword");
        assert_eq!(mapping["_meta"]["v"], 1);
    }

    #[tokio::test]
    async fn offline_index_is_unreachable() {
        let index = index_with("products").await;
        index.set_available(false);

        assert!(index.ping().await.unwrap_err().is_connectivity());
        assert!(index.get_document("products", "a").await.is_err());
        assert_eq!(index.ping_count(), 1);
    }

    #[tokio::test]
    async fn missing_index_is_reported() {
        let index = MemoryIndex::new();
        let err = index.count("nope").await.unwrap_err();
        assert!(matches!(err, IndexError::IndexNotFound(name) if name == "nope"));
    }
}
