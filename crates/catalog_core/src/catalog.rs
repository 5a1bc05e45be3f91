//! Catalog facade.
//!
//! Writes are turned into mutation messages and sent to the writer, which
//! may live in another process; the call returns once the writer replied.
//! Reads go straight to the local index.

use crate::error::{CoreError, CoreResult};
use crate::product::{created_from, Product, CREATED};
use crate::readiness::ReadinessGate;
use catalog_fabric::{MessagingFabric, RequestClient};
use catalog_index::SearchIndex;
use catalog_protocol::{DeleteParams, Mutation, MutationReply, WriteParams};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Entry point for reading and writing products.
pub struct Catalog {
    gate: Arc<ReadinessGate>,
    index: Arc<dyn SearchIndex>,
    client: RequestClient,
    exchange: String,
    index_name: String,
}

impl Catalog {
    /// Connects a facade to the fabric, using the gate's configuration.
    pub async fn connect(
        gate: Arc<ReadinessGate>,
        index: Arc<dyn SearchIndex>,
        fabric: Arc<dyn MessagingFabric>,
    ) -> CoreResult<Self> {
        let config = gate.config();
        let exchange = config.mutation_exchange.clone();
        let index_name = config.index_name.clone();
        let client = RequestClient::connect(fabric, config.reply_timeout).await?;
        Ok(Self {
            gate,
            index,
            client,
            exchange,
            index_name,
        })
    }

    /// How long writes wait for the writer.
    pub fn reply_timeout(&self) -> Duration {
        self.client.default_timeout()
    }

    /// Creates a product under a fresh id, stamped with the current time.
    pub async fn create(&self, attributes: Map<String, Value>) -> CoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.save(WriteParams::new(id, attributes).with_created(Utc::now()))
            .await?;
        Ok(id)
    }

    /// Overwrites the product at `id`, keeping its creation time.
    pub async fn write(&self, id: Uuid, attributes: Map<String, Value>) -> CoreResult<()> {
        self.save(WriteParams::new(id, attributes)).await
    }

    /// Sends a write.
    ///
    /// A missing creation time is resolved here, from the stored product or
    /// the current time, so every node applying the message stores the same
    /// value.
    pub async fn save(&self, mut params: WriteParams) -> CoreResult<()> {
        if params.created.is_none() {
            let stored = self.stored_created(params.id).await?;
            params.created = Some(stored.unwrap_or_else(Utc::now));
        }
        self.send(&Mutation::Write(params)).await
    }

    /// Deletes products in one bulk request.
    pub async fn delete(&self, ids: Vec<Uuid>) -> CoreResult<()> {
        self.send(&Mutation::Delete(DeleteParams { ids })).await
    }

    /// Reads one product; `None` if it does not exist.
    pub async fn get(&self, id: Uuid) -> CoreResult<Option<Product>> {
        self.gate.ensure_ready().await?;
        match self
            .index
            .get_document(&self.index_name, &id.to_string())
            .await?
        {
            Some(document) => Product::from_document(id, &document).map(Some),
            None => Ok(None),
        }
    }

    /// Number of searchable products.
    pub async fn count(&self) -> CoreResult<u64> {
        self.gate.ensure_ready().await?;
        Ok(self.index.count(&self.index_name).await?)
    }

    /// Makes every applied write visible to [`Catalog::count`].
    pub async fn refresh(&self) -> CoreResult<()> {
        self.gate.ensure_ready().await?;
        Ok(self.index.refresh(&self.index_name).await?)
    }

    async fn stored_created(&self, id: Uuid) -> CoreResult<Option<DateTime<Utc>>> {
        self.gate.ensure_ready().await?;
        let stored = self
            .index
            .get_document(&self.index_name, &id.to_string())
            .await?;
        Ok(stored.and_then(|doc| created_from(doc.get(CREATED))))
    }

    async fn send(&self, mutation: &Mutation) -> CoreResult<()> {
        let payload = mutation.encode()?;
        let bytes = self.client.request(&self.exchange, payload).await?;
        let reply = MutationReply::decode(&bytes)?;
        if reply.success {
            return Ok(());
        }
        Err(match reply.error {
            Some(error) => CoreError::Remote {
                kind: error.kind,
                message: error.message,
            },
            None => CoreError::Remote {
                kind: catalog_protocol::ErrorKind::Internal,
                message: format!("{} failed without details", mutation.action()),
            },
        })
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("exchange", &self.exchange)
            .field("index_name", &self.index_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::dispatcher::Dispatcher;
    use catalog_fabric::MemoryFabric;
    use catalog_index::MemoryIndex;
    use catalog_protocol::ErrorKind;
    use serde_json::json;

    fn attributes(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn catalog(with_writer: bool) -> (Catalog, Arc<MemoryIndex>) {
        let index = Arc::new(MemoryIndex::new());
        let fabric = Arc::new(MemoryFabric::new());
        let config = CatalogConfig::new("products").with_reply_timeout(Duration::from_millis(300));
        let gate = Arc::new(ReadinessGate::new(config, index.clone(), fabric.clone()));

        if with_writer {
            let dispatcher = Dispatcher::new(Arc::clone(&gate), index.clone(), fabric.clone());
            let subscription = fabric.consume_exclusive("catalog.mutations").await.unwrap();
            tokio::spawn(async move { dispatcher.run(subscription).await });
        }

        let catalog = Catalog::connect(gate, index.clone(), fabric).await.unwrap();
        (catalog, index)
    }

    #[tokio::test]
    async fn create_then_read() {
        let (catalog, _) = catalog(true).await;
        let id = catalog
            .create(attributes(json!({"name": "ball", "tags": ["red", null]})))
            .await
            .unwrap();

        let product = catalog.get(id).await.unwrap().unwrap();
        assert_eq!(product.attribute("name").unwrap(), &[json!("ball")]);
        assert_eq!(product.attribute("tags").unwrap(), &[json!("red")]);

        catalog.refresh().await.unwrap();
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_reports_remote_failure() {
        let (catalog, index) = catalog(true).await;
        let id = catalog.create(attributes(json!({"name": "x"}))).await.unwrap();

        index.fail_next_bulk(500);
        let err = catalog.delete(vec![id]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bulk);
        assert!(catalog.get(id).await.unwrap().is_some());

        catalog.delete(vec![id]).await.unwrap();
        assert!(catalog.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_writer_times_out() {
        let (catalog, _) = catalog(false).await;
        let err = catalog.write(Uuid::new_v4(), Map::new()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(catalog.reply_timeout(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn write_carries_resolved_creation_time() {
        let (catalog, index) = catalog(true).await;
        let id = catalog.create(attributes(json!({"name": "ball"}))).await.unwrap();
        let created = catalog.get(id).await.unwrap().unwrap().created;

        catalog
            .write(id, attributes(json!({"name": "bat"})))
            .await
            .unwrap();
        let product = catalog.get(id).await.unwrap().unwrap();
        assert_eq!(product.created, created);
        assert_eq!(product.attribute("name").unwrap(), &[json!("bat")]);

        // A new id gets its creation time from the facade, not the writer.
        let fresh = Uuid::new_v4();
        let before = Utc::now();
        catalog.write(fresh, Map::new()).await.unwrap();
        let stored = index.get_document("products", &fresh.to_string()).await.unwrap();
        let stamped = created_from(stored.as_ref().and_then(|d| d.get(CREATED))).unwrap();
        assert!(stamped >= before - chrono::Duration::milliseconds(1));
    }
}
