//! Mutation dispatcher.
//!
//! The dispatcher is the only code that writes to the index. It drains one
//! subscription sequentially: each delivery waits for the readiness gate,
//! is acknowledged, applied, and answered with exactly one reply. Failures
//! travel on the reply, never through redelivery.
//!
//! A replica runs the same dispatcher on a broadcast subscription with
//! replies disabled, so it applies every write without answering callers.

use crate::error::{CoreError, CoreResult};
use crate::normalize::normalize;
use crate::product::{created_from, Product, CREATED};
use crate::readiness::ReadinessGate;
use catalog_fabric::{Delivery, Envelope, MessagingFabric, Subscription};
use catalog_index::SearchIndex;
use catalog_protocol::{DeleteParams, Mutation, MutationReply, WriteParams};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Deliveries received.
    pub received: u64,
    /// Writes applied.
    pub writes: u64,
    /// Deletes applied.
    pub deletes: u64,
    /// Mutations that failed.
    pub failures: u64,
    /// Replies published.
    pub replies: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
    replies: AtomicU64,
}

/// Applies mutation messages to the index.
pub struct Dispatcher {
    gate: Arc<ReadinessGate>,
    index: Arc<dyn SearchIndex>,
    fabric: Arc<dyn MessagingFabric>,
    index_name: String,
    replies: bool,
    counters: Counters,
}

impl Dispatcher {
    /// Creates a dispatcher; writers reply, replicas do not.
    pub fn new(
        gate: Arc<ReadinessGate>,
        index: Arc<dyn SearchIndex>,
        fabric: Arc<dyn MessagingFabric>,
    ) -> Self {
        let index_name = gate.config().index_name.clone();
        let replies = gate.config().mode.is_writer();
        Self {
            gate,
            index,
            fabric,
            index_name,
            replies,
            counters: Counters::default(),
        }
    }

    /// Enables or disables replies.
    #[must_use]
    pub fn with_replies(mut self, replies: bool) -> Self {
        self.replies = replies;
        self
    }

    /// Returns true if this dispatcher answers callers.
    pub fn replies(&self) -> bool {
        self.replies
    }

    /// Returns dispatcher statistics.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            received: self.counters.received.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            replies: self.counters.replies.load(Ordering::Relaxed),
        }
    }

    /// Handles deliveries one at a time until the subscription closes.
    pub async fn run(&self, mut subscription: Subscription) {
        info!(
            exchange = subscription.exchange(),
            replies = self.replies,
            "dispatcher started"
        );
        while let Some(delivery) = subscription.next().await {
            self.handle(delivery).await;
        }
        debug!(exchange = subscription.exchange(), "mutation subscription closed");
    }

    /// Handles one delivery: wait for readiness, ack, apply, reply.
    pub async fn handle(&self, mut delivery: Delivery) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let envelope = delivery.envelope().clone();
        let span = info_span!("mutation", correlation_id = %envelope.correlation_id);

        let ready = self.gate.ensure_ready().instrument(span.clone()).await;
        delivery.ack();

        let outcome = match ready {
            Ok(()) => self.apply(&envelope.payload).instrument(span.clone()).await,
            Err(e) => Err(CoreError::NotReady(e)),
        };

        let reply = match outcome {
            Ok(()) => MutationReply::success(),
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(parent: &span, error = %e, "mutation failed");
                MutationReply::failure(e.kind(), e.to_string())
            }
        };

        if self.replies {
            self.send_reply(&envelope, &reply).instrument(span).await;
        }
    }

    async fn apply(&self, payload: &[u8]) -> CoreResult<()> {
        match Mutation::decode(payload)? {
            Mutation::Write(params) => {
                self.write(params).await?;
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            Mutation::Delete(params) => {
                self.delete(params).await?;
                self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn write(&self, params: WriteParams) -> CoreResult<()> {
        let id = params.id.to_string();
        let attributes = params
            .attributes
            .as_ref()
            .map(normalize)
            .unwrap_or_default();
        let created = match params.created {
            Some(created) => created,
            None => self.stored_created(&id).await?.unwrap_or_else(Utc::now),
        };

        let product = Product::new(params.id, created).with_attributes(attributes);
        self.index
            .index_document(&self.index_name, &id, product.to_document())
            .await?;
        debug!(id = %id, attributes = product.attributes.len(), "product written");
        Ok(())
    }

    async fn stored_created(&self, id: &str) -> CoreResult<Option<DateTime<Utc>>> {
        let stored = self.index.get_document(&self.index_name, id).await?;
        Ok(stored.and_then(|doc| created_from(doc.get(CREATED))))
    }

    async fn delete(&self, params: DeleteParams) -> CoreResult<()> {
        if params.ids.is_empty() {
            debug!("delete without ids");
            return Ok(());
        }
        let ids: Vec<String> = params.ids.iter().map(ToString::to_string).collect();
        let outcome = self.index.bulk_delete(&self.index_name, &ids).await?;
        debug!(
            requested = ids.len(),
            deleted = outcome.deleted,
            not_found = outcome.not_found,
            "products deleted"
        );
        Ok(())
    }

    async fn send_reply(&self, request: &Envelope, reply: &MutationReply) {
        let payload = match reply.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "reply not encodable");
                return;
            }
        };
        match catalog_fabric::reply(self.fabric.as_ref(), request, payload).await {
            Ok(()) => {
                self.counters.replies.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "reply not sent"),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("index_name", &self.index_name)
            .field("replies", &self.replies)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use catalog_fabric::{MemoryFabric, RequestClient};
    use catalog_index::MemoryIndex;
    use catalog_protocol::{to_cbor, ErrorKind};
    use serde_json::{json, Map, Value};
    use std::time::Duration;
    use uuid::Uuid;

    const EXCHANGE: &str = "catalog.mutations";

    struct Harness {
        index: Arc<MemoryIndex>,
        dispatcher: Arc<Dispatcher>,
        client: RequestClient,
    }

    async fn harness() -> Harness {
        let index = Arc::new(MemoryIndex::new());
        let fabric = Arc::new(MemoryFabric::new());
        let gate = Arc::new(ReadinessGate::new(
            CatalogConfig::new("products"),
            index.clone(),
            fabric.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(gate, index.clone(), fabric.clone()));

        let subscription = fabric.consume_exclusive(EXCHANGE).await.unwrap();
        let running = Arc::clone(&dispatcher);
        tokio::spawn(async move { running.run(subscription).await });

        let client = RequestClient::connect(fabric, Duration::from_secs(5)).await.unwrap();
        Harness {
            index,
            dispatcher,
            client,
        }
    }

    impl Harness {
        async fn send(&self, payload: Vec<u8>) -> MutationReply {
            let bytes = self.client.request(EXCHANGE, payload).await.unwrap();
            MutationReply::decode(&bytes).unwrap()
        }

        async fn mutate(&self, mutation: Mutation) -> MutationReply {
            self.send(mutation.encode().unwrap()).await
        }

        async fn stored(&self, id: Uuid) -> Option<Value> {
            self.index
                .get_document("products", &id.to_string())
                .await
                .unwrap()
        }
    }

    fn attributes(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn write_stores_normalized_document() {
        let h = harness().await;
        let id = Uuid::new_v4();

        let reply = h
            .mutate(Mutation::Write(WriteParams::new(
                id,
                attributes(json!({"name": "ball", "price": 100, "note": ""})),
            )))
            .await;
        assert!(reply.success);

        let doc = h.stored(id).await.unwrap();
        assert_eq!(doc["name"], json!(["ball"]));
        assert_eq!(doc["price"], json!([100]));
        assert!(doc.get("note").is_none());
        assert_eq!(doc["created"].as_array().unwrap().len(), 1);
        assert_eq!(h.dispatcher.stats().writes, 1);
    }

    #[tokio::test]
    async fn rewrite_keeps_stored_created() {
        let h = harness().await;
        let id = Uuid::new_v4();

        let first = WriteParams::new(id, attributes(json!({"name": "ball"})));
        assert!(h.mutate(Mutation::Write(first)).await.success);
        let created = h.stored(id).await.unwrap()["created"].clone();

        let second = WriteParams::new(id, attributes(json!({"color": "red"})));
        assert!(h.mutate(Mutation::Write(second)).await.success);

        let doc = h.stored(id).await.unwrap();
        assert_eq!(doc["created"], created);
        assert!(doc.get("name").is_none());
        assert_eq!(doc["color"], json!(["red"]));
    }

    #[tokio::test]
    async fn explicit_created_is_stored() {
        let h = harness().await;
        let id = Uuid::new_v4();
        let created = DateTime::parse_from_rfc3339("2023-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);

        let params = WriteParams::new(id, Map::new()).with_created(created);
        assert!(h.mutate(Mutation::Write(params)).await.success);
        assert_eq!(
            h.stored(id).await.unwrap()["created"],
            json!(["2023-05-06T07:08:09.000Z"])
        );
    }

    #[tokio::test]
    async fn empty_delete_is_a_no_op() {
        let h = harness().await;
        let reply = h.mutate(Mutation::Delete(DeleteParams { ids: vec![] })).await;
        assert!(reply.success);
        assert_eq!(h.dispatcher.stats().deletes, 1);
    }

    #[tokio::test]
    async fn failed_bulk_is_one_aggregate_error() {
        let h = harness().await;
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        for id in &ids {
            let params = WriteParams::new(*id, attributes(json!({"name": "x"})));
            assert!(h.mutate(Mutation::Write(params)).await.success);
        }

        h.index.fail_next_bulk(503);
        let reply = h.mutate(Mutation::Delete(DeleteParams { ids: ids.clone() })).await;
        assert!(!reply.success);
        assert_eq!(reply.error.unwrap().kind, ErrorKind::Bulk);
        for id in &ids {
            assert!(h.stored(*id).await.is_some());
        }
    }

    #[tokio::test]
    async fn unknown_action_is_a_validation_reply() {
        let h = harness().await;
        let payload = to_cbor(&json!({"action": "upsert", "params": {}})).unwrap();

        let reply = h.send(payload).await;
        let error = reply.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert!(error.message.contains("upsert"));

        // The dispatcher keeps serving.
        let id = Uuid::new_v4();
        let params = WriteParams::new(id, attributes(json!({"name": "ok"})));
        assert!(h.mutate(Mutation::Write(params)).await.success);
        assert_eq!(h.dispatcher.stats().failures, 1);
    }

    #[tokio::test]
    async fn unready_node_replies_not_ready() {
        let h = harness().await;
        h.index.set_available(false);

        let params = WriteParams::new(Uuid::new_v4(), attributes(json!({"name": "x"})));
        let reply = h.mutate(Mutation::Write(params)).await;
        assert_eq!(reply.error.unwrap().kind, ErrorKind::NotReady);
    }

    #[tokio::test]
    async fn replies_can_be_disabled() {
        let index = Arc::new(MemoryIndex::new());
        let fabric = Arc::new(MemoryFabric::new());
        let gate = Arc::new(ReadinessGate::new(
            CatalogConfig::new("products"),
            index.clone(),
            fabric.clone(),
        ));
        let dispatcher = Dispatcher::new(gate, index.clone(), fabric).with_replies(false);
        assert!(!dispatcher.replies());

        let id = Uuid::new_v4();
        let params = WriteParams::new(id, attributes(json!({"name": "x"})));
        let envelope = Envelope::request(
            Uuid::new_v4(),
            "reply.nobody",
            Mutation::Write(params).encode().unwrap(),
        );
        dispatcher.handle(Delivery::unacked(envelope)).await;

        assert!(index
            .get_document("products", &id.to_string())
            .await
            .unwrap()
            .is_some());
        assert_eq!(dispatcher.stats().replies, 0);
    }
}
