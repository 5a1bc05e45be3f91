//! In-process messaging fabric.

use crate::error::{FabricError, FabricResult};
use crate::fabric::{Acker, Delivery, Envelope, MessagingFabric, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// A messaging fabric living inside one process.
///
/// Cloning yields another handle to the same fabric, so every node of an
/// in-process cluster can share it.
///
/// # Example
///
/// ```
/// # tokio_test_block(async {
/// use catalog_fabric::{Envelope, MemoryFabric, MessagingFabric};
///
/// let fabric = MemoryFabric::new();
/// let mut queue = fabric.consume_exclusive("jobs").await.unwrap();
/// fabric.publish("jobs", Envelope::new(b"hello".to_vec())).await.unwrap();
///
/// let mut delivery = queue.next().await.unwrap();
/// assert_eq!(delivery.envelope().payload, b"hello");
/// delivery.ack();
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFabric {
    exchanges: Arc<Mutex<HashMap<String, Exchange>>>,
}

#[derive(Debug, Default)]
struct Exchange {
    queue: Option<Queue>,
    subscribers: Vec<mpsc::UnboundedSender<Delivery>>,
}

impl Exchange {
    fn prune(&mut self) {
        self.subscribers.retain(|s| !s.is_closed());
    }

    fn is_unused(&self) -> bool {
        self.queue.is_none() && self.subscribers.is_empty()
    }
}

#[derive(Debug)]
struct Queue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

struct QueueAcker {
    queue: mpsc::UnboundedSender<Delivery>,
}

impl Acker for QueueAcker {
    fn ack(self: Box<Self>) {}

    fn requeue(self: Box<Self>, envelope: Envelope) {
        let acker = QueueAcker {
            queue: self.queue.clone(),
        };
        // A closed queue means the exchange is gone; the message goes with it.
        if let Err(mpsc::error::SendError(mut delivery)) =
            self.queue.send(Delivery::new(envelope, Box::new(acker)))
        {
            delivery.disarm();
        }
    }
}

impl MemoryFabric {
    /// Creates an empty fabric.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the exclusive queue of `exchange` so messages published
    /// before a consumer attaches are buffered.
    pub fn declare_queue(&self, exchange: &str) {
        let mut exchanges = self.exchanges.lock();
        let entry = exchanges.entry(exchange.to_string()).or_default();
        if entry.queue.is_none() {
            entry.queue = Some(Queue::new());
        }
    }

    /// Number of live broadcast subscribers on `exchange`.
    pub fn subscriber_count(&self, exchange: &str) -> usize {
        self.exchanges
            .lock()
            .get(exchange)
            .map(|e| e.subscribers.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Returns true while `exchange` has a queue or a subscriber.
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.exchanges.lock().contains_key(exchange)
    }
}

fn release_subscriber(exchanges: &Mutex<HashMap<String, Exchange>>, exchange: &str) {
    let mut exchanges = exchanges.lock();
    if let Some(entry) = exchanges.get_mut(exchange) {
        entry.prune();
        if entry.is_unused() {
            exchanges.remove(exchange);
            trace!(exchange, "exchange removed after its last subscriber left");
        }
    }
}

#[async_trait]
impl MessagingFabric for MemoryFabric {
    async fn publish(&self, exchange: &str, envelope: Envelope) -> FabricResult<()> {
        let mut exchanges = self.exchanges.lock();
        let Some(entry) = exchanges.get_mut(exchange) else {
            trace!(exchange, "publish on exchange without consumers dropped");
            return Ok(());
        };

        entry
            .subscribers
            .retain(|subscriber| subscriber.send(Delivery::unacked(envelope.clone())).is_ok());
        if entry.is_unused() {
            exchanges.remove(exchange);
            trace!(exchange, "publish on exchange without consumers dropped");
            return Ok(());
        }

        if let Some(queue) = &entry.queue {
            let acker = QueueAcker {
                queue: queue.sender.clone(),
            };
            queue
                .sender
                .send(Delivery::new(envelope, Box::new(acker)))
                .map_err(|_| FabricError::Closed)?;
        }
        Ok(())
    }

    async fn consume_exclusive(&self, exchange: &str) -> FabricResult<Subscription> {
        let receiver = {
            let mut exchanges = self.exchanges.lock();
            let entry = exchanges.entry(exchange.to_string()).or_default();
            let queue = entry.queue.get_or_insert_with(Queue::new);
            queue
                .receiver
                .take()
                .ok_or_else(|| FabricError::ExclusiveConsumerBusy(exchange.to_string()))?
        };

        let exchanges = Arc::clone(&self.exchanges);
        let name = exchange.to_string();
        Ok(Subscription::with_release(exchange, receiver, move |receiver| {
            if let Some(queue) = exchanges
                .lock()
                .get_mut(&name)
                .and_then(|e| e.queue.as_mut())
            {
                queue.receiver = Some(receiver);
            }
        }))
    }

    async fn subscribe_broadcast(&self, exchange: &str) -> FabricResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.exchanges
            .lock()
            .entry(exchange.to_string())
            .or_default()
            .subscribers
            .push(sender);

        let exchanges = Arc::downgrade(&self.exchanges);
        let name = exchange.to_string();
        Ok(Subscription::with_release(exchange, receiver, move |receiver| {
            // Closing the receiver first lets the prune see this subscriber gone.
            drop(receiver);
            if let Some(exchanges) = exchanges.upgrade() {
                release_subscriber(&exchanges, &name);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(byte: u8) -> Envelope {
        Envelope::new(vec![byte])
    }

    #[tokio::test]
    async fn second_exclusive_consumer_is_rejected() {
        let fabric = MemoryFabric::new();
        let first = fabric.consume_exclusive("mutations").await.unwrap();

        let err = fabric.consume_exclusive("mutations").await.unwrap_err();
        assert_eq!(err, FabricError::ExclusiveConsumerBusy("mutations".into()));

        // Releasing the queue lets the next consumer in.
        drop(first);
        assert!(fabric.consume_exclusive("mutations").await.is_ok());
    }

    #[tokio::test]
    async fn declared_queue_buffers_until_consumer() {
        let fabric = MemoryFabric::new();
        fabric.declare_queue("mutations");
        fabric.publish("mutations", message(1)).await.unwrap();
        fabric.publish("mutations", message(2)).await.unwrap();

        let mut queue = fabric.consume_exclusive("mutations").await.unwrap();
        let mut first = queue.next().await.unwrap();
        let mut second = queue.next().await.unwrap();
        assert_eq!(first.envelope().payload, vec![1]);
        assert_eq!(second.envelope().payload, vec![2]);
        first.ack();
        second.ack();
    }

    #[tokio::test]
    async fn undeclared_exchange_drops_messages() {
        let fabric = MemoryFabric::new();
        fabric.publish("nowhere", message(1)).await.unwrap();
        assert_eq!(fabric.subscriber_count("nowhere"), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_and_the_queue() {
        let fabric = MemoryFabric::new();
        let mut queue = fabric.consume_exclusive("mutations").await.unwrap();
        let mut a = fabric.subscribe_broadcast("mutations").await.unwrap();
        let mut b = fabric.subscribe_broadcast("mutations").await.unwrap();

        fabric.publish("mutations", message(9)).await.unwrap();

        assert_eq!(a.next().await.unwrap().envelope().payload, vec![9]);
        assert_eq!(b.next().await.unwrap().envelope().payload, vec![9]);
        let mut delivery = queue.next().await.unwrap();
        assert!(delivery.is_pending());
        delivery.ack();
    }

    #[tokio::test]
    async fn unacked_delivery_is_redelivered() {
        let fabric = MemoryFabric::new();
        let mut queue = fabric.consume_exclusive("mutations").await.unwrap();
        fabric.publish("mutations", message(5)).await.unwrap();

        let delivery = queue.next().await.unwrap();
        let correlation_id = delivery.envelope().correlation_id;
        drop(delivery);

        let mut again = queue.next().await.unwrap();
        assert_eq!(again.envelope().correlation_id, correlation_id);
        again.ack();
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let fabric = MemoryFabric::new();
        let sub = fabric.subscribe_broadcast("events").await.unwrap();
        assert_eq!(fabric.subscriber_count("events"), 1);

        drop(sub);
        fabric.publish("events", message(1)).await.unwrap();
        assert_eq!(fabric.subscriber_count("events"), 0);
    }

    #[tokio::test]
    async fn dropping_fabric_with_buffered_messages_is_clean() {
        let fabric = MemoryFabric::new();
        fabric.declare_queue("mutations");
        fabric.publish("mutations", message(1)).await.unwrap();
        fabric.publish("mutations", message(2)).await.unwrap();
        drop(fabric);
    }

    #[tokio::test]
    async fn unacked_delivery_outliving_its_fabric_is_dropped() {
        let fabric = MemoryFabric::new();
        let mut queue = fabric.consume_exclusive("mutations").await.unwrap();
        fabric.publish("mutations", message(3)).await.unwrap();
        fabric.publish("mutations", message(4)).await.unwrap();

        let delivery = queue.next().await.unwrap();
        drop(queue);
        drop(fabric);
        assert!(delivery.is_pending());
        drop(delivery);
    }

    #[tokio::test]
    async fn last_subscriber_leaving_removes_the_exchange() {
        let fabric = MemoryFabric::new();
        let a = fabric.subscribe_broadcast("reply.a").await.unwrap();
        let b = fabric.subscribe_broadcast("reply.a").await.unwrap();

        drop(a);
        assert!(fabric.has_exchange("reply.a"));
        assert_eq!(fabric.subscriber_count("reply.a"), 1);
        drop(b);
        assert!(!fabric.has_exchange("reply.a"));
    }

    #[tokio::test]
    async fn declared_queue_survives_subscriber_churn() {
        let fabric = MemoryFabric::new();
        fabric.declare_queue("mutations");
        drop(fabric.subscribe_broadcast("mutations").await.unwrap());
        assert!(fabric.has_exchange("mutations"));
    }
}
