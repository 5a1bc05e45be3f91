//! Messaging fabric capability contract.

use crate::error::FabricResult;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A message as carried by the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlates a reply with its request.
    pub correlation_id: Uuid,
    /// Exchange the receiver should reply on, if any.
    pub reply_to: Option<String>,
    /// Encoded message body.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates a fire-and-forget message with a fresh correlation id.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            reply_to: None,
            payload,
        }
    }

    /// Creates a request expecting a reply on `reply_to`.
    pub fn request(correlation_id: Uuid, reply_to: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            correlation_id,
            reply_to: Some(reply_to.into()),
            payload,
        }
    }

    /// Creates the reply to the request with `correlation_id`.
    pub fn reply(correlation_id: Uuid, payload: Vec<u8>) -> Self {
        Self {
            correlation_id,
            reply_to: None,
            payload,
        }
    }
}

/// Acknowledgement handle of a delivery.
pub trait Acker: Send {
    /// Marks the delivery as handled.
    fn ack(self: Box<Self>);

    /// Hands the message back to the fabric for redelivery.
    fn requeue(self: Box<Self>, envelope: Envelope);
}

/// One received message.
///
/// A delivery from an exclusive queue must be acknowledged with
/// [`Delivery::ack`]; dropping it unacknowledged requeues the message.
/// Broadcast deliveries carry no acknowledgement handle.
pub struct Delivery {
    envelope: Envelope,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    /// Creates a delivery that must be acknowledged.
    pub fn new(envelope: Envelope, acker: Box<dyn Acker>) -> Self {
        Self {
            envelope,
            acker: Some(acker),
        }
    }

    /// Creates a delivery without acknowledgement.
    pub fn unacked(envelope: Envelope) -> Self {
        Self {
            envelope,
            acker: None,
        }
    }

    /// The received message.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Returns true until the delivery has been acknowledged.
    pub fn is_pending(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledges the delivery. Further calls are no-ops.
    pub fn ack(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.ack();
        }
    }

    /// Drops the acknowledgement handle without acking or requeueing.
    pub(crate) fn disarm(&mut self) {
        self.acker = None;
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.requeue(self.envelope.clone());
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("pending", &self.is_pending())
            .finish()
    }
}

type Release = Box<dyn FnOnce(mpsc::UnboundedReceiver<Delivery>) + Send>;

/// A stream of deliveries from one exchange.
pub struct Subscription {
    exchange: String,
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
    release: Option<Release>,
}

impl Subscription {
    /// Creates a subscription reading from `receiver`.
    pub fn new(exchange: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            exchange: exchange.into(),
            receiver: Some(receiver),
            release: None,
        }
    }

    /// Creates a subscription that hands its receiver to `release` when dropped.
    pub fn with_release(
        exchange: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
        release: impl FnOnce(mpsc::UnboundedReceiver<Delivery>) + Send + 'static,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            receiver: Some(receiver),
            release: Some(Box::new(release)),
        }
    }

    /// The exchange this subscription reads from.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Waits for the next delivery; `None` once the fabric side is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.as_mut()?.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let (Some(receiver), Some(release)) = (self.receiver.take(), self.release.take()) {
            release(receiver);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("exchange", &self.exchange)
            .finish()
    }
}

/// The capability contract the catalog needs from a messaging fabric.
///
/// # Invariants
///
/// - Delivery order on one exchange is publish order
/// - An exclusive queue has at most one consumer at a time
/// - A publish reaches the exclusive queue (if declared) and every
///   broadcast subscriber present at publish time
#[async_trait]
pub trait MessagingFabric: Send + Sync {
    /// Publishes a message on `exchange`.
    async fn publish(&self, exchange: &str, envelope: Envelope) -> FabricResult<()>;

    /// Attaches as the only consumer of the exchange's queue.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FabricError::ExclusiveConsumerBusy`] if another
    /// consumer is attached.
    async fn consume_exclusive(&self, exchange: &str) -> FabricResult<Subscription>;

    /// Receives a copy of every message published on `exchange` from now on.
    async fn subscribe_broadcast(&self, exchange: &str) -> FabricResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        acked: Mutex<u32>,
        requeued: Mutex<Vec<Envelope>>,
    }

    struct RecordingAcker(Arc<Recorder>);

    impl Acker for RecordingAcker {
        fn ack(self: Box<Self>) {
            *self.0.acked.lock() += 1;
        }

        fn requeue(self: Box<Self>, envelope: Envelope) {
            self.0.requeued.lock().push(envelope);
        }
    }

    #[test]
    fn ack_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let mut delivery = Delivery::new(
            Envelope::new(vec![1]),
            Box::new(RecordingAcker(Arc::clone(&recorder))),
        );

        assert!(delivery.is_pending());
        delivery.ack();
        delivery.ack();
        drop(delivery);

        assert_eq!(*recorder.acked.lock(), 1);
        assert!(recorder.requeued.lock().is_empty());
    }

    #[test]
    fn dropping_unacked_requeues() {
        let recorder = Arc::new(Recorder::default());
        let envelope = Envelope::new(vec![7]);
        drop(Delivery::new(
            envelope.clone(),
            Box::new(RecordingAcker(Arc::clone(&recorder))),
        ));

        assert_eq!(*recorder.acked.lock(), 0);
        assert_eq!(recorder.requeued.lock().as_slice(), &[envelope]);
    }

    #[test]
    fn reply_keeps_correlation() {
        let request = Envelope::request(Uuid::new_v4(), "reply.a", vec![]);
        let reply = Envelope::reply(request.correlation_id, vec![1]);
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert!(reply.reply_to.is_none());
    }
}
