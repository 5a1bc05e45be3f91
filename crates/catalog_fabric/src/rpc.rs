//! Request/reply over a messaging fabric.
//!
//! A [`RequestClient`] owns a private reply exchange. Every request carries
//! a fresh correlation id and the reply exchange name; a background
//! listener routes each reply to the waiting caller. Replies nobody waits
//! for any more (the caller timed out) are dropped.

use crate::error::{FabricError, FabricResult};
use crate::fabric::{Envelope, MessagingFabric};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>>;

/// Removes a request's pending entry when the request ends, however it ends.
struct PendingEntry<'a> {
    pending: &'a Pending,
    correlation_id: Uuid,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.correlation_id);
    }
}

/// Sends requests and awaits their correlated replies.
pub struct RequestClient {
    fabric: Arc<dyn MessagingFabric>,
    reply_exchange: String,
    pending: Pending,
    default_timeout: Duration,
    listener: JoinHandle<()>,
}

impl RequestClient {
    /// Subscribes a private reply exchange and starts routing replies.
    pub async fn connect(
        fabric: Arc<dyn MessagingFabric>,
        default_timeout: Duration,
    ) -> FabricResult<Self> {
        let reply_exchange = format!("reply.{}", Uuid::new_v4());
        let mut replies = fabric.subscribe_broadcast(&reply_exchange).await?;
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let routes = Arc::clone(&pending);
        let listener = tokio::spawn(async move {
            while let Some(mut delivery) = replies.next().await {
                delivery.ack();
                let envelope = delivery.envelope().clone();
                let waiter = routes.lock().remove(&envelope.correlation_id);
                match waiter {
                    Some(waiter) => {
                        // The caller may have given up in the meantime.
                        let _ = waiter.send(envelope);
                    }
                    None => debug!(
                        correlation_id = %envelope.correlation_id,
                        "dropping reply without a waiting request"
                    ),
                }
            }
        });

        Ok(Self {
            fabric,
            reply_exchange,
            pending,
            default_timeout,
            listener,
        })
    }

    /// The exchange replies are expected on.
    pub fn reply_exchange(&self) -> &str {
        &self.reply_exchange
    }

    /// The timeout used by [`RequestClient::request`].
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a request and waits for its reply within the default timeout.
    pub async fn request(&self, exchange: &str, payload: Vec<u8>) -> FabricResult<Vec<u8>> {
        self.request_with_timeout(exchange, payload, self.default_timeout)
            .await
    }

    /// Sends a request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Timeout`] if no reply arrives within `timeout`.
    pub async fn request_with_timeout(
        &self,
        exchange: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> FabricResult<Vec<u8>> {
        let correlation_id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(correlation_id, sender);
        let _entry = PendingEntry {
            pending: &self.pending,
            correlation_id,
        };

        let envelope = Envelope::request(correlation_id, self.reply_exchange.clone(), payload);
        self.fabric.publish(exchange, envelope).await?;
        trace!(exchange, %correlation_id, "request published");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => Ok(reply.payload),
            Ok(Err(_)) => Err(FabricError::Closed),
            Err(_) => Err(FabricError::Timeout {
                exchange: exchange.to_string(),
                timeout,
            }),
        }
    }
}

impl Drop for RequestClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("reply_exchange", &self.reply_exchange)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Publishes `payload` as the reply to `request`.
///
/// # Errors
///
/// Returns [`FabricError::NoReplyAddress`] if the request carried no reply
/// exchange.
pub async fn reply(
    fabric: &dyn MessagingFabric,
    request: &Envelope,
    payload: Vec<u8>,
) -> FabricResult<()> {
    let reply_to = request
        .reply_to
        .as_deref()
        .ok_or_else(|| FabricError::NoReplyAddress(request.correlation_id.to_string()))?;
    fabric
        .publish(reply_to, Envelope::reply(request.correlation_id, payload))
        .await
}
