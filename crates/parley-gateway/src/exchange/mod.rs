//! Topic-routed fanout between the send path and live connections.
//!
//! One exchange is declared at startup. Each live connection binds its own
//! private queue with binding key = owner id; a publish with routing key R
//! lands on every queue whose binding key matches R. Delivery is
//! at-most-once: the exchange keeps nothing for queues that do not exist.

mod memory;
mod redis_pubsub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::FanoutError;

pub use self::memory::MemoryExchange;
pub use self::redis_pubsub::RedisExchange;

pub const DEFAULT_EXCHANGE: &str = "parley.chat";
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Declare the shared exchange. Called once at process start, before any
    /// bind or publish.
    async fn declare(&self) -> Result<(), FanoutError>;

    /// Create a private, exclusive queue bound with `binding_key`. The queue
    /// lives exactly as long as the returned [`Subscription`].
    async fn bind(&self, binding_key: &str) -> Result<Subscription, FanoutError>;

    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<(), FanoutError>;
}

/// A bound private queue. Deliveries are acknowledged as soon as they are
/// handed out by [`Subscription::recv`]. Dropping the subscription unbinds
/// and deletes the queue.
pub struct Subscription {
    queue: String,
    binding_key: String,
    deliveries: mpsc::UnboundedReceiver<Bytes>,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        binding_key: impl Into<String>,
        deliveries: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            queue: queue.into(),
            binding_key: binding_key.into(),
            deliveries,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn binding_key(&self) -> &str {
        &self.binding_key
    }

    /// Next delivery, or `None` once the broker side of the queue is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.deliveries.recv().await
    }

    /// A delivery that is already waiting, if any.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.deliveries.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(queue = %self.queue, binding_key = %self.binding_key, "queue unbound");
    }
}

/// The exchange as used by the rest of the server: bind per connection,
/// publish per message under a fixed deadline.
#[derive(Clone)]
pub struct Fanout {
    exchange: Arc<dyn Exchange>,
    publish_timeout: Duration,
}

impl Fanout {
    pub fn new(exchange: Arc<dyn Exchange>, publish_timeout: Duration) -> Self {
        Self {
            exchange,
            publish_timeout,
        }
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    pub async fn declare(&self) -> Result<(), FanoutError> {
        self.exchange.declare().await
    }

    /// Bind a private queue for one live connection.
    pub async fn bind(&self, owner_id: &str) -> Result<Subscription, FanoutError> {
        self.exchange.bind(owner_id).await
    }

    /// Publish with the configured deadline. A publish that has not completed
    /// by then is abandoned.
    pub async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<(), FanoutError> {
        match tokio::time::timeout(self.publish_timeout, self.exchange.publish(routing_key, payload)).await {
            Ok(result) => result,
            Err(_) => Err(FanoutError::Timeout {
                routing_key: routing_key.to_string(),
                timeout: self.publish_timeout,
            }),
        }
    }
}
