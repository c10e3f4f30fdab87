//! Broker port - 永続タスクキュー（RabbitMQ または InMemory）
//!
//! Publishing and consuming are split the way the broker splits channels:
//! one shared publishing channel owned by [`Broker`], and a separate
//! [`Consumer`] channel for the worker set.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::MessageId;

/// Exchange carrying notification tasks.
pub const EMAIL_EXCHANGE: &str = "email_exchange";

/// Durable queue the mailer workers consume.
pub const EMAIL_QUEUE: &str = "email_queue";

/// Routing key binding [`EMAIL_QUEUE`] to [`EMAIL_EXCHANGE`].
pub const EMAIL_ROUTING_KEY: &str = "send_email";

/// Failure talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("broker channel not established")]
    NotConnected,

    #[error("channel closed")]
    ChannelClosed,

    #[error("unknown exchange or routing key: {0}")]
    Unroutable(String),

    #[error("broker error: {0}")]
    Broker(String),
}

/// Exchange + queue + binding. Declaring it is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Topology {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    /// The notification pipeline's fixed topology.
    pub fn email() -> Self {
        Self::new(EMAIL_EXCHANGE, EMAIL_QUEUE, EMAIL_ROUTING_KEY)
    }
}

/// A message ready to be handed to the broker.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub message_id: MessageId,
    pub exchange: String,
    pub routing_key: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Survives a broker restart.
    pub persistent: bool,
    pub timestamp: DateTime<Utc>,
}

/// One delivery handed to a worker.
/// The worker owns it and must either `ack` or `nack` it.
///
/// Dropping a delivery without settling it leaves it unacknowledged; the broker
/// hands it out again once the consuming channel closes.
#[async_trait]
pub trait Delivery: Send {
    fn body(&self) -> &[u8];

    /// Whether the broker has handed this message out before.
    fn redelivered(&self) -> bool;

    /// How many times this message has been delivered, this one included.
    /// Brokers that only expose the `redelivered` flag report 1 or 2.
    fn delivery_count(&self) -> u32;

    /// Remove the message from the queue permanently.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Reject the message; with `requeue` it goes back to the queue.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), QueueError>;
}

/// Consuming side: a channel with a prefetch limit, shared by the worker set.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Wait for the next delivery. Returns `None` once the channel is closed.
    async fn next_delivery(&self) -> Option<Box<dyn Delivery>>;

    /// Close the channel. Unacknowledged deliveries go back to the queue.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Broker connection plus the shared publishing channel.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare(&self, topology: &Topology) -> Result<(), QueueError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), QueueError>;

    /// Open a consuming channel on `queue` with at most `prefetch`
    /// unacknowledged deliveries outstanding.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Arc<dyn Consumer>, QueueError>;

    /// Close the connection and every channel on it.
    async fn close(&self) -> Result<(), QueueError>;
}
