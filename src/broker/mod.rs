//! Message broker subsystem.
//!
//! # Data Flow
//! ```text
//! Async command route
//!     → producer.rs (request snapshot → CommandEnvelope)
//!     → BrokerChannel::publish(queue, OutboundMessage)
//!     → 202 Accepted to the client
//!
//! Worker side:
//!     DeliverySource::next_delivery()
//!     → worker::consumer (handler, ack / reject / republish)
//!     → BrokerChannel::{ack, reject, publish}
//! ```
//!
//! # Design Decisions
//! - The transport sits behind traits; `memory.rs` is the in-process broker
//! - Retry bookkeeping travels in message headers (`x-retry-count`)
//! - Delivery tags are broker-assigned and only valid on the channel that issued them

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

pub mod envelope;
pub mod memory;
pub mod producer;

pub use envelope::{CommandEnvelope, CommandMetadata, PublishOptions};
pub use memory::{InMemoryBroker, InMemorySubscription};
pub use producer::{CommandProducer, DispatchAck, RequestSnapshot};

/// Retry counter read by the consumer (absent means 0).
pub const X_RETRY_COUNT: &str = "x-retry-count";
/// Queue the message was first published to.
pub const X_ORIGINAL_ROUTING_KEY: &str = "x-original-routing-key";
/// Handler error that sent the message to the dead-letter queue.
pub const X_ERROR_MESSAGE: &str = "x-error-message";
/// RFC 3339 time the message was dead-lettered.
pub const X_ERROR_TIME: &str = "x-error-time";

/// Message headers, AMQP field-table style.
pub type Headers = BTreeMap<String, Value>;

/// Broker errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error("queue '{0}' is full")]
    QueueFull(String),

    #[error("queue '{0}' is closed")]
    Closed(String),

    #[error("queue '{0}' already has a consumer")]
    ConsumerExists(String),

    #[error("broker operation timed out")]
    Timeout,

    #[error("message serialization failed: {0}")]
    Serialization(String),

    #[error("broker transport error: {0}")]
    Transport(String),
}

/// A message to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: Bytes,
    pub headers: Headers,
    pub persistent: bool,
    pub message_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: Headers::new(),
            persistent: false,
            message_id: None,
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    /// Queue the message was delivered from (its routing key).
    pub queue: String,
    pub message_id: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
    pub persistent: bool,
    pub redelivered: bool,
}

impl Delivery {
    /// Retry count carried in the headers; missing or malformed means 0.
    pub fn retry_count(&self) -> u32 {
        match self.headers.get(X_RETRY_COUNT) {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Message id for logging.
    pub fn message_id_or_unknown(&self) -> &str {
        self.message_id.as_deref().unwrap_or("unknown")
    }
}

/// Channel operations. Implementations must be safe to share between tasks.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish to a named queue through the default exchange.
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Positively acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Reject a delivery, optionally putting it back on its queue.
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// Connection-level operations.
#[async_trait]
pub trait Broker: BrokerChannel {
    /// Declare a queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    /// Start consuming a queue.
    async fn consume(&self, queue: &str, no_ack: bool)
        -> Result<Box<dyn DeliverySource>, BrokerError>;
}

/// Stream of deliveries for one consumer.
#[async_trait]
pub trait DeliverySource: Send {
    /// Next delivery, or `None` once the queue is closed.
    async fn next_delivery(&mut self) -> Option<Delivery>;
}
