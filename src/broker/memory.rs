//! In-process broker.
//!
//! # Responsibilities
//! - Named queues on bounded tokio channels, declared explicitly or on first publish
//! - Track unacknowledged deliveries until they are acked or rejected
//! - Requeue rejected deliveries when asked to
//!
//! # Design Decisions
//! - One consumer per queue; a second `consume` fails with `ConsumerExists`
//! - Publishing never blocks: a full queue is an error, not back-pressure
//! - Operation counters and fault switches are exposed for tests

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use crate::broker::{Broker, BrokerChannel, BrokerError, Delivery, DeliverySource, OutboundMessage};

/// Default per-queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct QueueState {
    tx: mpsc::Sender<Delivery>,
    rx: Mutex<Option<mpsc::Receiver<Delivery>>>,
    durable: bool,
}

struct Inner {
    queues: DashMap<String, QueueState>,
    unacked: DashMap<u64, Delivery>,
    next_tag: AtomicU64,
    capacity: usize,
    published: AtomicUsize,
    acks: AtomicUsize,
    rejects: AtomicUsize,
    failing_acks: AtomicUsize,
    failing_queues: DashSet<String>,
}

/// Broker living in the gateway process.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: DashMap::new(),
                unacked: DashMap::new(),
                next_tag: AtomicU64::new(1),
                capacity: capacity.max(1),
                published: AtomicUsize::new(0),
                acks: AtomicUsize::new(0),
                rejects: AtomicUsize::new(0),
                failing_acks: AtomicUsize::new(0),
                failing_queues: DashSet::new(),
            }),
        }
    }

    /// Total successful publishes.
    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Total successful acks.
    pub fn ack_count(&self) -> usize {
        self.inner.acks.load(Ordering::SeqCst)
    }

    /// Total successful rejects.
    pub fn reject_count(&self) -> usize {
        self.inner.rejects.load(Ordering::SeqCst)
    }

    /// Deliveries handed out but not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.inner.unacked.len()
    }

    /// Messages waiting in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.tx.max_capacity() - q.tx.capacity())
            .unwrap_or(0)
    }

    pub fn is_durable(&self, queue: &str) -> Option<bool> {
        self.inner.queues.get(queue).map(|q| q.durable)
    }

    /// Fail the next `count` ack calls with a transport error.
    pub fn fail_next_acks(&self, count: usize) {
        self.inner.failing_acks.store(count, Ordering::SeqCst);
    }

    /// Fail every publish to `queue` until cleared.
    pub fn fail_publishes_to(&self, queue: &str) {
        self.inner.failing_queues.insert(queue.to_string());
    }

    pub fn clear_publish_failures(&self) {
        self.inner.failing_queues.clear();
    }

    fn ensure_queue(&self, queue: &str, durable: bool) {
        if self.inner.queues.contains_key(queue) {
            return;
        }
        self.inner.queues.entry(queue.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.inner.capacity);
            tracing::debug!(queue = %queue, durable, "Queue declared");
            QueueState {
                tx,
                rx: Mutex::new(Some(rx)),
                durable,
            }
        });
    }

    fn enqueue(&self, delivery: Delivery) -> Result<(), BrokerError> {
        let queue = delivery.queue.clone();
        let tx = self
            .inner
            .queues
            .get(&queue)
            .map(|q| q.tx.clone())
            .ok_or_else(|| BrokerError::Closed(queue.clone()))?;

        tx.try_send(delivery).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull(queue),
            mpsc::error::TrySendError::Closed(_) => BrokerError::Closed(queue),
        })
    }

    fn take_unacked(&self, delivery_tag: u64) -> Result<Delivery, BrokerError> {
        self.inner
            .unacked
            .remove(&delivery_tag)
            .map(|(_, delivery)| delivery)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBroker {
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), BrokerError> {
        if self.inner.failing_queues.contains(queue) {
            return Err(BrokerError::Transport(format!("publish to '{queue}' refused")));
        }

        self.ensure_queue(queue, message.persistent);
        let delivery = Delivery {
            delivery_tag: self.inner.next_tag.fetch_add(1, Ordering::SeqCst),
            queue: queue.to_string(),
            message_id: message.message_id,
            headers: message.headers,
            body: message.body,
            persistent: message.persistent,
            redelivered: false,
        };

        self.enqueue(delivery)?;
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let failing = self
            .inner
            .failing_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Transport("channel ack failed".to_string()));
        }

        self.take_unacked(delivery_tag)?;
        self.inner.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut delivery = self.take_unacked(delivery_tag)?;
        self.inner.rejects.fetch_add(1, Ordering::SeqCst);

        if requeue {
            delivery.redelivered = true;
            delivery.delivery_tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst);
            self.enqueue(delivery)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.ensure_queue(queue, durable);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        no_ack: bool,
    ) -> Result<Box<dyn DeliverySource>, BrokerError> {
        Ok(Box::new(self.subscribe(queue, no_ack)?))
    }
}

impl InMemoryBroker {
    /// Concrete form of [`Broker::consume`].
    pub fn subscribe(&self, queue: &str, no_ack: bool) -> Result<InMemorySubscription, BrokerError> {
        self.ensure_queue(queue, true);
        let state = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::Closed(queue.to_string()))?;

        let rx = state
            .rx
            .lock()
            .map_err(|_| BrokerError::Transport("queue lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| BrokerError::ConsumerExists(queue.to_string()))?;

        Ok(InMemorySubscription {
            rx,
            inner: self.inner.clone(),
            no_ack,
        })
    }
}

/// Consumer side of one queue.
pub struct InMemorySubscription {
    rx: mpsc::Receiver<Delivery>,
    inner: Arc<Inner>,
    no_ack: bool,
}

#[async_trait]
impl DeliverySource for InMemorySubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        let delivery = self.rx.recv().await?;
        if !self.no_ack {
            self.inner
                .unacked
                .insert(delivery.delivery_tag, delivery.clone());
        }
        Some(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &'static str) -> OutboundMessage {
        OutboundMessage::new(body.as_bytes())
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("jobs", true).await.unwrap();
        broker.publish("jobs", message("a")).await.unwrap();
        assert_eq!(broker.queue_depth("jobs"), 1);

        let mut sub = broker.subscribe("jobs", false).unwrap();
        let delivery = sub.next_delivery().await.unwrap();
        assert_eq!(&delivery.body[..], b"a");
        assert_eq!(broker.unacked_count(), 1);

        broker.ack(delivery.delivery_tag).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.ack_count(), 1);

        assert_eq!(
            broker.ack(delivery.delivery_tag).await,
            Err(BrokerError::UnknownDeliveryTag(delivery.delivery_tag))
        );
    }

    #[tokio::test]
    async fn test_reject_with_requeue() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", message("a")).await.unwrap();
        let mut sub = broker.subscribe("jobs", false).unwrap();

        let first = sub.next_delivery().await.unwrap();
        broker.reject(first.delivery_tag, true).await.unwrap();

        let second = sub.next_delivery().await.unwrap();
        assert!(second.redelivered);
        assert_ne!(second.delivery_tag, first.delivery_tag);

        broker.reject(second.delivery_tag, false).await.unwrap();
        assert_eq!(broker.reject_count(), 2);
        assert_eq!(broker.queue_depth("jobs"), 0);
    }

    #[tokio::test]
    async fn test_no_ack_mode_tracks_nothing() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", message("a")).await.unwrap();
        let mut sub = broker.subscribe("jobs", true).unwrap();
        sub.next_delivery().await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_single_consumer_per_queue() {
        let broker = InMemoryBroker::new();
        let _first = broker.subscribe("jobs", false).unwrap();
        assert!(matches!(
            broker.subscribe("jobs", false),
            Err(BrokerError::ConsumerExists(_))
        ));
    }

    #[tokio::test]
    async fn test_full_queue() {
        let broker = InMemoryBroker::with_capacity(1);
        broker.publish("jobs", message("a")).await.unwrap();
        assert_eq!(
            broker.publish("jobs", message("b")).await,
            Err(BrokerError::QueueFull("jobs".into()))
        );
        assert_eq!(broker.published_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_switches() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes_to("jobs.dlq");
        assert!(matches!(
            broker.publish("jobs.dlq", message("a")).await,
            Err(BrokerError::Transport(_))
        ));
        broker.clear_publish_failures();
        broker.publish("jobs.dlq", message("a")).await.unwrap();

        broker.publish("jobs", message("b")).await.unwrap();
        let mut sub = broker.subscribe("jobs", false).unwrap();
        let delivery = sub.next_delivery().await.unwrap();

        broker.fail_next_acks(1);
        assert!(broker.ack(delivery.delivery_tag).await.is_err());
        broker.ack(delivery.delivery_tag).await.unwrap();
        assert_eq!(broker.ack_count(), 1);
    }
}
