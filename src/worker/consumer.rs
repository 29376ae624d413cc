//! Command consumer pipeline.
//!
//! # Responsibilities
//! - Pull deliveries with at most `prefetch_count` in flight
//! - Run the handler and settle each delivery exactly once
//! - Retry failed commands by republishing with a linear backoff
//! - Dead-letter (or drop) commands that exhausted their retries
//!
//! # Design Decisions
//! - Channel operations (ack, reject, publish) are serialized; handlers run concurrently
//! - A retried delivery is rejected before its backoff sleep and releases its
//!   prefetch slot, so the sleep never blocks other deliveries
//! - The handler error is returned after the ack/retry decision so callers can log it

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::broker::{
    BrokerChannel, BrokerError, CommandEnvelope, Delivery, DeliverySource, OutboundMessage,
    X_ERROR_MESSAGE, X_ERROR_TIME, X_ORIGINAL_ROUTING_KEY, X_RETRY_COUNT,
};
use crate::config::schema::ConsumerConfig;
use crate::observability::metrics;
use crate::resilience::backoff::linear_backoff;
use crate::resilience::retries::retry_with_fixed_delay;
use crate::worker::handler::{CommandHandler, HandlerError};

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: String,
    pub no_ack: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub ack_attempts: u32,
    /// `None` disables dead-lettering: exhausted messages are acked and dropped.
    pub dead_letter_queue: Option<String>,
    pub prefetch_count: usize,
}

impl ConsumerSettings {
    pub fn new(queue: impl Into<String>) -> Self {
        Self::from_config(queue, &ConsumerConfig::default())
    }

    pub fn from_config(queue: impl Into<String>, config: &ConsumerConfig) -> Self {
        let queue = queue.into();
        Self {
            dead_letter_queue: config
                .dead_letter_enabled
                .then(|| dead_letter_queue_name(&queue)),
            queue,
            no_ack: config.no_ack,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            ack_attempts: config.ack_attempts,
            prefetch_count: config.prefetch_count,
        }
    }
}

/// `<queue>.dlq`
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}.dlq")
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Retried { retry_count: u32 },
    DeadLettered,
    /// Retries exhausted and no dead-letter queue took the message.
    Dropped,
    /// No-ack mode: nothing to settle.
    Unacknowledged,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Retried { .. } => "retried",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::Dropped => "dropped",
            Outcome::Unacknowledged => "unacknowledged",
        }
    }
}

/// Consumer errors.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The handler failed; `outcome` says what happened to the delivery.
    #[error("handler failed for message {message_id} ({}): {source}", outcome.as_str())]
    Handler {
        message_id: String,
        outcome: Outcome,
        #[source]
        source: HandlerError,
    },

    /// Settling the delivery failed.
    #[error("broker operation failed for message {message_id}: {source}")]
    Broker {
        message_id: String,
        #[source]
        source: BrokerError,
    },
}

/// Channel wrapper that never lets two operations overlap.
struct SerializedChannel {
    inner: Arc<dyn BrokerChannel>,
    lock: Mutex<()>,
}

impl SerializedChannel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let _guard = self.lock.lock().await;
        self.inner.ack(delivery_tag).await
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let _guard = self.lock.lock().await;
        self.inner.reject(delivery_tag, requeue).await
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), BrokerError> {
        let _guard = self.lock.lock().await;
        self.inner.publish(queue, message).await
    }
}

/// Consumes command deliveries and settles them.
pub struct CommandConsumer {
    channel: SerializedChannel,
    handler: Arc<dyn CommandHandler>,
    settings: ConsumerSettings,
}

impl CommandConsumer {
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        handler: Arc<dyn CommandHandler>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            channel: SerializedChannel {
                inner: channel,
                lock: Mutex::new(()),
            },
            handler,
            settings,
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Process one delivery to completion, including any backoff sleep.
    pub async fn process(&self, delivery: Delivery) -> Result<Outcome, ConsumerError> {
        self.process_inner(delivery, None).await
    }

    async fn process_inner(
        &self,
        delivery: Delivery,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<Outcome, ConsumerError> {
        let start = Instant::now();
        let message_id = delivery.message_id_or_unknown().to_string();
        let retry_count = delivery.retry_count();

        let envelope = CommandEnvelope::from_bytes(&delivery.body)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()));
        let pattern = envelope
            .as_ref()
            .map(|e| e.pattern().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::debug!(
            message_id = %message_id,
            pattern = %pattern,
            queue = %delivery.queue,
            retry_count,
            "Message received"
        );

        let result = match &envelope {
            Ok(envelope) => self.handler.handle(envelope).await,
            Err(e) => Err(e.clone()),
        };
        let processing_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                tracing::debug!(
                    message_id = %message_id,
                    pattern = %pattern,
                    processing_ms,
                    result = %value,
                    "Message processed"
                );

                let outcome = if self.settings.no_ack {
                    Outcome::Unacknowledged
                } else {
                    self.ack(&delivery, &message_id).await?;
                    Outcome::Acked
                };
                metrics::record_command_outcome(&pattern, outcome.as_str());
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!(
                    message_id = %message_id,
                    pattern = %pattern,
                    processing_ms,
                    retry_count,
                    error = %error,
                    "Message processing failed"
                );

                let outcome = if self.settings.no_ack {
                    Outcome::Unacknowledged
                } else if error.is_retryable() && retry_count < self.settings.max_retries {
                    let envelope = envelope.ok();
                    self.retry(&delivery, envelope.as_ref(), retry_count + 1, permit, &message_id)
                        .await?
                } else {
                    self.exhaust(&delivery, &error, &message_id).await?
                };
                metrics::record_command_outcome(&pattern, outcome.as_str());

                Err(ConsumerError::Handler {
                    message_id,
                    outcome,
                    source: error,
                })
            }
        }
    }

    async fn ack(&self, delivery: &Delivery, message_id: &str) -> Result<(), ConsumerError> {
        let channel = &self.channel;
        let tag = delivery.delivery_tag;
        retry_with_fixed_delay(self.settings.ack_attempts, self.settings.retry_delay, move || async move {
            channel.ack(tag).await
        })
        .await
        .map_err(|source| {
            tracing::error!(message_id = %message_id, error = %source, "Ack failed after retries");
            ConsumerError::Broker {
                message_id: message_id.to_string(),
                source,
            }
        })?;

        tracing::debug!(message_id = %message_id, "Message acked");
        Ok(())
    }

    /// Reject the delivery, wait, and republish a copy with `retry_count`.
    async fn retry(
        &self,
        delivery: &Delivery,
        envelope: Option<&CommandEnvelope>,
        retry_count: u32,
        permit: Option<OwnedSemaphorePermit>,
        message_id: &str,
    ) -> Result<Outcome, ConsumerError> {
        let broker_error = |source: BrokerError| ConsumerError::Broker {
            message_id: message_id.to_string(),
            source,
        };

        self.channel
            .reject(delivery.delivery_tag, false)
            .await
            .map_err(broker_error)?;
        drop(permit);

        let delay = linear_backoff(self.settings.retry_delay, retry_count);
        tokio::time::sleep(delay).await;

        let body = match envelope {
            Some(envelope) => envelope
                .with_retry_count(retry_count)
                .to_bytes()
                .map_err(broker_error)?
                .into(),
            None => delivery.body.clone(),
        };

        let mut headers = delivery.headers.clone();
        headers.insert(X_RETRY_COUNT.to_string(), Value::from(retry_count));
        headers.insert(
            X_ORIGINAL_ROUTING_KEY.to_string(),
            Value::String(delivery.queue.clone()),
        );

        let message = OutboundMessage {
            body,
            headers,
            persistent: delivery.persistent,
            message_id: delivery.message_id.clone(),
        };

        if let Err(source) = self.channel.publish(&delivery.queue, message).await {
            tracing::error!(
                message_id = %message_id,
                retry_count,
                error = %source,
                "Republish failed; message lost"
            );
            return Err(broker_error(source));
        }

        tracing::debug!(
            message_id = %message_id,
            retry_count,
            max_retries = self.settings.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Message requeued for retry"
        );
        Ok(Outcome::Retried { retry_count })
    }

    /// Terminal path: dead-letter if possible, then ack exactly once.
    async fn exhaust(
        &self,
        delivery: &Delivery,
        error: &HandlerError,
        message_id: &str,
    ) -> Result<Outcome, ConsumerError> {
        let mut outcome = Outcome::Dropped;

        if let Some(dlq) = &self.settings.dead_letter_queue {
            let mut headers = delivery.headers.clone();
            headers.insert(X_ERROR_MESSAGE.to_string(), Value::String(error.to_string()));
            headers.insert(X_ERROR_TIME.to_string(), Value::String(Utc::now().to_rfc3339()));
            headers.insert(
                X_ORIGINAL_ROUTING_KEY.to_string(),
                Value::String(delivery.queue.clone()),
            );

            let message = OutboundMessage {
                body: delivery.body.clone(),
                headers,
                persistent: true,
                message_id: delivery.message_id.clone(),
            };

            match self.channel.publish(dlq, message).await {
                Ok(()) => {
                    tracing::warn!(
                        message_id = %message_id,
                        dead_letter_queue = %dlq,
                        error = %error,
                        "Retries exhausted, message moved to dead-letter queue"
                    );
                    outcome = Outcome::DeadLettered;
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %message_id,
                        dead_letter_queue = %dlq,
                        error = %e,
                        "Dead-letter publish failed"
                    );
                }
            }
        }

        if outcome == Outcome::Dropped {
            tracing::error!(
                message_id = %message_id,
                queue = %delivery.queue,
                retry_count = delivery.retry_count(),
                max_retries = self.settings.max_retries,
                error = %error,
                "Retries exhausted, message acked and dropped"
            );
        }

        self.ack(delivery, message_id).await?;
        Ok(outcome)
    }

    /// Consume until the source closes or shutdown is signalled, then wait
    /// for in-flight messages.
    pub async fn run(
        self: Arc<Self>,
        mut source: Box<dyn DeliverySource>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let permits = Arc::new(Semaphore::new(self.settings.prefetch_count.max(1)));
        let mut tasks = JoinSet::new();

        tracing::info!(
            queue = %self.settings.queue,
            prefetch_count = self.settings.prefetch_count,
            no_ack = self.settings.no_ack,
            "Command consumer started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = shutdown.recv() => break,
                delivery = source.next_delivery() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let consumer = self.clone();
            tasks.spawn(async move {
                if let Err(e) = consumer.process_inner(delivery, Some(permit)).await {
                    tracing::debug!(error = %e, "Delivery finished with error");
                }
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Message task failed");
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Command consumer stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Message task failed");
            }
        }
        tracing::info!("Command consumer stopped");
    }
}
