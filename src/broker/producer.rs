//! Asynchronous command producer.
//!
//! Turns an accepted request into a `CommandEnvelope`, publishes it and hands
//! back an acknowledgment immediately; the caller never waits for the command
//! to be processed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Identity;
use crate::broker::envelope::CommandEnvelope;
use crate::broker::{BrokerChannel, BrokerError, OutboundMessage, X_ORIGINAL_ROUTING_KEY};
use crate::observability::metrics;
use crate::routing::{CommandTarget, Params};

/// Request headers never copied into a command payload.
const EXCLUDED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "authorization",
    "cookie",
];

/// The part of an HTTP request that travels as the command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, Value>,
    pub body: Value,
    pub user: Option<Identity>,
    pub headers: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestSnapshot {
    pub fn capture(
        method: &Method,
        path: &str,
        query: Option<&str>,
        params: &Params,
        headers: &HeaderMap,
        body: &Bytes,
        user: Option<&Identity>,
    ) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            params: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            query: parse_query(query.unwrap_or_default()),
            body: parse_body(body),
            user: user.cloned(),
            headers: headers
                .iter()
                .filter(|(name, _)| !EXCLUDED_HEADERS.contains(&name.as_str()))
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

/// Repeated keys collect into an array.
fn parse_query(query: &str) -> BTreeMap<String, Value> {
    let mut out: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match out.remove(key.as_ref()) {
            None => {
                out.insert(key.into_owned(), value);
            }
            Some(Value::Array(mut items)) => {
                items.push(value);
                out.insert(key.into_owned(), Value::Array(items));
            }
            Some(existing) => {
                out.insert(key.into_owned(), Value::Array(vec![existing, value]));
            }
        }
    }
    out
}

/// JSON when it parses, otherwise the raw text; empty is null.
fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Returned to the HTTP caller with status 202.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAck {
    pub message: String,
    pub request_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Publishes commands to the work queue.
#[derive(Clone)]
pub struct CommandProducer {
    channel: Arc<dyn BrokerChannel>,
    queue: String,
    publish_timeout: Duration,
}

impl CommandProducer {
    pub fn new(channel: Arc<dyn BrokerChannel>, queue: impl Into<String>, publish_timeout: Duration) -> Self {
        Self {
            channel,
            queue: queue.into(),
            publish_timeout,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish `snapshot` as a `target` command.
    pub async fn publish(
        &self,
        target: &CommandTarget,
        snapshot: &RequestSnapshot,
        correlation_id: &str,
    ) -> Result<DispatchAck, BrokerError> {
        let payload =
            serde_json::to_value(snapshot).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let envelope = CommandEnvelope::new(&target.pattern, payload, &target.options, correlation_id);

        let mut message = OutboundMessage::new(envelope.to_bytes()?);
        message.persistent = target.options.persistent;
        message.message_id = Some(envelope.message_id().to_string());
        message
            .headers
            .insert(X_ORIGINAL_ROUTING_KEY.to_string(), Value::String(self.queue.clone()));

        let result = match tokio::time::timeout(self.publish_timeout, self.channel.publish(&self.queue, message)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout),
        };

        match &result {
            Ok(()) => {
                metrics::record_command_published(&target.pattern, "ok");
                tracing::debug!(
                    pattern = %target.pattern,
                    queue = %self.queue,
                    message_id = %envelope.message_id(),
                    correlation_id = %correlation_id,
                    "Command published"
                );
            }
            Err(e) => {
                metrics::record_command_published(&target.pattern, "error");
                tracing::error!(
                    pattern = %target.pattern,
                    queue = %self.queue,
                    message_id = %envelope.message_id(),
                    correlation_id = %correlation_id,
                    error = %e,
                    "Command publish failed"
                );
            }
        }
        result?;

        Ok(DispatchAck {
            message: "Request accepted for processing".to_string(),
            request_id: correlation_id.to_string(),
            message_id: envelope.message_id().to_string(),
            timestamp: envelope.metadata().timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::envelope::PublishOptions;
    use crate::broker::{DeliverySource, InMemoryBroker};
    use axum::http::HeaderValue;
    use serde_json::json;

    fn snapshot(body: &'static str) -> RequestSnapshot {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let mut params = Params::new();
        params.insert("eventId".into(), "e-1".into());

        RequestSnapshot::capture(
            &Method::POST,
            "/event-requests/rewards",
            Some("a=1&tag=x&tag=y"),
            &params,
            &headers,
            &Bytes::from_static(body.as_bytes()),
            Some(&Identity::new("u-1", vec!["user".into()])),
        )
    }

    fn target(message_id: Option<&str>) -> CommandTarget {
        CommandTarget {
            pattern: "create_reward_request".into(),
            options: PublishOptions {
                persistent: true,
                message_id: message_id.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_snapshot() {
        let s = snapshot(r#"{"eventId":"e-1"}"#);
        assert_eq!(s.body, json!({"eventId": "e-1"}));
        assert_eq!(s.query["a"], json!("1"));
        assert_eq!(s.query["tag"], json!(["x", "y"]));
        assert_eq!(s.params["eventId"], "e-1");
        assert!(!s.headers.contains_key("authorization"));
        assert_eq!(s.headers["content-type"], "application/json");

        assert_eq!(snapshot("plain").body, json!("plain"));
        assert_eq!(snapshot("").body, Value::Null);
    }

    #[tokio::test]
    async fn test_publish_returns_ack_and_enqueues() {
        let broker = InMemoryBroker::new();
        let producer = CommandProducer::new(Arc::new(broker.clone()), "jobs", Duration::from_secs(1));

        let ack = producer
            .publish(&target(None), &snapshot("{}"), "corr-1")
            .await
            .unwrap();
        assert_eq!(ack.request_id, "corr-1");

        let mut sub = broker.subscribe("jobs", false).unwrap();
        let delivery = sub.next_delivery().await.unwrap();
        assert!(delivery.persistent);
        assert_eq!(delivery.message_id.as_deref(), Some(ack.message_id.as_str()));

        let envelope = CommandEnvelope::from_bytes(&delivery.body).unwrap();
        assert_eq!(envelope.pattern(), "create_reward_request");
        assert_eq!(envelope.message_id(), ack.message_id);
        assert_eq!(envelope.payload()["user"]["userId"], "u-1");
    }

    #[tokio::test]
    async fn test_fixed_message_id() {
        let broker = InMemoryBroker::new();
        let producer = CommandProducer::new(Arc::new(broker), "jobs", Duration::from_secs(1));
        let ack = producer
            .publish(&target(Some("fixed")), &snapshot("{}"), "c")
            .await
            .unwrap();
        assert_eq!(ack.message_id, "fixed");
    }

    #[tokio::test]
    async fn test_publish_failure_is_surfaced() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes_to("jobs");
        let producer = CommandProducer::new(Arc::new(broker), "jobs", Duration::from_secs(1));

        let err = producer
            .publish(&target(None), &snapshot("{}"), "c")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }
}
