//! Command envelope: the unit crossing the broker boundary.
//!
//! Envelopes are immutable. A retry builds a new copy with a higher
//! `retryCount`; the `messageId` is carried over unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::broker::BrokerError;

/// Publish-time options of a command route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Ask the broker to persist the message.
    pub persistent: bool,
    /// Fixed message id; generated per publish when absent.
    pub message_id: Option<String>,
}

/// Envelope metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetadata {
    message_id: String,
    correlation_id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    retry_count: u32,
}

impl CommandMetadata {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// `{pattern, payload, metadata}` as serialized on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pattern: String,
    payload: Value,
    metadata: CommandMetadata,
}

impl CommandEnvelope {
    /// Build a fresh envelope with `retryCount = 0`.
    pub fn new(
        pattern: impl Into<String>,
        payload: Value,
        options: &PublishOptions,
        correlation_id: impl Into<String>,
    ) -> Self {
        let message_id = options
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            pattern: pattern.into(),
            payload,
            metadata: CommandMetadata {
                message_id,
                correlation_id: correlation_id.into(),
                timestamp: Utc::now(),
                retry_count: 0,
            },
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &CommandMetadata {
        &self.metadata
    }

    pub fn message_id(&self) -> &str {
        &self.metadata.message_id
    }

    pub fn retry_count(&self) -> u32 {
        self.metadata.retry_count
    }

    /// Copy of this envelope carrying a new retry count.
    pub fn with_retry_count(&self, retry_count: u32) -> Self {
        let mut copy = self.clone();
        copy.metadata.retry_count = retry_count;
        copy
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(bytes).map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}
