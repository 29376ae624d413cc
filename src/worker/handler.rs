//! Business handlers invoked by the consumer pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::broker::CommandEnvelope;

/// Handler failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("no handler registered for pattern '{0}'")]
    NoHandler(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Retrying cannot fix a missing handler or an undecodable payload.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Failed(_))
    }
}

/// Processes one command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, envelope: &CommandEnvelope) -> Result<Value, HandlerError>;
}

/// Routes commands to handlers by pattern.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, pattern: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(pattern.into(), handler);
        self
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl CommandHandler for HandlerRegistry {
    async fn handle(&self, envelope: &CommandEnvelope) -> Result<Value, HandlerError> {
        let handler = self
            .handlers
            .get(envelope.pattern())
            .ok_or_else(|| HandlerError::NoHandler(envelope.pattern().to_string()))?;
        handler.handle(envelope).await
    }
}
