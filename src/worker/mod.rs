//! Command worker subsystem.
//!
//! # Data Flow
//! ```text
//! Delivery (from broker queue)
//!     → consumer.rs (prefetch bound, decode envelope)
//!     → handler.rs (registry lookup by pattern)
//!     → validators.rs (reward eligibility)
//!     → consumer.rs settles:
//!         success           → ack
//!         retryable failure → reject, backoff, republish with x-retry-count
//!         exhausted         → dead-letter queue (or drop), then ack
//! ```
//!
//! # Design Decisions
//! - Every delivery is acked at most once
//! - Retries keep the original message id so duplicates can be traced
//! - Invalid payloads skip the retry loop

pub mod consumer;
pub mod handler;
pub mod validators;

pub use consumer::{
    dead_letter_queue_name, CommandConsumer, ConsumerError, ConsumerSettings, Outcome,
};
pub use handler::{CommandHandler, HandlerError, HandlerRegistry};
pub use validators::{
    ConditionValidator, EventCondition, EventDataProvider, EventType, InMemoryEventData,
    RewardRequestHandler, UserProgress, CREATE_REWARD_REQUEST,
};
