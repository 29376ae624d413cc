//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Consumer handler failure:
//!     → backoff.rs (delay = base * retry count)
//!     → republish with the next retry count
//!
//! Broker acknowledgment:
//!     → retries.rs (fixed-delay retry of the ack call)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Business failures are retried by republishing, transport failures in place
//! - Delays go through tokio time so tests can run with a paused clock

pub mod backoff;
pub mod retries;
