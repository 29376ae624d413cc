//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → auth::authenticate (identity from bearer token)
//!     → rate_limit.rs (per user, or per IP when anonymous)
//!     → Pass to dispatch
//! ```
//!
//! # Design Decisions
//! - Limiting is off unless enabled in config
//! - Identity headers from clients are never trusted (see `proxy::headers`)

pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimiterState};
