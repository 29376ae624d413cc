//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (correlation id)
//!     → auth + rate limit middleware
//!     → dispatch (route, authorize)
//!     → proxy forwarder  → backend response relayed
//!       command producer → 202 Accepted
//! ```

pub mod request;
pub mod server;

pub use request::{correlation_id, X_CORRELATION_ID};
pub use server::{AppState, HttpServer};
