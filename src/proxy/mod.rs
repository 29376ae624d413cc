//! Synchronous reverse-proxy channel.
//!
//! # Data Flow
//! ```text
//! DispatchDecision (ProxyHttp, base URL, matched pattern)
//!     → forwarder.rs (target URL, timeout-bounded client call)
//!     → headers.rs (hop-by-hop removal, identity headers, x-forwarded-for)
//!     → backend response relayed as-is
//!     → or error.rs (503 / 504 / 502 / 500 envelope)
//! ```

pub mod error;
pub mod forwarder;
pub mod headers;

pub use error::ProxyError;
pub use forwarder::{target_url, ForwardRequest, Forwarder, ForwarderSettings};
