//! Edge API gateway library.
//!
//! Resolves each request against a route table, authorizes it, and then
//! either proxies it to an HTTP backend or publishes it as a command for the
//! worker pipeline.

// Request path
pub mod auth;
pub mod dispatch;
pub mod http;
pub mod proxy;
pub mod routing;

// Command pipeline
pub mod broker;
pub mod worker;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
