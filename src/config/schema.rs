//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Reverse-proxy forwarding behaviour.
    pub proxy: ProxyConfig,

    /// Token verification and authorization settings.
    pub auth: AuthConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Broker queue used by asynchronous command routes.
    pub broker: BrokerConfig,

    /// Command consumer pipeline settings.
    pub consumer: ConsumerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Hot reload of the route table.
    pub reload: ReloadConfig,

    /// Route definitions mapping requests to backends or commands.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for a client request, in seconds.
    pub request_secs: u64,

    /// Time allowed for a proxied backend call, in milliseconds.
    pub backend_ms: u64,

    /// Time allowed for establishing a backend connection, in milliseconds.
    pub connect_ms: u64,

    /// Time allowed for a broker publish, in milliseconds.
    pub publish_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            backend_ms: 5_000,
            connect_ms: 2_000,
            publish_ms: 5_000,
        }
    }
}

/// Reverse-proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Maximum request (and normalized error) body size in bytes.
    pub max_body_bytes: usize,

    /// Rewrite backend 4xx/5xx bodies into the `{statusCode, message, error}` envelope.
    /// When false, backend responses are relayed byte for byte.
    pub normalize_error_bodies: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            normalize_error_bodies: false,
        }
    }
}

/// Authentication and authorization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret used to verify bearer tokens. `JWT_SECRET` overrides it.
    pub jwt_secret: String,

    /// Role that bypasses every role and permission check.
    pub super_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
            super_role: "admin".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per client.
    pub requests_per_second: f64,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 10.0,
            burst_size: 20,
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Queue that command messages are published to and consumed from.
    pub queue: String,

    /// Declare the queue as durable.
    pub durable: bool,

    /// Maximum buffered messages per queue.
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue: "game_events_queue".to_string(),
            durable: true,
            queue_capacity: 1024,
        }
    }
}

/// Command consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Run the consumer pipeline in this process.
    pub enabled: bool,

    /// Maximum number of unacknowledged messages processed concurrently.
    pub prefetch_count: usize,

    /// Broker acknowledges on delivery; no ack, retry or dead-lettering happens.
    pub no_ack: bool,

    /// Number of republish attempts after a handler failure.
    pub max_retries: u32,

    /// Base delay in milliseconds. Retry N waits `retry_delay_ms * N`; ack retries wait it flat.
    pub retry_delay_ms: u64,

    /// Total attempts for the acknowledgment call itself.
    pub ack_attempts: u32,

    /// Move exhausted messages to `<queue>.dlq` before acknowledging them.
    pub dead_letter_enabled: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefetch_count: 1,
            no_ack: false,
            max_retries: 3,
            retry_delay_ms: 1_000,
            ack_attempts: 3,
            dead_letter_enabled: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Route table reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReloadConfig {
    /// Watch the config file and swap in a new route table on change.
    pub watch_config: bool,
}

/// Dispatch channel of a route.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Synchronous reverse proxy to an HTTP backend.
    #[default]
    ProxyHttp,
    /// Asynchronous command published to the broker.
    AsyncCommand,
}

/// Route configuration entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Path pattern; `:name` segments capture one path segment.
    #[serde(alias = "path")]
    pub pattern: String,

    /// Allowed HTTP methods. Empty means every method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Require an authenticated identity.
    #[serde(default)]
    pub require_auth: bool,

    /// Identity must hold at least one of these roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Identity's roles must grant at least one of these permissions.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Dispatch channel.
    #[serde(default)]
    pub channel: ChannelKind,

    /// Backend base URL (proxy routes only).
    #[serde(default)]
    pub target_url: Option<String>,

    /// Command to publish (async routes only).
    #[serde(default)]
    pub command: Option<CommandConfig>,
}

impl RouteConfig {
    /// Convenience constructor for a proxy route.
    pub fn proxy(pattern: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods: Vec::new(),
            require_auth: false,
            roles: Vec::new(),
            permissions: Vec::new(),
            channel: ChannelKind::ProxyHttp,
            target_url: Some(target_url.into()),
            command: None,
        }
    }

    /// Convenience constructor for an asynchronous command route.
    pub fn command(pattern: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods: Vec::new(),
            require_auth: false,
            roles: Vec::new(),
            permissions: Vec::new(),
            channel: ChannelKind::AsyncCommand,
            target_url: None,
            command: Some(CommandConfig {
                pattern: command.into(),
                persistent: true,
                message_id: None,
            }),
        }
    }

    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Service name: the first segment of the pattern.
    pub fn service_name(&self) -> &str {
        self.pattern
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }
}

/// Command publish settings of an asynchronous route.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CommandConfig {
    /// Command name consumers dispatch on.
    pub pattern: String,

    /// Ask the broker to persist the message.
    #[serde(default = "default_persistent")]
    pub persistent: bool,

    /// Fixed message id; a fresh UUID is generated per request when absent.
    #[serde(default)]
    pub message_id: Option<String>,
}

fn default_persistent() -> bool {
    true
}
