//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks, route compilation)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → HttpServer swaps in a new RouteTable
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the route table is hot-swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{apply_env_overrides, load_config, parse_config, ConfigError};
pub use schema::{
    ChannelKind, CommandConfig, ConsumerConfig, GatewayConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RouteConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
