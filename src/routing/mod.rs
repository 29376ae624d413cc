//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup or reload):
//!     RouteConfig[]
//!     → route.rs (validate methods, target, channel)
//!     → matcher.rs (compile pattern segments)
//!     → table.rs (sort by specificity, freeze)
//!     → stored behind ArcSwap
//!
//! Incoming Request (path, method)
//!     → table.rs (exact → pattern → prefix)
//!     → Return: Matched / MethodNotAllowed / NotFound
//! ```
//!
//! # Design Decisions
//! - Routes compiled before they are visible, immutable at runtime
//! - No regex in hot path (segment walk only)
//! - Deterministic: same input always matches same route
//! - Reload swaps the whole table atomically

use std::sync::Arc;

use arc_swap::ArcSwap;

pub mod matcher;
pub mod route;
pub mod table;

pub use matcher::{PathMatcher, PatternError, Params};
pub use route::{Channel, CommandTarget, RouteDefinition, RouteError, RouteTarget};
pub use table::{Resolution, RouteMatch, RouteTable};

/// Route table shared between request handlers and the reload task.
pub type SharedRouteTable = Arc<ArcSwap<RouteTable>>;

/// Wrap a table for sharing.
pub fn shared(table: RouteTable) -> SharedRouteTable {
    Arc::new(ArcSwap::from_pointee(table))
}
