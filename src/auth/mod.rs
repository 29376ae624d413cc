//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <jwt>
//!     → identity.rs middleware
//!     → jwt.rs (HS256 verify, claims → Identity)
//!     → Identity stored in request extensions
//!     → dispatch (roles, permissions.rs lookup)
//! ```
//!
//! # Design Decisions
//! - Authentication and authorization are separate: this module only establishes who
//!   the caller is; route requirements are checked by the dispatcher
//! - Neither a missing nor a rejected token is an error here; a rejected token
//!   only turns into 401 on routes that require authentication

use thiserror::Error;

pub mod identity;
pub mod jwt;
pub mod permissions;

pub use identity::{authenticate, Identity, RejectedToken};
pub use jwt::{Claims, JwtVerifier};
pub use permissions::{PermissionLookup, StaticRolePermissions, ALL_PERMISSIONS};

/// Token verification errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Reason safe to show a client; verifier internals stay in the logs.
    pub fn public_reason(&self) -> &'static str {
        match self {
            AuthError::Expired => "token expired",
            AuthError::InvalidToken(_) => "invalid token",
        }
    }
}
