//! Request dispatch: route resolution and authorization.
//!
//! # Data Flow
//! ```text
//! DispatchRequest (method, path, identity?, rejected token?)
//!     → RouteTable::resolve (current snapshot)
//!         NotFound          → GatewayError::RouteNotFound
//!         MethodNotAllowed  → GatewayError::MethodNotAllowed(allowed)
//!     → require_auth        → Unauthorized ("Authentication failed: ..." for a rejected token)
//!     → required roles      → Forbidden (super-role bypasses)
//!     → required perms      → Forbidden (super-role bypasses)
//!     → DispatchDecision (route, params, matched pattern)
//! ```
//!
//! # Design Decisions
//! - Per-route requirements live on the RouteDefinition; this is the only place
//!   they are evaluated
//! - The dispatcher never mutates shared state; it reads one table snapshot per request

use std::sync::Arc;

use axum::http::Method;

use crate::auth::{AuthError, Identity, PermissionLookup, ALL_PERMISSIONS};
use crate::error::GatewayError;
use crate::routing::{Params, Resolution, RouteDefinition, SharedRouteTable};

const FORBIDDEN_MESSAGE: &str = "Forbidden: Insufficient permissions";
const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

/// What the dispatcher needs to know about a request.
#[derive(Debug, Clone)]
pub struct DispatchRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub identity: Option<&'a Identity>,
    /// Why a presented bearer token was not accepted, if it wasn't.
    pub rejected_token: Option<&'a AuthError>,
}

/// An authorized request bound to its route.
#[derive(Debug, Clone)]
pub struct DispatchDecision {
    pub route: Arc<RouteDefinition>,
    pub params: Params,
}

impl DispatchDecision {
    /// Pattern of the matched route, used to compute the backend path.
    pub fn matched_pattern(&self) -> &str {
        self.route.pattern()
    }
}

/// Resolves and authorizes requests.
#[derive(Clone)]
pub struct Dispatcher {
    routes: SharedRouteTable,
    permissions: Arc<dyn PermissionLookup>,
    super_role: String,
}

impl Dispatcher {
    pub fn new(
        routes: SharedRouteTable,
        permissions: Arc<dyn PermissionLookup>,
        super_role: impl Into<String>,
    ) -> Self {
        Self {
            routes,
            permissions,
            super_role: super_role.into(),
        }
    }

    pub fn routes(&self) -> &SharedRouteTable {
        &self.routes
    }

    pub fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<DispatchDecision, GatewayError> {
        let table = self.routes.load();
        let matched = match table.resolve(request.path, request.method) {
            Resolution::Matched(m) => m,
            Resolution::MethodNotAllowed { allowed } => {
                return Err(GatewayError::MethodNotAllowed {
                    method: request.method.clone(),
                    allowed,
                });
            }
            Resolution::NotFound => return Err(GatewayError::RouteNotFound),
        };

        self.authorize(&matched.route, request)?;

        Ok(DispatchDecision {
            route: matched.route,
            params: matched.params,
        })
    }

    fn authorize(&self, route: &RouteDefinition, request: &DispatchRequest<'_>) -> Result<(), GatewayError> {
        let has_requirements =
            !route.required_roles.is_empty() || !route.required_permissions.is_empty();
        if !route.require_auth && !has_requirements {
            return Ok(());
        }

        let Some(identity) = request.identity else {
            tracing::warn!(
                method = %request.method,
                path = %request.path,
                route = %route.pattern(),
                token_error = request.rejected_token.map(|e| e.to_string()),
                "Unauthenticated request to protected route"
            );
            // Role requirements without `require_auth` deny anonymous callers as forbidden.
            if !route.require_auth {
                return Err(GatewayError::Forbidden(FORBIDDEN_MESSAGE.to_string()));
            }
            return Err(GatewayError::Unauthorized(match request.rejected_token {
                Some(e) => format!("Authentication failed: {}", e.public_reason()),
                None => UNAUTHORIZED_MESSAGE.to_string(),
            }));
        };

        if identity.has_role(&self.super_role) {
            return Ok(());
        }

        if !route.required_roles.is_empty()
            && !route.required_roles.iter().any(|role| identity.has_role(role))
        {
            tracing::warn!(
                user_id = %identity.user_id,
                roles = ?identity.roles,
                required = ?route.required_roles,
                method = %request.method,
                path = %request.path,
                "Missing required role"
            );
            return Err(GatewayError::Forbidden(FORBIDDEN_MESSAGE.to_string()));
        }

        if !route.required_permissions.is_empty() {
            let granted = self.permissions.expand(&identity.roles);
            let allowed = granted.contains(ALL_PERMISSIONS)
                || route
                    .required_permissions
                    .iter()
                    .any(|p| granted.contains(p));
            if !allowed {
                tracing::warn!(
                    user_id = %identity.user_id,
                    roles = ?identity.roles,
                    required = ?route.required_permissions,
                    method = %request.method,
                    path = %request.path,
                    "Missing required permission"
                );
                return Err(GatewayError::Forbidden(FORBIDDEN_MESSAGE.to_string()));
            }
        }

        Ok(())
    }
}
