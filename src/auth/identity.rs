//! Authenticated identity and the middleware that establishes it.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, JwtVerifier};

/// Caller identity attached to the request by [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            roles,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Case-insensitive role check.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Extract the bearer token, if any.
fn bearer_token(request: &Request<Body>) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
        .filter(|t| !t.is_empty())
}

/// Marker left in the request extensions when a bearer token fails
/// verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedToken(pub AuthError);

/// Middleware: verify the bearer token and attach the [`Identity`].
///
/// Never rejects. A request without a token passes through anonymously; a
/// token that fails verification also passes through without an identity,
/// carrying a [`RejectedToken`] so the dispatcher can answer 401 on routes
/// that require authentication. Public routes stay reachable with a stale token.
pub async fn authenticate(
    State(verifier): State<Arc<JwtVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let verified = bearer_token(&request).map(|token| verifier.verify(token));

    match verified {
        None => {}
        Some(Ok(identity)) => {
            request.extensions_mut().insert(identity);
        }
        Some(Err(e)) => {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                error = %e,
                "Token verification failed"
            );
            request.extensions_mut().insert(RejectedToken(e));
        }
    }
    next.run(request).await
}
