//! Header rewriting for the backend hop.

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::auth::Identity;

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLES: &str = "x-user-roles";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers that describe a single connection and must not be forwarded.
pub const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Build the header set sent to a backend.
///
/// Client-supplied identity headers are always dropped; the gateway is the
/// only source of `x-user-id` / `x-user-roles`.
pub fn outbound_headers(
    incoming: &HeaderMap,
    identity: Option<&Identity>,
    client_addr: Option<SocketAddr>,
) -> HeaderMap {
    let mut headers = incoming.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(X_USER_ID);
    headers.remove(X_USER_ROLES);

    if let Some(identity) = identity {
        if let Ok(value) = HeaderValue::from_str(&identity.user_id) {
            headers.insert(HeaderName::from_static(X_USER_ID), value);
        }
        let roles = serde_json::to_string(&identity.roles).unwrap_or_else(|_| "[]".to_string());
        if let Ok(value) = HeaderValue::from_str(&roles) {
            headers.insert(HeaderName::from_static(X_USER_ROLES), value);
        }
    }

    if !headers.contains_key(X_FORWARDED_FOR) {
        if let Some(addr) = client_addr {
            if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
                headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
            }
        }
    }

    headers
}
