//! Reverse-proxy forwarding to HTTP backends.
//!
//! # Responsibilities
//! - Compute the backend URL (gateway routing segment removed)
//! - Rewrite headers and forward method, query and body unchanged
//! - Bound the backend call with a timeout
//! - Relay the backend response, or translate transport failures
//!
//! # Design Decisions
//! - Every backend status is relayed; a 4xx/5xx is not a forwarder failure
//! - Error bodies are rewritten into the gateway envelope only when
//!   `normalize_error_bodies` is set
//! - One pooled client per gateway, shared across requests

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, Response, Uri},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::auth::Identity;
use crate::proxy::error::ProxyError;
use crate::proxy::headers::{outbound_headers, strip_hop_by_hop};

/// Default bound on a backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(5_000);

/// A buffered client request ready to be forwarded.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Original request URI (path and query).
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub identity: Option<Identity>,
    pub client_addr: Option<SocketAddr>,
    /// Pattern of the route that matched, e.g. `events/:id`.
    pub matched_pattern: String,
}

/// Forwarder settings.
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub normalize_error_bodies: bool,
    /// Largest backend error body read for normalization.
    pub max_error_body: usize,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_BACKEND_TIMEOUT,
            connect_timeout: Duration::from_millis(2_000),
            normalize_error_bodies: false,
            max_error_body: 64 * 1024,
        }
    }
}

/// Forwards requests to backend origins.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    settings: ForwarderSettings,
}

impl Forwarder {
    pub fn new(settings: ForwarderSettings) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(settings.connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, settings }
    }

    pub fn settings(&self) -> &ForwarderSettings {
        &self.settings
    }

    /// Forward `request` to `base_url` and relay the answer.
    pub async fn forward(
        &self,
        request: ForwardRequest,
        base_url: &str,
    ) -> Result<Response<Body>, ProxyError> {
        let target = target_url(
            base_url,
            &request.matched_pattern,
            request.uri.path(),
            request.uri.query(),
        );

        tracing::debug!(
            method = %request.method,
            path = %request.uri.path(),
            target = %target,
            "Forwarding request"
        );

        let result = self.send(&request, &target).await;
        if let Err(e) = &result {
            match e {
                ProxyError::BackendHttp { status, .. } => tracing::warn!(
                    method = %request.method,
                    path = %request.uri.path(),
                    target = %target,
                    status = %status,
                    cause = %e.cause(),
                    "Backend returned an error response"
                ),
                _ => tracing::error!(
                    method = %request.method,
                    path = %request.uri.path(),
                    target = %target,
                    status = %e.status(),
                    cause = %e.cause(),
                    "Proxy error"
                ),
            }
        }
        result
    }

    async fn send(&self, request: &ForwardRequest, target: &str) -> Result<Response<Body>, ProxyError> {
        let uri: Uri = target
            .parse()
            .map_err(|e| ProxyError::Internal(format!("invalid backend URL '{target}': {e}")))?;

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = outbound_headers(
                &request.headers,
                request.identity.as_ref(),
                request.client_addr,
            );
        }
        let outbound = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| ProxyError::Internal(e.to_string()))?;

        let response = tokio::time::timeout(self.settings.timeout, self.client.request(outbound))
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| ProxyError::classify(&e))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        if self.settings.normalize_error_bodies
            && (parts.status.is_client_error() || parts.status.is_server_error())
        {
            let bytes = axum::body::to_bytes(Body::new(body), self.settings.max_error_body)
                .await
                .unwrap_or_default();
            return Err(ProxyError::from_backend(parts.status, &bytes));
        }

        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Backend URL for `path`: everything up to and including the service
/// segment (the first segment of the matched pattern) is dropped.
pub fn target_url(base_url: &str, matched_pattern: &str, path: &str, query: Option<&str>) -> String {
    let service = matched_pattern
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default();

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let rest = match segments.iter().position(|s| *s == service) {
        Some(index) => &segments[index + 1..],
        None => segments.get(1..).unwrap_or(&[]),
    };

    let mut url = format!("{}/{}", base_url.trim_end_matches('/'), rest.join("/"));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_service_segment() {
        assert_eq!(
            target_url("http://auth:4000", "auth/login", "/auth/login", None),
            "http://auth:4000/login"
        );
        assert_eq!(
            target_url("http://events:5000/", "events/:id", "/events/42", Some("full=true")),
            "http://events:5000/42?full=true"
        );
        assert_eq!(
            target_url("http://events:5000", "events", "/events", None),
            "http://events:5000/"
        );
    }

    #[test]
    fn test_nested_routes_keep_remaining_path() {
        assert_eq!(
            target_url(
                "http://auth:4000",
                "auth/users/:id/roles/:role",
                "/auth/users/7/roles/admin",
                None
            ),
            "http://auth:4000/users/7/roles/admin"
        );
    }

    #[test]
    fn test_service_segment_missing_drops_first() {
        assert_eq!(
            target_url("http://svc", "events", "/other/path", Some("")),
            "http://svc/path"
        );
    }
}
