//! Request correlation.
//!
//! # Responsibilities
//! - Assign a correlation id (UUID v4) to every request that lacks one
//! - Echo the id on the response
//! - Expose it to handlers for logging and the accept acknowledgment
//!
//! # Design Decisions
//! - A client-supplied `x-correlation-id` is kept as is
//! - The id is added as early as possible so every log line can carry it

use axum::http::{HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_CORRELATION_ID: &str = "x-correlation-id";

fn header_name() -> HeaderName {
    HeaderName::from_static(X_CORRELATION_ID)
}

/// Sets `x-correlation-id` on requests that do not carry one.
pub fn set_correlation_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(header_name(), MakeRequestUuid)
}

/// Copies the request's `x-correlation-id` onto the response.
pub fn propagate_correlation_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(header_name())
}

/// The request's correlation id, or a fresh one when absent.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_correlation_id() {
        let mut headers = HeaderMap::new();
        headers.insert(X_CORRELATION_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(correlation_id(&headers), "abc-123");

        let generated = correlation_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }
}
