//! Gateway error taxonomy and the JSON error envelope.
//!
//! # Responsibilities
//! - Classify dispatch-time failures (routing, auth, publish)
//! - Render them as `{statusCode, timestamp, path, method, message, error}`
//!
//! # Design Decisions
//! - Errors are terminal at the dispatcher; handlers convert them to responses
//!   through [`GatewayError::respond`] so the envelope always carries path and method
//! - Backend transport failures have their own type (`proxy::ProxyError`)

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::BrokerError;

/// Structured error body shared by every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub message: String,
    pub error: String,
}

impl ErrorBody {
    /// Envelope without request context.
    pub fn new(status: StatusCode, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            timestamp: None,
            path: None,
            method: None,
            message: message.into(),
            error: error.into(),
        }
    }

    /// Attach request context and the current time.
    pub fn for_request(mut self, method: &Method, path: &str) -> Self {
        self.timestamp = Some(Utc::now().to_rfc3339());
        self.path = Some(path.to_string());
        self.method = Some(method.to_string());
        self
    }
}

/// Errors produced while dispatching a request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Route not found")]
    RouteNotFound,

    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Failed to dispatch command: {0}")]
    PublishFailure(#[from] BrokerError),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::PublishFailure(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable tag for the `error` field.
    pub fn error_tag(&self) -> &'static str {
        match self {
            GatewayError::PublishFailure(_) => "Message Queue Error",
            other => other
                .status()
                .canonical_reason()
                .unwrap_or("Internal Server Error"),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.status(), self.to_string(), self.error_tag())
    }

    /// Render the error for a specific request.
    pub fn respond(self, method: &Method, path: &str) -> Response {
        let status = self.status();
        let body = self.body().for_request(method, path);
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::MethodNotAllowed { allowed, .. } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}

impl IntoResponse for GatewayError {
    /// Without request context; prefer [`GatewayError::respond`].
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        (status, Json(body)).into_response()
    }
}
