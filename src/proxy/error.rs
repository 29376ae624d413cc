//! Backend failure classification.
//!
//! Transport errors from the HTTP client never leave the forwarder raw: they
//! are mapped here to a status and a `{statusCode, message, error}` envelope.

use std::error::Error as StdError;
use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

use crate::error::ErrorBody;

/// Forwarding failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Backend answered with a 4xx/5xx that is being normalized.
    #[error("{message}")]
    BackendHttp {
        status: StatusCode,
        message: String,
        error: String,
    },

    /// Connection refused, host unknown or unreachable.
    #[error("Service is currently unavailable ({0})")]
    Unavailable(String),

    #[error("Request timed out while connecting to the service")]
    Timeout,

    /// Other transport-level failure.
    #[error("Unable to connect to service: {0}")]
    BadGateway(String),

    #[error("An unexpected error occurred while proxying the request")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BackendHttp { status, .. } => *status,
            ProxyError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_tag(&self) -> String {
        match self {
            ProxyError::BackendHttp { error, .. } => error.clone(),
            other => other
                .status()
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
        }
    }

    /// Root cause for logging.
    pub fn cause(&self) -> &str {
        match self {
            ProxyError::BackendHttp { message, .. } => message,
            ProxyError::Unavailable(cause)
            | ProxyError::BadGateway(cause)
            | ProxyError::Internal(cause) => cause,
            ProxyError::Timeout => "timeout",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.status(), self.to_string(), self.error_tag())
    }

    /// Classify a client error by walking its source chain.
    pub fn classify(err: &hyper_util::client::legacy::Error) -> Self {
        let io_kind = io_error_kind(err);

        if err.is_connect() {
            return match io_kind {
                Some(io::ErrorKind::TimedOut) => ProxyError::Timeout,
                Some(kind) => ProxyError::Unavailable(connect_code(kind)),
                None => ProxyError::Unavailable(root_cause(err)),
            };
        }

        match io_kind {
            Some(io::ErrorKind::TimedOut) => ProxyError::Timeout,
            _ => ProxyError::BadGateway(root_cause(err)),
        }
    }

    /// Normalize a backend error body. JSON `message` (string or list) and
    /// `error` fields are kept; anything else gets a generic message.
    pub fn from_backend(status: StatusCode, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let field = |name: &str| parsed.as_ref().and_then(|v| v.get(name));

        let message = match field("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            _ if parsed.is_none() && !body.is_empty() => String::from_utf8_lossy(body).into_owned(),
            _ => "Error from microservice".to_string(),
        };
        let error = field("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "Proxy Error".to_string());

        ProxyError::BackendHttp {
            status,
            message,
            error,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = e.source();
    }
    None
}

fn root_cause(err: &(dyn StdError + 'static)) -> String {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current.to_string()
}

fn connect_code(kind: io::ErrorKind) -> String {
    match kind {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED".to_string(),
        io::ErrorKind::NotFound => "ENOTFOUND".to_string(),
        io::ErrorKind::ConnectionReset => "ECONNRESET".to_string(),
        other => format!("{other:?}"),
    }
}
