//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Compile every route so a bad pattern or target never goes live
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::routing::RouteDefinition;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field} '{value}' is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("broker.queue must not be empty")]
    EmptyQueue,

    #[error("rate_limit.requests_per_second must be positive")]
    InvalidRate,

    #[error("routes[{index}]: {reason}")]
    Route { index: usize, reason: String },
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let timeouts = [
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.backend_ms", config.timeouts.backend_ms),
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.publish_ms", config.timeouts.publish_ms),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.proxy.max_body_bytes == 0 {
        errors.push(ValidationError::Zero("proxy.max_body_bytes"));
    }
    if config.broker.queue.trim().is_empty() {
        errors.push(ValidationError::EmptyQueue);
    }
    if config.consumer.prefetch_count == 0 {
        errors.push(ValidationError::Zero("consumer.prefetch_count"));
    }
    if config.rate_limit.enabled && config.rate_limit.requests_per_second <= 0.0 {
        errors.push(ValidationError::InvalidRate);
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    for (index, route) in config.routes.iter().enumerate() {
        if let Err(e) = RouteDefinition::from_config(route) {
            errors.push(ValidationError::Route {
                index,
                reason: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.timeouts.backend_ms = 0;
        config.consumer.prefetch_count = 0;
        config.routes.push(RouteConfig::proxy("events", "ftp://backend"));
        config.routes.push(RouteConfig::proxy("events/:", "http://backend"));
        config.routes.push(RouteConfig::proxy("auth", "http://auth:4000"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::Zero("timeouts.backend_ms")));
        assert!(errors.contains(&ValidationError::Zero("consumer.prefetch_count")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::Route { index: 1, .. })));
        assert!(!errors
            .iter()
            .any(|e| matches!(e, ValidationError::Route { index: 2, .. })));
    }
}
