//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{ChannelKind, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::RouteError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides and validate a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse and validate `content`, resolving overrides through `lookup`.
pub fn parse_config(
    content: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// `<SERVICE>_SERVICE_URL` for the routes of a service, e.g.
/// `EVENT_REQUESTS_SERVICE_URL` for `event-requests/...`.
pub fn service_url_var(service: &str) -> String {
    format!("{}_SERVICE_URL", service.to_ascii_uppercase().replace('-', "_"))
}

/// Apply `JWT_SECRET` and per-service backend URL overrides.
pub fn apply_env_overrides(config: &mut GatewayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
        config.auth.jwt_secret = secret;
    }

    for route in config
        .routes
        .iter_mut()
        .filter(|r| r.channel == ChannelKind::ProxyHttp)
    {
        let var = service_url_var(route.service_name());
        if let Some(url) = lookup(&var).filter(|u| !u.is_empty()) {
            tracing::debug!(pattern = %route.pattern, variable = %var, "Backend URL overridden");
            route.target_url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ROUTES: &str = r#"
        [auth]
        jwt_secret = "from-file"

        [[routes]]
        pattern = "event-requests/eligibility/:eventId"
        target_url = "http://game-event-service:5000"

        [[routes]]
        pattern = "auth/login"
        methods = ["POST"]
        target_url = "http://auth-service:4000"
    "#;

    #[test]
    fn test_service_url_var() {
        assert_eq!(service_url_var("event-requests"), "EVENT_REQUESTS_SERVICE_URL");
        assert_eq!(service_url_var("auth"), "AUTH_SERVICE_URL");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("JWT_SECRET", "from-env"),
            ("EVENT_REQUESTS_SERVICE_URL", "http://localhost:5001"),
        ]
        .into_iter()
        .collect();

        let config = parse_config(ROUTES, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.auth.jwt_secret, "from-env");
        assert_eq!(
            config.routes[0].target_url.as_deref(),
            Some("http://localhost:5001")
        );
        assert_eq!(
            config.routes[1].target_url.as_deref(),
            Some("http://auth-service:4000")
        );
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let result = parse_config(ROUTES, |k| {
            (k == "AUTH_SERVICE_URL").then(|| "not a url".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Validation(errors)) if errors.len() == 1));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = parse_config(include_str!("../../config/gateway.toml"), |_| None).unwrap();
        assert_eq!(config.routes.len(), 16);
        assert_eq!(config.broker.queue, "game_events_queue");
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_config("[[routes]]\npattern = 3", |_| None),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/gateway.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
