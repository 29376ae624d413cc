//! Compiled route definitions.
//!
//! A `RouteDefinition` is built once from a `RouteConfig` and never mutated.
//! Exactly one target is populated and it always agrees with the channel.

use std::str::FromStr;

use axum::http::Method;
use thiserror::Error;
use url::Url;

use crate::broker::envelope::PublishOptions;
use crate::config::schema::{ChannelKind, RouteConfig};
use crate::routing::matcher::{PathMatcher, PatternError};

/// Errors raised while turning a `RouteConfig` into a `RouteDefinition`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("route '{pattern}' lists unknown HTTP method '{method}'")]
    UnknownMethod { pattern: String, method: String },

    #[error("route '{pattern}' has no target for its channel")]
    MissingTarget { pattern: String },

    #[error("route '{pattern}' sets both a target URL and a command")]
    ConflictingTarget { pattern: String },

    #[error("route '{pattern}' has an invalid target URL '{url}': {reason}")]
    InvalidTargetUrl {
        pattern: String,
        url: String,
        reason: String,
    },
}

/// Dispatch channel of a resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    ProxyHttp,
    AsyncCommand,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ProxyHttp => "proxy_http",
            Channel::AsyncCommand => "async_command",
        }
    }
}

/// Command published by an asynchronous route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub pattern: String,
    pub options: PublishOptions,
}

/// Channel-specific target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Proxy { base_url: String },
    Command(CommandTarget),
}

/// An immutable, compiled route.
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub matcher: PathMatcher,
    pub methods: Vec<Method>,
    pub require_auth: bool,
    pub required_roles: Vec<String>,
    pub required_permissions: Vec<String>,
    pub target: RouteTarget,
}

impl RouteDefinition {
    /// Compile a route from its configuration entry.
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouteError> {
        let matcher = PathMatcher::compile(&config.pattern)?;
        let pattern = matcher.pattern().to_string();

        let mut methods = Vec::with_capacity(config.methods.len());
        for raw in &config.methods {
            let method = parse_method(raw).ok_or_else(|| RouteError::UnknownMethod {
                pattern: pattern.clone(),
                method: raw.clone(),
            })?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }

        let target = match config.channel {
            ChannelKind::ProxyHttp => {
                if config.command.is_some() {
                    return Err(RouteError::ConflictingTarget { pattern });
                }
                let url = config
                    .target_url
                    .as_deref()
                    .ok_or_else(|| RouteError::MissingTarget {
                        pattern: pattern.clone(),
                    })?;
                validate_target_url(&pattern, url)?;
                RouteTarget::Proxy {
                    base_url: url.trim_end_matches('/').to_string(),
                }
            }
            ChannelKind::AsyncCommand => {
                if config.target_url.is_some() {
                    return Err(RouteError::ConflictingTarget { pattern });
                }
                let command = config
                    .command
                    .as_ref()
                    .filter(|c| !c.pattern.trim().is_empty())
                    .ok_or_else(|| RouteError::MissingTarget {
                        pattern: pattern.clone(),
                    })?;
                RouteTarget::Command(CommandTarget {
                    pattern: command.pattern.clone(),
                    options: PublishOptions {
                        persistent: command.persistent,
                        message_id: command.message_id.clone(),
                    },
                })
            }
        };

        Ok(Self {
            matcher,
            methods,
            require_auth: config.require_auth,
            required_roles: config.roles.clone(),
            required_permissions: config.permissions.clone(),
            target,
        })
    }

    /// The normalized pattern.
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    pub fn channel(&self) -> Channel {
        match self.target {
            RouteTarget::Proxy { .. } => Channel::ProxyHttp,
            RouteTarget::Command(_) => Channel::AsyncCommand,
        }
    }

    /// An empty method list allows every method.
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

fn parse_method(raw: &str) -> Option<Method> {
    let upper = raw.trim().to_ascii_uppercase();
    match Method::from_str(&upper) {
        Ok(method)
            if [
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::HEAD,
                Method::OPTIONS,
            ]
            .contains(&method) =>
        {
            Some(method)
        }
        _ => None,
    }
}

fn validate_target_url(pattern: &str, raw: &str) -> Result<(), RouteError> {
    let invalid = |reason: String| RouteError::InvalidTargetUrl {
        pattern: pattern.to_string(),
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_route() {
        let config = RouteConfig::proxy("/events/:id", "http://events:5000/")
            .with_methods(&["get", "PUT", "GET"]);
        let route = RouteDefinition::from_config(&config).unwrap();

        assert_eq!(route.pattern(), "events/:id");
        assert_eq!(route.methods, vec![Method::GET, Method::PUT]);
        assert_eq!(route.channel(), Channel::ProxyHttp);
        assert_eq!(
            route.target,
            RouteTarget::Proxy {
                base_url: "http://events:5000".into()
            }
        );
        assert!(route.allows(&Method::GET));
        assert!(!route.allows(&Method::DELETE));
    }

    #[test]
    fn test_command_route() {
        let config = RouteConfig::command("event-requests/rewards", "create_reward_request");
        let route = RouteDefinition::from_config(&config).unwrap();

        assert_eq!(route.channel(), Channel::AsyncCommand);
        assert!(route.allows(&Method::PATCH));
        match route.target {
            RouteTarget::Command(target) => {
                assert_eq!(target.pattern, "create_reward_request");
                assert!(target.options.persistent);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_target_must_match_channel() {
        let mut config = RouteConfig::proxy("events", "http://events:5000");
        config.target_url = None;
        assert!(matches!(
            RouteDefinition::from_config(&config),
            Err(RouteError::MissingTarget { .. })
        ));

        let mut config = RouteConfig::command("rewards", "create_reward_request");
        config.target_url = Some("http://rewards:5000".into());
        assert!(matches!(
            RouteDefinition::from_config(&config),
            Err(RouteError::ConflictingTarget { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        let config = RouteConfig::proxy("events", "ftp://events");
        assert!(matches!(
            RouteDefinition::from_config(&config),
            Err(RouteError::InvalidTargetUrl { .. })
        ));

        let config = RouteConfig::proxy("events", "http://events").with_methods(&["FETCH"]);
        assert!(matches!(
            RouteDefinition::from_config(&config),
            Err(RouteError::UnknownMethod { .. })
        ));

        let config = RouteConfig::proxy("events/:", "http://events");
        assert!(matches!(
            RouteDefinition::from_config(&config),
            Err(RouteError::Pattern(PatternError::DanglingMarker { .. }))
        ));
    }
}
