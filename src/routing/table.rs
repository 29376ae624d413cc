//! Route table: ordered snapshot of compiled routes.
//!
//! # Responsibilities
//! - Order routes by specificity (longer patterns first)
//! - Resolve `(path, method)` to a route, a method mismatch, or nothing
//!
//! # Design Decisions
//! - Resolution tiers run in a fixed order: exact literal, pattern, literal prefix
//! - A path that matches structurally but not by method is reported with the
//!   union of methods that would have matched, so callers can answer 405
//! - The table is immutable; reloads build a new table and swap it

use std::sync::Arc;

use axum::http::Method;

use crate::config::schema::RouteConfig;
use crate::routing::matcher::{normalize_path, Params};
use crate::routing::route::{RouteDefinition, RouteError};

/// A resolved route with the parameters captured from the path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteDefinition>,
    pub params: Params,
}

/// Outcome of a route lookup.
#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(RouteMatch),
    /// The path is known but no route accepts the method.
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

/// Immutable, specificity-ordered route snapshot.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDefinition>>,
}

impl RouteTable {
    /// Build a table from already compiled routes.
    pub fn new(mut routes: Vec<RouteDefinition>) -> Self {
        // Stable: routes of equal length keep their configuration order.
        routes.sort_by(|a, b| b.pattern().len().cmp(&a.pattern().len()));
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// Compile every route entry. Fails on the first invalid entry.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, RouteError> {
        let routes = configs
            .iter()
            .map(RouteDefinition::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(routes))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in resolution order.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<RouteDefinition>> {
        self.routes.iter()
    }

    /// Resolve a request path and method.
    pub fn resolve(&self, path: &str, method: &Method) -> Resolution {
        let path = normalize_path(path);
        let mut path_known = false;
        let mut allowed: Vec<Method> = Vec::new();
        let mut note_mismatch = |route: &RouteDefinition| {
            path_known = true;
            for m in &route.methods {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        };

        // 1. Exact literal
        for route in self.routes.iter().filter(|r| r.matcher.is_literal()) {
            if route.pattern() == path {
                if route.allows(method) {
                    return Resolution::Matched(RouteMatch {
                        route: route.clone(),
                        params: Params::new(),
                    });
                }
                note_mismatch(route.as_ref());
            }
        }

        // 2. Pattern
        for route in self.routes.iter().filter(|r| !r.matcher.is_literal()) {
            if let Some(params) = route.matcher.matches(path) {
                if route.allows(method) {
                    return Resolution::Matched(RouteMatch {
                        route: route.clone(),
                        params,
                    });
                }
                note_mismatch(route.as_ref());
            }
        }

        // 3. Longest literal prefix; the table is already ordered longest first.
        for route in self.routes.iter() {
            if route.pattern() != path && route.matcher.is_prefix_of(path) {
                if route.allows(method) {
                    return Resolution::Matched(RouteMatch {
                        route: route.clone(),
                        params: Params::new(),
                    });
                }
                note_mismatch(route.as_ref());
            }
        }

        if path_known {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            return Resolution::MethodNotAllowed { allowed };
        }

        Resolution::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: Vec<RouteConfig>) -> RouteTable {
        RouteTable::from_config(&routes).unwrap()
    }

    fn matched(resolution: Resolution) -> RouteMatch {
        match resolution {
            Resolution::Matched(m) => m,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_specificity_order() {
        let t = table(vec![
            RouteConfig::proxy("events", "http://events"),
            RouteConfig::proxy("events/active", "http://events"),
            RouteConfig::proxy("events/:id", "http://events"),
        ]);
        let patterns: Vec<_> = t.routes().map(|r| r.pattern().to_string()).collect();
        assert_eq!(patterns, vec!["events/active", "events/:id", "events"]);
    }

    #[test]
    fn test_exact_literal_beats_param_and_prefix() {
        let t = table(vec![
            RouteConfig::proxy("events", "http://events").with_methods(&["GET", "POST"]),
            RouteConfig::proxy("events/:id", "http://events").with_methods(&["GET"]),
            RouteConfig::proxy("events/active", "http://active").with_methods(&["GET"]),
        ]);

        let m = matched(t.resolve("/events/active", &Method::GET));
        assert_eq!(m.route.pattern(), "events/active");
        assert!(m.params.is_empty());

        let m = matched(t.resolve("events", &Method::POST));
        assert_eq!(m.route.pattern(), "events");
    }

    #[test]
    fn test_param_capture() {
        let t = table(vec![
            RouteConfig::proxy("events", "http://events").with_methods(&["GET"]),
            RouteConfig::proxy("events/:id", "http://events").with_methods(&["GET"]),
        ]);
        let m = matched(t.resolve("events/42", &Method::GET));
        assert_eq!(m.route.pattern(), "events/:id");
        assert_eq!(m.params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_longest_prefix() {
        let t = table(vec![
            RouteConfig::proxy("auth", "http://auth"),
            RouteConfig::proxy("auth/users", "http://users"),
        ]);
        let m = matched(t.resolve("auth/users/7/roles", &Method::DELETE));
        assert_eq!(m.route.pattern(), "auth/users");

        let m = matched(t.resolve("auth/login", &Method::POST));
        assert_eq!(m.route.pattern(), "auth");

        assert!(matches!(
            t.resolve("authors", &Method::GET),
            Resolution::NotFound
        ));
    }

    #[test]
    fn test_method_mismatch_carries_union() {
        let t = table(vec![
            RouteConfig::proxy("events/:id", "http://events").with_methods(&["GET"]),
            RouteConfig::proxy("events/:eventId", "http://events").with_methods(&["PUT"]),
            RouteConfig::proxy("users", "http://users").with_methods(&["GET"]),
        ]);

        match t.resolve("events/42", &Method::DELETE) {
            Resolution::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec![Method::GET, Method::PUT]);
            }
            other => panic!("expected method mismatch, got {other:?}"),
        }

        match t.resolve("users", &Method::POST) {
            Resolution::MethodNotAllowed { allowed } => assert_eq!(allowed, vec![Method::GET]),
            other => panic!("expected method mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_second_route_with_same_path_accepts_method() {
        let t = table(vec![
            RouteConfig::proxy("events/:id", "http://events").with_methods(&["GET"]),
            RouteConfig::proxy("events/:id", "http://editor").with_methods(&["PUT"]),
        ]);
        let m = matched(t.resolve("events/9", &Method::PUT));
        assert_eq!(m.route.methods, vec![Method::PUT]);
    }

    #[test]
    fn test_not_found() {
        let t = table(vec![RouteConfig::proxy("events", "http://events")]);
        assert!(matches!(t.resolve("rewards", &Method::GET), Resolution::NotFound));
        assert!(matches!(
            RouteTable::default().resolve("events", &Method::GET),
            Resolution::NotFound
        ));
    }
}
