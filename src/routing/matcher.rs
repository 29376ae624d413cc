//! Route pattern compilation and path matching.
//!
//! # Responsibilities
//! - Compile a slash-separated pattern into literal and parameter segments
//! - Match a concrete path against a compiled pattern (anchored, whole path)
//! - Capture named parameters, one path segment each
//!
//! # Design Decisions
//! - Patterns are validated at load time; malformed patterns never reach the hot path
//! - No regex: matching is a single segment-by-segment walk
//! - A leading slash is ignored on both patterns and paths

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Marker that turns a pattern segment into a named parameter (`events/:id`).
pub const PARAM_MARKER: char = ':';

/// Parameters captured from a path, keyed by parameter name.
pub type Params = HashMap<String, String>;

/// Errors raised while compiling a route pattern.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("route pattern is empty")]
    Empty,

    #[error("route pattern '{pattern}' contains an empty segment")]
    EmptySegment { pattern: String },

    #[error("route pattern '{pattern}' has a parameter marker without a name")]
    DanglingMarker { pattern: String },

    #[error("route pattern '{pattern}' has an invalid parameter name '{name}'")]
    InvalidParamName { pattern: String, name: String },

    #[error("route pattern '{pattern}' declares parameter '{name}' more than once")]
    DuplicateParam { pattern: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathMatcher {
    /// Compile a pattern such as `auth/users/:id/roles`.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let normalized = normalize_path(pattern);
        if normalized.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        let mut seen = HashSet::new();

        for raw in normalized.split('/') {
            if raw.is_empty() {
                return Err(PatternError::EmptySegment {
                    pattern: normalized.to_string(),
                });
            }

            match raw.strip_prefix(PARAM_MARKER) {
                Some("") => {
                    return Err(PatternError::DanglingMarker {
                        pattern: normalized.to_string(),
                    });
                }
                Some(name) => {
                    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(PatternError::InvalidParamName {
                            pattern: normalized.to_string(),
                            name: name.to_string(),
                        });
                    }
                    if !seen.insert(name.to_string()) {
                        return Err(PatternError::DuplicateParam {
                            pattern: normalized.to_string(),
                            name: name.to_string(),
                        });
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(raw.to_string())),
            }
        }

        Ok(Self {
            pattern: normalized.to_string(),
            segments,
        })
    }

    /// The normalized pattern (no leading slash).
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when the pattern has no parameter segments.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Names of the parameters declared by the pattern, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a whole path. Returns the captured parameters, or `None`.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let path = normalize_path(path);
        let mut parts = path.split('/');
        let mut params = Params::new();

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        // Anchored: the path must not have segments left over.
        if parts.next().is_some() {
            return None;
        }

        Some(params)
    }

    /// True when this literal pattern is a segment-aligned prefix of `path`.
    pub fn is_prefix_of(&self, path: &str) -> bool {
        if !self.is_literal() {
            return false;
        }
        let path = normalize_path(path);
        match path.strip_prefix(self.pattern.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Strip a single leading slash.
pub fn normalize_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let m = PathMatcher::compile("auth/login").unwrap();
        assert!(m.is_literal());
        assert_eq!(m.matches("auth/login"), Some(Params::new()));
        assert_eq!(m.matches("/auth/login"), Some(Params::new()));
        assert!(m.matches("auth/login/extra").is_none());
        assert!(m.matches("auth").is_none());
    }

    #[test]
    fn test_param_capture() {
        let m = PathMatcher::compile("/auth/users/:id/roles/:role").unwrap();
        assert!(!m.is_literal());
        assert_eq!(m.pattern(), "auth/users/:id/roles/:role");

        let params = m.matches("auth/users/42/roles/admin").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert_eq!(params.get("role").map(String::as_str), Some("admin"));
        assert_eq!(m.param_names().collect::<Vec<_>>(), vec!["id", "role"]);
    }

    #[test]
    fn test_param_does_not_span_segments() {
        let m = PathMatcher::compile("events/:id").unwrap();
        assert!(m.matches("events/42/rewards").is_none());
        assert!(m.matches("events/").is_none());
    }

    #[test]
    fn test_rejects_malformed_patterns() {
        assert_eq!(PathMatcher::compile(""), Err(PatternError::Empty));
        assert_eq!(PathMatcher::compile("/"), Err(PatternError::Empty));
        assert!(matches!(
            PathMatcher::compile("events/:"),
            Err(PatternError::DanglingMarker { .. })
        ));
        assert!(matches!(
            PathMatcher::compile("events//x"),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            PathMatcher::compile("events/"),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            PathMatcher::compile("events/:id-x"),
            Err(PatternError::InvalidParamName { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_params() {
        let err = PathMatcher::compile("users/:id/friends/:id").unwrap_err();
        assert_eq!(
            err,
            PatternError::DuplicateParam {
                pattern: "users/:id/friends/:id".into(),
                name: "id".into(),
            }
        );
    }

    #[test]
    fn test_prefix() {
        let m = PathMatcher::compile("events").unwrap();
        assert!(m.is_prefix_of("events"));
        assert!(m.is_prefix_of("/events/42/rewards"));
        assert!(!m.is_prefix_of("eventsfoo"));

        let p = PathMatcher::compile("events/:id").unwrap();
        assert!(!p.is_prefix_of("events/42/rewards"));
    }
}
