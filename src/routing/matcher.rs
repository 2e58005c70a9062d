//! Route matching logic.
//!
//! # Responsibilities
//! - Match the request method (case-insensitive)
//! - Match the path against a declared pattern with `{param}` segments
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Literal segments are case-sensitive
//! - A `{param}` segment matches exactly one non-empty segment
//! - Trailing slashes are ignored on both sides
//! - No regex to guarantee O(n) matching

use std::collections::HashMap;

use axum::http::Method;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns the captured path parameters if the request matches.
    fn matches(&self, method: &Method, path: &str) -> Option<HashMap<String, String>>;
}

/// Matches the request method.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    expected: String,
}

impl MethodMatcher {
    /// The method is normalized to uppercase for case-insensitive matching.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            expected: method.into().to_uppercase(),
        }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, method: &Method, _path: &str) -> Option<HashMap<String, String>> {
        (method.as_str() == self.expected).then(HashMap::new)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Matches a path pattern such as `/pets/{id}`.
#[derive(Debug, Clone)]
pub struct PathPatternMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathPatternMatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let segments = split(&pattern)
            .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();
        Self { pattern, segments }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Matcher for PathPatternMatcher {
    fn matches(&self, _method: &Method, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

/// Combines multiple matchers with AND semantics, merging captured params.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, method: &Method, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        for matcher in &self.matchers {
            params.extend(matcher.matches(method, path)?);
        }
        Some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_matcher() {
        let matcher = MethodMatcher::new("get");
        assert!(matcher.matches(&Method::GET, "/").is_some());
        assert!(matcher.matches(&Method::POST, "/").is_none());
    }

    #[test]
    fn test_path_pattern_matcher() {
        let matcher = PathPatternMatcher::new("/pets/{id}/toys/{toy}");

        let params = matcher.matches(&Method::GET, "/pets/7/toys/ball").unwrap();
        assert_eq!(params["id"], "7");
        assert_eq!(params["toy"], "ball");

        assert!(matcher.matches(&Method::GET, "/pets/7/toys/ball/").is_some());
        assert!(matcher.matches(&Method::GET, "/pets/7/toys").is_none());
        assert!(matcher.matches(&Method::GET, "/Pets/7/toys/ball").is_none());
    }

    #[test]
    fn test_root_pattern() {
        let matcher = PathPatternMatcher::new("/");
        assert!(matcher.matches(&Method::GET, "/").is_some());
        assert!(matcher.matches(&Method::GET, "").is_some());
        assert!(matcher.matches(&Method::GET, "/x").is_none());
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(MethodMatcher::new("DELETE")),
            Box::new(PathPatternMatcher::new("/pets/{id}")),
        ]);
        assert_eq!(
            matcher.matches(&Method::DELETE, "/pets/3").unwrap()["id"],
            "3"
        );
        assert!(matcher.matches(&Method::GET, "/pets/3").is_none());
    }
}
