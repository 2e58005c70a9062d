//! Route lookup for declared fixed responses.
//!
//! # Responsibilities
//! - Compile a service's `responses` into matchers
//! - Look up the matching response for a method and path
//! - Return the matched route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in declaration order; first match wins
//! - Explicit `None` rather than a silent default

use std::collections::HashMap;

use axum::http::Method;

use crate::config::FixedResponse;
use crate::routing::matcher::{AndMatcher, Matcher, MethodMatcher, PathPatternMatcher};

/// A compiled fixed response.
#[derive(Debug)]
pub struct Route {
    pub response: FixedResponse,
    matcher: AndMatcher,
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
}

impl RouteMatch<'_> {
    /// Declared path pattern of the matched route.
    pub fn resource(&self) -> &str {
        &self.route.response.path
    }

    /// Response body with `{param}` placeholders replaced by captured values.
    pub fn render_body(&self) -> String {
        let mut body = self.route.response.body.clone();
        for (name, value) in &self.params {
            body = body.replace(&format!("{{{name}}}"), value);
        }
        body
    }
}

/// Routes of one service.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn from_config(responses: &[FixedResponse]) -> Self {
        let routes = responses
            .iter()
            .map(|response| Route {
                matcher: AndMatcher::new(vec![
                    Box::new(MethodMatcher::new(response.method.clone())),
                    Box::new(PathPatternMatcher::new(response.path.clone())),
                ]),
                response: response.clone(),
            })
            .collect();
        Self { routes }
    }

    pub fn match_request(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            route
                .matcher
                .matches(method, path)
                .map(|params| RouteMatch { route, params })
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Declared pattern for `path`, or the path itself when nothing matches.
pub fn resource_for(responses: &[FixedResponse], method: &Method, path: &str) -> String {
    let router = Router::from_config(responses);
    router
        .match_request(method, path)
        .map(|found| found.resource().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses() -> Vec<FixedResponse> {
        vec![
            FixedResponse {
                path: "/pets/mine".into(),
                body: "mine".into(),
                ..FixedResponse::default()
            },
            FixedResponse {
                path: "/pets/{id}".into(),
                body: r#"{"id": "{id}"}"#.into(),
                ..FixedResponse::default()
            },
            FixedResponse {
                method: "post".into(),
                path: "/pets".into(),
                status: 201,
                ..FixedResponse::default()
            },
        ]
    }

    #[test]
    fn test_first_declared_match_wins() {
        let router = Router::from_config(&responses());
        assert_eq!(router.len(), 3);

        let found = router.match_request(&Method::GET, "/pets/mine").unwrap();
        assert_eq!(found.render_body(), "mine");

        let found = router.match_request(&Method::GET, "/pets/42").unwrap();
        assert_eq!(found.resource(), "/pets/{id}");
        assert_eq!(found.render_body(), r#"{"id": "42"}"#);
    }

    #[test]
    fn test_method_is_part_of_the_match() {
        let router = Router::from_config(&responses());
        assert_eq!(
            router.match_request(&Method::POST, "/pets").unwrap().route.response.status,
            201
        );
        assert!(router.match_request(&Method::GET, "/pets").is_none());
    }

    #[test]
    fn test_resource_falls_back_to_path() {
        assert_eq!(resource_for(&responses(), &Method::GET, "/pets/9"), "/pets/{id}");
        assert_eq!(resource_for(&responses(), &Method::GET, "/owners"), "/owners");
    }
}
