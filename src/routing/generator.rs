//! Fixed response generator.
//!
//! Default downstream handler of a service: answers with the first declared
//! response whose method and path pattern match, substituting captured
//! `{param}` values into the body.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::middleware::{request_config, ServiceState};
use crate::routing::router::Router;

/// Router serving `state`'s declared responses for every path.
pub fn fixed_responses(state: Arc<ServiceState>) -> axum::Router {
    axum::Router::new().fallback(generate).with_state(state)
}

async fn generate(State(state): State<Arc<ServiceState>>, req: Request) -> Response {
    let config = request_config(&req, &state);
    let routes = Router::from_config(&config.responses);

    let Some(found) = routes.match_request(req.method(), req.uri().path()) else {
        tracing::debug!(
            service = %state.name(),
            method = %req.method(),
            path = %req.uri().path(),
            "No declared response"
        );
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let declared = &found.route.response;
    let status = StatusCode::from_u16(declared.status).unwrap_or(StatusCode::OK);
    let mut response = (status, found.render_body()).into_response();
    if let Ok(value) = HeaderValue::from_str(&declared.content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FixedResponse, ServiceConfig};
    use crate::middleware::test_support;
    use axum::body::{to_bytes, Body};
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let mut config = ServiceConfig::named("pets");
        config.responses = vec![FixedResponse {
            path: "/pets/{id}".into(),
            body: r#"{"id":"{id}"}"#.into(),
            ..FixedResponse::default()
        }];
        fixed_responses(test_support::state(config))
    }

    #[tokio::test]
    async fn test_declared_response_rendered() {
        let response = app()
            .oneshot(Request::builder().uri("/pets/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, r#"{"id":"7"}"#.as_bytes());
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let response = app()
            .oneshot(Request::builder().uri("/owners").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
