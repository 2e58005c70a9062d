//! Capture locally produced responses into history.
//!
//! # Design Decisions
//! - The entry is created before the handler runs so the request body is
//!   recorded even when the handler fails
//! - The response body is buffered in full; a body that cannot be read
//!   becomes a 500
//! - Responses that reach this stage are always `is_from_upstream: false`

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::middleware::{content_type, request_config, request_resource, ServiceState, Source, SOURCE_HEADER};
use crate::storage::{HistoryKey, HistoryResponse};

pub async fn record(State(state): State<Arc<ServiceState>>, mut req: Request, next: Next) -> Response {
    let key = HistoryKey::of(&req);
    let history = state.db().history().clone();

    if history.get(&key).await.is_none() {
        let config = request_config(&req, &state);
        let resource = request_resource(&req, &config);
        history.set(&resource, &mut req, None).await;
    }

    let response = next.run(req).await;
    let (mut parts, body) = response.into_parts();
    let data = match to_bytes(body, usize::MAX).await {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(service = %state.name(), request = %key, error = %e, "Failed to read handler response");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read response").into_response();
        }
    };

    history
        .set_response(
            &key,
            HistoryResponse {
                data: data.clone(),
                status_code: parts.status.as_u16(),
                content_type: content_type(&parts.headers),
                is_from_upstream: false,
            },
        )
        .await;

    if !parts.headers.contains_key(SOURCE_HEADER) {
        parts.headers.insert(SOURCE_HEADER, Source::Generated.header_value());
    }
    Response::from_parts(parts, Body::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::middleware::{pipeline, test_support};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::Method;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_handler_response_recorded_with_request_body() {
        let mut config = ServiceConfig::named("svc");
        config.cache.requests = false;
        let state = test_support::state(config);
        let downstream = Router::new().fallback(|body: String| async move {
            (StatusCode::CREATED, [(CONTENT_TYPE, "text/plain")], format!("got {body}"))
        });
        let app = pipeline(state.clone(), downstream);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/orders")
                    .body(Body::from("pizza"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[SOURCE_HEADER], "generated");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "got pizza".as_bytes());

        let entry = state
            .db()
            .history()
            .get(&HistoryKey::new(Method::POST, "/orders"))
            .await
            .unwrap();
        assert_eq!(entry.body, "pizza".as_bytes());
        assert_eq!(entry.resource, "/orders");
        let recorded = entry.response.unwrap();
        assert_eq!(recorded.status_code, 201);
        assert_eq!(recorded.content_type, "text/plain");
        assert!(!recorded.is_from_upstream);
    }

    #[tokio::test]
    async fn test_existing_source_header_is_kept() {
        let state = test_support::state(ServiceConfig::named("svc"));
        let downstream = Router::new().fallback(|| async {
            ([(SOURCE_HEADER, "upstream")], "custom")
        });
        let app = pipeline(state, downstream);

        let response = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[SOURCE_HEADER], "upstream");
    }
}
