//! Serve repeated GET requests from history.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::middleware::{request_config, ServiceState, Source, SOURCE_HEADER};
use crate::observability::metrics;
use crate::storage::{HistoryKey, HistoryResponse};

pub async fn serve_cached(State(state): State<Arc<ServiceState>>, req: Request, next: Next) -> Response {
    let config = request_config(&req, &state);
    if req.method() != Method::GET || !config.cache.requests {
        return next.run(req).await;
    }

    let key = HistoryKey::of(&req);
    let cached = state
        .db()
        .history()
        .get(&key)
        .await
        .and_then(|entry| entry.response);

    match cached {
        Some(cached) => {
            tracing::info!(service = %state.name(), request = %key, "Cache hit");
            metrics::record_cache_hit(state.name());
            cached_response(cached)
        }
        None => next.run(req).await,
    }
}

fn cached_response(cached: HistoryResponse) -> Response {
    let mut response = Response::new(Body::from(cached.data));
    *response.status_mut() = StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::OK);

    let headers = response.headers_mut();
    if !cached.content_type.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&cached.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    headers.insert(SOURCE_HEADER, Source::Cache.header_value());
    response
}
