//! Request identification.
//!
//! # Responsibilities
//! - Read the request ID assigned by the request-id layer
//! - Open the per-request tracing span carrying that ID
//!
//! # Design Decisions
//! - Request ID (UUID v4) added as early as possible for tracing
//! - The ID header travels with the request into upstream calls, so logs on
//!   both sides correlate

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request};
use tracing::Span;

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// The request ID in `headers`, if present and printable.
pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_REQUEST_ID).and_then(|value| value.to_str().ok())
}

/// Span for one inbound request.
pub fn make_span(req: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        request_id = request_id(req.headers()).unwrap_or("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), None);
        headers.insert(X_REQUEST_ID, "abc-123".parse().unwrap());
        assert_eq!(request_id(&headers), Some("abc-123"));
    }
}
