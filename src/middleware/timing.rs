//! Request timing and per-request metrics.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;

use crate::middleware::{ServiceState, DURATION_HEADER, SOURCE_HEADER};
use crate::observability::metrics;

/// When the gateway started handling a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Outermost stage: records the start time and stamps the elapsed time on
/// every response.
pub async fn track(State(state): State<Arc<ServiceState>>, mut req: Request, next: Next) -> Response {
    let start = Instant::now();
    req.extensions_mut().insert(RequestStart(start));

    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    if let Ok(value) = HeaderValue::from_str(&format_duration(elapsed)) {
        response.headers_mut().insert(DURATION_HEADER, value);
    }

    let source = response
        .headers()
        .get(SOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string();
    metrics::record_request(state.name(), &source, response.status().as_u16(), elapsed);

    response
}

/// Milliseconds with three decimals, e.g. `12.345ms`.
pub fn format_duration(elapsed: Duration) -> String {
    format!("{:.3}ms", elapsed.as_micros() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(12_345)), "12.345ms");
        assert_eq!(format_duration(Duration::ZERO), "0.000ms");
        assert_eq!(format_duration(Duration::from_secs(2)), "2000.000ms");
    }
}
