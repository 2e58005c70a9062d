//! Simulated latency and errors.
//!
//! Each request draws two independent numbers in `1..=100`: one picks the
//! latency bucket, the other the error bucket. A selected error answers
//! immediately; otherwise the request is delayed and passed on.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::middleware::{request_config, ServiceState, Source, SOURCE_HEADER};
use crate::observability::metrics;

pub async fn inject(State(state): State<Arc<ServiceState>>, req: Request, next: Next) -> Response {
    let config = request_config(&req, &state);
    let (latency_draw, error_draw) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(1..=100u8), rng.gen_range(1..=100u8))
    };

    if let Some(code) = config.error_for(error_draw) {
        tracing::info!(service = %state.name(), status = code, "Simulated error");
        metrics::record_simulated_error(state.name(), code);
        return simulated_error(code);
    }

    let latency = config.latency_for(latency_draw);
    if !latency.is_zero() {
        tracing::debug!(service = %state.name(), delay = ?latency, "Simulated latency");
        tokio::time::sleep(latency).await;
    }

    next.run(req).await
}

/// Response for a simulated error status.
pub fn simulated_error(code: u16) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (
        status,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Simulated error",
    )
        .into_response();
    response
        .headers_mut()
        .insert(SOURCE_HEADER, Source::Generated.header_value());
    response
}
