//! Upstream forwarding.
//!
//! # Responsibilities
//! - Register the request in history before forwarding
//! - Forward method, path, query, headers and body to the upstream
//! - Decide whether the answer counts as a failure (transport error, status
//!   >= 400, fail-on rule, open breaker)
//! - Record successful answers in history and return them
//!
//! # Design Decisions
//! - A failed call falls through to the next stage; the client never sees
//!   an upstream failure as such
//! - The breaker is built per request from the current configuration; its
//!   state lives in the shared breaker store under the upstream URL
//! - The forwarded request is assembled from owned parts so the inbound
//!   request can still be handed to the next stage

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::UpstreamConfig;
use crate::middleware::{content_type, request_config, request_resource, ServiceState, Source, SOURCE_HEADER};
use crate::observability::metrics;
use crate::resilience::{upstream_timeout, BreakerError, CircuitBreaker};
use crate::storage::{buffer_body, HistoryResponse};

/// User agent sent with every forwarded request.
pub const GATEWAY_USER_AGENT: &str = concat!("mock-gateway/", env!("CARGO_PKG_VERSION"));

/// Why a forwarded call did not produce a usable response.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream answered {status}")]
    Status { status: u16 },

    #[error("fail-on rule matched status {status}")]
    FailOn { status: u16 },

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Breaker(BreakerError<std::convert::Infallible>),
}

impl UpstreamError {
    fn outcome(&self) -> &'static str {
        match self {
            UpstreamError::Transport(_) | UpstreamError::InvalidUrl(_) => "error",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Status { .. } | UpstreamError::FailOn { .. } => "failed",
            UpstreamError::Breaker(e) if e.is_rejection() => "rejected",
            UpstreamError::Breaker(_) => "error",
        }
    }
}

impl From<BreakerError<UpstreamError>> for UpstreamError {
    fn from(err: BreakerError<UpstreamError>) -> Self {
        match err {
            BreakerError::Inner(inner) => inner,
            BreakerError::Open => UpstreamError::Breaker(BreakerError::Open),
            BreakerError::TooManyRequests => UpstreamError::Breaker(BreakerError::TooManyRequests),
            BreakerError::LockTimeout { name } => {
                UpstreamError::Breaker(BreakerError::LockTimeout { name })
            }
            BreakerError::Store(e) => UpstreamError::Breaker(BreakerError::Store(e)),
        }
    }
}

/// A request ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Build the forwarded request for `req`, whose path is already relative
    /// to the service.
    pub fn build(req: &Request, upstream: &UpstreamConfig, body: Bytes) -> Self {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let url = format!(
            "{}/{}",
            upstream.url.trim_end_matches('/'),
            path_and_query.trim_start_matches('/')
        );

        let mut headers = req.headers().clone();
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        for (name, value) in &upstream.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid upstream header"),
            }
        }
        headers.insert(USER_AGENT, HeaderValue::from_static(GATEWAY_USER_AGENT));

        Self {
            method: req.method().clone(),
            url,
            headers,
            body,
        }
    }
}

/// A successful upstream answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

/// Send `outbound` and classify the answer.
pub async fn send(
    client: &reqwest::Client,
    upstream: &UpstreamConfig,
    outbound: OutboundRequest,
    timeout: Duration,
) -> Result<UpstreamResponse, UpstreamError> {
    let url = reqwest::Url::parse(&outbound.url)
        .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {e}", outbound.url)))?;

    let response = client
        .request(outbound.method, url)
        .headers(outbound.headers)
        .body(outbound.body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

    let status = response.status();
    let content_type = content_type(response.headers());
    let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

    if upstream
        .fail_on
        .as_ref()
        .is_some_and(|rules| rules.matches_status(status.as_u16()))
    {
        return Err(UpstreamError::FailOn {
            status: status.as_u16(),
        });
    }
    if status.as_u16() >= 400 {
        return Err(UpstreamError::Status {
            status: status.as_u16(),
        });
    }

    Ok(UpstreamResponse {
        status,
        content_type,
        body,
    })
}

fn classify(err: reqwest::Error, timeout: Duration) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(timeout)
    } else {
        UpstreamError::Transport(err)
    }
}

pub async fn forward(State(state): State<Arc<ServiceState>>, mut req: Request, next: Next) -> Response {
    let config = request_config(&req, &state);
    let Some(upstream) = config.upstream.as_ref().filter(|u| !u.url.is_empty()) else {
        return next.run(req).await;
    };

    let resource = request_resource(&req, &config);
    let history = state.db().history().clone();
    let entry = history.set(&resource, &mut req, None).await;
    // History may hold a reused or size-capped body; the wire gets what the
    // client sent unless that was empty.
    let sent = buffer_body(&mut req).await;
    let body = if sent.is_empty() { entry.body } else { sent };

    let outbound = OutboundRequest::build(&req, upstream, body);
    let timeout = upstream_timeout(
        state.upstream_timeout(),
        upstream.fail_on.as_ref(),
    );
    tracing::info!(
        service = %state.name(),
        method = %outbound.method,
        url = %outbound.url,
        "Forwarding to upstream"
    );

    let client = state.client().clone();
    let call = || send(&client, upstream, outbound, timeout);
    let result = match &upstream.circuit_breaker {
        Some(settings) => CircuitBreaker::new(
            upstream.url.clone(),
            settings.clone(),
            state.db().breaker_store(),
        )
        .execute(call)
        .await
        .map_err(UpstreamError::from),
        None => call().await,
    };

    match result {
        Ok(answer) => {
            metrics::record_upstream(state.name(), "success");
            history
                .set(
                    &resource,
                    &mut req,
                    Some(HistoryResponse {
                        data: answer.body.clone(),
                        status_code: answer.status.as_u16(),
                        content_type: answer.content_type.clone(),
                        is_from_upstream: true,
                    }),
                )
                .await;
            upstream_response(answer)
        }
        Err(e) => {
            metrics::record_upstream(state.name(), e.outcome());
            tracing::warn!(
                service = %state.name(),
                upstream = %upstream.url,
                error = %e,
                "Upstream call failed, falling through"
            );
            next.run(req).await
        }
    }
}

fn upstream_response(answer: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(answer.body));
    *response.status_mut() = answer.status;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&answer.content_type) {
        if !answer.content_type.is_empty() {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    headers.insert(SOURCE_HEADER, Source::Upstream.header_value());
    response
}
