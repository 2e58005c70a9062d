//! Per-request configuration overrides.
//!
//! # Headers
//! - `X-Cxs-Cache-Requests`: bool
//! - `X-Cxs-Latency`: duration (`"200ms"`)
//! - `X-Cxs-Upstream-Url`: URL, empty disables forwarding
//! - `X-Cxs-Validate-Request`: bool
//! - `X-Cxs-Validate-Response`: bool
//!
//! # Design Decisions
//! - Header names are case-insensitive; the first value of a header wins
//! - Unknown headers are ignored; an unparsable value leaves its field alone
//! - The patched copy is attached to the request and installed as the
//!   service's live configuration. A guard puts the loaded configuration
//!   back when the request finishes, however it finishes

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::config::schema::parse_duration;
use crate::config::{ServiceConfig, UpstreamConfig};
use crate::middleware::{RequestConfig, ServiceState, HEADER_PREFIX};

/// A recognized override.
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    CacheRequests(bool),
    Latency(std::time::Duration),
    UpstreamUrl(String),
    ValidateRequest(bool),
    ValidateResponse(bool),
}

/// Extract every recognized override from `headers`.
pub fn parse_overrides(headers: &HeaderMap) -> Vec<Override> {
    headers
        .keys()
        .filter_map(|name| {
            let key = name.as_str().strip_prefix(HEADER_PREFIX)?;
            // HeaderMap::get returns the first value.
            let value = headers.get(name)?.to_str().ok()?.trim();
            parse_override(key, value)
        })
        .collect()
}

fn parse_override(key: &str, value: &str) -> Option<Override> {
    match key {
        "cache-requests" => parse_bool(value).map(Override::CacheRequests),
        "latency" => parse_duration(value).ok().map(Override::Latency),
        "upstream-url" => Some(Override::UpstreamUrl(value.to_string())),
        "validate-request" => parse_bool(value).map(Override::ValidateRequest),
        "validate-response" => parse_bool(value).map(Override::ValidateResponse),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// A copy of `original` with `overrides` applied.
pub fn apply_overrides(original: &ServiceConfig, overrides: &[Override]) -> ServiceConfig {
    let mut config = original.clone();
    for o in overrides {
        match o {
            Override::CacheRequests(on) => config.cache.requests = *on,
            Override::Latency(latency) => {
                config.latency = *latency;
                // The percentile table would shadow a fixed latency.
                config.latencies.clear();
            }
            Override::UpstreamUrl(url) if url.is_empty() => config.upstream = None,
            Override::UpstreamUrl(url) => {
                config.upstream.get_or_insert_with(UpstreamConfig::default).url = url.clone();
            }
            Override::ValidateRequest(on) => config.validate.request = *on,
            Override::ValidateResponse(on) => config.validate.response = *on,
        }
    }
    config
}

/// Restores the loaded configuration on drop.
struct RestoreGuard {
    state: Arc<ServiceState>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        self.state.restore();
        tracing::debug!(service = %self.state.name(), "Configuration override released");
    }
}

pub async fn apply(State(state): State<Arc<ServiceState>>, mut req: Request, next: Next) -> Response {
    let overrides = parse_overrides(req.headers());
    if overrides.is_empty() {
        let config = state.config();
        req.extensions_mut().insert(RequestConfig(config));
        return next.run(req).await;
    }

    let patched = Arc::new(apply_overrides(&state.base_config(), &overrides));
    tracing::debug!(service = %state.name(), overrides = ?overrides, "Applying configuration override");

    state.install(patched.clone());
    let _guard = RestoreGuard {
        state: state.clone(),
    };

    req.extensions_mut().insert(RequestConfig(patched));
    next.run(req).await
}
