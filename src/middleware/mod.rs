//! Request mediation pipeline.
//!
//! # Data Flow
//! ```text
//! Inbound request (service prefix already stripped)
//!     → timing.rs          record start, stamp X-Cxs-Duration, metrics
//!     → config_override.rs X-Cxs-* headers patch a copy of the config
//!     → latency_error.rs   sleep, or answer with a simulated error
//!     → cache_read.rs      GET served from history
//!     → upstream.rs        forward, optionally through a circuit breaker
//!     → cache_write.rs     capture the handler's response into history
//!     → downstream handler (generator)
//! ```
//!
//! # Design Decisions
//! - Each stage is an `axum::middleware::from_fn_with_state` function over a
//!   shared [`ServiceState`]; the order is fixed in [`pipeline`]
//! - Stages read the configuration attached to the request by the override
//!   stage, so one request sees one consistent configuration
//! - No stage fails the request: storage or upstream trouble is logged and
//!   the request falls through to the next stage

pub mod cache_read;
pub mod cache_write;
pub mod config_override;
pub mod latency_error;
pub mod timing;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::from_fn_with_state;
use axum::Router;
use tower::ServiceBuilder;

use crate::config::ServiceConfig;
use crate::routing::router::resource_for;
use crate::storage::ServiceDb;

/// Prefix of every gateway-specific header.
pub const HEADER_PREFIX: &str = "x-cxs-";

/// Which part of the gateway produced a response.
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-cxs-source");

/// Time spent in the gateway, e.g. `12.345ms`.
pub const DURATION_HEADER: HeaderName = HeaderName::from_static("x-cxs-duration");

/// Value of [`SOURCE_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Upstream,
    Cache,
    Generated,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Upstream => "upstream",
            Source::Cache => "cache",
            Source::Generated => "generated",
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

/// Everything a service's pipeline needs.
pub struct ServiceState {
    /// Configuration as loaded from disk; replaced on reload.
    base: ArcSwap<ServiceConfig>,
    /// Configuration currently in effect, including any per-request override.
    live: ArcSwap<ServiceConfig>,
    db: ServiceDb,
    client: reqwest::Client,
    upstream_timeout: Duration,
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("service", &self.db.service())
            .field("upstream_timeout", &self.upstream_timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceState {
    pub fn new(
        config: ServiceConfig,
        db: ServiceDb,
        client: reqwest::Client,
        upstream_timeout: Duration,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            base: ArcSwap::new(config.clone()),
            live: ArcSwap::new(config),
            db,
            client,
            upstream_timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.db.service()
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> Arc<ServiceConfig> {
        self.live.load_full()
    }

    /// Replace the loaded configuration.
    pub fn replace_config(&self, config: ServiceConfig) {
        let config = Arc::new(config);
        self.base.store(config.clone());
        self.live.store(config);
    }

    pub fn db(&self) -> &ServiceDb {
        &self.db
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn upstream_timeout(&self) -> Duration {
        self.upstream_timeout
    }

    fn base_config(&self) -> Arc<ServiceConfig> {
        self.base.load_full()
    }

    fn install(&self, config: Arc<ServiceConfig>) {
        self.live.store(config);
    }

    fn restore(&self) {
        self.live.store(self.base.load_full());
    }
}

/// Configuration in effect for one request.
#[derive(Debug, Clone)]
pub struct RequestConfig(pub Arc<ServiceConfig>);

/// Configuration attached to `req`, or the live one if none is attached.
pub fn request_config(req: &Request, state: &ServiceState) -> Arc<ServiceConfig> {
    req.extensions()
        .get::<RequestConfig>()
        .map(|attached| attached.0.clone())
        .unwrap_or_else(|| state.config())
}

/// Declared resource pattern of `req`, used as the history resource.
pub fn request_resource(req: &Request, config: &ServiceConfig) -> String {
    resource_for(&config.responses, req.method(), req.uri().path())
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Wrap `downstream` in the full pipeline.
pub fn pipeline(state: Arc<ServiceState>, downstream: Router) -> Router {
    downstream.layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(state.clone(), timing::track))
            .layer(from_fn_with_state(state.clone(), config_override::apply))
            .layer(from_fn_with_state(state.clone(), latency_error::inject))
            .layer(from_fn_with_state(state.clone(), cache_read::serve_cached))
            .layer(from_fn_with_state(state.clone(), upstream::forward))
            .layer(from_fn_with_state(state, cache_write::record)),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::storage::Storage;

    pub fn state(config: ServiceConfig) -> Arc<ServiceState> {
        state_with_history(
            config,
            HistoryConfig {
                clear_interval: Duration::ZERO,
                ..HistoryConfig::default()
            },
        )
    }

    pub fn state_with_history(config: ServiceConfig, history: HistoryConfig) -> Arc<ServiceState> {
        let storage = Storage::memory();
        let db = storage.service_db(&config.name, &history);
        Arc::new(ServiceState::new(
            config,
            db,
            reqwest::Client::new(),
            Duration::from_secs(5),
        ))
    }
}
