//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: health, admin API, one pipeline per service
//! - Wire up middleware (request ID, tracing, timeout, concurrency limit)
//! - Dispatch `/{service}/...` to that service's pipeline
//! - Apply configuration reloads without dropping connections
//! - Drain on shutdown and release storage
//!
//! # Design Decisions
//! - The service table lives behind an `ArcSwap` so reloads can add, remove
//!   and update services while requests are in flight
//! - A service's pipeline sees the path with the service prefix stripped;
//!   the full URI stays available as `OriginalUri` for history keys

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::extract::{OriginalUri, Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin::setup_admin_router;
use crate::config::{AdminConfig, AppConfig, HistoryConfig, ServiceConfig};
use crate::http::request::make_span;
use crate::middleware::{pipeline, ServiceState};
use crate::routing::generator::fixed_responses;
use crate::storage::Storage;

/// A mounted service: its shared state and the pipeline serving it.
#[derive(Clone)]
pub struct MountedService {
    pub state: Arc<ServiceState>,
    router: Router,
}

impl std::fmt::Debug for MountedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedService")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

pub type ServiceTable = BTreeMap<String, MountedService>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<ArcSwap<ServiceTable>>,
    pub admin: Arc<ArcSwap<AdminConfig>>,
    pub storage: Storage,
    client: reqwest::Client,
    history: HistoryConfig,
    upstream_timeout: Duration,
}

impl AppState {
    fn new(config: &AppConfig, storage: Storage) -> Self {
        let state = Self {
            services: Arc::new(ArcSwap::from_pointee(BTreeMap::new())),
            admin: Arc::new(ArcSwap::from_pointee(config.admin.clone())),
            storage,
            client: reqwest::Client::new(),
            history: config.history.clone(),
            upstream_timeout: config.timeouts.upstream,
        };
        state.apply(config);
        state
    }

    fn mount(&self, config: ServiceConfig) -> MountedService {
        let db = self.storage.service_db(&config.name, &self.history);
        let state = Arc::new(ServiceState::new(
            config,
            db,
            self.client.clone(),
            self.upstream_timeout,
        ));
        let router = pipeline(state.clone(), fixed_responses(state.clone()));
        MountedService { state, router }
    }

    /// Bring the service table in line with `config`. Existing services keep
    /// their storage and get the new configuration.
    pub fn apply(&self, config: &AppConfig) {
        let current = self.services.load_full();
        let mut next = ServiceTable::new();

        for service in &config.services {
            let mounted = match current.get(&service.name) {
                Some(existing) => {
                    existing.state.replace_config(service.clone());
                    existing.clone()
                }
                None => {
                    tracing::info!(service = %service.name, "Mounting service");
                    self.mount(service.clone())
                }
            };
            next.insert(service.name.clone(), mounted);
        }

        for name in current.keys().filter(|name| !next.contains_key(*name)) {
            tracing::info!(service = %name, "Unmounting service");
        }

        self.services.store(Arc::new(next));
        self.admin.store(Arc::new(config.admin.clone()));
    }

    pub fn service(&self, name: &str) -> Option<MountedService> {
        self.services.load().get(name).cloned()
    }

    /// Stop every service's history timer and the storage backend.
    pub async fn close(&self) {
        let services = self.services.load_full();
        for service in services.values() {
            service.state.db().close().await;
        }
        self.storage.close().await;
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
    state: AppState,
}

impl HttpServer {
    /// Connect the configured storage and build the server.
    pub async fn new(config: AppConfig) -> Self {
        let storage = Storage::connect(&config.storage).await;
        Self::with_storage(config, storage)
    }

    /// Build the server over an existing storage backend.
    pub fn with_storage(config: AppConfig, storage: Storage) -> Self {
        let state = AppState::new(&config, storage);
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/{service}", any(dispatch))
            .route("/{service}/{*rest}", any(dispatch))
            .with_state(state.clone())
            .merge(setup_admin_router(state))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(make_span))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                    .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections)),
            )
    }

    /// The complete router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener, until
    /// `shutdown` fires. Configurations received on `config_updates` are
    /// applied as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<AppConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.config.services.len(),
            storage = %self.state.storage.kind(),
            "HTTP server starting"
        );

        let reload_state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                tracing::info!(services = config.services.len(), "Applying reloaded configuration");
                reload_state.apply(&config);
            }
        });

        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await;

        reloader.abort();
        self.state.close().await;
        tracing::info!("HTTP server stopped");
        result
    }
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "storage": state.storage.kind(),
        "services": state.services.load().len(),
    }))
}

/// Hand the request to the pipeline of the service named by its first path
/// segment.
async fn dispatch(State(state): State<AppState>, mut req: Request) -> Response {
    let (name, rest) = split_service(req.uri().path());
    let Some(service) = state.service(&name) else {
        return (StatusCode::NOT_FOUND, format!("Unknown service '{name}'")).into_response();
    };

    if req.extensions().get::<OriginalUri>().is_none() {
        let original = req.uri().clone();
        req.extensions_mut().insert(OriginalUri(original));
    }
    match service_uri(req.uri(), &rest) {
        Some(uri) => *req.uri_mut() = uri,
        None => return (StatusCode::BAD_REQUEST, "Invalid request path").into_response(),
    }

    match service.router.oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Split `/name/rest` into `("name", "/rest")`.
fn split_service(path: &str) -> (String, String) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((name, rest)) => (name.to_string(), format!("/{rest}")),
        None => (trimmed.to_string(), "/".to_string()),
    }
}

fn service_uri(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}
