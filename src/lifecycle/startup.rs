//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics and storage in dependency order
//! - Start the config watcher and the signal handler
//! - Bind the listener last and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: a missing or invalid config file is fatal at startup
//! - An unreachable Redis is not fatal; storage falls back to memory

use std::path::PathBuf;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::watcher::ConfigWatcher;
use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};

/// Command-line choices that shape startup.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// TOML configuration file; defaults apply when absent.
    pub config_path: Option<PathBuf>,
    /// Overrides `observability.log_level`.
    pub log_level: Option<String>,
    /// Overrides `listener.bind_address`.
    pub bind_address: Option<String>,
}

/// Start the gateway and serve until a termination signal arrives.
pub async fn run(options: StartupOptions) -> anyhow::Result<()> {
    let mut config = match &options.config_path {
        Some(path) => load_config(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(address) = &options.bind_address {
        config.listener.bind_address = address.clone();
    }

    let level = options
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init_logging(&level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        storage = %config.storage.kind,
        "mock-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops when dropped; keep it for the life of the server.
    let (config_updates, _watcher) = match &options.config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (updates, None)
                }
            }
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .with_context(|| format!("binding {}", config.listener.bind_address))?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    let server = HttpServer::new(config).await;
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
