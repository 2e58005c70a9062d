//! Mock API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ http::server ──▶ /{service}/... dispatch
//!                                            │
//!                                            ▼
//!                      ┌──────────────── middleware pipeline ────────────────┐
//!                      │ timing → config_override → latency_error →           │
//!                      │ cache_read → upstream (+ circuit breaker) →          │
//!                      │ cache_write → routing::generator                     │
//!                      └──────────────────────────┬───────────────────────────┘
//!                                                 │
//!                      storage: history, tables, breaker state (memory | redis)
//! ```

use std::path::PathBuf;

use clap::Parser;

use mock_gateway::lifecycle::startup::{self, StartupOptions};

#[derive(Parser)]
#[command(name = "mock-gateway", version, about = "Mock API gateway", long_about = None)]
struct Args {
    /// TOML configuration file, watched for changes.
    #[arg(short, long, env = "MOCK_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `mock_gateway=trace`. `RUST_LOG` wins.
    #[arg(long)]
    log_level: Option<String>,

    /// Address to listen on, overriding the config file.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    startup::run(StartupOptions {
        config_path: args.config,
        log_level: args.log_level,
        bind_address: args.bind,
    })
    .await
}
