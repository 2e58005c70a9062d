//! Mock API gateway library.
//!
//! Serves declared responses per service, optionally forwarding to a real
//! upstream behind a circuit breaker, injecting latency and errors, and
//! recording every exchange in a per-service history backed by memory or
//! Redis.

// Core subsystems
pub mod config;
pub mod http;
pub mod middleware;
pub mod routing;
pub mod storage;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
