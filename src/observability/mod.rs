//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages and storage produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and histograms via `metrics`)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the HTTP layer into every log line of a request
//! - Metrics are recorded unconditionally; without an installed exporter the
//!   `metrics` macros are no-ops

pub mod logging;
pub mod metrics;
