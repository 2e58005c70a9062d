//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarded upstream call:
//!     → timeouts.rs (pick the deadline)
//!     → circuit_breaker.rs (admit or reject, record the outcome)
//!         → backoff.rs (retry delays while waiting for the breaker lock)
//! ```
//!
//! # Design Decisions
//! - Every upstream call has a deadline
//! - Breaker state lives in shared storage, not in the breaker object
//! - A rejected or failed call is never surfaced to the client; the
//!   pipeline falls through to local response generation

pub mod backoff;
pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{BreakerError, BreakerState, CircuitBreaker, Counts, Snapshot};
pub use timeouts::upstream_timeout;
