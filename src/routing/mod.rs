//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request (method, service-relative path)
//!     → router.rs    (lookup over the service's declared responses)
//!     → matcher.rs   (method and `{param}` path pattern conditions)
//!     → Return: matched Route with captured params, or no match
//!
//! generator.rs uses the match to answer as the downstream handler;
//! the pipeline uses the matched pattern as the history resource.
//! ```
//!
//! # Design Decisions
//! - Routes compiled from the configuration in effect for the request
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route
//! - First declared match wins

pub mod generator;
pub mod matcher;
pub mod router;
