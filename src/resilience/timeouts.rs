//! Timeout selection for upstream calls.
//!
//! # Responsibilities
//! - Decide the deadline of a forwarded call from the gateway default and
//!   the service's fail-on rule
//!
//! # Design Decisions
//! - A fail-on timeout only ever shortens the deadline; a longer one is
//!   ignored so a service cannot hold a request past the gateway default
//! - A zero duration means "not configured"; with neither value set the
//!   built-in default applies, so a call never gets a zero deadline

use std::time::Duration;

use crate::config::{FailOnConfig, DEFAULT_UPSTREAM_TIMEOUT};

/// Deadline for one forwarded call.
pub fn upstream_timeout(default: Duration, fail_on: Option<&FailOnConfig>) -> Duration {
    let configured = fail_on.map(|f| f.timeout).filter(|t| !t.is_zero());
    match configured {
        Some(timeout) if default.is_zero() => timeout,
        Some(timeout) => timeout.min(default),
        None if default.is_zero() => DEFAULT_UPSTREAM_TIMEOUT,
        None => default,
    }
}
