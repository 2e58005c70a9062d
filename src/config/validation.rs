//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ratios, percentiles, status codes, limits and
//!   timeouts that must be non-zero)
//! - Detect duplicate service names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{parse_percentile, parse_status_range, AppConfig, ServiceConfig, StorageKind};

/// Top-level paths the gateway serves itself.
const RESERVED_NAMES: &[&str] = &["healthz"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a whole application configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.timeouts.upstream.is_zero() {
        errors.push(ValidationError::new("timeouts.upstream", "must be greater than 0"));
    }

    if config.storage.kind == StorageKind::Redis && config.storage.redis.is_none() {
        // Not fatal at runtime (storage falls back to memory) but almost certainly a typo.
        errors.push(ValidationError::new("storage.redis", "required when type = \"redis\""));
    }

    let mut seen = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("services[{i}].name"),
                format!("duplicate service '{}'", service.name),
            ));
        }
        validate_service(&format!("services[{i}]"), service, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one service configuration, appending problems to `errors`.
pub fn validate_service(prefix: &str, service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    if service.name.is_empty() || service.name.contains('/') || service.name.starts_with('.') {
        errors.push(ValidationError::new(
            format!("{prefix}.name"),
            "must be non-empty, contain no '/' and not start with '.'",
        ));
    } else if RESERVED_NAMES.contains(&service.name.as_str()) {
        errors.push(ValidationError::new(
            format!("{prefix}.name"),
            format!("'{}' is reserved", service.name),
        ));
    }

    for key in service.latencies.keys() {
        if parse_percentile(key).is_none() {
            errors.push(ValidationError::new(
                format!("{prefix}.latencies.{key}"),
                "key must look like p1..p100",
            ));
        }
    }

    for (key, code) in &service.errors {
        if parse_percentile(key).is_none() {
            errors.push(ValidationError::new(
                format!("{prefix}.errors.{key}"),
                "key must look like p1..p100",
            ));
        }
        if !(100..=599).contains(code) {
            errors.push(ValidationError::new(
                format!("{prefix}.errors.{key}"),
                format!("{code} is not an HTTP status"),
            ));
        }
    }

    if let Some(upstream) = &service.upstream {
        if !upstream.url.is_empty() && url::Url::parse(&upstream.url).is_err() {
            errors.push(ValidationError::new(
                format!("{prefix}.upstream.url"),
                format!("'{}' is not a URL", upstream.url),
            ));
        }

        if let Some(fail_on) = &upstream.fail_on {
            for (i, rule) in fail_on.http_status.iter().enumerate() {
                if let Some(range) = &rule.range {
                    if parse_status_range(range).is_none() {
                        errors.push(ValidationError::new(
                            format!("{prefix}.upstream.fail_on.http_status[{i}].range"),
                            format!("'{range}' is not a 'lo-hi' range"),
                        ));
                    }
                }
            }
        }

        if let Some(cb) = &upstream.circuit_breaker {
            if !(cb.failure_ratio > 0.0 && cb.failure_ratio <= 1.0) {
                errors.push(ValidationError::new(
                    format!("{prefix}.upstream.circuit_breaker.failure_ratio"),
                    "must be in (0.0, 1.0]",
                ));
            }
        }
    }

    for (i, response) in service.responses.iter().enumerate() {
        if !response.path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{prefix}.responses[{i}].path"),
                "must start with '/'",
            ));
        }
        if axum::http::StatusCode::from_u16(response.status).is_err() {
            errors.push(ValidationError::new(
                format!("{prefix}.responses[{i}].status"),
                format!("{} is not an HTTP status", response.status),
            ));
        }
    }
}
