//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Durations are written as human strings (`"250ms"`, `"1m"`).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Shared storage backend for history, tables and breaker state.
    pub storage: StorageConfig,

    /// Request history settings.
    pub history: HistoryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Declared services, each mounted under `/{name}`.
    pub services: Vec<ServiceConfig>,
}

impl AppConfig {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2200").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2200".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Which physical backend stores service data.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local maps.
    #[default]
    Memory,
    /// Shared Redis server.
    Redis,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Memory => write!(f, "memory"),
            StorageKind::Redis => write!(f, "redis"),
        }
    }
}

/// Shared storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type.
    #[serde(rename = "type")]
    pub kind: StorageKind,

    /// Redis connection settings, required when `type = "redis"`.
    pub redis: Option<RedisConfig>,
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL (e.g., "redis://127.0.0.1:6379/0").
    pub url: String,

    /// How long to wait for the initial connection and PING.
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Request history configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Interval at which each service's history is wiped. Zero disables it.
    #[serde(with = "duration_str")]
    pub clear_interval: Duration,

    /// Largest request/response body captured into history, in bytes.
    pub max_body_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            clear_interval: Duration::from_secs(5 * 60),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Upstream deadline used when nothing else is configured.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for one inbound request, in seconds.
    pub request_secs: u64,

    /// Default timeout for forwarded upstream calls.
    #[serde(with = "duration_str")]
    pub upstream: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            upstream: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Require a bearer key on admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Configuration of one mocked service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name; the service is mounted under `/{name}`.
    pub name: String,

    /// Optional real upstream to forward to before generating a response.
    pub upstream: Option<UpstreamConfig>,

    /// Fixed latency used when no `latencies` table is configured.
    #[serde(with = "duration_str")]
    pub latency: Duration,

    /// Latency by percentile, keyed `p50`, `p99`, ...
    #[serde(with = "duration_map")]
    pub latencies: BTreeMap<String, Duration>,

    /// Simulated error status by percentile, keyed `p5`, `p10`, ...
    pub errors: BTreeMap<String, u16>,

    /// Response caching.
    pub cache: CacheConfig,

    /// Validation toggles, consumed by the response generator.
    pub validate: ValidateConfig,

    /// Fixed responses served when nothing upstream answers.
    pub responses: Vec<FixedResponse>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            upstream: None,
            latency: Duration::ZERO,
            latencies: BTreeMap::new(),
            errors: BTreeMap::new(),
            cache: CacheConfig::default(),
            validate: ValidateConfig::default(),
            responses: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Create a config with defaults for the named service.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Configured upstream URL, if forwarding is enabled.
    pub fn upstream_url(&self) -> Option<&str> {
        self.upstream
            .as_ref()
            .map(|u| u.url.as_str())
            .filter(|u| !u.is_empty())
    }

    /// Pick the latency for a draw in `1..=100`.
    ///
    /// Without a percentile table the fixed `latency` applies. With one, the
    /// first bucket whose threshold is at or above the draw wins, and a draw
    /// past every bucket means no delay.
    pub fn latency_for(&self, draw: u8) -> Duration {
        let buckets = percentile_buckets(&self.latencies);
        if buckets.is_empty() {
            return self.latency;
        }
        pick_bucket(&buckets, draw).unwrap_or(Duration::ZERO)
    }

    /// Pick a simulated error status for a draw in `1..=100`.
    pub fn error_for(&self, draw: u8) -> Option<u16> {
        let buckets = percentile_buckets(&self.errors);
        pick_bucket(&buckets, draw).filter(|code| *code > 0)
    }
}

/// Parse `pNN` keys into buckets sorted ascending by threshold.
/// Keys that do not parse are skipped.
pub fn percentile_buckets<V: Copy>(map: &BTreeMap<String, V>) -> Vec<(u8, V)> {
    let mut buckets: Vec<(u8, V)> = map
        .iter()
        .filter_map(|(k, v)| parse_percentile(k).map(|p| (p, *v)))
        .collect();
    buckets.sort_by_key(|(p, _)| *p);
    buckets
}

/// Parse a `pNN` percentile key.
pub fn parse_percentile(key: &str) -> Option<u8> {
    key.strip_prefix('p')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=100).contains(n))
}

fn pick_bucket<V: Copy>(buckets: &[(u8, V)], draw: u8) -> Option<V> {
    buckets
        .iter()
        .find(|(threshold, _)| draw <= *threshold)
        .map(|(_, v)| *v)
}

/// Cache configuration for a service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve repeated GET requests from history.
    pub requests: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { requests: true }
    }
}

/// Validation toggles.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct ValidateConfig {
    pub request: bool,
    pub response: bool,
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to.
    pub url: String,

    /// Extra headers added to every forwarded request.
    pub headers: BTreeMap<String, String>,

    /// Conditions under which a response still counts as failed.
    pub fail_on: Option<FailOnConfig>,

    /// Circuit breaker settings. Absent means no breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Fail-on rules for upstream responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct FailOnConfig {
    /// Client timeout for the forwarded call. Only takes effect when shorter
    /// than the gateway-wide upstream timeout.
    #[serde(with = "duration_str")]
    pub timeout: Duration,

    /// Statuses treated as failures.
    pub http_status: Vec<HttpStatusRule>,
}

impl FailOnConfig {
    /// Returns true if any status rule matches.
    pub fn matches_status(&self, status: u16) -> bool {
        self.http_status.iter().any(|rule| rule.matches(status))
    }
}

/// A status rule: an exact code, an inclusive `"lo-hi"` range, or both.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct HttpStatusRule {
    pub exact: Option<u16>,
    pub range: Option<String>,
}

impl HttpStatusRule {
    pub fn matches(&self, status: u16) -> bool {
        if self.exact == Some(status) {
            return true;
        }
        match self.range.as_deref().and_then(parse_status_range) {
            Some((lo, hi)) => status >= lo && status <= hi,
            None => false,
        }
    }
}

/// Parse an inclusive `"500-599"` range.
pub fn parse_status_range(range: &str) -> Option<(u16, u16)> {
    let (lo, hi) = range.split_once('-')?;
    let lo = lo.trim().parse().ok()?;
    let hi = hi.trim().parse().ok()?;
    Some((lo, hi))
}

/// Circuit breaker tunables.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// How long the breaker stays open before probing.
    #[serde(with = "duration_str")]
    pub timeout: Duration,

    /// Probe requests allowed while half-open.
    pub max_requests: u32,

    /// Cyclic period after which closed-state counts reset. Zero never resets.
    #[serde(with = "duration_str")]
    pub interval: Duration,

    /// Requests observed before the failure ratio is evaluated.
    pub min_requests: u32,

    /// Failure ratio (0.0-1.0] at which the breaker opens.
    pub failure_ratio: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_requests: 1,
            interval: Duration::ZERO,
            min_requests: 3,
            failure_ratio: 0.6,
        }
    }
}

/// A canned response for the fixed-response generator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FixedResponse {
    pub method: String,
    /// Path pattern relative to the service, `{param}` segments allowed.
    pub path: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl Default for FixedResponse {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            status: 200,
            content_type: "application/json".to_string(),
            body: String::new(),
        }
    }
}

/// Parse a human duration. `"0"` and the empty string mean zero.
pub fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    let value = value.trim();
    if value.is_empty() || value == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value)
}

mod duration_str {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod duration_map {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &BTreeMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            value
                .iter()
                .map(|(k, v)| (k, humantime::format_duration(*v).to_string())),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Duration>, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                parse_duration(&v)
                    .map(|d| (k, d))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_selection() {
        let mut cfg = ServiceConfig::named("svc");
        cfg.latencies.insert("p50".into(), Duration::from_millis(10));
        cfg.latencies.insert("p99".into(), Duration::from_millis(100));
        cfg.latencies.insert("bogus".into(), Duration::from_secs(9));

        assert_eq!(cfg.latency_for(1), Duration::from_millis(10));
        assert_eq!(cfg.latency_for(50), Duration::from_millis(10));
        assert_eq!(cfg.latency_for(51), Duration::from_millis(100));
        assert_eq!(cfg.latency_for(100), Duration::ZERO);
    }

    #[test]
    fn test_fixed_latency_without_table() {
        let mut cfg = ServiceConfig::named("svc");
        cfg.latency = Duration::from_millis(20);
        assert_eq!(cfg.latency_for(77), Duration::from_millis(20));
    }

    #[test]
    fn test_error_selection() {
        let mut cfg = ServiceConfig::named("svc");
        assert_eq!(cfg.error_for(1), None);

        cfg.errors.insert("p10".into(), 500);
        cfg.errors.insert("p20".into(), 400);
        assert_eq!(cfg.error_for(5), Some(500));
        assert_eq!(cfg.error_for(15), Some(400));
        assert_eq!(cfg.error_for(21), None);
    }

    #[test]
    fn test_percentile_keys_sort_numerically() {
        let mut map = BTreeMap::new();
        map.insert("p100".to_string(), 3);
        map.insert("p9".to_string(), 1);
        map.insert("p50".to_string(), 2);
        map.insert("p0".to_string(), 0);
        assert_eq!(percentile_buckets(&map), vec![(9, 1), (50, 2), (100, 3)]);
    }

    #[test]
    fn test_status_rules() {
        let exact = HttpStatusRule { exact: Some(418), range: None };
        assert!(exact.matches(418));
        assert!(!exact.matches(419));

        let range = HttpStatusRule { exact: None, range: Some("200-204".into()) };
        assert!(range.matches(200));
        assert!(range.matches(204));
        assert!(!range.matches(205));

        let broken = HttpStatusRule { exact: None, range: Some("abc".into()) };
        assert!(!broken.matches(200));
    }

    #[test]
    fn test_service_config_from_toml() {
        let cfg: ServiceConfig = toml::from_str(
            r#"
            name = "petstore"
            latency = "150ms"

            [latencies]
            p50 = "10ms"

            [errors]
            p5 = 503

            [cache]
            requests = false

            [upstream]
            url = "http://localhost:9000"

            [upstream.fail_on]
            timeout = "2s"
            http_status = [{ exact = 400 }, { range = "500-599" }]

            [upstream.circuit_breaker]
            min_requests = 5
            failure_ratio = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.latency, Duration::from_millis(150));
        assert_eq!(cfg.latencies["p50"], Duration::from_millis(10));
        assert_eq!(cfg.errors["p5"], 503);
        assert!(!cfg.cache.requests);
        assert_eq!(cfg.upstream_url(), Some("http://localhost:9000"));

        let upstream = cfg.upstream.unwrap();
        let fail_on = upstream.fail_on.unwrap();
        assert_eq!(fail_on.timeout, Duration::from_secs(2));
        assert!(fail_on.matches_status(400));
        assert!(fail_on.matches_status(503));
        assert!(!fail_on.matches_status(404));

        let cb = upstream.circuit_breaker.unwrap();
        assert_eq!(cb.min_requests, 5);
        assert_eq!(cb.max_requests, 1);
        assert_eq!(cb.timeout, Duration::from_secs(60));
    }
}
