//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated)
//!     → one ServiceConfig per mounted service, held in an ArcSwap slot
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps each service's live ServiceConfig
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Per-request overrides patch a copy, never the loaded value

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, AppConfig, CacheConfig, CircuitBreakerConfig, FailOnConfig, FixedResponse,
    HistoryConfig, HttpStatusRule, ListenerConfig, ObservabilityConfig, RedisConfig,
    ServiceConfig, StorageConfig, StorageKind, TimeoutConfig, UpstreamConfig, ValidateConfig,
    DEFAULT_UPSTREAM_TIMEOUT,
};
