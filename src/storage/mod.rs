//! Storage subsystem.
//!
//! # Data Flow
//! ```text
//! StorageConfig
//!     → Storage::connect (redis, or memory fallback)
//!     → Storage::service_db(name)  one view per service
//!         → table(name)      namespace "{service}:{name}"
//!         → history()        namespace "{service}:history"
//!         → breaker_store()  global, shared by every service
//! ```
//!
//! # Design Decisions
//! - One physical backend per process; services are separated by key
//!   namespace only
//! - Views of the same service observe each other's writes; views of
//!   different services never see each other's tables
//! - An unreachable Redis at startup degrades to memory with a warning

pub mod coordinator;
pub mod history;
pub mod memory;
pub mod redis;
pub mod table;

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{HistoryConfig, StorageConfig, StorageKind};

pub use coordinator::{CircuitBreakerStore, LOCK_LEASE};
pub use history::{buffer_body, HistoryEntry, HistoryKey, HistoryResponse, HistoryTable, RecordedRequest};
pub use memory::{MemoryBreakerStore, MemoryStorage, MemoryTable};
pub use self::redis::{RedisBreakerStore, RedisStorage, RedisTable};
pub use table::{Table, TableExt};

/// Namespace of the history table inside a service.
pub const HISTORY_TABLE: &str = "history";

/// Error type for storage operations that report failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock already held: {name}")]
    LockHeld { name: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Table name is reserved: {0}")]
    ReservedTable(String),
}

/// The process-wide physical backend.
#[derive(Debug, Clone)]
pub enum Storage {
    Memory(Arc<MemoryBackend>),
    Redis(Arc<RedisBackend>),
}

/// Memory backend plus the history tables already handed out, so that every
/// view of one service shares one auto-clear timer.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    storage: MemoryStorage,
    histories: DashMap<String, Arc<HistoryTable>>,
}

/// Redis backend plus the history tables already handed out.
#[derive(Debug)]
pub struct RedisBackend {
    storage: RedisStorage,
    histories: DashMap<String, Arc<HistoryTable>>,
}

impl Storage {
    /// A fresh in-memory backend.
    pub fn memory() -> Self {
        Storage::Memory(Arc::new(MemoryBackend::default()))
    }

    /// Build the configured backend. A Redis backend that cannot be reached
    /// falls back to memory.
    pub async fn connect(config: &StorageConfig) -> Self {
        match config.kind {
            StorageKind::Memory => Self::memory(),
            StorageKind::Redis => {
                let redis_config = config.redis.clone().unwrap_or_default();
                match RedisStorage::connect(&redis_config).await {
                    Ok(storage) => {
                        tracing::info!(url = %redis_config.url, "Connected to Redis storage");
                        Storage::Redis(Arc::new(RedisBackend {
                            storage,
                            histories: DashMap::new(),
                        }))
                    }
                    Err(e) => {
                        tracing::warn!(
                            url = %redis_config.url,
                            error = %e,
                            "Redis unavailable, falling back to memory storage"
                        );
                        Self::memory()
                    }
                }
            }
        }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            Storage::Memory(_) => StorageKind::Memory,
            Storage::Redis(_) => StorageKind::Redis,
        }
    }

    /// View of this backend scoped to `service`.
    pub fn service_db(&self, service: &str, history: &HistoryConfig) -> ServiceDb {
        let histories = match self {
            Storage::Memory(backend) => &backend.histories,
            Storage::Redis(backend) => &backend.histories,
        };

        let history = histories
            .entry(service.to_string())
            .or_insert_with(|| {
                let table = self.raw_table(&namespace(service, HISTORY_TABLE));
                Arc::new(HistoryTable::new(service, table, history))
            })
            .value()
            .clone();

        ServiceDb {
            service: service.to_string(),
            storage: self.clone(),
            history,
        }
    }

    /// The breaker store shared by every service on this backend.
    pub fn breaker_store(&self) -> Arc<dyn CircuitBreakerStore> {
        match self {
            Storage::Memory(backend) => backend.storage.breaker_store(),
            Storage::Redis(backend) => backend.storage.breaker_store(),
        }
    }

    /// Stop every history timer.
    pub async fn close(&self) {
        let histories: Vec<Arc<HistoryTable>> = match self {
            Storage::Memory(backend) => backend.histories.iter().map(|h| h.value().clone()).collect(),
            Storage::Redis(backend) => backend.histories.iter().map(|h| h.value().clone()).collect(),
        };
        for history in histories {
            history.close().await;
        }
    }

    fn raw_table(&self, namespace: &str) -> Arc<dyn Table> {
        match self {
            Storage::Memory(backend) => backend.storage.table(namespace),
            Storage::Redis(backend) => Arc::new(backend.storage.table(namespace)),
        }
    }
}

/// Storage scoped to one service.
#[derive(Debug, Clone)]
pub struct ServiceDb {
    service: String,
    storage: Storage,
    history: Arc<HistoryTable>,
}

impl ServiceDb {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The named auxiliary table of this service. The history namespace is
    /// reached only through [`history`](Self::history).
    pub fn table(&self, name: &str) -> Result<Arc<dyn Table>, StorageError> {
        if name == HISTORY_TABLE {
            return Err(StorageError::ReservedTable(name.to_string()));
        }
        Ok(self.storage.raw_table(&namespace(&self.service, name)))
    }

    pub fn history(&self) -> &Arc<HistoryTable> {
        &self.history
    }

    pub fn breaker_store(&self) -> Arc<dyn CircuitBreakerStore> {
        self.storage.breaker_store()
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    /// Stop this service's history timer.
    pub async fn close(&self) {
        self.history.close().await;
    }
}

fn namespace(service: &str, table: &str) -> String {
    format!("{service}:{table}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::json;
    use std::time::Duration;

    fn history_config() -> HistoryConfig {
        HistoryConfig {
            clear_interval: Duration::ZERO,
            ..HistoryConfig::default()
        }
    }

    async fn assert_isolation(storage: Storage, suffix: &str) {
        let a = format!("alpha-{suffix}");
        let b = format!("beta-{suffix}");
        let alpha = storage.service_db(&a, &history_config());
        let alpha_again = storage.service_db(&a, &history_config());
        let beta = storage.service_db(&b, &history_config());

        alpha.table("users").unwrap().set("1", json!("ann"), Duration::ZERO).await;

        // Same service: shared state.
        assert_eq!(alpha_again.table("users").unwrap().get("1").await, Some(json!("ann")));
        // Different service or table: isolated.
        assert_eq!(beta.table("users").unwrap().get("1").await, None);
        assert_eq!(alpha.table("orders").unwrap().get("1").await, None);

        let mut req = Request::builder()
            .method(Method::GET)
            .uri("/pets")
            .body(Body::empty())
            .unwrap();
        alpha.history().set("/pets", &mut req, None).await;
        let key = HistoryKey::of(&req);
        assert!(alpha_again.history().get(&key).await.is_some());
        assert!(beta.history().get(&key).await.is_none());
        assert!(alpha.table("users").unwrap().get("GET:/pets").await.is_none());

        // Breaker state is global.
        let breaker = format!("cb-{suffix}");
        alpha.breaker_store().lock(&breaker).await.unwrap();
        assert!(matches!(
            beta.breaker_store().lock(&breaker).await,
            Err(StorageError::LockHeld { .. })
        ));
        beta.breaker_store().unlock(&breaker).await.unwrap();

        alpha.table("users").unwrap().clear().await;
        alpha.history().clear().await;
        storage.close().await;
    }

    #[tokio::test]
    async fn test_memory_service_isolation() {
        assert_isolation(Storage::memory(), "mem").await;
    }

    #[tokio::test]
    async fn test_redis_service_isolation() {
        let Ok(url) = std::env::var("MOCK_GATEWAY_TEST_REDIS") else { return };
        let config = StorageConfig {
            kind: StorageKind::Redis,
            redis: Some(crate::config::RedisConfig {
                url,
                ..Default::default()
            }),
        };
        let storage = Storage::connect(&config).await;
        assert_eq!(storage.kind(), StorageKind::Redis);
        assert_isolation(storage, &uuid::Uuid::new_v4().to_string()).await;
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_memory() {
        let config = StorageConfig {
            kind: StorageKind::Redis,
            redis: Some(crate::config::RedisConfig {
                url: "redis://127.0.0.1:1".to_string(),
                connect_timeout: Duration::from_secs(1),
            }),
        };
        let storage = Storage::connect(&config).await;
        assert_eq!(storage.kind(), StorageKind::Memory);
    }

    #[tokio::test]
    async fn test_service_views_share_history_table() {
        let storage = Storage::memory();
        let first = storage.service_db("svc", &history_config());
        let second = storage.service_db("svc", &history_config());
        assert!(Arc::ptr_eq(first.history(), second.history()));
    }

    #[tokio::test]
    async fn test_history_table_name_is_reserved() {
        let storage = Storage::memory();
        let db = storage.service_db("svc", &history_config());
        assert!(matches!(db.table(HISTORY_TABLE), Err(StorageError::ReservedTable(_))));

        let mut req = Request::builder()
            .method(Method::GET)
            .uri("/pets")
            .body(Body::empty())
            .unwrap();
        db.history().set("/pets", &mut req, None).await;
        db.table("histories").unwrap().clear().await;
        assert_eq!(db.history().data().await.len(), 1);
    }

    #[test]
    fn test_namespace_layout() {
        assert_eq!(namespace("petstore", HISTORY_TABLE), "petstore:history");
        assert_eq!(namespace("petstore", "users"), "petstore:users");
    }
}
