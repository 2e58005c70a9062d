//! Redis storage backend.
//!
//! # Key Layout
//! ```text
//! {service}:{table}:{key}          table entries
//! {service}:history:{METHOD}:{url} history entries
//! cb:lock:{name}                   breaker lock (SET NX PX)
//! cb:data:{name}                   breaker state
//! ```
//!
//! # Design Decisions
//! - One multiplexed connection is shared by every service view; each call
//!   clones the handle, no client-side locking
//! - Values are JSON-encoded; undecodable values read as missing
//! - `data()`/`clear()` are SCAN-then-GET/DEL and not atomic against
//!   concurrent writers; they serve diagnostics, not transactions

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use serde_json::Value;

use crate::config::RedisConfig;
use crate::storage::coordinator::{data_key, lock_key, CircuitBreakerStore, LOCK_LEASE};
use crate::storage::table::Table;
use crate::storage::StorageError;

const SCAN_BATCH: usize = 100;

/// Shared Redis storage: one connection for all services.
#[derive(Clone)]
pub struct RedisStorage {
    conn: MultiplexedConnection,
    breaker_store: Arc<RedisBreakerStore>,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage").finish_non_exhaustive()
    }
}

impl RedisStorage {
    /// Connect and verify the server answers PING within the configured timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        let client = redis::Client::open(config.url.as_str())?;

        let connect = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        };

        let conn = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| {
                StorageError::Unavailable(format!(
                    "no answer from {} within {:?}",
                    config.url, config.connect_timeout
                ))
            })??;

        Ok(Self {
            breaker_store: Arc::new(RedisBreakerStore::new(conn.clone())),
            conn,
        })
    }

    /// A table whose keys live under `namespace:`.
    pub fn table(&self, namespace: &str) -> RedisTable {
        RedisTable::new(self.conn.clone(), namespace)
    }

    pub fn breaker_store(&self) -> Arc<RedisBreakerStore> {
        self.breaker_store.clone()
    }
}

/// A Redis-backed table. Keys are `{namespace}:{key}`.
#[derive(Clone)]
pub struct RedisTable {
    conn: MultiplexedConnection,
    namespace: String,
}

impl RedisTable {
    pub fn new(conn: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        namespaced_key(&self.namespace, key)
    }

    async fn keys(&self) -> RedisResult<Vec<String>> {
        let mut conn = self.conn.clone();
        scan_keys(&mut conn, &scan_pattern(&self.namespace)).await
    }
}

#[async_trait]
impl Table for RedisTable {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let raw: RedisResult<Option<Vec<u8>>> = conn.get(&full_key).await;
        match raw {
            Ok(Some(bytes)) => decode(&full_key, &bytes),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %full_key, error = %e, "Redis GET failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let full_key = self.full_key(key);
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %full_key, error = %e, "Value cannot be serialized, write dropped");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(bytes);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }

        let result: RedisResult<()> = cmd.query_async(&mut conn).await;
        if let Err(e) = result {
            tracing::warn!(key = %full_key, error = %e, "Redis SET failed");
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);
        let result: RedisResult<()> = conn.del(&full_key).await;
        if let Err(e) = result {
            tracing::warn!(key = %full_key, error = %e, "Redis DEL failed");
        }
    }

    async fn data(&self) -> HashMap<String, Value> {
        let keys = match self.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Redis SCAN failed");
                return HashMap::new();
            }
        };

        let prefix = format!("{}:", self.namespace);
        let mut conn = self.conn.clone();
        let mut result = HashMap::with_capacity(keys.len());

        for full_key in keys {
            // Entries may vanish between SCAN and GET.
            let raw: RedisResult<Option<Vec<u8>>> = conn.get(&full_key).await;
            let Ok(Some(bytes)) = raw else { continue };
            let Some(value) = decode(&full_key, &bytes) else { continue };
            let key = full_key.strip_prefix(&prefix).unwrap_or(&full_key).to_string();
            result.insert(key, value);
        }

        result
    }

    async fn clear(&self) {
        let keys = match self.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Redis SCAN failed");
                return;
            }
        };

        let mut conn = self.conn.clone();
        for chunk in keys.chunks(SCAN_BATCH) {
            let result: RedisResult<()> = redis::cmd("DEL").arg(chunk).query_async(&mut conn).await;
            if let Err(e) = result {
                tracing::warn!(namespace = %self.namespace, error = %e, "Redis DEL failed");
            }
        }
    }
}

/// Breaker store shared by every gateway instance pointed at the same server.
#[derive(Clone)]
pub struct RedisBreakerStore {
    conn: MultiplexedConnection,
    lease: Duration,
}

impl RedisBreakerStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            lease: LOCK_LEASE,
        }
    }
}

#[async_trait]
impl CircuitBreakerStore for RedisBreakerStore {
    async fn lock(&self, name: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(name))
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(self.lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => Ok(()),
            None => Err(StorageError::LockHeld {
                name: name.to_string(),
            }),
        }
    }

    async fn unlock(&self, name: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(lock_key(name)).await?;
        Ok(())
    }

    async fn get_data(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(data_key(name)).await?;
        Ok(data)
    }

    async fn set_data(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(data_key(name), data).await?;
        Ok(())
    }
}

fn decode(key: &str, bytes: &[u8]) -> Option<Value> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Corrupted record, treating as missing");
            None
        }
    }
}

fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// SCAN pattern matching every key under `namespace:`.
fn scan_pattern(namespace: &str) -> String {
    let mut pattern = String::with_capacity(namespace.len() + 2);
    for c in namespace.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}

async fn scan_keys(conn: &mut MultiplexedConnection, pattern: &str) -> RedisResult<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    // SCAN may return a key more than once.
    keys.sort_unstable();
    keys.dedup();
    Ok(keys)
}
