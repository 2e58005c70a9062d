//! In-process storage backend.
//!
//! # Responsibilities
//! - Hold every service's tables in one process-wide map keyed `service:table`
//! - Expire entries lazily on read
//! - Provide a process-local circuit breaker store
//!
//! # Design Decisions
//! - `DashMap` shards give concurrent readers and exclusive writers per shard
//! - Expired entries are removed with `remove_if`, which re-checks expiry under
//!   the shard's write lock so a concurrent fresh write is never deleted
//! - Breaker locks carry no lease: they live and die with the process

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use crate::storage::coordinator::CircuitBreakerStore;
use crate::storage::table::Table;
use crate::storage::StorageError;

/// Shared in-memory storage. One instance backs every service view.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: DashMap<String, Arc<MemoryTable>>,
    breaker_store: Arc<MemoryBreakerStore>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the table stored under `namespace`, creating it on first use.
    pub fn table(&self, namespace: &str) -> Arc<MemoryTable> {
        if let Some(table) = self.tables.get(namespace) {
            return table.value().clone();
        }
        self.tables
            .entry(namespace.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// The process-wide breaker store, shared by all services.
    pub fn breaker_store(&self) -> Arc<MemoryBreakerStore> {
        self.breaker_store.clone()
    }

    /// Number of tables created so far.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Duration) -> Self {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        Self { value, expires_at }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A single in-memory table.
#[derive(Debug, Default)]
pub struct MemoryTable {
    entries: DashMap<String, Entry>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not
    /// read since.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Table for MemoryTable {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }

        // Read guard is released; re-check under the write lock.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(Instant::now()));
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn data(&self) -> HashMap<String, Value> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value.clone()))
            .collect()
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}

/// Process-local circuit breaker store.
#[derive(Debug, Default)]
pub struct MemoryBreakerStore {
    locks: DashMap<String, ()>,
    data: DashMap<String, Vec<u8>>,
}

impl MemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircuitBreakerStore for MemoryBreakerStore {
    async fn lock(&self, name: &str) -> Result<(), StorageError> {
        match self.locks.entry(name.to_string()) {
            MapEntry::Occupied(_) => Err(StorageError::LockHeld {
                name: name.to_string(),
            }),
            MapEntry::Vacant(slot) => {
                slot.insert(());
                Ok(())
            }
        }
    }

    async fn unlock(&self, name: &str) -> Result<(), StorageError> {
        self.locks.remove(name);
        Ok(())
    }

    async fn get_data(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(name).map(|data| data.value().clone()))
    }

    async fn set_data(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        self.data.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
