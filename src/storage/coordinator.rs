//! Circuit breaker coordination store.
//!
//! A named-lock plus opaque-blob store. Breakers read-modify-write their
//! serialized state under the lock so several gateway instances can share one
//! open/closed decision.

use async_trait::async_trait;

use crate::storage::StorageError;

/// Lease applied to locks taken through the networked backend. A holder that
/// dies without unlocking loses the lock after this long.
pub const LOCK_LEASE: std::time::Duration = std::time::Duration::from_secs(10);

/// Shared state store for circuit breakers.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    /// Take the named lock. Never waits: a held lock yields
    /// [`StorageError::LockHeld`].
    async fn lock(&self, name: &str) -> Result<(), StorageError>;

    /// Release the named lock. Releasing a free lock is not an error.
    async fn unlock(&self, name: &str) -> Result<(), StorageError>;

    /// Stored state for `name`, or `None` if nothing was saved yet.
    async fn get_data(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored state for `name` with a copy of `data`.
    async fn set_data(&self, name: &str, data: &[u8]) -> Result<(), StorageError>;
}

pub(crate) fn lock_key(name: &str) -> String {
    format!("cb:lock:{name}")
}

pub(crate) fn data_key(name: &str) -> String {
    format!("cb:data:{name}")
}
