//! Key/value table contract shared by every backend.
//!
//! # Responsibilities
//! - Define the `Table` operations (get/set/delete/data/clear) with TTL
//! - Offer typed helpers on top of the JSON value model
//!
//! # Design Decisions
//! - Values are `serde_json::Value`: the memory backend stores them as-is,
//!   the networked backend stores their JSON encoding
//! - Operations never fail from the caller's point of view; backend trouble
//!   is logged and reads degrade to not-found
//! - Reads hand out owned copies, so callers cannot mutate stored state

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A namespaced key/value store with optional per-entry expiry.
///
/// A `ttl` of zero stores the value without expiry.
#[async_trait]
pub trait Table: Send + Sync {
    /// Fetch a value. Expired or undecodable entries read as `None`.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value, ttl: Duration);

    /// Remove a value. Removing a missing key is a no-op.
    async fn delete(&self, key: &str);

    /// Snapshot of every live entry.
    async fn data(&self) -> HashMap<String, Value>;

    /// Remove every entry.
    async fn clear(&self);
}

/// Typed access on top of any [`Table`].
#[async_trait]
pub trait TableExt: Table {
    /// Fetch and decode a value. Values of another shape read as `None`.
    async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Stored value has unexpected shape");
                None
            }
        }
    }

    /// Encode and store a value. A value that cannot be encoded leaves the
    /// previous entry untouched.
    async fn set_as<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(encoded) => self.set(key, encoded, ttl).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Value cannot be serialized, write dropped");
            }
        }
    }
}

impl<T: Table + ?Sized> TableExt for T {}
