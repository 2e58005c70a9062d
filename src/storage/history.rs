//! Request/response history.
//!
//! # Responsibilities
//! - Record the latest request and response per `METHOD:url`
//! - Capture request bodies without consuming them for downstream handlers
//! - Optionally wipe the whole history on a fixed interval
//!
//! # Design Decisions
//! - History is a typed view over a [`Table`] under the `service:history`
//!   namespace, so both backends share one implementation
//! - Bodies are base64-encoded inside the stored JSON record
//! - `max_body_size` bounds only the recorded copy; the request always keeps
//!   its full body
//! - `close()` waits for the auto-clear task to exit, so a clear already in
//!   flight finishes before it returns and none starts afterwards

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::OriginalUri;
use axum::http::{Method, Request};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::HistoryConfig;
use crate::storage::table::{Table, TableExt};

/// Identifies one history slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub method: Method,
    pub url: String,
}

impl HistoryKey {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    /// Key of an inbound request. The body plays no part.
    pub fn of<B>(req: &Request<B>) -> Self {
        Self::new(req.method().clone(), request_url(req))
    }

    fn storage_key(&self) -> String {
        format!("{}:{}", self.method, self.url)
    }
}

impl std::fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Path and query as the client sent it, before any router stripped a
/// prefix.
pub fn request_url<B>(req: &Request<B>) -> String {
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| req.uri());

    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// A recorded response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    pub status_code: u16,
    pub content_type: String,
    pub is_from_upstream: bool,
}

/// The request half of a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
}

/// One history slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Declared route pattern, e.g. `/pets/{id}`.
    pub resource: String,
    #[serde(with = "base64_bytes")]
    pub body: Bytes,
    pub request: RecordedRequest,
    pub response: Option<HistoryResponse>,
}

struct ClearTask {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// History of one service.
pub struct HistoryTable {
    service: String,
    table: Arc<dyn Table>,
    max_body_size: usize,
    clear_task: Mutex<Option<ClearTask>>,
}

impl std::fmt::Debug for HistoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryTable")
            .field("service", &self.service)
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

impl HistoryTable {
    /// Create a history over `table`. When `config.clear_interval` is
    /// non-zero and a Tokio runtime is running, a background task clears the
    /// history at that interval until [`close`](Self::close).
    pub fn new(service: impl Into<String>, table: Arc<dyn Table>, config: &HistoryConfig) -> Self {
        let service = service.into();
        let clear_task = spawn_auto_clear(&service, table.clone(), config.clear_interval);
        Self {
            service,
            table,
            max_body_size: config.max_body_size,
            clear_task: Mutex::new(clear_task),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub async fn get(&self, key: &HistoryKey) -> Option<HistoryEntry> {
        self.table.get_as(&key.storage_key()).await
    }

    /// Record `req`, draining its body into history and replacing it with
    /// an equivalent one.
    ///
    /// A request without a body reuses the body of the existing entry for
    /// the same key. The stored response is replaced by `response`.
    pub async fn set(
        &self,
        resource: &str,
        req: &mut Request<Body>,
        response: Option<HistoryResponse>,
    ) -> HistoryEntry {
        let key = HistoryKey::of(req);
        let storage_key = key.storage_key();

        let full = buffer_body(req).await;
        let mut body = full.clone();
        if full.len() > self.max_body_size {
            tracing::warn!(
                service = %self.service,
                request = %key,
                size = full.len(),
                limit = self.max_body_size,
                "Request body exceeds history limit, recording it empty"
            );
            body = Bytes::new();
        } else if body.is_empty() {
            let previous: Option<HistoryEntry> = self.table.get_as(&storage_key).await;
            if let Some(previous) = previous {
                body = previous.body;
            }
        }

        let entry = HistoryEntry {
            resource: resource.to_string(),
            body,
            request: RecordedRequest {
                method: key.method.to_string(),
                url: key.url,
            },
            response,
        };

        self.table.set_as(&storage_key, &entry, Duration::ZERO).await;
        entry
    }

    /// Attach a response to an existing entry. A missing entry is left
    /// missing.
    pub async fn set_response(&self, key: &HistoryKey, response: HistoryResponse) {
        let storage_key = key.storage_key();
        let existing: Option<HistoryEntry> = self.table.get_as(&storage_key).await;
        let Some(mut entry) = existing else {
            tracing::info!(
                service = %self.service,
                request = %key,
                "No history entry for request, response not recorded"
            );
            return;
        };

        entry.response = Some(response);
        self.table.set_as(&storage_key, &entry, Duration::ZERO).await;
    }

    /// Every live entry keyed `METHOD:url`. Undecodable records are skipped.
    pub async fn data(&self) -> HashMap<String, HistoryEntry> {
        self.table
            .data()
            .await
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(entry) => Some((key, entry)),
                Err(e) => {
                    tracing::warn!(service = %self.service, key = %key, error = %e, "Skipping corrupted history record");
                    None
                }
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.table.clear().await;
    }

    /// Stop the auto-clear task and wait for it to exit. Safe to call
    /// repeatedly, and when no task was started.
    pub async fn close(&self) {
        let Some(task) = self.take_clear_task() else {
            return;
        };
        task.cancelled.store(true, Ordering::SeqCst);
        task.wake.notify_one();
        if let Err(e) = task.handle.await {
            tracing::warn!(service = %self.service, error = %e, "History auto-clear task failed");
        }
        tracing::debug!(service = %self.service, "History auto-clear stopped");
    }

    fn take_clear_task(&self) -> Option<ClearTask> {
        match self.clear_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Drain `req`'s body in full and put back an equivalent one. An unreadable
/// body is replaced by an empty one.
pub async fn buffer_body(req: &mut Request<Body>) -> Bytes {
    let body = std::mem::take(req.body_mut());
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            Bytes::new()
        }
    };
    *req.body_mut() = Body::from(bytes.clone());
    bytes
}

impl Drop for HistoryTable {
    fn drop(&mut self) {
        if let Some(task) = self.take_clear_task() {
            task.cancelled.store(true, Ordering::SeqCst);
            task.handle.abort();
        }
    }
}

fn spawn_auto_clear(service: &str, table: Arc<dyn Table>, interval: Duration) -> Option<ClearTask> {
    if interval.is_zero() {
        return None;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(service = %service, "No runtime available, history auto-clear disabled");
        return None;
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let flag = cancelled.clone();
    let woken = wake.clone();
    let service = service.to_string();

    let handle = runtime.spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = woken.notified() => {}
            }
            if flag.load(Ordering::SeqCst) {
                break;
            }
            table.clear().await;
            tracing::debug!(service = %service, "History cleared");
        }
    });

    Some(ClearTask { cancelled, wake, handle })
}

mod base64_bytes {
    use axum::body::Bytes;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD
            .decode(raw.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
