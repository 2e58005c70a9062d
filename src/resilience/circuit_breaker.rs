//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: probing whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= min_requests && failures/requests >= failure_ratio
//! Open → Half-Open: after `timeout`
//! Half-Open → Closed: `max_requests` consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - The breaker holds no state of its own. Its snapshot lives in a
//!   [`CircuitBreakerStore`] and is read-modify-written under the store's
//!   named lock, so gateway instances sharing a store share one decision
//! - The protected call runs outside the lock
//! - Lock acquisition retries with backoff but never waits longer than the
//!   lock lease
//! - Once the call ran, its result is returned even if recording the outcome
//!   fails; that outcome is then missing from the counts
//! - Expiry timestamps are wall-clock milliseconds so they stay meaningful
//!   across processes

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::storage::{CircuitBreakerStore, StorageError, LOCK_LEASE};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Request counts for the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Persisted breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub state: BreakerState,
    pub generation: u64,
    pub counts: Counts,
    /// Unix milliseconds at which the current generation ends. Zero means
    /// never.
    pub expiry_unix_ms: u64,
}

impl Snapshot {
    /// A closed breaker starting its first generation at `now`.
    fn fresh(now: u64, settings: &CircuitBreakerConfig) -> Self {
        let mut snapshot = Self::default();
        snapshot.new_generation(now, settings);
        snapshot.generation = 0;
        snapshot
    }

    /// Advance time-based transitions and return the resulting state.
    fn current_state(&mut self, now: u64, settings: &CircuitBreakerConfig) -> BreakerState {
        match self.state {
            BreakerState::Closed => {
                if self.expiry_unix_ms != 0 && self.expiry_unix_ms <= now {
                    self.new_generation(now, settings);
                }
            }
            BreakerState::Open => {
                if self.expiry_unix_ms <= now {
                    self.set_state(BreakerState::HalfOpen, now, settings);
                }
            }
            BreakerState::HalfOpen => {}
        }
        self.state
    }

    fn set_state(&mut self, state: BreakerState, now: u64, settings: &CircuitBreakerConfig) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.new_generation(now, settings);
    }

    fn new_generation(&mut self, now: u64, settings: &CircuitBreakerConfig) {
        self.generation = self.generation.wrapping_add(1);
        self.counts = Counts::default();
        self.expiry_unix_ms = match self.state {
            BreakerState::Closed if settings.interval.is_zero() => 0,
            BreakerState::Closed => now.saturating_add(millis(settings.interval)),
            BreakerState::Open => now.saturating_add(millis(settings.timeout)),
            BreakerState::HalfOpen => 0,
        };
    }

    fn on_success(&mut self, now: u64, settings: &CircuitBreakerConfig) {
        match self.state {
            BreakerState::Closed => self.counts.on_success(),
            BreakerState::HalfOpen => {
                self.counts.on_success();
                if self.counts.consecutive_successes >= settings.max_requests.max(1) {
                    self.set_state(BreakerState::Closed, now, settings);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&mut self, now: u64, settings: &CircuitBreakerConfig) {
        match self.state {
            BreakerState::Closed => {
                self.counts.on_failure();
                if ready_to_trip(&self.counts, settings) {
                    self.set_state(BreakerState::Open, now, settings);
                }
            }
            BreakerState::HalfOpen => self.set_state(BreakerState::Open, now, settings),
            BreakerState::Open => {}
        }
    }
}

fn ready_to_trip(counts: &Counts, settings: &CircuitBreakerConfig) -> bool {
    if counts.requests == 0 || counts.requests < settings.min_requests {
        return false;
    }
    let ratio = f64::from(counts.total_failures) / f64::from(counts.requests);
    ratio >= settings.failure_ratio
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error("too many requests while half-open")]
    TooManyRequests,

    #[error("timed out acquiring breaker lock {name}")]
    LockTimeout { name: String },

    #[error("breaker store error: {0}")]
    Store(StorageError),

    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True if the breaker refused to run the call.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open | BreakerError::TooManyRequests)
    }
}

/// A breaker named after the resource it protects.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerConfig,
    store: Arc<dyn CircuitBreakerStore>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        settings: CircuitBreakerConfig,
        store: Arc<dyn CircuitBreakerStore>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            store,
            lock_timeout: LOCK_LEASE,
        }
    }

    /// Override how long to wait for the store lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state as seen in the store.
    pub async fn state(&self) -> Result<BreakerState, StorageError> {
        let now = now_unix_ms();
        let mut snapshot = self
            .load()
            .await?
            .unwrap_or_else(|| Snapshot::fresh(now, &self.settings));
        Ok(snapshot.current_state(now, &self.settings))
    }

    /// Run `call` if the breaker admits it and record the outcome.
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Send,
    {
        let generation = self
            .update::<_, E, _>(|snapshot, now, settings| {
                let state = snapshot.current_state(now, settings);
                match state {
                    BreakerState::Open => Err(BreakerError::Open),
                    BreakerState::HalfOpen
                        if snapshot.counts.requests >= settings.max_requests.max(1) =>
                    {
                        Err(BreakerError::TooManyRequests)
                    }
                    _ => {
                        snapshot.counts.on_request();
                        Ok(snapshot.generation)
                    }
                }
            })
            .await?;

        let result = call().await;
        let success = result.is_ok();

        let recorded = self.update::<(), Infallible, _>(|snapshot, now, settings| {
            snapshot.current_state(now, settings);
            if snapshot.generation != generation {
                return Ok(());
            }
            if success {
                snapshot.on_success(now, settings);
            } else {
                snapshot.on_failure(now, settings);
            }
            tracing::debug!(
                breaker = %self.name,
                state = %snapshot.state,
                requests = snapshot.counts.requests,
                total_failures = snapshot.counts.total_failures,
                consecutive_failures = snapshot.counts.consecutive_failures,
                "Circuit breaker counts updated"
            );
            Ok(())
        })
        .await;
        if let Err(e) = recorded {
            tracing::warn!(breaker = %self.name, success, error = %e, "Failed to record breaker outcome");
        }

        result.map_err(BreakerError::Inner)
    }

    /// Lock, load, apply `f`, save, unlock. The snapshot is only written
    /// back when `f` changed it.
    async fn update<R, E, F>(&self, f: F) -> Result<R, BreakerError<E>>
    where
        F: FnOnce(&mut Snapshot, u64, &CircuitBreakerConfig) -> Result<R, BreakerError<E>> + Send,
    {
        self.acquire::<E>().await?;
        let outcome = self.apply(f).await;
        if let Err(e) = self.store.unlock(&self.name).await {
            tracing::warn!(breaker = %self.name, error = %e, "Failed to release breaker lock");
        }
        outcome
    }

    async fn apply<R, E, F>(&self, f: F) -> Result<R, BreakerError<E>>
    where
        F: FnOnce(&mut Snapshot, u64, &CircuitBreakerConfig) -> Result<R, BreakerError<E>> + Send,
    {
        let now = now_unix_ms();
        let mut snapshot = match self.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => Snapshot::fresh(now, &self.settings),
            Err(e) => return Err(BreakerError::Store(e)),
        };
        let before = snapshot.clone();
        let result = f(&mut snapshot, now, &self.settings);

        if snapshot != before {
            if snapshot.state != before.state {
                tracing::info!(
                    breaker = %self.name,
                    from = %before.state,
                    to = %snapshot.state,
                    "Circuit breaker state changed"
                );
            }
            if let Err(e) = self.save(&snapshot).await {
                return Err(BreakerError::Store(e));
            }
        }
        result
    }

    async fn acquire<E>(&self) -> Result<(), BreakerError<E>> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut attempt = 0;
        loop {
            match self.store.lock(&self.name).await {
                Ok(()) => return Ok(()),
                Err(StorageError::LockHeld { .. }) => {}
                Err(e) => return Err(BreakerError::Store(e)),
            }

            attempt += 1;
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(breaker = %self.name, attempts = attempt, "Gave up waiting for breaker lock");
                return Err(BreakerError::LockTimeout {
                    name: self.name.clone(),
                });
            }
            let delay = calculate_backoff(attempt, 5, 200).min(deadline - now);
            tokio::time::sleep(delay).await;
        }
    }

    /// Stored snapshot, `None` if nothing was saved yet. Corrupted state
    /// reads as `None`.
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let Some(raw) = self.store.get_data(&self.name).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(breaker = %self.name, error = %e, "Corrupted breaker state, starting closed");
                Ok(None)
            }
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(snapshot)?;
        self.store.set_data(&self.name, &raw).await
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or(0)
}
