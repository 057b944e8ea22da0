//! Counter storage backends.
//!
//! A [`CounterStore`] provides atomic increment-with-expiry and TTL'd block
//! markers. Two backends exist: [`RemoteStore`], shared by every process
//! through a networked server, and [`LocalStore`], process-local and used
//! whenever the remote store is unavailable. [`FailoverStore`] chooses
//! between them per call using the [`HealthMonitor`] snapshot.

mod failover;
mod health;
mod local;
mod remote;

use async_trait::async_trait;
use thiserror::Error;

pub use failover::FailoverStore;
pub use health::{ConnectionEvent, HealthMonitor};
pub use local::LocalStore;
pub use remote::RemoteStore;

/// Errors raised by a counter store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection to the remote server has been established
    #[error("remote store is not connected")]
    NotConnected,

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Whether the error means the backend itself is unreachable, as opposed
    /// to a failure of a single command.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            StoreError::NotConnected => true,
            StoreError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
        }
    }

    /// Translate this error into a connectivity event for the health monitor.
    pub fn to_event(&self) -> ConnectionEvent {
        match self {
            StoreError::Redis(e) if e.is_connection_dropped() => ConnectionEvent::Closed,
            other => ConnectionEvent::Error(other.to_string()),
        }
    }
}

/// Atomic key/counter primitive used by the rate limiter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Increase the counter by one and reset its expiry to `window_secs`
    /// from now, returning the new count.
    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64, StoreError>;

    /// Current counter value, 0 if absent or expired.
    async fn current_count(&self, key: &str) -> Result<u64, StoreError>;

    /// Whether a live key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Create or replace a block marker that expires after `duration_secs`.
    async fn set_block(&self, key: &str, duration_secs: u64) -> Result<(), StoreError>;

    /// Remaining time-to-live in whole seconds, 0 if absent.
    async fn ttl(&self, key: &str) -> Result<u64, StoreError>;

    /// Remove keys immediately. Missing keys are ignored.
    async fn delete(&self, keys: &[&str]) -> Result<(), StoreError>;
}
