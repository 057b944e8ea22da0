//! Per-call backend selection between the remote and local stores.
//!
//! Every operation reads the current health snapshot. While the remote
//! store is healthy it is used; otherwise, or if a remote call fails, the
//! operation completes on the local store. State written to one backend is
//! never copied to the other.

use std::future::Future;
use std::sync::Arc;

use tracing::{trace, warn};

use super::{CounterStore, HealthMonitor, LocalStore, RemoteStore, StoreError};

/// Counter store that degrades to process-local state.
///
/// All methods are infallible: the local store cannot fail.
#[derive(Debug, Clone)]
pub struct FailoverStore {
    remote: Option<Arc<RemoteStore>>,
    local: Arc<LocalStore>,
    health: Arc<HealthMonitor>,
}

impl FailoverStore {
    /// A store with no remote backend.
    pub fn local_only(local: Arc<LocalStore>) -> Self {
        Self {
            remote: None,
            local,
            health: Arc::new(HealthMonitor::new(false)),
        }
    }

    pub fn new(remote: Arc<RemoteStore>, local: Arc<LocalStore>, health: Arc<HealthMonitor>) -> Self {
        Self {
            remote: Some(remote),
            local,
            health,
        }
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether calls are currently served by the remote store.
    pub fn is_remote_active(&self) -> bool {
        self.remote.is_some() && self.health.is_healthy()
    }

    fn active_remote(&self) -> Option<&RemoteStore> {
        self.remote
            .as_deref()
            .filter(|_| self.health.is_healthy())
    }

    /// Run `op` against the remote store if it is active, falling back on
    /// error. Returns `None` when the local store should be used.
    async fn try_remote<'a, T, F, Fut>(&'a self, operation: &'static str, op: F) -> Option<T>
    where
        F: FnOnce(&'a RemoteStore) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + 'a,
    {
        let remote = self.active_remote()?;
        match op(remote).await {
            Ok(value) => Some(value),
            Err(e) => {
                if e.is_connection_failure() {
                    self.health.record(e.to_event());
                }
                warn!(
                    operation = operation,
                    error = %e,
                    "Remote store call failed, using local store"
                );
                None
            }
        }
    }

    pub async fn increment(&self, key: &str, window_secs: u64) -> u64 {
        if let Some(count) = self.try_remote("increment", |r| r.increment(key, window_secs)).await {
            return count;
        }
        trace!(key = %key, "Incrementing local counter");
        self.local.increment(key, window_secs)
    }

    pub async fn current_count(&self, key: &str) -> u64 {
        if let Some(count) = self.try_remote("current_count", |r| r.current_count(key)).await {
            return count;
        }
        self.local.current_count(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(exists) = self.try_remote("exists", |r| r.exists(key)).await {
            return exists;
        }
        self.local.exists(key)
    }

    pub async fn set_block(&self, key: &str, duration_secs: u64) {
        if self
            .try_remote("set_block", |r| r.set_block(key, duration_secs))
            .await
            .is_none()
        {
            self.local.set_block(key, duration_secs);
        }
    }

    pub async fn ttl(&self, key: &str) -> u64 {
        if let Some(ttl) = self.try_remote("ttl", |r| r.ttl(key)).await {
            return ttl;
        }
        self.local.ttl(key)
    }

    pub async fn delete(&self, keys: &[&str]) {
        if self.try_remote("delete", |r| r.delete(keys)).await.is_none() {
            self.local.delete(keys);
        }
    }
}
