//! Core rate limiter implementation.
//!
//! Per (action type, identifier) the limiter moves through three states:
//! clear, counting (some failures inside the window) and blocked (a block
//! marker exists). The failure window is an idle timeout: each recorded
//! failure pushes the counter's expiry out by a full window.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::keys::RateLimitKey;
use super::rules::{ConfigRegistry, RateLimitConfig};
use crate::config::GatekeeperConfig;
use crate::error::Result;
use crate::store::{FailoverStore, HealthMonitor, LocalStore, RemoteStore};

/// Outcome of a throttling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub current_attempts: u64,
    pub max_attempts: u64,
    pub retry_after_seconds: u64,
    pub is_blocked: bool,
}

impl RateLimitResult {
    /// Failures left before a block is triggered.
    pub fn remaining(&self) -> u64 {
        self.max_attempts.saturating_sub(self.current_attempts)
    }
}

/// Throttling service for sensitive operations.
///
/// Cheap to clone; clones share the registry and stores.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    registry: Arc<ConfigRegistry>,
    store: FailoverStore,
}

impl RateLimiter {
    pub fn new(registry: Arc<ConfigRegistry>, store: FailoverStore) -> Self {
        Self { registry, store }
    }

    /// A limiter that only ever uses process-local state.
    pub fn local(registry: Arc<ConfigRegistry>) -> Self {
        Self::new(registry, FailoverStore::local_only(Arc::new(LocalStore::new())))
    }

    /// Build a limiter from settings.
    ///
    /// Loads the rule overrides, then tries the remote store with bounded
    /// retries. Missing or unusable connection settings, or a failed
    /// connection, leave the limiter on the local store. Background probe
    /// and sweep tasks are spawned on the current runtime.
    pub async fn from_config(config: &GatekeeperConfig) -> Result<Self> {
        let registry = match &config.rules_path {
            Some(path) => ConfigRegistry::from_file(path)?,
            None => ConfigRegistry::default(),
        };
        let registry = Arc::new(registry);

        let local = Arc::new(LocalStore::new());
        if let Some(interval) = config.local.sweep_interval() {
            local.spawn_sweeper(interval);
        }

        let Some(settings) = config.remote_settings() else {
            if let Some(reason) = config.remote_error() {
                warn!(error = %reason, "Invalid remote store settings, using local store");
            } else {
                info!("No remote store configured, using local store");
            }
            return Ok(Self::new(registry, FailoverStore::local_only(local)));
        };

        let remote = match RemoteStore::new(settings) {
            Ok(remote) => Arc::new(remote),
            Err(e) => {
                warn!(error = %e, "Invalid remote store settings, using local store");
                return Ok(Self::new(registry, FailoverStore::local_only(local)));
            }
        };

        let healthy = match remote.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Remote store unavailable, starting in fallback mode");
                false
            }
        };

        let health = Arc::new(HealthMonitor::new(healthy));
        if settings.probe_interval_secs > 0 {
            remote.spawn_probe(Arc::clone(&health), settings.probe_interval());
        }

        Ok(Self::new(registry, FailoverStore::new(remote, local, health)))
    }

    /// Thresholds for an action type.
    pub fn get_config(&self, action_type: &str) -> RateLimitConfig {
        self.registry.get_config(action_type)
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &FailoverStore {
        &self.store
    }

    /// Whether the remote store is currently in use. Always `false` for a
    /// limiter without a remote store.
    pub fn is_healthy(&self) -> bool {
        self.store.is_remote_active()
    }

    /// Decide whether a request may proceed, without recording anything.
    pub async fn check_limit(&self, action_type: &str, identifier: &str) -> RateLimitResult {
        let config = self.get_config(action_type);
        let key = RateLimitKey::new(action_type, identifier);

        trace!(key = %key, "Checking rate limit");

        let (blocked, current) = futures::join!(
            self.store.exists(key.block()),
            self.store.current_count(key.counter())
        );

        if blocked {
            let retry_after = self.store.ttl(key.block()).await;
            debug!(key = %key, retry_after = retry_after, "Identifier is blocked");
            return RateLimitResult {
                allowed: false,
                current_attempts: current,
                max_attempts: config.max_attempts,
                retry_after_seconds: retry_after,
                is_blocked: true,
            };
        }

        let over_limit = current >= config.max_attempts;

        RateLimitResult {
            allowed: !over_limit,
            current_attempts: current,
            max_attempts: config.max_attempts,
            retry_after_seconds: if over_limit { config.block_duration_seconds } else { 0 },
            is_blocked: false,
        }
    }

    /// Record a failed attempt, blocking the identifier once the limit is
    /// reached.
    pub async fn record_failed_attempt(&self, action_type: &str, identifier: &str) -> RateLimitResult {
        let config = self.get_config(action_type);
        let key = RateLimitKey::new(action_type, identifier);

        let count = self.store.increment(key.counter(), config.window_seconds).await;

        if count >= config.max_attempts {
            self.store
                .set_block(key.block(), config.block_duration_seconds)
                .await;
            info!(
                action_type = %action_type,
                identifier = %identifier,
                attempts = count,
                block_secs = config.block_duration_seconds,
                "Rate limit reached, blocking"
            );
            return RateLimitResult {
                allowed: false,
                current_attempts: count,
                max_attempts: config.max_attempts,
                retry_after_seconds: config.block_duration_seconds,
                is_blocked: true,
            };
        }

        debug!(key = %key, attempts = count, max = config.max_attempts, "Recorded failed attempt");
        RateLimitResult {
            allowed: true,
            current_attempts: count,
            max_attempts: config.max_attempts,
            retry_after_seconds: 0,
            is_blocked: false,
        }
    }

    /// Reset all throttling state after a successful action.
    pub async fn record_success(&self, action_type: &str, identifier: &str) {
        let key = RateLimitKey::new(action_type, identifier);
        self.store.delete(&[key.counter(), key.block()]).await;
        trace!(key = %key, "Cleared state after success");
    }

    /// Administrative override: remove counter and block regardless of state.
    ///
    /// Only the currently active backend is cleared.
    pub async fn clear_limit(&self, action_type: &str, identifier: &str) {
        let key = RateLimitKey::new(action_type, identifier);
        self.store.delete(&[key.counter(), key.block()]).await;
        info!(
            action_type = %action_type,
            identifier = %identifier,
            remote = self.store.is_remote_active(),
            "Rate limit cleared by administrator"
        );
    }
}
