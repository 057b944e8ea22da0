//! Shared counter store backed by a Redis-compatible server.
//!
//! All processes pointing at the same server see the same counters. The
//! increment is a single `MULTI`/`EXEC` transaction so concurrent callers
//! never lose an update or leave a counter without an expiry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{
    AsyncCommands, Client, ConnectionAddr, ConnectionInfo, ProtocolVersion, PushInfo, PushKind,
    RedisConnectionInfo,
};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{ConnectionEvent, CounterStore, HealthMonitor, StoreError};
use crate::config::RemoteConfig;

/// Remote store client.
///
/// The connection is established separately from construction so a
/// process can start while the server is down and attach later.
pub struct RemoteStore {
    client: Client,
    settings: RemoteConfig,
    manager: RwLock<Option<ConnectionManager>>,
    push_tx: mpsc::UnboundedSender<PushInfo>,
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<PushInfo>>>,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("host", &self.settings.host)
            .field("port", &self.settings.port)
            .field("db", &self.settings.db)
            .finish()
    }
}

/// Map a `TTL` reply to whole seconds; `-2` (missing) and `-1` (no expiry)
/// both read as 0.
fn ttl_from_reply(reply: i64) -> u64 {
    u64::try_from(reply).unwrap_or(0)
}

/// Health event carried by a server push, if any.
fn push_event(info: &PushInfo) -> Option<ConnectionEvent> {
    match info.kind {
        PushKind::Disconnection => Some(ConnectionEvent::Closed),
        _ => None,
    }
}

impl RemoteStore {
    /// Build a client for the given settings without connecting.
    pub fn new(settings: &RemoteConfig) -> Result<Self, StoreError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
            redis: RedisConnectionInfo {
                db: settings.db,
                username: settings.username.clone(),
                password: settings.password.clone(),
                protocol: if settings.push_events {
                    ProtocolVersion::RESP3
                } else {
                    ProtocolVersion::RESP2
                },
                ..Default::default()
            },
        };
        let client = Client::open(info)?;
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            settings: settings.clone(),
            manager: RwLock::new(None),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
        })
    }

    /// Whether a connection has been established.
    pub async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    /// Connect with a bounded number of attempts and growing backoff.
    ///
    /// Gives up after `connect_attempts` failures and returns the last error;
    /// the store stays disconnected until a later call succeeds.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut last_error = StoreError::NotConnected;

        for attempt in 1..=attempts {
            match self.try_connect().await {
                Ok(manager) => {
                    *self.manager.write().await = Some(manager);
                    info!(
                        host = %self.settings.host,
                        port = self.settings.port,
                        attempt = attempt,
                        "Connected to remote store"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        host = %self.settings.host,
                        port = self.settings.port,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Remote store connection attempt failed"
                    );
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }

        Err(last_error)
    }

    async fn try_connect(&self) -> Result<ConnectionManager, StoreError> {
        let mut config = ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(self.settings.connect_timeout())
            .set_response_timeout(self.settings.response_timeout());
        if self.settings.push_events {
            config = config.set_push_sender(self.push_tx.clone());
        }

        let connect = ConnectionManager::new_with_config(self.client.clone(), config);
        let mut manager = match tokio::time::timeout(self.settings.connect_timeout(), connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Redis(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "connection attempt timed out",
                ))))
            }
        };

        redis::cmd("PING").query_async::<String>(&mut manager).await?;
        Ok(manager)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.backoff(attempt);
        let jitter_ms = (base.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.manager
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(StoreError::NotConnected)
    }

    /// Round-trip a `PING` on the current connection.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Periodically check reachability and feed the result to `health`.
    ///
    /// A disconnected store gets one bounded connection attempt per tick.
    /// Disconnection pushes from the client are applied as they arrive. Only
    /// the first task spawned for a store receives them.
    pub fn spawn_probe(self: &Arc<Self>, health: Arc<HealthMonitor>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut pushes = self.push_rx.lock().ok().and_then(|mut rx| rx.take());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = if store.is_connected().await {
                            store.ping().await
                        } else {
                            store.connect().await
                        };

                        let event = match result {
                            Ok(()) => ConnectionEvent::Connected,
                            Err(e) => e.to_event(),
                        };
                        trace!(event = ?event, "Remote store probe");
                        health.record(event);
                    }
                    Some(info) = next_push(&mut pushes) => {
                        if let Some(event) = push_event(&info) {
                            debug!(event = ?event, "Remote store push event");
                            health.record(event);
                        }
                    }
                }
            }
        })
    }
}

async fn next_push(pushes: &mut Option<mpsc::UnboundedReceiver<PushInfo>>) -> Option<PushInfo> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl CounterStore for RemoteStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .expire(key, window)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(key = %key, count = count, window_secs = window_secs, "Incremented remote counter");
        Ok(count)
    }

    async fn current_count(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn set_block(&self, key: &str, duration_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, 1u8, duration_secs).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let reply: i64 = conn.ttl(key).await?;
        Ok(ttl_from_reply(reply))
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: u64 = conn.del(keys).await?;
        Ok(())
    }
}
