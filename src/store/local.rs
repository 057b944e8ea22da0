//! Process-local counter store.
//!
//! There is no native expiry: every read checks the entry's deadline and
//! removes it first if it has passed. A periodic sweep only bounds memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    count: u64,
    expires_at: Instant,
}

impl LocalEntry {
    fn new(count: u64, ttl_secs: u64, now: Instant) -> Self {
        Self {
            count,
            expires_at: now + Duration::from_secs(ttl_secs),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory store, authoritative only for the current process.
#[derive(Debug, Default)]
pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for a key, removing it if it has expired.
    fn live(&self, key: &str) -> Option<LocalEntry> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some();

        if removed {
            trace!(key = %key, "Lazily expired local entry");
            return None;
        }

        self.entries.get(key).map(|entry| *entry)
    }

    /// Increase a counter and push its expiry out to `window_secs` from now.
    /// An expired entry restarts at 1.
    pub fn increment(&self, key: &str, window_secs: u64) -> u64 {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = LocalEntry::new(1, window_secs, now);
                } else {
                    entry.count += 1;
                    entry.expires_at = now + Duration::from_secs(window_secs);
                }
                entry.count
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LocalEntry::new(1, window_secs, now));
                1
            }
        }
    }

    pub fn current_count(&self, key: &str) -> u64 {
        self.live(key).map_or(0, |entry| entry.count)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    pub fn set_block(&self, key: &str, duration_secs: u64) {
        self.entries
            .insert(key.to_string(), LocalEntry::new(1, duration_secs, Instant::now()));
    }

    /// Remaining lifetime in whole seconds, 0 if absent.
    pub fn ttl(&self, key: &str) -> u64 {
        let Some(entry) = self.live(key) else {
            return 0;
        };
        let remaining = entry.expires_at.saturating_duration_since(Instant::now());
        // Round up so a live entry never reports zero.
        remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
    }

    pub fn delete(&self, keys: &[&str]) {
        for key in keys {
            self.entries.remove(*key);
        }
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries held, including any not yet lazily expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`LocalStore::purge_expired`] every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, remaining = store.len(), "Swept local store");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        Ok(LocalStore::increment(self, key, window_secs))
    }

    async fn current_count(&self, key: &str) -> Result<u64, StoreError> {
        Ok(LocalStore::current_count(self, key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(LocalStore::exists(self, key))
    }

    async fn set_block(&self, key: &str, duration_secs: u64) -> Result<(), StoreError> {
        LocalStore::set_block(self, key, duration_secs);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<u64, StoreError> {
        Ok(LocalStore::ttl(self, key))
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), StoreError> {
        LocalStore::delete(self, keys);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_increment_creates_and_counts() {
        let store = LocalStore::new();

        assert_eq!(store.increment("k", 60), 1);
        assert_eq!(store.increment("k", 60), 2);
        assert_eq!(store.current_count("k"), 2);
        assert_eq!(store.current_count("other"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_extends_expiry() {
        let store = LocalStore::new();

        store.increment("k", 60);
        advance(Duration::from_secs(50)).await;
        store.increment("k", 60);
        advance(Duration::from_secs(50)).await;

        // 100s since the first write, 50s since the last
        assert_eq!(store.current_count("k"), 2);
        assert_eq!(store.ttl("k"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_after_expiry_restarts_at_one() {
        let store = LocalStore::new();

        store.increment("k", 10);
        store.increment("k", 10);
        advance(Duration::from_secs(11)).await;

        assert_eq!(store.increment("k", 10), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_lazily_expire() {
        let store = LocalStore::new();

        store.increment("k", 5);
        assert_eq!(store.len(), 1);

        advance(Duration::from_secs(5)).await;
        assert_eq!(store.current_count("k"), 0);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_marker_lifecycle() {
        let store = LocalStore::new();

        store.set_block("b", 30);
        assert!(store.exists("b"));
        assert_eq!(store.ttl("b"), 30);

        advance(Duration::from_millis(10_500)).await;
        assert_eq!(store.ttl("b"), 20);

        advance(Duration::from_millis(19_500)).await;
        assert!(!store.exists("b"));
        assert_eq!(store.ttl("b"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_multiple_keys() {
        let store = LocalStore::new();

        store.increment("a", 60);
        store.set_block("b", 60);
        store.delete(&["a", "b", "missing"]);

        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = LocalStore::new();

        store.increment("short", 1);
        store.increment("long", 100);
        advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.current_count("long"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_in_background() {
        let store = Arc::new(LocalStore::new());
        let handle = store.spawn_sweeper(Duration::from_secs(10));

        store.increment("k", 1);
        // Auto-advancing sleep lets the sweeper's tick at 10s fire first.
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(store.is_empty());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_store_impl_matches_inherent() {
        let store = LocalStore::new();
        let backend: &dyn CounterStore = &store;

        assert_eq!(backend.name(), "local");
        assert_eq!(backend.increment("k", 60).await.unwrap(), 1);
        backend.set_block("b", 30).await.unwrap();
        assert!(backend.exists("b").await.unwrap());
        assert_eq!(backend.ttl("b").await.unwrap(), 30);
        assert_eq!(store.current_count("k"), 1);

        backend.delete(&["k", "b"]).await.unwrap();
        assert!(store.is_empty());
    }
}
