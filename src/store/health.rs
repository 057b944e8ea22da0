//! Remote store reachability tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Connectivity notifications emitted by the remote store client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was established or a probe succeeded
    Connected,
    /// A command or connection attempt failed
    Error(String),
    /// The server closed the connection
    Closed,
}

/// Compute the health flag after an event.
pub fn transition(_current: bool, event: &ConnectionEvent) -> bool {
    match event {
        ConnectionEvent::Connected => true,
        ConnectionEvent::Error(_) | ConnectionEvent::Closed => false,
    }
}

/// Shared flag recording whether the remote store is usable.
///
/// Only [`HealthMonitor::record`] writes the flag; every other component
/// reads a snapshot through [`HealthMonitor::is_healthy`].
#[derive(Debug, Default)]
pub struct HealthMonitor {
    healthy: AtomicBool,
}

impl HealthMonitor {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Apply an event. Returns `true` if the flag changed.
    pub fn record(&self, event: ConnectionEvent) -> bool {
        let current = self.is_healthy();
        let next = transition(current, &event);
        let previous = self.healthy.swap(next, Ordering::AcqRel);

        if previous == next {
            return false;
        }

        match &event {
            ConnectionEvent::Connected => info!("Remote store reachable, leaving fallback mode"),
            ConnectionEvent::Error(reason) => warn!(
                reason = %reason,
                "Remote store unreachable, switching to local store"
            ),
            ConnectionEvent::Closed => warn!("Remote store connection closed, switching to local store"),
        }
        true
    }
}
