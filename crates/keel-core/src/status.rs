//! Connection status tracking
//!
//! [`ConnectionStatusTracker`] is the single source of truth for the connection
//! state of every configured MCP server and for the progress of the discovery run.
//! Observers subscribe with a callback and are told about every status change.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Connection status of one MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Progress of the discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// Callback invoked with `(server_name, new_status)`.
pub type StatusListener = Arc<dyn Fn(&str, ConnectionStatus) + Send + Sync>;

/// Handle returned by [`ConnectionStatusTracker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct ConnectionStatusTracker {
    statuses: RwLock<HashMap<String, ConnectionStatus>>,
    listeners: RwLock<Vec<(ListenerId, StatusListener)>>,
    discovery_state: RwLock<DiscoveryState>,
    next_listener_id: AtomicU64,
}

impl ConnectionStatusTracker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            discovery_state: RwLock::new(DiscoveryState::NotStarted),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Record a new status and notify every listener, in subscription order.
    ///
    /// Listeners run outside the status lock, so they may query the tracker.
    /// A panicking listener is logged and skipped.
    pub fn set_status(&self, server_name: &str, status: ConnectionStatus) {
        let previous = self
            .statuses
            .write()
            .insert(server_name.to_string(), status);

        debug!(
            server = %server_name,
            from = ?previous.unwrap_or_default(),
            to = ?status,
            "Connection status changed"
        );

        let listeners: Vec<StatusListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(server_name, status)));
            if result.is_err() {
                error!(
                    server = %server_name,
                    status = ?status,
                    "Status listener panicked"
                );
            }
        }
    }

    /// Status of a server; `Disconnected` for unknown names.
    pub fn get_status(&self, server_name: &str) -> ConnectionStatus {
        self.statuses
            .read()
            .get(server_name)
            .copied()
            .unwrap_or_default()
    }

    /// Snapshot of every known server status.
    pub fn get_all_statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.statuses.read().clone()
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        *self.discovery_state.read()
    }

    pub fn set_discovery_state(&self, state: DiscoveryState) {
        debug!(state = ?state, "Discovery state changed");
        *self.discovery_state.write() = state;
    }

    /// Register a listener. Registering the same callback twice makes it fire twice.
    pub fn subscribe(&self, listener: StatusListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Forget all statuses and return to `NotStarted`. Listeners stay registered.
    pub fn reset(&self) {
        self.statuses.write().clear();
        *self.discovery_state.write() = DiscoveryState::NotStarted;
    }
}

impl Default for ConnectionStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStatusTracker")
            .field("statuses", &*self.statuses.read())
            .field("listeners", &self.listeners.read().len())
            .field("discovery_state", &self.discovery_state())
            .finish()
    }
}
