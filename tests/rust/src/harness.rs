//! Discovery test harness
//!
//! Wires a real [`DiscoveryOrchestrator`] to an in-memory registry and token
//! store, with recording OAuth fakes in place of the browser flow.

use std::sync::Arc;

use keel_core::{ConnectionStatus, ConnectionStatusTracker, DiscoveredOAuthMetadata};
use keel_mcp::{
    DiscoveryOrchestrator, InMemoryTokenStore, InMemoryToolRegistry, OAuthRemediator,
    ServerConnector, TransportFactory,
};
use parking_lot::Mutex;

use crate::mocks::{MockOAuthDiscovery, MockOAuthProvider};

/// Everything a discovery test needs to drive and inspect a run.
pub struct Harness {
    pub orchestrator: DiscoveryOrchestrator,
    pub tracker: Arc<ConnectionStatusTracker>,
    pub registry: Arc<InMemoryToolRegistry>,
    pub token_store: Arc<InMemoryTokenStore>,
    pub discovery: Arc<MockOAuthDiscovery>,
    pub provider: Arc<MockOAuthProvider>,
}

impl Harness {
    /// Discovery finds nothing and authentication fails.
    pub fn new() -> Self {
        let token_store = Arc::new(InMemoryTokenStore::new());
        let provider = MockOAuthProvider::failing(token_store.clone());
        Self::build(token_store, MockOAuthDiscovery::new(), provider)
    }

    /// Discovery returns `metadata` and authentication stores `access_token`.
    pub fn with_oauth(metadata: DiscoveredOAuthMetadata, access_token: &str) -> Self {
        let token_store = Arc::new(InMemoryTokenStore::new());
        let provider = MockOAuthProvider::new(token_store.clone(), access_token);
        Self::build(
            token_store,
            MockOAuthDiscovery::new().with_metadata(metadata),
            provider,
        )
    }

    /// Discovery returns `metadata` but authentication fails.
    pub fn with_failing_oauth(metadata: DiscoveredOAuthMetadata) -> Self {
        let token_store = Arc::new(InMemoryTokenStore::new());
        let provider = MockOAuthProvider::failing(token_store.clone());
        Self::build(
            token_store,
            MockOAuthDiscovery::new().with_metadata(metadata),
            provider,
        )
    }

    fn build(
        token_store: Arc<InMemoryTokenStore>,
        discovery: MockOAuthDiscovery,
        provider: MockOAuthProvider,
    ) -> Self {
        let tracker = Arc::new(ConnectionStatusTracker::new());
        let registry = Arc::new(InMemoryToolRegistry::new());
        let discovery = Arc::new(discovery);
        let provider = Arc::new(provider);

        let connector = ServerConnector::new(
            tracker.clone(),
            registry.clone(),
            TransportFactory::new(token_store.clone()),
            OAuthRemediator::new(discovery.clone(), provider.clone()),
        );

        Self {
            orchestrator: DiscoveryOrchestrator::new(connector),
            tracker,
            registry,
            token_store,
            discovery,
            provider,
        }
    }

    /// Record every status change from now on.
    pub fn record_statuses(&self) -> StatusLog {
        let log = StatusLog::default();
        let sink = log.entries.clone();
        self.orchestrator
            .add_status_change_listener(Arc::new(move |name: &str, status: ConnectionStatus| {
                sink.lock().push((name.to_string(), status));
            }));
        log
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Status changes seen by a listener.
#[derive(Clone, Default)]
pub struct StatusLog {
    entries: Arc<Mutex<Vec<(String, ConnectionStatus)>>>,
}

impl StatusLog {
    pub fn entries(&self) -> Vec<(String, ConnectionStatus)> {
        self.entries.lock().clone()
    }

    /// Statuses of one server, in order.
    pub fn for_server(&self, server_name: &str) -> Vec<ConnectionStatus> {
        self.entries
            .lock()
            .iter()
            .filter(|(name, _)| name == server_name)
            .map(|(_, status)| *status)
            .collect()
    }
}
