//! Discovery of every configured MCP server

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use keel_core::{
    ConnectionStatus, ConnectionStatusTracker, DiscoveryState, ListenerId, ServerConfig,
    StatusListener, EXTRA_COMMAND_SERVER_NAME,
};
use tracing::{error, info};

use crate::connector::{ConnectOutcome, ServerConnector};
use crate::error::{DiscoveryError, TransportError};
use crate::transport::parse_command_line;

/// Per-server outcomes of one discovery run, ordered by server name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub outcomes: BTreeMap<String, ConnectOutcome>,
}

impl DiscoveryReport {
    pub fn get(&self, server_name: &str) -> Option<&ConnectOutcome> {
        self.outcomes.get(server_name)
    }

    pub fn connected_servers(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_connected())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn tool_count(&self) -> usize {
        self.outcomes.values().map(ConnectOutcome::tool_count).sum()
    }
}

/// Runs one [`ServerConnector`] per configured server and tracks the run.
pub struct DiscoveryOrchestrator {
    connector: ServerConnector,
    tracker: Arc<ConnectionStatusTracker>,
}

impl DiscoveryOrchestrator {
    pub fn new(connector: ServerConnector) -> Self {
        let tracker = connector.tracker().clone();
        Self { connector, tracker }
    }

    pub fn connector(&self) -> &ServerConnector {
        &self.connector
    }

    /// Connect to every server concurrently and wait for all of them.
    ///
    /// `extra_command` is a command line run as an additional stdio server named
    /// `mcp`. It is parsed before the run starts; a malformed one is the only error
    /// returned.
    pub async fn discover(
        &self,
        servers: &HashMap<String, ServerConfig>,
        extra_command: Option<&str>,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let mut servers = servers.clone();
        if let Some(command_line) = extra_command {
            let (command, args) = parse_command_line(command_line).map_err(|e| {
                let reason = match e {
                    TransportError::InvalidCommand { reason, .. } => reason,
                    other => other.to_string(),
                };
                DiscoveryError::InvalidServerCommand {
                    command: command_line.to_string(),
                    reason,
                }
            })?;
            servers.insert(
                EXTRA_COMMAND_SERVER_NAME.to_string(),
                ServerConfig::stdio(command, args),
            );
        }

        self.tracker.set_discovery_state(DiscoveryState::InProgress);
        info!(count = servers.len(), "Discovering MCP servers");

        let runs = servers
            .iter()
            .map(|(name, config)| async move { (name.clone(), self.run(name, config).await) });
        let outcomes: BTreeMap<String, ConnectOutcome> = join_all(runs).await.into_iter().collect();

        self.tracker.set_discovery_state(DiscoveryState::Completed);
        let report = DiscoveryReport { outcomes };
        info!(
            servers = report.outcomes.len(),
            connected = report.connected_servers().len(),
            tools = report.tool_count(),
            "MCP discovery complete"
        );
        Ok(report)
    }

    /// Connect a single server, e.g. again after it finished authenticating.
    /// The discovery state is left alone.
    pub async fn discover_one(&self, server_name: &str, config: &ServerConfig) -> ConnectOutcome {
        self.run(server_name, config).await
    }

    async fn run(&self, server_name: &str, config: &ServerConfig) -> ConnectOutcome {
        match AssertUnwindSafe(self.connector.connect(server_name, config))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(server = %server_name, "MCP server connection panicked");
                self.tracker.set_status(server_name, ConnectionStatus::Disconnected);
                ConnectOutcome::Panicked
            }
        }
    }

    pub fn get_status(&self, server_name: &str) -> ConnectionStatus {
        self.tracker.get_status(server_name)
    }

    pub fn get_all_statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.tracker.get_all_statuses()
    }

    pub fn get_discovery_state(&self) -> DiscoveryState {
        self.tracker.discovery_state()
    }

    pub fn add_status_change_listener(&self, listener: StatusListener) -> ListenerId {
        self.tracker.subscribe(listener)
    }

    pub fn remove_status_change_listener(&self, id: ListenerId) -> bool {
        self.tracker.unsubscribe(id)
    }
}
