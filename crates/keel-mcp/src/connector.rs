//! One MCP server, end to end
//!
//! Build the transport, connect, list tools, register the ones that pass the
//! server's filters. Every failure is contained here: it is logged, the server is
//! marked [`ConnectionStatus::Disconnected`] and reported as a [`ConnectOutcome`].

use std::sync::Arc;

use keel_core::{ConnectionStatus, ConnectionStatusTracker, ServerConfig};
use rmcp::model::Tool;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::McpConnection;
use crate::error::ConnectError;
use crate::oauth::{AuthChallenge, OAuthRemediator};
use crate::registry::{DiscoveredTool, ToolRegistry};
use crate::schema::sanitize_parameters;
use crate::tool_name::resolve_tool_name;
use crate::transport::TransportFactory;

/// How a server's discovery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Connected; these resolved names were registered.
    Registered { tools: Vec<String> },
    /// Connected but nothing survived filtering; the connection was closed.
    NoTools,
    /// Unusable configuration (no transport, bad URL or command, bad header).
    ConfigError(String),
    ConnectFailed(String),
    /// The server asked for credentials and a token was obtained. A new discovery
    /// run connects with it.
    AuthRemediated,
    /// The server asked for credentials and authentication did not succeed.
    AuthFailed(String),
    ListFailed(String),
    /// The connection task panicked.
    Panicked,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectOutcome::Registered { .. })
    }

    pub fn tool_count(&self) -> usize {
        match self {
            ConnectOutcome::Registered { tools } => tools.len(),
            _ => 0,
        }
    }
}

/// Connects single servers and registers their tools.
#[derive(Clone)]
pub struct ServerConnector {
    tracker: Arc<ConnectionStatusTracker>,
    registry: Arc<dyn ToolRegistry>,
    transports: TransportFactory,
    remediator: OAuthRemediator,
}

impl ServerConnector {
    pub fn new(
        tracker: Arc<ConnectionStatusTracker>,
        registry: Arc<dyn ToolRegistry>,
        transports: TransportFactory,
        remediator: OAuthRemediator,
    ) -> Self {
        Self {
            tracker,
            registry,
            transports,
            remediator,
        }
    }

    pub fn tracker(&self) -> &Arc<ConnectionStatusTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    /// Connect one server. Tools registered by an earlier run of the same server are
    /// removed and their connection closed first.
    pub async fn connect(&self, server_name: &str, config: &ServerConfig) -> ConnectOutcome {
        self.tracker.set_status(server_name, ConnectionStatus::Connecting);
        self.drop_previous_tools(server_name).await;

        let transport = match self.transports.build(server_name, config).await {
            Ok(transport) => transport,
            Err(e) => {
                error!(
                    server = %server_name,
                    error = %e,
                    "Invalid MCP server configuration"
                );
                self.disconnected(server_name);
                return ConnectOutcome::ConfigError(e.to_string());
            }
        };

        let timeout = config.timeout_duration();
        let client = match transport.connect(timeout).await {
            Ok(client) => client,
            Err(e) => return self.connect_failed(server_name, config, e).await,
        };

        self.tracker.set_status(server_name, ConnectionStatus::Connected);
        let connection = Arc::new(McpConnection::new(
            server_name,
            client,
            timeout,
            self.tracker.clone(),
        ));
        info!(server = %server_name, "Connected to MCP server");

        let tools = match connection.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                error!(
                    server = %server_name,
                    error = %e,
                    "Failed to list tools"
                );
                connection.close().await;
                self.disconnected(server_name);
                return ConnectOutcome::ListFailed(e.to_string());
            }
        };

        let registered = self.register_tools(server_name, config, &connection, tools);
        if registered.is_empty() {
            info!(
                server = %server_name,
                "No tools to register, closing connection"
            );
            connection.close().await;
            self.disconnected(server_name);
            return ConnectOutcome::NoTools;
        }

        info!(
            server = %server_name,
            count = registered.len(),
            "Registered MCP tools"
        );
        ConnectOutcome::Registered { tools: registered }
    }

    async fn connect_failed(
        &self,
        server_name: &str,
        config: &ServerConfig,
        err: ConnectError,
    ) -> ConnectOutcome {
        let challenge = if config.is_network() {
            AuthChallenge::from_connect_error(&err)
        } else {
            None
        };

        let Some(challenge) = challenge else {
            error!(
                server = %server_name,
                config = %config.summary(),
                error = %err,
                "Failed to connect to MCP server"
            );
            self.disconnected(server_name);
            return ConnectOutcome::ConnectFailed(err.to_string());
        };

        warn!(
            server = %server_name,
            error = %err,
            "MCP server requires authentication"
        );
        let authenticated = self
            .remediator
            .attempt(server_name, config, &challenge)
            .await;
        self.disconnected(server_name);

        if authenticated {
            info!(
                server = %server_name,
                "Authentication complete, the next discovery run will connect with the new token"
            );
            ConnectOutcome::AuthRemediated
        } else {
            ConnectOutcome::AuthFailed(err.to_string())
        }
    }

    /// Resolve and register each tool. Nothing here awaits, so names claimed by
    /// concurrently running connectors are always visible.
    fn register_tools(
        &self,
        server_name: &str,
        config: &ServerConfig,
        connection: &Arc<McpConnection>,
        tools: Vec<Tool>,
    ) -> Vec<String> {
        let mut registered = Vec::new();
        for tool in tools {
            let raw_name = tool.name.to_string();
            if raw_name.trim().is_empty() {
                warn!(server = %server_name, "Skipping tool without a name");
                continue;
            }
            if !is_tool_enabled(&raw_name, config) {
                debug!(server = %server_name, tool = %raw_name, "Tool filtered out");
                continue;
            }

            let resolved_name =
                resolve_tool_name(&raw_name, server_name, |name| self.registry.contains(name));
            if resolved_name != raw_name {
                debug!(
                    server = %server_name,
                    tool = %raw_name,
                    resolved = %resolved_name,
                    "Renamed tool"
                );
            }

            let schema = Value::Object((*tool.input_schema).clone());
            let description = tool
                .description
                .as_deref()
                .unwrap_or_default()
                .to_string();

            self.registry.register_tool(DiscoveredTool::new(
                server_name.to_string(),
                raw_name,
                resolved_name.clone(),
                description,
                sanitize_parameters(Some(&schema)),
                connection.timeout(),
                config.trust,
                connection.clone(),
            ));
            registered.push(resolved_name);
        }
        registered
    }

    async fn drop_previous_tools(&self, server_name: &str) {
        let previous = self.registry.remove_tools_by_server(server_name);
        if previous.is_empty() {
            return;
        }
        debug!(
            server = %server_name,
            count = previous.len(),
            "Replacing previously registered tools"
        );
        let mut connections: Vec<Arc<McpConnection>> = Vec::new();
        for tool in previous {
            if !connections.iter().any(|c| Arc::ptr_eq(c, tool.connection())) {
                connections.push(tool.connection().clone());
            }
        }
        for connection in connections {
            connection.close().await;
        }
    }

    fn disconnected(&self, server_name: &str) {
        self.tracker.set_status(server_name, ConnectionStatus::Disconnected);
    }
}

/// Apply `includeTools` / `excludeTools`. An include entry matches the bare name
/// or `name(...)`; exclusion always wins.
pub fn is_tool_enabled(name: &str, config: &ServerConfig) -> bool {
    if let Some(exclude) = &config.exclude_tools {
        if exclude.iter().any(|entry| entry == name) {
            return false;
        }
    }
    match &config.include_tools {
        Some(include) => {
            let call_prefix = format!("{}(", name);
            include
                .iter()
                .any(|entry| entry == name || entry.starts_with(&call_prefix))
        }
        None => true,
    }
}
