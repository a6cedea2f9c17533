//! Tool registry
//!
//! Discovered tools are handed to a [`ToolRegistry`]. The registry is also the
//! authority on which names are taken when resolving collisions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rmcp::model::CallToolResult;
use serde_json::Value;

use crate::client::McpConnection;
use crate::error::McpError;

/// A tool discovered on an MCP server, callable through the server's connection.
#[derive(Clone)]
pub struct DiscoveredTool {
    pub server_name: String,
    /// Name declared by the server, used for `tools/call`.
    pub raw_name: String,
    /// Unique, API-legal name the tool is registered under.
    pub resolved_name: String,
    pub description: String,
    /// Sanitized JSON Schema of the arguments.
    pub parameters: Value,
    pub timeout: Duration,
    pub trust: bool,
    connection: Arc<McpConnection>,
}

impl std::fmt::Debug for DiscoveredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredTool")
            .field("server_name", &self.server_name)
            .field("raw_name", &self.raw_name)
            .field("resolved_name", &self.resolved_name)
            .field("timeout", &self.timeout)
            .field("trust", &self.trust)
            .finish()
    }
}

impl DiscoveredTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_name: String,
        raw_name: String,
        resolved_name: String,
        description: String,
        parameters: Value,
        timeout: Duration,
        trust: bool,
        connection: Arc<McpConnection>,
    ) -> Self {
        Self {
            server_name,
            raw_name,
            resolved_name,
            description,
            parameters,
            timeout,
            trust,
            connection,
        }
    }

    pub fn connection(&self) -> &Arc<McpConnection> {
        &self.connection
    }

    /// Run the tool on its server. `arguments` must be a JSON object or null.
    pub async fn execute(&self, arguments: Value) -> Result<CallToolResult, McpError> {
        let arguments = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(McpError::Server(format!(
                    "Tool arguments must be a JSON object, got {}",
                    other
                )))
            }
        };
        self.connection.call_tool(&self.raw_name, arguments).await
    }
}

/// Destination for discovered tools.
pub trait ToolRegistry: Send + Sync {
    fn register_tool(&self, tool: DiscoveredTool);

    fn get_tool(&self, name: &str) -> Option<DiscoveredTool>;

    fn get_tools_by_server(&self, server_name: &str) -> Vec<DiscoveredTool>;

    /// Unregister every tool of a server and return them.
    fn remove_tools_by_server(&self, server_name: &str) -> Vec<DiscoveredTool>;

    fn contains(&self, name: &str) -> bool {
        self.get_tool(name).is_some()
    }
}

/// Process-local [`ToolRegistry`].
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: RwLock<HashMap<String, DiscoveredTool>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All tools, sorted by resolved name.
    pub fn all_tools(&self) -> Vec<DiscoveredTool> {
        let mut tools: Vec<_> = self.tools.read().values().cloned().collect();
        tools.sort_by(|a, b| a.resolved_name.cmp(&b.resolved_name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn register_tool(&self, tool: DiscoveredTool) {
        self.tools.write().insert(tool.resolved_name.clone(), tool);
    }

    fn get_tool(&self, name: &str) -> Option<DiscoveredTool> {
        self.tools.read().get(name).cloned()
    }

    fn get_tools_by_server(&self, server_name: &str) -> Vec<DiscoveredTool> {
        let mut tools: Vec<_> = self
            .tools
            .read()
            .values()
            .filter(|tool| tool.server_name == server_name)
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.resolved_name.cmp(&b.resolved_name));
        tools
    }

    fn remove_tools_by_server(&self, server_name: &str) -> Vec<DiscoveredTool> {
        let mut tools = self.tools.write();
        let names: Vec<String> = tools
            .values()
            .filter(|tool| tool.server_name == server_name)
            .map(|tool| tool.resolved_name.clone())
            .collect();
        names
            .iter()
            .filter_map(|name| tools.remove(name))
            .collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }
}
