//! Keel MCP
//!
//! Client side of the Model Context Protocol for Keel:
//! - Transport selection (stdio, SSE, Streamable HTTP) with cached OAuth tokens
//! - Per-server connection with timeouts and a runtime error hook
//! - Tool name resolution, schema sanitizing and registration
//! - OAuth-on-401 remediation (discovery, browser flow, token storage)
//! - Concurrent discovery across every configured server

pub mod client;
pub mod connector;
pub mod error;
pub mod oauth;
pub mod orchestrator;
pub mod registry;
pub mod schema;
pub mod tool_name;
pub mod transport;

pub use client::{McpClient, McpClientHandler, McpConnection};
pub use connector::{is_tool_enabled, ConnectOutcome, ServerConnector};
pub use error::{ConnectError, DiscoveryError, McpError, TransportError};
pub use oauth::{
    AuthChallenge, BrowserOAuthProvider, FileTokenStore, HttpOAuthDiscovery, InMemoryTokenStore,
    OAuthRemediator,
};
pub use orchestrator::{DiscoveryOrchestrator, DiscoveryReport};
pub use registry::{DiscoveredTool, InMemoryToolRegistry, ToolRegistry};
pub use schema::sanitize_parameters;
pub use tool_name::{resolve_tool_name, sanitize_identifier, MAX_TOOL_NAME_LEN};
pub use transport::{Transport, TransportFactory};
